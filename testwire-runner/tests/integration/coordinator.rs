// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use color_eyre::eyre::{Result, bail, ensure};
use indoc::indoc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::{io::Write, time::Duration};
use testwire_metadata::{FrameworkKind, NodeLevel, RunMode, TestIdentity, TestNode, TestStatus};
use testwire_runner::{
    config::RunConfig,
    coordinator::{CancelHandle, CancelToken, RunCoordinator},
    errors::{PartitionErrorKind, RunError},
    launcher::{ExitIndicator, ReplayLauncher},
    store::ResultStore,
};

#[tokio::test]
async fn remote_protocol_pass() -> Result<()> {
    test_init();
    let launcher = ScriptedLauncher::new().output(
        PROJECT,
        FrameworkKind::JUnit,
        indoc! {"
            %TESTC  1 v2
            %TESTS  1,shouldPass(foo.Bar)
            %TESTE  1,shouldPass(foo.Bar)
            %RUNTIME12
        "},
    );
    let coordinator = coordinator(launcher);
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["shouldPass"])];

    let summary = coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let store = coordinator.store();
    assert_eq!(
        status(store, &method("foo.Bar", "shouldPass")),
        Some(TestStatus::Pass)
    );
    assert_eq!(
        status(store, &TestIdentity::new(PROJECT, "foo.Bar")),
        Some(TestStatus::Pass)
    );
    assert_eq!((summary.partitions, summary.stats.passed), (1, 1));
    assert!(!summary.cancelled);
    Ok(())
}

#[tokio::test]
async fn unique_id_failure_before_finish() -> Result<()> {
    test_init();
    let id = "[engine:junit-jupiter]/[class:x.Y]/[method:z()]";
    let output = [
        record(
            "testFailed",
            json!({ "id": id, "type": "TEST", "message": "boom" }),
        ),
        record("testFinished", json!({ "id": id, "type": "TEST" })),
    ]
    .concat();
    let launcher = ScriptedLauncher::new().output(PROJECT, FrameworkKind::JUnitPlatform, &output);
    let coordinator = coordinator(launcher);
    let nodes = [class_node(PROJECT, "x.Y", FrameworkKind::JUnitPlatform, &["z"])];

    coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let result = result(coordinator.store(), &method("x.Y", "z"));
    assert_eq!(result.status, TestStatus::Fail);
    assert_eq!(result.message.as_deref(), Some("boom"));
    Ok(())
}

#[tokio::test]
async fn flat_names_sticky_failure() -> Result<()> {
    test_init();
    let output = [
        record("testStarted", json!({ "name": "foo.Bar#flaky" })),
        record(
            "testFailed",
            json!({ "name": "foo.Bar#flaky", "message": "expected true" }),
        ),
        record("testFinished", json!({ "name": "foo.Bar#flaky", "duration": 4 })),
    ]
    .concat();
    let launcher = ScriptedLauncher::new().output(PROJECT, FrameworkKind::TestNg, &output);
    let coordinator = coordinator(launcher);
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::TestNg, &["flaky"])];

    coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let result = result(coordinator.store(), &method("foo.Bar", "flaky"));
    assert_eq!(result.status, TestStatus::Fail);
    assert_eq!(result.message.as_deref(), Some("expected true"));
    assert_eq!(result.duration, Some(Duration::from_millis(4)));
    Ok(())
}

#[tokio::test]
async fn re_execution_accumulates_duration() -> Result<()> {
    test_init();
    let output = [
        record("testStarted", json!({ "name": "foo.Bar#again" })),
        record("testFinished", json!({ "name": "foo.Bar#again", "duration": "10" })),
        record("testStarted", json!({ "name": "foo.Bar#again" })),
        record("testFinished", json!({ "name": "foo.Bar#again", "duration": 15 })),
    ]
    .concat();
    let launcher = ScriptedLauncher::new().output(PROJECT, FrameworkKind::TestNg, &output);
    let coordinator = coordinator(launcher);
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::TestNg, &["again"])];

    coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let result = result(coordinator.store(), &method("foo.Bar", "again"));
    assert_eq!(result.status, TestStatus::Pass);
    assert_eq!(result.duration, Some(Duration::from_millis(25)));
    Ok(())
}

#[tokio::test]
async fn parameterized_invocations_are_independent() -> Result<()> {
    test_init();
    let invocation = |n: usize| {
        format!(
            "[engine:junit-jupiter]/[class:foo.Bar]/[test-template:params(int)]/[test-template-invocation:#{n}]"
        )
    };
    let output = [
        record("testStarted", json!({ "id": invocation(1), "type": "TEST" })),
        record(
            "testFailed",
            json!({ "id": invocation(1), "type": "TEST", "message": "1 is odd" }),
        ),
        record("testFinished", json!({ "id": invocation(1), "type": "TEST" })),
        record("testStarted", json!({ "id": invocation(2), "type": "TEST" })),
        record("testFinished", json!({ "id": invocation(2), "type": "TEST" })),
        // The template itself finishing carries no information.
        record(
            "testFinished",
            json!({
                "id": "[engine:junit-jupiter]/[class:foo.Bar]/[test-template:params(int)]",
                "type": "TEST",
            }),
        ),
    ]
    .concat();
    let launcher =
        ScriptedLauncher::new().output(PROJECT, FrameworkKind::JUnitPlatform, &output);
    let coordinator = coordinator(launcher);

    let params = method("foo.Bar", "params");
    let first = params.with_invocation("[1]");
    let second = params.with_invocation("[2]");
    let nodes = [
        TestNode::new(TestIdentity::new(PROJECT, "foo.Bar"), NodeLevel::Class)
            .with_kind(FrameworkKind::JUnitPlatform)
            .with_children([TestNode::new(params.clone(), NodeLevel::Method).with_children([
                TestNode::new(first.clone(), NodeLevel::Invocation),
                TestNode::new(second.clone(), NodeLevel::Invocation),
            ])]),
    ];

    coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let store = coordinator.store();
    assert_eq!(status(store, &first), Some(TestStatus::Fail));
    assert_eq!(status(store, &second), Some(TestStatus::Pass));
    assert_eq!(status(store, &params), Some(TestStatus::Fail));
    Ok(())
}

#[tokio::test]
async fn unreported_tests_are_skipped() -> Result<()> {
    test_init();
    let launcher = ScriptedLauncher::new().output(
        PROJECT,
        FrameworkKind::JUnit,
        indoc! {"
            %TESTS  1,a(foo.Bar)
            %TESTE  1,a(foo.Bar)
            %TESTS  2,b(foo.Bar)
            %TESTE  2,b(foo.Bar)
        "},
    );
    let coordinator = coordinator(launcher);
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a", "b", "c"])];

    let summary = coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let store = coordinator.store();
    assert_eq!(status(store, &method("foo.Bar", "c")), Some(TestStatus::Skip));
    assert_eq!(
        status(store, &TestIdentity::new(PROJECT, "foo.Bar")),
        Some(TestStatus::Pass)
    );
    assert_eq!((summary.stats.passed, summary.stats.skipped), (2, 1));
    Ok(())
}

#[tokio::test]
async fn cancellation_leaves_gaps() -> Result<()> {
    test_init();
    let launcher = ScriptedLauncher::new()
        .hang(
            PROJECT,
            FrameworkKind::JUnit,
            indoc! {"
                %TESTS  1,a(foo.Bar)
                %TESTE  1,a(foo.Bar)
                %TESTS  2,b(foo.Bar)
                %TESTE  2,b(foo.Bar)
            "},
        )
        .output("lib", FrameworkKind::JUnit, "%TESTS  1,x(lib.X)\n");
    let coordinator = coordinator(launcher);
    let nodes = [
        class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a", "b", "c"]),
        class_node("lib", "lib.X", FrameworkKind::JUnit, &["x"]),
    ];
    let (handle, token) = CancelHandle::new();
    let store = coordinator.store().clone();

    let (summary, ()) = tokio::join!(
        coordinator.run(&nodes, RunMode::Run, &token),
        async {
            wait_for_result(&store, &method("foo.Bar", "b")).await;
            handle.cancel();
        },
    );
    let summary = summary?;

    assert!(summary.cancelled);
    assert_eq!(status(&store, &method("foo.Bar", "a")), Some(TestStatus::Pass));
    assert_eq!(status(&store, &method("foo.Bar", "b")), Some(TestStatus::Pass));
    assert_eq!(status(&store, &method("foo.Bar", "c")), None);
    assert_eq!(status(&store, &TestIdentity::new(PROJECT, "foo.Bar")), None);
    assert_eq!(
        status(&store, &TestIdentity::method("lib", "lib.X", "x")),
        None
    );
    // The partition after the cancellation is never launched.
    assert_eq!(coordinator_launches(&coordinator), 1);
    Ok(())
}

fn coordinator_launches(coordinator: &RunCoordinator<ScriptedLauncher>) -> usize {
    coordinator.launcher().launched().len()
}

#[tokio::test]
async fn at_most_one_run_in_flight() -> Result<()> {
    test_init();
    let launcher =
        ScriptedLauncher::new().hang(PROJECT, FrameworkKind::JUnit, "%TESTS  1,a(foo.Bar)\n");
    let coordinator = coordinator(launcher);
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"])];
    let (handle, token) = CancelHandle::new();

    let (first, second) = tokio::join!(coordinator.run(&nodes, RunMode::Run, &token), async {
        while !coordinator.is_running() {
            tokio::task::yield_now().await;
        }
        let second = coordinator
            .run(&nodes, RunMode::Run, &CancelToken::never())
            .await;
        handle.cancel();
        second
    });

    assert!(matches!(second, Err(RunError::AlreadyRunning)), "{second:?}");
    let first = first?;
    assert!(first.cancelled);
    // Once the first run is over, another may start.
    assert!(!coordinator.is_running());
    Ok(())
}

#[tokio::test]
async fn partition_failures_are_isolated() -> Result<()> {
    test_init();
    let launcher = ScriptedLauncher::new()
        .fail("lib", FrameworkKind::TestNg)
        .exit(
            "tools",
            FrameworkKind::JUnit,
            "%TESTS  1,t(tools.T)\n%TESTE  1,t(tools.T)\n",
            ExitIndicator::Failure(Some(3)),
        )
        .output(
            PROJECT,
            FrameworkKind::JUnit,
            "%TESTS  1,a(foo.Bar)\n%TESTE  1,a(foo.Bar)\n",
        );
    let coordinator = coordinator(launcher);
    let nodes = [
        class_node("lib", "lib.L", FrameworkKind::TestNg, &["l"]),
        class_node("tools", "tools.T", FrameworkKind::JUnit, &["t"]),
        class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"]),
    ];

    let error = coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await
        .expect_err("two partitions fail");
    let RunError::PartitionsFailed { summary, failures } = error else {
        bail!("expected partition failures, found {error:?}");
    };

    assert_eq!(summary.partitions, 3);
    let failed: Vec<_> = failures
        .iter()
        .map(|failure| (failure.project.as_str(), failure.kind))
        .collect();
    assert_eq!(
        failed,
        [
            ("lib", Some(FrameworkKind::TestNg)),
            ("tools", Some(FrameworkKind::JUnit)),
        ]
    );
    ensure!(
        matches!(failures[0].error, PartitionErrorKind::Launch(_)),
        "lib partition failed to launch"
    );
    ensure!(
        matches!(
            failures[1].error,
            PartitionErrorKind::AbnormalExit(ExitIndicator::Failure(Some(3)))
        ),
        "tools partition exited abnormally"
    );

    let store = coordinator.store();
    // Results of a partition that exited abnormally are still published.
    assert_eq!(
        status(store, &TestIdentity::method("tools", "tools.T", "t")),
        Some(TestStatus::Pass)
    );
    assert_eq!(status(store, &method("foo.Bar", "a")), Some(TestStatus::Pass));
    assert_eq!(
        status(store, &TestIdentity::method("lib", "lib.L", "l")),
        None
    );
    Ok(())
}

#[tokio::test]
async fn read_error_terminates_process() -> Result<()> {
    test_init();
    let launcher = ScriptedLauncher::new().read_error(
        PROJECT,
        FrameworkKind::JUnit,
        "%TESTS  1,a(foo.Bar)\n%TESTE  1,a(foo.Bar)\n%TESTS  2,b(foo.Bar)\n",
    );
    let coordinator = coordinator(launcher);
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a", "b"])];

    // The scripted process only exits once terminated.
    let error = tokio::time::timeout(
        Duration::from_secs(10),
        coordinator.run(&nodes, RunMode::Run, &CancelToken::never()),
    )
    .await?
    .expect_err("the partition fails");
    let RunError::PartitionsFailed { failures, .. } = error else {
        bail!("expected partition failures, found {error:?}");
    };
    ensure!(
        matches!(failures[0].error, PartitionErrorKind::Read(_)),
        "partition failed reading output"
    );
    assert_eq!(coordinator.launcher().terminated(), 1);

    let store = coordinator.store();
    assert_eq!(status(store, &method("foo.Bar", "a")), Some(TestStatus::Pass));
    assert_eq!(status(store, &method("foo.Bar", "b")), Some(TestStatus::Error));
    Ok(())
}

#[tokio::test]
async fn missing_framework_kind_fails_partition() -> Result<()> {
    test_init();
    let coordinator = coordinator(ScriptedLauncher::new());
    let nodes = [TestNode::new(TestIdentity::new(PROJECT, "foo.Bar"), NodeLevel::Class)
        .with_children([TestNode::new(method("foo.Bar", "a"), NodeLevel::Method)])];

    let error = coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await
        .expect_err("partition has no kind");
    let RunError::PartitionsFailed { failures, .. } = error else {
        bail!("expected partition failures, found {error:?}");
    };
    ensure!(
        matches!(failures[0].error, PartitionErrorKind::NoFrameworkKind),
        "unexpected failure: {:?}",
        failures[0]
    );
    assert_eq!(coordinator_launches(&coordinator), 0);
    Ok(())
}

#[tokio::test]
async fn invalidation_by_file() -> Result<()> {
    test_init();
    let launcher = ScriptedLauncher::new().output(
        PROJECT,
        FrameworkKind::JUnit,
        indoc! {"
            %TESTS  1,a(foo.Bar)
            %TESTE  1,a(foo.Bar)
            %TESTS  2,b(foo.Baz)
            %TESTE  2,b(foo.Baz)
        "},
    );
    let coordinator = coordinator(launcher);
    let nodes = [
        class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"]),
        class_node(PROJECT, "foo.Baz", FrameworkKind::JUnit, &["b"]),
    ];
    coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let store = coordinator.store();
    let bar = Utf8Path::new("src/test/java/foo/Bar.java");
    let results = store
        .get_results_for_file(bar)
        .expect("results recorded for Bar.java");
    // The class and its method.
    assert_eq!(results.len(), 2);

    store.invalidate_file(bar);
    assert!(!store.has_results_for_file(bar));
    assert_eq!(status(store, &method("foo.Bar", "a")), None);
    assert_eq!(status(store, &method("foo.Baz", "b")), Some(TestStatus::Pass));
    Ok(())
}

#[tokio::test]
async fn replay_captured_output() -> Result<()> {
    test_init();
    let mut capture = camino_tempfile::NamedUtf8TempFile::new()?;
    // Captured output may use a legacy encoding.
    capture.write_all(b"%TESTS  1,caf\xe9(foo.Bar)\n%TESTE  1,caf\xe9(foo.Bar)\n")?;
    capture.flush()?;

    let mut launcher = ReplayLauncher::new();
    launcher.add_capture(PROJECT, FrameworkKind::JUnit, capture.path());
    let coordinator = RunCoordinator::new(
        launcher,
        std::sync::Arc::new(ResultStore::new()),
        RunConfig::default().with_encoding(encoding_rs::WINDOWS_1252),
    );
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["café"])];

    coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    assert_eq!(
        status(coordinator.store(), &method("foo.Bar", "café")),
        Some(TestStatus::Pass)
    );
    Ok(())
}
