// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests for [`ProcessLauncher`], driving small shell scripts.

#![cfg(unix)]

use crate::fixtures::*;
use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, bail, ensure};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use testwire_metadata::{FrameworkKind, RunMode, TestStatus};
use testwire_runner::{
    config::TestwireConfig,
    coordinator::{CancelToken, RunCoordinator},
    errors::{LaunchError, PartitionErrorKind, RunError},
    launcher::{ExitIndicator, ProcessLauncher},
    store::ResultStore,
};

fn coordinator_for(config: &str) -> Result<(Utf8TempDir, RunCoordinator<ProcessLauncher>)> {
    let dir = camino_tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join(".config"))?;
    std::fs::write(dir.path().join(TestwireConfig::CONFIG_PATH), config)?;
    let config = TestwireConfig::from_sources(dir.path(), None, [], |_, _| {})?;
    let run_config = config.run().clone();
    let launcher = ProcessLauncher::new(config, dir.path());
    let coordinator = RunCoordinator::new(launcher, Arc::new(ResultStore::new()), run_config);
    Ok((dir, coordinator))
}

#[tokio::test]
async fn runs_configured_command() -> Result<()> {
    test_init();
    // The script echoes the tests file back as protocol lines, so this also checks placeholders.
    let (dir, coordinator) = coordinator_for(
        r#"
        [frameworks.testng]
        command = [
            "sh", "-c",
            "test \"$1\" = app || exit 9; while read -r name; do printf '@@<TestRunner-{\"name\":\"testStarted\",\"attributes\":{\"name\":\"%s\"}}-TestRunner>\n@@<TestRunner-{\"name\":\"testFinished\",\"attributes\":{\"name\":\"%s\"}}-TestRunner>\n' \"$name\" \"$name\"; done < \"$2\"; echo done >&2",
            "runner", "{project}", "{tests-file}",
        ]
        "#,
    )?;
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::TestNg, &["a", "b"])];

    let summary = coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await?;

    let store = coordinator.store();
    assert_eq!(status(store, &method("foo.Bar", "a")), Some(TestStatus::Pass));
    assert_eq!(status(store, &method("foo.Bar", "b")), Some(TestStatus::Pass));
    assert_eq!(summary.stats.passed, 2);
    drop(dir);
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_fails_partition() -> Result<()> {
    test_init();
    let (_dir, coordinator) = coordinator_for(
        r#"
        [frameworks.junit]
        command = ["sh", "-c", "printf '%%TESTS  1,a(foo.Bar)\n%%TESTE  1,a(foo.Bar)\n'; exit 3"]
        "#,
    )?;
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"])];

    let error = coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await
        .expect_err("exit code 3 fails the partition");
    let RunError::PartitionsFailed { failures, .. } = error else {
        bail!("expected partition failures, found {error:?}");
    };
    ensure!(
        matches!(
            failures[0].error,
            PartitionErrorKind::AbnormalExit(ExitIndicator::Failure(Some(3)))
        ),
        "unexpected failure: {:?}",
        failures[0]
    );
    assert_eq!(
        status(coordinator.store(), &method("foo.Bar", "a")),
        Some(TestStatus::Pass)
    );
    Ok(())
}

#[tokio::test]
async fn spawn_failure() -> Result<()> {
    test_init();
    let (_dir, coordinator) = coordinator_for(
        r#"
        [frameworks.junit]
        command = ["testwire-no-such-program"]
        "#,
    )?;
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"])];

    let error = coordinator
        .run(&nodes, RunMode::Run, &CancelToken::never())
        .await
        .expect_err("program does not exist");
    let RunError::PartitionsFailed { failures, .. } = error else {
        bail!("expected partition failures, found {error:?}");
    };
    ensure!(
        matches!(
            &failures[0].error,
            PartitionErrorKind::Launch(LaunchError::Spawn { command, .. })
                if command == "testwire-no-such-program"
        ),
        "unexpected failure: {:?}",
        failures[0]
    );
    Ok(())
}

#[tokio::test]
async fn debug_mode_exit_before_connect() -> Result<()> {
    test_init();
    let (_dir, coordinator) = coordinator_for(
        r#"
        [frameworks.junit]
        command = ["sh", "-c", "exit 0"]
        debug-args = ["{port}"]
        "#,
    )?;
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"])];

    let error = coordinator
        .run(&nodes, RunMode::Debug, &CancelToken::never())
        .await
        .expect_err("process never connects");
    let RunError::PartitionsFailed { failures, .. } = error else {
        bail!("expected partition failures, found {error:?}");
    };
    ensure!(
        matches!(
            failures[0].error,
            PartitionErrorKind::Launch(LaunchError::ExitedBeforeConnect {
                exit: ExitIndicator::Success
            })
        ),
        "unexpected failure: {:?}",
        failures[0]
    );
    Ok(())
}

#[tokio::test]
async fn debug_mode_accept_timeout() -> Result<()> {
    test_init();
    let (_dir, coordinator) = coordinator_for(
        r#"
        [run]
        accept-timeout = "100ms"

        [frameworks.junit]
        command = ["sleep", "30"]
        "#,
    )?;
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"])];

    let error = coordinator
        .run(&nodes, RunMode::Debug, &CancelToken::never())
        .await
        .expect_err("process never connects");
    let RunError::PartitionsFailed { failures, .. } = error else {
        bail!("expected partition failures, found {error:?}");
    };
    ensure!(
        matches!(
            failures[0].error,
            PartitionErrorKind::Launch(LaunchError::AcceptTimeout { .. })
        ),
        "unexpected failure: {:?}",
        failures[0]
    );
    Ok(())
}

#[tokio::test]
async fn debug_mode_reads_from_socket() -> Result<()> {
    test_init();
    // bash's /dev/tcp pseudo-device is the most portable way to connect back from a script.
    if !Utf8Path::new("/bin/bash").exists() {
        return Ok(());
    }
    let (_dir, coordinator) = coordinator_for(
        r#"
        [frameworks.junit]
        command = ["/bin/bash", "-c"]
        debug-args = [
            "exec 3<>/dev/tcp/127.0.0.1/{port} && printf '%%TESTS  1,a(foo.Bar)\n%%TESTE  1,a(foo.Bar)\n' >&3",
        ]
        "#,
    )?;
    let nodes = [class_node(PROJECT, "foo.Bar", FrameworkKind::JUnit, &["a"])];

    coordinator
        .run(&nodes, RunMode::Debug, &CancelToken::never())
        .await?;

    assert_eq!(
        status(coordinator.store(), &method("foo.Bar", "a")),
        Some(TestStatus::Pass)
    );
    Ok(())
}
