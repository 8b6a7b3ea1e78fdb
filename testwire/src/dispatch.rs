// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    output::{OutputContext, OutputOpts, clap_styles},
    reporter::LineReporter,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use itertools::Itertools;
use std::{
    io::{self, Write},
    str::FromStr,
    sync::Arc,
};
use testwire_metadata::{FrameworkKind, RunMode, TestTree, TestwireExitCode};
use testwire_runner::{
    config::{RunConfig, TestwireConfig},
    coordinator::{CancelHandle, RunCoordinator},
    errors::RunError,
    launcher::{Launcher, ProcessLauncher, ReplayLauncher},
    signal::SignalHandlerKind,
    store::ResultStore,
};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{info, warn};

/// Run JVM test frameworks and stream their results.
///
/// testwire launches test runners for the nodes of a test tree, decodes what they print and
/// reports a result for every requested test.
#[derive(Debug, Parser)]
#[command(version, name = "testwire", styles = clap_styles::style())]
pub struct TestwireApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(subcommand)]
    command: Command,
}

impl TestwireApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output: OutputContext) -> Result<i32, ExpectedError> {
        let cwd = current_dir()?;
        let config = self.config_opts.make_config(&cwd)?;

        match self.command {
            Command::Run { tree, debug } => {
                let tree = tree.read()?;
                let mode = if debug { RunMode::Debug } else { RunMode::Run };
                let run_config = config.run().clone();
                let launcher = ProcessLauncher::new(config, cwd);
                run_tests(launcher, run_config, tree, mode, output)
            }
            Command::Replay { tree, captures } => {
                let tree = tree.read()?;
                let mut launcher = ReplayLauncher::new();
                for capture in captures {
                    launcher.add_capture(capture.project, capture.kind, capture.path);
                }
                run_tests(launcher, config.run().clone(), tree, RunMode::Run, output)
            }
            Command::ShowConfig => {
                let toml = config
                    .to_toml()
                    .map_err(|err| ExpectedError::ConfigSerializeError { err })?;
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(toml.as_bytes())
                    .and_then(|()| stdout.flush())
                    .map_err(|err| ExpectedError::WriteOutputError { err })?;
                Ok(TestwireExitCode::OK)
            }
        }
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "CONFIG OPTIONS")]
struct ConfigOpts {
    /// Config file [default: .config/testwire.toml in the current directory]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, cwd: &Utf8Path) -> Result<TestwireConfig, ExpectedError> {
        let env = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        let config = TestwireConfig::from_sources(
            cwd,
            self.config_file.as_deref(),
            env,
            |config_file, unknown| {
                warn!(
                    "ignoring unknown configuration keys in {config_file}: {}",
                    unknown.iter().join(", ")
                );
            },
        )?;
        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests from a test tree
    ///
    /// Each project and framework kind in the tree is run as a separate partition, using the
    /// command configured for that framework.
    Run {
        #[command(flatten)]
        tree: TreeOpts,

        /// Launch test processes in debug mode, reading their output from a socket
        #[arg(long)]
        debug: bool,
    },

    /// Decode previously captured runner output against a test tree
    Replay {
        #[command(flatten)]
        tree: TreeOpts,

        /// Captured output for a partition, e.g. `app:junit=out.txt`
        #[arg(long = "capture", value_name = "PROJECT:KIND=PATH", required = true)]
        captures: Vec<CaptureArg>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Debug, Args)]
struct TreeOpts {
    /// Path to the test tree, as JSON
    #[arg(long = "tests", short = 't', value_name = "PATH")]
    path: Utf8PathBuf,
}

impl TreeOpts {
    fn read(&self) -> Result<TestTree, ExpectedError> {
        let file = std::fs::File::open(&self.path)
            .map_err(|err| ExpectedError::test_tree_read_error(&self.path, err))?;
        TestTree::from_reader(io::BufReader::new(file))
            .map_err(|err| ExpectedError::test_tree_parse_error(&self.path, err))
    }
}

/// Captured output for one partition.
#[derive(Clone, Debug, Eq, PartialEq)]
struct CaptureArg {
    project: String,
    kind: FrameworkKind,
    path: Utf8PathBuf,
}

impl FromStr for CaptureArg {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let expected = || format!("expected PROJECT:KIND=PATH, found `{input}`");
        let (partition, path) = input.split_once('=').ok_or_else(expected)?;
        // Project names may contain colons; the kind never does.
        let (project, kind) = partition.rsplit_once(':').ok_or_else(expected)?;
        if project.is_empty() || path.is_empty() {
            return Err(expected());
        }
        let kind = kind.parse::<FrameworkKind>().map_err(|err| format!("{err}"))?;
        Ok(Self {
            project: project.to_owned(),
            kind,
            path: path.into(),
        })
    }
}

fn current_dir() -> Result<Utf8PathBuf, ExpectedError> {
    let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirInvalid { err })?;
    Utf8PathBuf::try_from(cwd).map_err(|err| ExpectedError::CurrentDirInvalid {
        err: err.into_io_error(),
    })
}

fn run_tests<L: Launcher>(
    launcher: L,
    run_config: RunConfig,
    tree: TestTree,
    mode: RunMode,
    output: OutputContext,
) -> Result<i32, ExpectedError> {
    if tree.leaf_count() == 0 {
        warn!("no tests to run");
        return Ok(TestwireExitCode::NO_TESTS_RUN);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ExpectedError::RuntimeBuildError { err })?;
    runtime.block_on(run_tests_impl(launcher, run_config, tree, mode, output))
}

async fn run_tests_impl<L: Launcher>(
    launcher: L,
    run_config: RunConfig,
    tree: TestTree,
    mode: RunMode,
    output: OutputContext,
) -> Result<i32, ExpectedError> {
    let mut signal_handler = SignalHandlerKind::Standard.build()?;
    let (cancel_handle, cancel) = CancelHandle::new();
    let store = Arc::new(ResultStore::new());
    let mut changes = store.subscribe();
    let coordinator = RunCoordinator::new(launcher, store, run_config);
    let mut reporter = LineReporter::new(
        io::stderr(),
        output.stderr_styles(),
        output.verbose,
        &tree.nodes,
    );
    let write_error = |err| ExpectedError::WriteOutputError { err };

    let run = coordinator.run(&tree.nodes, mode, &cancel);
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            Some(event) = signal_handler.recv() => {
                info!("received {}, cancelling test run", event.as_str());
                cancel_handle.cancel();
            }
            change = changes.recv() => match change {
                Ok(change) => reporter.write_change(&change).map_err(write_error)?,
                Err(RecvError::Lagged(count)) => {
                    warn!("{count} result updates were not displayed");
                }
                Err(RecvError::Closed) => {}
            },
        }
    };

    loop {
        match changes.try_recv() {
            Ok(change) => reporter.write_change(&change).map_err(write_error)?,
            Err(TryRecvError::Lagged(count)) => {
                warn!("{count} result updates were not displayed");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    let (summary, failures) = match result {
        Ok(summary) => (summary, Vec::new()),
        Err(RunError::PartitionsFailed { summary, failures }) => (summary, failures),
        Err(RunError::AlreadyRunning) => return Err(ExpectedError::RunAlreadyInFlight),
    };
    reporter.write_summary(&summary).map_err(write_error)?;

    if summary.cancelled {
        Err(ExpectedError::RunCancelled)
    } else if !failures.is_empty() {
        Err(ExpectedError::PartitionsFailed { failures })
    } else if summary.stats.has_failures() {
        Err(ExpectedError::TestRunFailed)
    } else {
        Ok(TestwireExitCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Color;
    use camino_tempfile::Utf8TempDir;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn verify_app() {
        TestwireApp::command().debug_assert();
    }

    #[test]
    fn capture_arg_parses() {
        let arg: CaptureArg = "app:junit-platform=target/out.txt"
            .parse()
            .expect("valid argument");
        assert_eq!(
            arg,
            CaptureArg {
                project: "app".to_owned(),
                kind: FrameworkKind::JUnitPlatform,
                path: "target/out.txt".into(),
            }
        );

        let arg: CaptureArg = "group:app:testng=a=b.txt".parse().expect("valid argument");
        assert_eq!(arg.project, "group:app");
        assert_eq!(arg.kind, FrameworkKind::TestNg);
        assert_eq!(arg.path, "a=b.txt");
    }

    #[test_case("app:junit"; "missing path")]
    #[test_case("app=out.txt"; "missing kind")]
    #[test_case(":junit=out.txt"; "empty project")]
    #[test_case("app:junit="; "empty path")]
    #[test_case("app:nunit=out.txt"; "unknown kind")]
    fn capture_arg_invalid(input: &str) {
        input
            .parse::<CaptureArg>()
            .expect_err("argument should be rejected");
    }

    #[test]
    fn replay_requires_capture() {
        let error = TestwireApp::try_parse_from(["testwire", "replay", "--tests", "tree.json"])
            .expect_err("--capture is required");
        assert_eq!(error.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    const TREE: &str = r#"{
        "nodes": [{
            "identity": { "project": "app", "qualified-name": "foo.Bar" },
            "level": "class",
            "kind": "junit",
            "children": [
                {
                    "identity": { "project": "app", "qualified-name": "foo.Bar#a" },
                    "level": "method"
                },
                {
                    "identity": { "project": "app", "qualified-name": "foo.Bar#b" },
                    "level": "method"
                }
            ]
        }]
    }"#;

    fn replay(capture: &str) -> (Utf8TempDir, Result<i32, ExpectedError>) {
        let dir = camino_tempfile::tempdir().expect("created temp dir");
        let tree_path = dir.path().join("tree.json");
        let capture_path = dir.path().join("capture.txt");
        let config_path = dir.path().join("testwire.toml");
        std::fs::write(&tree_path, TREE).expect("wrote tree");
        std::fs::write(&capture_path, capture).expect("wrote capture");
        std::fs::write(&config_path, "[run]\ndrain-timeout = \"1s\"\n").expect("wrote config");

        let app = TestwireApp::try_parse_from([
            "testwire",
            "--config-file",
            config_path.as_str(),
            "replay",
            "--tests",
            tree_path.as_str(),
            "--capture",
            &format!("app:junit={capture_path}"),
        ])
        .expect("arguments are valid");
        let output = OutputContext {
            verbose: false,
            color: Color::Never,
        };
        let result = app.exec(output);
        (dir, result)
    }

    #[test]
    fn replay_passing_capture() {
        let (_dir, result) = replay(
            "%TESTC  2 v2\n\
             %TESTS  1,a(foo.Bar)\n\
             %TESTE  1,a(foo.Bar)\n\
             %TESTS  2,b(foo.Bar)\n\
             %TESTE  2,b(foo.Bar)\n\
             %RUNTIME12\n",
        );
        assert_eq!(result.expect("run succeeds"), TestwireExitCode::OK);
    }

    #[test]
    fn replay_failing_capture() {
        let (_dir, result) = replay(
            "%TESTS  1,a(foo.Bar)\n\
             %FAILED 1,a(foo.Bar)\n\
             %TRACES\n\
             java.lang.AssertionError: boom\n\
             %TRACEE\n\
             %TESTE  1,a(foo.Bar)\n",
        );
        let error = result.expect_err("a test failed");
        assert_eq!(error.process_exit_code(), TestwireExitCode::TEST_RUN_FAILED);
    }

    #[test]
    fn missing_tree_is_a_setup_error() {
        let app = TestwireApp::try_parse_from([
            "testwire",
            "replay",
            "--tests",
            "testwire-no-such-tree.json",
            "--capture",
            "app:junit=out.txt",
        ])
        .expect("arguments are valid");
        let output = OutputContext {
            verbose: false,
            color: Color::Never,
        };
        let error = app.exec(output).expect_err("tree does not exist");
        assert_eq!(error.process_exit_code(), TestwireExitCode::SETUP_ERROR);
    }
}
