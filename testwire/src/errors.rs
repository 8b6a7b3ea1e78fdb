// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use itertools::Itertools;
use owo_colors::OwoColorize;
use std::{error::Error, io};
use testwire_metadata::{TestTreeParseError, TestwireExitCode};
use testwire_runner::errors::{ConfigParseError, PartitionError, SignalHandlerSetupError};
use thiserror::Error;
use tracing::error;

/// An error that occurred in a program that testwire ran, or in testwire itself.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("current directory is invalid")]
    CurrentDirInvalid {
        #[source]
        err: io::Error,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("failed to serialize config")]
    ConfigSerializeError {
        #[source]
        err: toml::ser::Error,
    },
    #[error("failed to read test tree")]
    TestTreeReadError {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },
    #[error("failed to parse test tree")]
    TestTreeParseError {
        path: Utf8PathBuf,
        #[source]
        err: TestTreeParseError,
    },
    #[error("error setting up signal handler")]
    SignalHandlerSetupError {
        #[from]
        err: SignalHandlerSetupError,
    },
    #[error("failed to build the async runtime")]
    RuntimeBuildError {
        #[source]
        err: io::Error,
    },
    #[error("a test run is already in progress")]
    RunAlreadyInFlight,
    #[error("partitions failed")]
    PartitionsFailed { failures: Vec<PartitionError> },
    #[error("test run cancelled")]
    RunCancelled,
    #[error("test run failed")]
    TestRunFailed,
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn test_tree_read_error(path: impl Into<Utf8PathBuf>, err: io::Error) -> Self {
        Self::TestTreeReadError {
            path: path.into(),
            err,
        }
    }

    pub(crate) fn test_tree_parse_error(
        path: impl Into<Utf8PathBuf>,
        err: TestTreeParseError,
    ) -> Self {
        Self::TestTreeParseError {
            path: path.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirInvalid { .. }
            | Self::ConfigParseError { .. }
            | Self::ConfigSerializeError { .. }
            | Self::TestTreeReadError { .. }
            | Self::TestTreeParseError { .. }
            | Self::SignalHandlerSetupError { .. }
            | Self::RuntimeBuildError { .. } => TestwireExitCode::SETUP_ERROR,
            Self::RunAlreadyInFlight => TestwireExitCode::RUN_ALREADY_IN_FLIGHT,
            Self::PartitionsFailed { .. } => TestwireExitCode::PARTITIONS_FAILED,
            Self::RunCancelled => TestwireExitCode::RUN_CANCELLED,
            Self::TestRunFailed => TestwireExitCode::TEST_RUN_FAILED,
            Self::WriteOutputError { .. } => TestwireExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirInvalid { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse testwire config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ConfigSerializeError { err } => {
                error!("failed to render config as TOML");
                Some(err as &dyn Error)
            }
            Self::TestTreeReadError { path, err } => {
                error!("failed to read test tree from `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::TestTreeParseError { path, err } => {
                error!("failed to parse test tree at `{}`", path.style(styles.bold));
                err.source()
            }
            Self::SignalHandlerSetupError { err } => {
                error!("error setting up signal handler");
                Some(err as &dyn Error)
            }
            Self::RuntimeBuildError { err } => {
                error!("failed to build the async runtime");
                Some(err as &dyn Error)
            }
            Self::RunAlreadyInFlight => {
                error!("a test run is already in progress");
                None
            }
            Self::PartitionsFailed { failures } => {
                error!(
                    "{} {} failed",
                    failures.len().style(styles.bold),
                    plural_partitions(failures.len()),
                );
                for failure in failures {
                    let chain = std::iter::successors(failure.source(), |err: &&dyn std::error::Error| (*err).source());
                    error!(
                        target: NO_HEADING_TARGET,
                        "  {}: {}",
                        failure.to_string().style(styles.warning_text),
                        chain.map(|err| err.to_string()).join(": "),
                    );
                }
                None
            }
            Self::RunCancelled => {
                error!("test run cancelled");
                None
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

fn plural_partitions(count: usize) -> &'static str {
    if count == 1 { "partition" } else { "partitions" }
}
