// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testwire.

use crate::{coordinator::RunSummary, launcher::ExitIndicator};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use smol_str::SmolStr;
use std::{error, fmt, io, time::Duration};
use testwire_metadata::FrameworkKind;
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse testwire config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of a [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// Building the layered configuration failed.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// Deserializing the layered configuration failed.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The configured encoding is not known.
    #[error("unknown encoding `{label}` in run.encoding")]
    UnknownEncoding {
        /// The encoding label.
        label: String,
    },
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// An error that occurred while obtaining a test session for a partition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// No command is configured for the framework kind.
    #[error("no command configured for framework kind `{kind}` (set frameworks.{kind}.command)")]
    NoCommand {
        /// The framework kind.
        kind: FrameworkKind,
    },

    /// The list of requested tests could not be written.
    #[error("failed to write the list of requested tests")]
    TestsFile(#[source] io::Error),

    /// The debug listener could not be bound.
    #[error("failed to bind a debug listener on 127.0.0.1")]
    Bind(#[source] io::Error),

    /// The test process could not be spawned.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Accepting the debug connection failed.
    #[error("failed to accept the debug connection")]
    Accept(#[source] io::Error),

    /// The test process did not connect back in time.
    #[error("test process did not connect within {}", humantime::format_duration(*.timeout))]
    AcceptTimeout {
        /// The configured timeout.
        timeout: Duration,
    },

    /// The test process exited before connecting back.
    #[error("test process exited before connecting ({exit})")]
    ExitedBeforeConnect {
        /// How the process exited.
        exit: ExitIndicator,
    },

    /// No capture is registered for the partition.
    #[error("no captured output registered for {project}:{kind}")]
    NoCapture {
        /// The project.
        project: SmolStr,

        /// The framework kind.
        kind: FrameworkKind,
    },

    /// A capture could not be opened.
    #[error("failed to open captured output at `{path}`")]
    CaptureOpen {
        /// The path of the capture.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The run was cancelled while the session was being set up.
    #[error("cancelled while launching")]
    Cancelled,
}

/// The reason a partition failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PartitionErrorKind {
    /// None of the partition's nodes declares a framework kind.
    #[error("no framework kind declared")]
    NoFrameworkKind,

    /// A session could not be obtained.
    #[error("failed to launch tests")]
    Launch(#[source] LaunchError),

    /// Reading the session's output failed.
    #[error("failed to read test output")]
    Read(#[source] io::Error),

    /// Waiting for the session to exit failed.
    #[error("failed to wait for the test process")]
    Wait(#[source] io::Error),

    /// The session ended abnormally.
    #[error("test process {0}")]
    AbnormalExit(ExitIndicator),
}

/// A failure of a single partition. Other partitions are unaffected.
#[derive(Debug, Error)]
#[error("partition {project}:{} failed", display_kind(*.kind))]
pub struct PartitionError {
    /// The project.
    pub project: SmolStr,

    /// The framework kind of the partition, if it has one.
    pub kind: Option<FrameworkKind>,

    /// What went wrong.
    #[source]
    pub error: PartitionErrorKind,
}

fn display_kind(kind: Option<FrameworkKind>) -> &'static str {
    kind.map_or("<unknown>", FrameworkKind::as_str)
}

/// An error returned by [`RunCoordinator::run`](crate::coordinator::RunCoordinator::run).
#[derive(Debug, Error)]
pub enum RunError {
    /// Another run is already in flight.
    #[error("a test run is already in progress")]
    AlreadyRunning,

    /// One or more partitions failed. Results of the other partitions are still published.
    #[error(
        "{} of {} partitions failed: {}",
        .failures.len(),
        .summary.partitions,
        .failures.iter().map(|failure| format!("{}:{}", failure.project, display_kind(failure.kind))).join(", "),
    )]
    PartitionsFailed {
        /// The summary of the run.
        summary: RunSummary,

        /// The failed partitions, in run order.
        failures: Vec<PartitionError>,
    },
}

/// Displays an error along with its chain of sources, one per line.
pub struct DisplayErrorChain<E>(E);

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, "\n  caused by: {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
