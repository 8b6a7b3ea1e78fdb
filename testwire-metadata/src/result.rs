// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The status of a single test.
///
/// Tests move from `Pending` to `Running`, then to one of the terminal statuses. `Skip` may also
/// be reached directly from `Pending`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    /// The test has not been observed yet.
    #[default]
    Pending,

    /// The test has started but not finished.
    Running,

    /// The test passed.
    Pass,

    /// The test failed an assertion.
    Fail,

    /// The test was skipped or never invoked.
    Skip,

    /// The test raised an unexpected error.
    Error,
}

impl TestStatus {
    /// Returns true if this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Pass | Self::Fail | Self::Skip | Self::Error)
    }

    /// Returns true if this status is a failure (`Fail` or `Error`).
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }

    /// Returns an uppercase label for this status, suitable for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The outcome of a single test or container.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestResult {
    /// The status of the test.
    pub status: TestStatus,

    /// A failure or skip message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// A stack trace, with embedded newlines preserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,

    /// How long the test took. Serialized as whole milliseconds.
    #[serde(
        default,
        rename = "duration-ms",
        with = "duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,

    /// The expected value of a failed assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,

    /// The actual value of a failed assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl TestResult {
    /// Creates a result with the given status and no detail.
    pub fn with_status(status: TestStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Sets the duration, returning `self`.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets the message, returning `self`.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<f64>::deserialize(deserializer)?;
        Ok(millis
            .filter(|millis| millis.is_finite() && *millis >= 0.0)
            .map(|millis| Duration::from_secs_f64(millis / 1000.0)))
    }
}
