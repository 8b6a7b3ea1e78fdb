// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::FrameworkKind;
use std::{error, fmt};

/// An error that occurs while parsing a [`FrameworkKind`] from a string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameworkKindParseError {
    input: String,
}

impl FrameworkKindParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for FrameworkKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known: Vec<_> = FrameworkKind::variants().collect();
        write!(
            f,
            "unrecognized framework kind: {} (known kinds: {})",
            self.input,
            known.join(", ")
        )
    }
}

impl error::Error for FrameworkKindParseError {}

/// An error that occurs while reading a [`TestTree`](crate::TestTree) from JSON.
#[derive(Debug)]
pub struct TestTreeParseError {
    err: serde_json::Error,
}

impl TestTreeParseError {
    pub(crate) fn new(err: serde_json::Error) -> Self {
        Self { err }
    }
}

impl fmt::Display for TestTreeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse test tree")
    }
}

impl error::Error for TestTreeParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.err)
    }
}
