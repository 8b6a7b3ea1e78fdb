// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::FrameworkKindParseError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The test framework a group of tests is executed with.
///
/// Each kind speaks exactly one wire format.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkKind {
    /// A runner speaking the `%`-prefixed remote protocol.
    #[serde(rename = "junit")]
    JUnit,

    /// A runner emitting sentinel-wrapped JSON records with hierarchical unique ids.
    #[serde(rename = "junit-platform")]
    JUnitPlatform,

    /// A runner emitting sentinel-wrapped JSON records with flat test names.
    #[serde(rename = "testng")]
    TestNg,
}

impl FrameworkKind {
    /// All known framework kinds.
    pub const ALL: [Self; 3] = [Self::JUnit, Self::JUnitPlatform, Self::TestNg];

    /// Returns the string representation of this kind, as used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JUnit => "junit",
            Self::JUnitPlatform => "junit-platform",
            Self::TestNg => "testng",
        }
    }

    /// Returns the string representations of all kinds.
    pub fn variants() -> impl Iterator<Item = &'static str> {
        Self::ALL.iter().map(|kind| kind.as_str())
    }
}

impl fmt::Display for FrameworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameworkKind {
    type Err = FrameworkKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| FrameworkKindParseError::new(s))
    }
}

/// Whether tests are run normally or under a debugger.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Tests are run normally and the protocol is read from the process output.
    #[default]
    Run,

    /// Tests are run with a debugger attached; the protocol is read from a socket the process
    /// connects back to.
    Debug,
}

impl RunMode {
    /// Returns true if this is debug mode.
    pub fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }
}
