// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// The separator between a class name and a method name in a qualified name.
pub const METHOD_SEPARATOR: char = '#';

/// A stable, caller-assigned key for a single test unit.
///
/// Identities are assigned by discovery before a run starts, and are never changed afterwards.
/// Equality is structural: two identities with the same project, qualified name and invocation
/// refer to the same test.
///
/// Qualified names follow the `pkg.Class` and `pkg.Class#method` conventions. Nested classes are
/// dot-joined, e.g. `pkg.Outer.Inner#method`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestIdentity {
    /// The project this test belongs to.
    pub project: SmolStr,

    /// The qualified name of the test, e.g. `foo.Bar#shouldPass`.
    pub qualified_name: String,

    /// The invocation discriminator for dynamically generated sub-tests, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<String>,
}

impl TestIdentity {
    /// Creates a new identity without an invocation discriminator.
    pub fn new(project: impl Into<SmolStr>, qualified_name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            qualified_name: qualified_name.into(),
            invocation: None,
        }
    }

    /// Creates a method identity from a class name and a method name.
    pub fn method(
        project: impl Into<SmolStr>,
        class_name: impl AsRef<str>,
        method_name: impl AsRef<str>,
    ) -> Self {
        Self::new(
            project,
            format!(
                "{}{METHOD_SEPARATOR}{}",
                class_name.as_ref(),
                method_name.as_ref()
            ),
        )
    }

    /// Returns a copy of this identity carrying the given invocation discriminator.
    pub fn with_invocation(&self, invocation: impl Into<String>) -> Self {
        Self {
            project: self.project.clone(),
            qualified_name: self.qualified_name.clone(),
            invocation: Some(invocation.into()),
        }
    }

    /// Returns the class part of the qualified name.
    pub fn class_name(&self) -> &str {
        match self.qualified_name.split_once(METHOD_SEPARATOR) {
            Some((class_name, _)) => class_name,
            None => &self.qualified_name,
        }
    }

    /// Returns the method part of the qualified name, if this identity refers to a method.
    pub fn method_name(&self) -> Option<&str> {
        self.qualified_name
            .split_once(METHOD_SEPARATOR)
            .map(|(_, method)| method)
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.qualified_name)?;
        if let Some(invocation) = &self.invocation {
            write!(f, "[{invocation}]")?;
        }
        Ok(())
    }
}
