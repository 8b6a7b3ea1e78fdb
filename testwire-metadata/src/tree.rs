// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{FrameworkKind, TestIdentity, TestTreeParseError};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::io;

/// The level of a node within a test tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeLevel {
    /// A package, module or project-level grouping.
    Container,

    /// A test class.
    Class,

    /// A test method. Methods with invocation children behave as containers.
    Method,

    /// A dynamically generated sub-test of a parameterized or templated method.
    Invocation,
}

/// A node in a test tree, produced by discovery before a run starts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestNode {
    /// The identity of this node.
    pub identity: TestIdentity,

    /// The level of this node.
    pub level: NodeLevel,

    /// The framework this node is executed with. Inherited from the nearest ancestor if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FrameworkKind>,

    /// The source file this node was discovered in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<Utf8PathBuf>,

    /// A human-readable name. Never parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Child nodes, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestNode>,
}

impl TestNode {
    /// Creates a new node with no children.
    pub fn new(identity: TestIdentity, level: NodeLevel) -> Self {
        Self {
            identity,
            level,
            kind: None,
            source_path: None,
            display_name: None,
            children: Vec::new(),
        }
    }

    /// Sets the framework kind, returning `self`.
    pub fn with_kind(mut self, kind: FrameworkKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the source path, returning `self`.
    pub fn with_source_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    /// Appends children, returning `self`.
    pub fn with_children(mut self, children: impl IntoIterator<Item = TestNode>) -> Self {
        self.children.extend(children);
        self
    }

    /// Returns true if this node has no children.
    ///
    /// Leaves are the only nodes with directly reported results.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterates over this node and all its descendants in depth-first pre-order.
    pub fn walk(&self) -> impl Iterator<Item = &TestNode> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Iterates over all leaf descendants of this node, including the node itself if it's a leaf.
    pub fn leaves(&self) -> impl Iterator<Item = &TestNode> + '_ {
        self.walk().filter(|node| node.is_leaf())
    }
}

/// A set of requested test nodes, as handed over by discovery.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestTree {
    /// The top-level requested nodes.
    pub nodes: Vec<TestNode>,
}

impl TestTree {
    /// Parses a test tree from a JSON string.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, TestTreeParseError> {
        serde_json::from_str(json.as_ref()).map_err(TestTreeParseError::new)
    }

    /// Reads a test tree from a reader producing JSON.
    pub fn from_reader(reader: impl io::Read) -> Result<Self, TestTreeParseError> {
        serde_json::from_reader(reader).map_err(TestTreeParseError::new)
    }

    /// Returns the number of leaves in this tree.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().map(|node| node.leaves().count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn walk_order() {
        let class = TestNode::new(TestIdentity::new("p", "a.B"), NodeLevel::Class).with_children([
            TestNode::new(TestIdentity::method("p", "a.B", "x"), NodeLevel::Method),
            TestNode::new(TestIdentity::method("p", "a.B", "y"), NodeLevel::Method),
        ]);
        let names: Vec<_> = class
            .walk()
            .map(|node| node.identity.qualified_name.as_str())
            .collect();
        assert_eq!(names, ["a.B", "a.B#x", "a.B#y"]);
        assert_eq!(class.leaves().count(), 2);
    }

    #[test]
    fn parse_tree() {
        let tree = TestTree::parse_json(
            r#"{
                "nodes": [{
                    "identity": {"project": "p", "qualified-name": "a.B"},
                    "level": "class",
                    "kind": "junit",
                    "source-path": "src/test/java/a/B.java",
                    "children": [{
                        "identity": {"project": "p", "qualified-name": "a.B#x"},
                        "level": "method"
                    }]
                }]
            }"#,
        )
        .expect("tree parses");
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.nodes[0].kind, Some(FrameworkKind::JUnit));
    }
}
