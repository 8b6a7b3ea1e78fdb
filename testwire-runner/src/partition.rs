// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Grouping of requested test nodes by project and framework kind.

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::collections::HashMap;
use testwire_metadata::{FrameworkKind, TestIdentity, TestNode};

/// The requested nodes sharing one project and framework kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Partition {
    /// The project.
    pub project: SmolStr,

    /// The framework kind, or `None` if neither a node nor any of its ancestors declares one.
    pub kind: Option<FrameworkKind>,

    /// The requested root nodes of this partition, in request order.
    pub nodes: Vec<TestNode>,
}

impl Partition {
    /// Iterates over the requested leaves of this partition.
    pub fn leaves(&self) -> impl Iterator<Item = &TestNode> + '_ {
        self.nodes.iter().flat_map(|node| node.leaves())
    }

    /// Returns the source file of every node that declares, or inherits, one.
    pub fn sources(&self) -> HashMap<TestIdentity, Utf8PathBuf> {
        let mut sources = HashMap::new();
        let mut stack: Vec<(&TestNode, Option<&Utf8PathBuf>)> =
            self.nodes.iter().map(|node| (node, None)).collect();
        while let Some((node, inherited)) = stack.pop() {
            let source = node.source_path.as_ref().or(inherited);
            if let Some(source) = source {
                sources.insert(node.identity.clone(), source.clone());
            }
            stack.extend(node.children.iter().map(|child| (child, source)));
        }
        sources
    }
}

/// Splits requested nodes into partitions by `(project, framework kind)`.
///
/// A node without a kind inherits its parent's, or failing that takes the first kind declared
/// below it. A container whose descendants declare different kinds is split into its children.
/// Partitions are returned in the order their first node was requested.
pub fn partition_nodes(nodes: &[TestNode]) -> Vec<Partition> {
    let mut partitions: IndexMap<(SmolStr, Option<FrameworkKind>), Vec<TestNode>> =
        IndexMap::new();
    for node in nodes {
        assign(node, None, &mut partitions);
    }
    partitions
        .into_iter()
        .map(|((project, kind), nodes)| Partition {
            project,
            kind,
            nodes,
        })
        .collect()
}

fn assign(
    node: &TestNode,
    inherited: Option<FrameworkKind>,
    partitions: &mut IndexMap<(SmolStr, Option<FrameworkKind>), Vec<TestNode>>,
) {
    let kind = node
        .kind
        .or(inherited)
        .or_else(|| node.walk().find_map(|descendant| descendant.kind));
    let mixed = node
        .walk()
        .skip(1)
        .any(|descendant| descendant.kind.is_some_and(|k| Some(k) != kind));

    if mixed {
        for child in &node.children {
            assign(child, kind, partitions);
        }
    } else {
        partitions
            .entry((node.identity.project.clone(), kind))
            .or_default()
            .push(node.clone());
    }
}
