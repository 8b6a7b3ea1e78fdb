// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping of runner-local keys onto caller-assigned identities.

use crate::decoder::{InvocationRef, RunnerKey};
use itertools::Itertools;
use smol_str::SmolStr;
use std::collections::HashMap;
use testwire_metadata::{NodeLevel, TestIdentity, TestNode};
use tracing::{debug, warn};

/// The outcome of resolving a [`RunnerKey`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolved {
    /// The identity the event applies to.
    pub identity: TestIdentity,

    /// Set the first time an invocation is synthesized: the node it must be attached under.
    pub attach_to: Option<TestIdentity>,
}

/// Resolves [`RunnerKey`]s against the requested test nodes of one partition.
///
/// Invocations are matched by position, never by display name.
#[derive(Debug)]
pub struct IdentityResolver {
    project: SmolStr,
    classes: HashMap<String, TestIdentity>,
    methods: HashMap<(String, String), MethodEntry>,
}

#[derive(Debug)]
struct MethodEntry {
    identity: TestIdentity,
    invocations: Vec<InvocationSlot>,
    synthesized: HashMap<Vec<usize>, TestIdentity>,
}

#[derive(Debug)]
struct InvocationSlot {
    identity: TestIdentity,
    children: Vec<InvocationSlot>,
}

impl InvocationSlot {
    fn from_node(node: &TestNode) -> Self {
        Self {
            identity: node.identity.clone(),
            children: invocation_slots(&node.children),
        }
    }
}

fn invocation_slots(children: &[TestNode]) -> Vec<InvocationSlot> {
    children
        .iter()
        .filter(|child| child.level == NodeLevel::Invocation)
        .map(InvocationSlot::from_node)
        .collect()
}

impl IdentityResolver {
    /// Creates a resolver for the given project from the partition's requested nodes.
    pub fn new<'a>(
        project: impl Into<SmolStr>,
        nodes: impl IntoIterator<Item = &'a TestNode>,
    ) -> Self {
        let mut classes = HashMap::new();
        let mut methods = HashMap::new();
        for node in nodes.into_iter().flat_map(|node| node.walk()) {
            match node.level {
                NodeLevel::Class => {
                    classes.insert(node.identity.qualified_name.clone(), node.identity.clone());
                }
                NodeLevel::Method => {
                    let Some(method) = node.identity.method_name() else {
                        warn!(identity = %node.identity, "method node has no method name");
                        continue;
                    };
                    let key = (node.identity.class_name().to_owned(), method.to_owned());
                    methods.insert(
                        key,
                        MethodEntry {
                            identity: node.identity.clone(),
                            invocations: invocation_slots(&node.children),
                            synthesized: HashMap::new(),
                        },
                    );
                }
                NodeLevel::Container | NodeLevel::Invocation => {}
            }
        }

        Self {
            project: project.into(),
            classes,
            methods,
        }
    }

    /// Returns the project this resolver was created for.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Resolves a key. Returns `None`, after logging, if the event should be dropped.
    pub fn resolve(&mut self, key: &RunnerKey) -> Option<Resolved> {
        let Some(method) = &key.method_name else {
            return match self.lookup_class(&key.class_name) {
                Some(identity) => {
                    debug!(%identity, "ignoring event for a container");
                    None
                }
                None => {
                    warn!(project = %self.project, key = %key, "unknown test class");
                    None
                }
            };
        };

        let Some(entry) = self.lookup_method(&key.class_name, method) else {
            warn!(
                project = %self.project,
                key = %key,
                class_name = %key.class_name,
                %method,
                "unknown test method"
            );
            return None;
        };

        match &key.invocation {
            None => {
                if entry.invocations.is_empty() && entry.synthesized.is_empty() {
                    Some(Resolved {
                        identity: entry.identity.clone(),
                        attach_to: None,
                    })
                } else {
                    debug!(identity = %entry.identity, "ignoring event for a template method");
                    None
                }
            }
            Some(InvocationRef::Ordinal(path)) => Some(entry.resolve_path(path)),
            Some(InvocationRef::Repeat(n)) => {
                if entry.invocations.is_empty() && entry.synthesized.is_empty() {
                    // Repeated executions of a plain method fold into the method itself.
                    Some(Resolved {
                        identity: entry.identity.clone(),
                        attach_to: None,
                    })
                } else {
                    Some(entry.resolve_path(&[*n]))
                }
            }
        }
    }

    fn lookup_class(&self, class_name: &str) -> Option<&TestIdentity> {
        self.classes
            .get(class_name)
            .or_else(|| self.classes.get(&binary_to_source_name(class_name)))
    }

    fn lookup_method(&mut self, class_name: &str, method: &str) -> Option<&mut MethodEntry> {
        let key = (class_name.to_owned(), method.to_owned());
        if self.methods.contains_key(&key) {
            return self.methods.get_mut(&key);
        }
        // Runners report nested classes by their binary name, `Outer$Inner`.
        self.methods
            .get_mut(&(binary_to_source_name(class_name), method.to_owned()))
    }
}

impl MethodEntry {
    fn resolve_path(&mut self, path: &[usize]) -> Resolved {
        let mut slots = &self.invocations;
        let mut found = None;
        for &ordinal in path {
            match ordinal.checked_sub(1).and_then(|index| slots.get(index)) {
                Some(slot) => {
                    found = Some(slot);
                    slots = &slot.children;
                }
                None => {
                    found = None;
                    break;
                }
            }
        }
        if let Some(slot) = found {
            return Resolved {
                identity: slot.identity.clone(),
                attach_to: None,
            };
        }

        if let Some(identity) = self.synthesized.get(path) {
            return Resolved {
                identity: identity.clone(),
                attach_to: None,
            };
        }
        let identity = self.identity.with_invocation(path.iter().join("/"));
        debug!(%identity, "synthesized invocation");
        self.synthesized.insert(path.to_vec(), identity.clone());
        Resolved {
            identity,
            attach_to: Some(self.identity.clone()),
        }
    }
}

fn binary_to_source_name(class_name: &str) -> String {
    class_name.replace('$', ".")
}
