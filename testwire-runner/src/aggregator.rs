// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental rollup of leaf results into container results.
//!
//! Each container keeps a [`ContainerTally`] of its requested children, and the aggregator
//! remembers what each child last contributed. An update therefore touches one tally per
//! ancestor, and stops climbing as soon as an ancestor's result is unchanged.

use std::{collections::HashMap, time::Duration};
use testwire_metadata::{TestIdentity, TestNode, TestResult, TestStatus};

/// Counters for the requested children of a container.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContainerTally {
    /// The number of requested children.
    pub expected: usize,

    /// The number of children with a terminal result.
    pub completed: usize,

    /// Children that failed or errored.
    pub failed: usize,

    /// Children that were skipped.
    pub skipped: usize,

    /// The sum of completed children's durations.
    pub duration: Duration,
}

impl ContainerTally {
    /// Returns the aggregated result, or `None` while some requested child has no result.
    pub fn result(&self) -> Option<TestResult> {
        if self.expected == 0 || self.completed < self.expected {
            return None;
        }
        let status = if self.skipped == self.expected {
            TestStatus::Skip
        } else if self.failed > 0 {
            TestStatus::Fail
        } else {
            TestStatus::Pass
        };
        Some(TestResult::with_status(status).duration(self.duration))
    }

    fn add(&mut self, contribution: &Contribution) {
        self.completed += 1;
        match contribution.outcome {
            Outcome::Pass => {}
            Outcome::Fail => self.failed += 1,
            Outcome::Skip => self.skipped += 1,
        }
        self.duration = self.duration.saturating_add(contribution.duration);
    }

    fn remove(&mut self, contribution: &Contribution) {
        self.completed = self.completed.saturating_sub(1);
        match contribution.outcome {
            Outcome::Pass => {}
            Outcome::Fail => self.failed = self.failed.saturating_sub(1),
            Outcome::Skip => self.skipped = self.skipped.saturating_sub(1),
        }
        self.duration = self.duration.saturating_sub(contribution.duration);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Outcome {
    Pass,
    Fail,
    Skip,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Contribution {
    outcome: Outcome,
    duration: Duration,
}

impl Contribution {
    fn from_result(result: &TestResult) -> Option<Self> {
        let outcome = match result.status {
            TestStatus::Pending | TestStatus::Running => return None,
            TestStatus::Pass => Outcome::Pass,
            TestStatus::Fail | TestStatus::Error => Outcome::Fail,
            TestStatus::Skip => Outcome::Skip,
        };
        Some(Self {
            outcome,
            duration: result.duration.unwrap_or_default(),
        })
    }
}

/// Rolls child results up into their containers.
#[derive(Debug, Default)]
pub struct Aggregator {
    parents: HashMap<TestIdentity, TestIdentity>,
    tallies: HashMap<TestIdentity, ContainerTally>,
    contributions: HashMap<TestIdentity, Contribution>,
}

impl Aggregator {
    /// Creates an aggregator for the given requested nodes.
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a TestNode>) -> Self {
        let mut aggregator = Self::default();
        for node in nodes.into_iter().flat_map(|node| node.walk()) {
            if node.is_leaf() {
                continue;
            }
            for child in &node.children {
                aggregator
                    .parents
                    .insert(child.identity.clone(), node.identity.clone());
            }
            aggregator.tallies.insert(
                node.identity.clone(),
                ContainerTally {
                    expected: node.children.len(),
                    ..ContainerTally::default()
                },
            );
        }
        aggregator
    }

    /// Returns the tally for a container.
    pub fn tally(&self, container: &TestIdentity) -> Option<&ContainerTally> {
        self.tallies.get(container)
    }

    /// Returns true if the identity is a container.
    pub fn is_container(&self, identity: &TestIdentity) -> bool {
        self.tallies.contains_key(identity)
    }

    /// Records a child's new result, returning the containers whose result changed.
    pub fn update(
        &mut self,
        identity: &TestIdentity,
        result: Option<&TestResult>,
    ) -> Vec<(TestIdentity, Option<TestResult>)> {
        let mut changes = Vec::new();
        let contribution = result.and_then(Contribution::from_result);
        self.propagate(identity.clone(), contribution, &mut changes);
        changes
    }

    /// Attaches an invocation discovered at run time under its parent method.
    ///
    /// A parent that was a leaf becomes a container. Returns the containers whose result changed.
    pub fn attach_dynamic(
        &mut self,
        parent: &TestIdentity,
        child: &TestIdentity,
    ) -> Vec<(TestIdentity, Option<TestResult>)> {
        let mut changes = Vec::new();
        if self.parents.contains_key(child) {
            return changes;
        }
        self.parents.insert(child.clone(), parent.clone());

        let was_leaf = !self.tallies.contains_key(parent);
        let tally = self.tallies.entry(parent.clone()).or_default();
        let before = tally.result();
        tally.expected += 1;
        let after = tally.result();
        if was_leaf || before != after {
            changes.push((parent.clone(), after.clone()));
        }
        let contribution = after.as_ref().and_then(Contribution::from_result);
        self.propagate(parent.clone(), contribution, &mut changes);
        changes
    }

    fn propagate(
        &mut self,
        mut child: TestIdentity,
        mut contribution: Option<Contribution>,
        changes: &mut Vec<(TestIdentity, Option<TestResult>)>,
    ) {
        loop {
            let previous = match contribution {
                Some(contribution) => self.contributions.insert(child.clone(), contribution),
                None => self.contributions.remove(&child),
            };
            if previous == contribution {
                return;
            }
            let Some(parent) = self.parents.get(&child).cloned() else {
                return;
            };
            let Some(tally) = self.tallies.get_mut(&parent) else {
                return;
            };

            let before = tally.result();
            if let Some(previous) = &previous {
                tally.remove(previous);
            }
            if let Some(contribution) = &contribution {
                tally.add(contribution);
            }
            let after = tally.result();
            if before == after {
                return;
            }

            contribution = after.as_ref().and_then(Contribution::from_result);
            changes.push((parent.clone(), after));
            child = parent;
        }
    }
}
