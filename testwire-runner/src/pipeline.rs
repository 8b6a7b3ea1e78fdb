// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-partition decoding pipeline.
//!
//! Raw output flows through a [`LineFramer`], the partition's [`Decoder`], the
//! [`IdentityResolver`], the [`ResultStateMachine`] and the [`Aggregator`], and every resulting
//! change is published to the [`ResultStore`].

use crate::{
    aggregator::Aggregator,
    decoder::{Decoder, Event},
    framer::LineFramer,
    partition::Partition,
    resolver::IdentityResolver,
    state::ResultStateMachine,
    store::ResultStore,
};
use camino::Utf8PathBuf;
use encoding_rs::Encoding;
use indexmap::IndexSet;
use std::{collections::HashMap, sync::Arc, time::Duration};
use testwire_metadata::{FrameworkKind, TestIdentity, TestResult, TestStatus};
use tracing::{debug, trace};

/// Leaf outcome counts for a finished partition.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PartitionStats {
    /// The number of requested leaves, including invocations discovered during the run.
    pub requested: usize,

    /// Leaves that passed.
    pub passed: usize,

    /// Leaves that failed.
    pub failed: usize,

    /// Leaves that errored.
    pub errored: usize,

    /// Leaves that were skipped.
    pub skipped: usize,

    /// Leaves left without a result.
    pub not_run: usize,

    /// The number of framed lines.
    pub lines: usize,

    /// The number of decoded events that could not be applied.
    pub dropped_events: usize,
}

impl PartitionStats {
    /// Adds another partition's counts to this one.
    pub fn merge(&mut self, other: &Self) {
        self.requested += other.requested;
        self.passed += other.passed;
        self.failed += other.failed;
        self.errored += other.errored;
        self.skipped += other.skipped;
        self.not_run += other.not_run;
        self.lines += other.lines;
        self.dropped_events += other.dropped_events;
    }

    /// Returns true if any leaf failed or errored.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errored > 0
    }
}

/// Decodes the output of one partition into the result store.
#[derive(Debug)]
pub struct PartitionPipeline {
    framer: LineFramer,
    decoder: Decoder,
    resolver: IdentityResolver,
    machine: ResultStateMachine,
    aggregator: Aggregator,
    store: Arc<ResultStore>,
    requested: IndexSet<TestIdentity>,
    sources: HashMap<TestIdentity, Utf8PathBuf>,
    stats: PartitionStats,
}

impl PartitionPipeline {
    /// Creates a pipeline for a partition.
    ///
    /// Stale container results for the partition are removed from the store, since containers
    /// are recomputed from this run's leaves.
    pub fn new(
        partition: &Partition,
        kind: FrameworkKind,
        encoding: &'static Encoding,
        store: Arc<ResultStore>,
    ) -> Self {
        let aggregator = Aggregator::new(&partition.nodes);
        let pipeline = Self {
            framer: LineFramer::new(encoding),
            decoder: Decoder::for_kind(kind),
            resolver: IdentityResolver::new(partition.project.clone(), &partition.nodes),
            machine: ResultStateMachine::new(),
            requested: partition
                .leaves()
                .map(|node| node.identity.clone())
                .collect(),
            sources: partition.sources(),
            aggregator,
            store,
            stats: PartitionStats::default(),
        };
        for node in partition.nodes.iter().flat_map(|node| node.walk()) {
            if !node.is_leaf() {
                pipeline.store.publish(&node.identity, None, None);
            }
        }
        pipeline
    }

    /// Returns the requested leaves, including invocations discovered so far.
    pub fn requested(&self) -> &IndexSet<TestIdentity> {
        &self.requested
    }

    /// Feeds a chunk of raw output received `at` since the start of the partition.
    pub fn feed(&mut self, chunk: &[u8], at: Duration) {
        for line in self.framer.feed(chunk) {
            self.handle_line(&line, at);
        }
    }

    /// Flushes buffered output and finalizes every requested leaf.
    pub fn finish(&mut self, cancelled: bool, at: Duration) -> PartitionStats {
        if let Some(line) = self.framer.flush() {
            self.handle_line(&line, at);
        }
        for event in self.decoder.finish() {
            self.handle_event(event, at);
        }

        let changes = self.machine.finalize(&self.requested, cancelled, at);
        for (identity, result) in changes {
            self.apply_change(&identity, result);
        }

        let mut stats = self.stats;
        stats.requested = self.requested.len();
        for identity in &self.requested {
            match self.machine.result(identity).map(|result| result.status) {
                Some(TestStatus::Pass) => stats.passed += 1,
                Some(TestStatus::Fail) => stats.failed += 1,
                Some(TestStatus::Error) => stats.errored += 1,
                Some(TestStatus::Skip) => stats.skipped += 1,
                Some(TestStatus::Pending | TestStatus::Running) | None => stats.not_run += 1,
            }
        }
        debug!(?stats, cancelled, "partition finished");
        stats
    }

    fn handle_line(&mut self, line: &str, at: Duration) {
        self.stats.lines += 1;
        trace!(line, "framed line");
        for event in self.decoder.analyze(line) {
            self.handle_event(event, at);
        }
    }

    fn handle_event(&mut self, event: Event, at: Duration) {
        let Some(resolved) = self.resolver.resolve(&event.key) else {
            self.stats.dropped_events += 1;
            return;
        };
        let identity = resolved.identity;

        if let Some(parent) = resolved.attach_to {
            self.requested.shift_remove(&parent);
            self.machine.forget(&parent);
            self.requested.insert(identity.clone());
            if let Some(source) = self.sources.get(&parent).cloned() {
                self.sources.insert(identity.clone(), source);
            }
            for (container, result) in self.aggregator.attach_dynamic(&parent, &identity) {
                self.publish(&container, result);
            }
        }

        if self.aggregator.is_container(&identity) {
            debug!(%identity, "ignoring event for a container");
            self.stats.dropped_events += 1;
            return;
        }

        let Some(result) = self.machine.apply(&identity, event.kind, at).cloned() else {
            self.stats.dropped_events += 1;
            return;
        };
        self.apply_change(&identity, Some(result));
    }

    fn apply_change(&mut self, identity: &TestIdentity, result: Option<TestResult>) {
        let changes = self.aggregator.update(identity, result.as_ref());
        self.publish(identity, result);
        for (container, result) in changes {
            self.publish(&container, result);
        }
    }

    fn publish(&self, identity: &TestIdentity, result: Option<TestResult>) {
        let source = self.sources.get(identity).map(|path| path.as_path());
        self.store.publish(identity, result, source);
    }
}
