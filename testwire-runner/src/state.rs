// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-identity result tracking for a single partition of a run.

use crate::decoder::{DetailField, EventKind, FailureDetail};
use std::{collections::HashMap, time::Duration};
use testwire_metadata::{TestIdentity, TestResult, TestStatus};
use tracing::debug;

/// The message assigned to tests still running when their stream closes.
pub const DID_NOT_FINISH_MESSAGE: &str = "test did not finish";

/// Tracks status transitions and failure detail for every identity observed in a partition.
///
/// Timestamps passed in are offsets from the start of the partition.
#[derive(Debug, Default)]
pub struct ResultStateMachine {
    entries: HashMap<TestIdentity, Entry>,
}

#[derive(Debug, Default)]
struct Entry {
    result: TestResult,
    // Time spent in finished executions.
    accumulated: Duration,
    // The start credit of the execution in progress: its elapsed time is `at - started_at`.
    started_at: Option<Duration>,
    // The duration the most recent closed execution contributed to `accumulated`.
    last_execution: Option<Duration>,
    failed_this_execution: bool,
}

impl Entry {
    fn stop(&mut self, at: Duration, reported: Option<Duration>) {
        match (self.started_at.take(), reported) {
            (Some(start), reported) => {
                let elapsed = reported.unwrap_or_else(|| at.saturating_sub(start));
                self.accumulated = self.accumulated.saturating_add(elapsed);
                self.last_execution = Some(elapsed);
            }
            (None, Some(reported)) => {
                // A reported duration replaces the wall-clock time of the execution it closes.
                let previous = self.last_execution.replace(reported).unwrap_or_default();
                self.accumulated = self
                    .accumulated
                    .saturating_sub(previous)
                    .saturating_add(reported);
            }
            (None, None) => {}
        }
        if self.last_execution.is_some() {
            self.result.duration = Some(self.accumulated);
        }
    }

    fn fail(&mut self, status: TestStatus, detail: FailureDetail) {
        if self.failed_this_execution {
            // The first failure of an execution wins; later ones only fill in gaps.
            let result = &mut self.result;
            result.message = result.message.take().or(detail.message);
            result.trace = result.trace.take().or(detail.trace);
            result.expected = result.expected.take().or(detail.expected);
            result.actual = result.actual.take().or(detail.actual);
        } else {
            self.failed_this_execution = true;
            self.result.status = status;
            self.result.message = detail.message;
            self.result.trace = detail.trace;
            self.result.expected = detail.expected;
            self.result.actual = detail.actual;
        }
    }

    // Drops detail left over from an earlier failed execution.
    fn clear_detail(&mut self) {
        let result = &mut self.result;
        result.message = None;
        result.trace = None;
        result.expected = None;
        result.actual = None;
    }

    fn append(&mut self, field: DetailField, text: String) {
        let slot = match field {
            DetailField::Trace => &mut self.result.trace,
            DetailField::Expected => &mut self.result.expected,
            DetailField::Actual => &mut self.result.actual,
        };
        match slot {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(&text);
            }
            None => *slot = Some(text),
        }

        if field == DetailField::Trace && self.result.message.is_none() {
            self.result.message = self
                .result
                .trace
                .as_deref()
                .and_then(|trace| trace.lines().map(str::trim).find(|line| !line.is_empty()))
                .map(str::to_owned);
        }
    }
}

impl ResultStateMachine {
    /// Creates a new, empty state machine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current result for an identity, if it has been observed.
    pub fn result(&self, identity: &TestIdentity) -> Option<&TestResult> {
        self.entries.get(identity).map(|entry| &entry.result)
    }

    /// Discards everything known about an identity.
    pub fn forget(&mut self, identity: &TestIdentity) {
        self.entries.remove(identity);
    }

    /// Applies an event, returning the updated result if the event was accepted.
    pub fn apply(
        &mut self,
        identity: &TestIdentity,
        kind: EventKind,
        at: Duration,
    ) -> Option<&TestResult> {
        match kind {
            EventKind::Started => {
                let entry = self.entries.entry(identity.clone()).or_default();
                if entry.started_at.is_none() {
                    entry.started_at = Some(at);
                    entry.last_execution = None;
                }
                entry.failed_this_execution = false;
                entry.result.status = TestStatus::Running;
            }
            EventKind::Finished { duration } => {
                let Some(entry) = self.entries.get_mut(identity) else {
                    debug!(%identity, "ignoring finish for a test that never started");
                    return None;
                };
                entry.stop(at, duration);
                if entry.result.status == TestStatus::Running {
                    entry.result.status = TestStatus::Pass;
                    entry.clear_detail();
                }
            }
            EventKind::Failed(detail) => self.fail(identity, TestStatus::Fail, detail, at),
            EventKind::Errored(detail) => self.fail(identity, TestStatus::Error, detail, at),
            EventKind::Skipped { message } => {
                let entry = self.entries.entry(identity.clone()).or_default();
                if entry.failed_this_execution {
                    debug!(%identity, "ignoring skip for a failed test");
                    return None;
                }
                entry.stop(at, None);
                entry.result.status = TestStatus::Skip;
                entry.clear_detail();
                entry.result.message = message;
            }
            EventKind::Detail { field, text } => {
                let Some(entry) = self.entries.get_mut(identity) else {
                    debug!(%identity, ?field, "ignoring detail for a test that never started");
                    return None;
                };
                entry.append(field, text);
            }
        }
        self.result(identity)
    }

    fn fail(
        &mut self,
        identity: &TestIdentity,
        status: TestStatus,
        detail: FailureDetail,
        at: Duration,
    ) {
        let entry = self.entries.entry(identity.clone()).or_insert_with(|| {
            debug!(%identity, "failure reported without a start");
            Entry::default()
        });
        let reported = detail.duration;
        entry.fail(status, detail);
        entry.stop(at, reported);
    }

    /// Finalizes the partition once its stream has closed.
    ///
    /// Returns the changes to publish. `None` means the identity has no result: requested tests
    /// that never started, or were still running, when the run was cancelled.
    pub fn finalize<'a>(
        &mut self,
        requested: impl IntoIterator<Item = &'a TestIdentity>,
        cancelled: bool,
        at: Duration,
    ) -> Vec<(TestIdentity, Option<TestResult>)> {
        let mut changes = Vec::new();
        for identity in requested {
            let status = self.entries.get(identity).map(|entry| entry.result.status);
            match status {
                Some(status) if status.is_terminal() => {}
                _ if cancelled => {
                    self.entries.remove(identity);
                    changes.push((identity.clone(), None));
                }
                None => {
                    let entry = self.entries.entry(identity.clone()).or_default();
                    entry.result.status = TestStatus::Skip;
                    changes.push((identity.clone(), Some(entry.result.clone())));
                }
                Some(_) => {
                    let entry = self.entries.entry(identity.clone()).or_default();
                    entry.stop(at, None);
                    entry.result.status = TestStatus::Error;
                    entry.result.message = Some(DID_NOT_FINISH_MESSAGE.to_owned());
                    changes.push((identity.clone(), Some(entry.result.clone())));
                }
            }
        }
        changes
    }
}
