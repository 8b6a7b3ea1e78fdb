// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running requested tests, one partition at a time.
//!
//! The [`RunCoordinator`] splits requested nodes into [partitions](crate::partition), obtains a
//! session for each from a [`Launcher`] and feeds the session's output through a
//! [`PartitionPipeline`]. At most one run is in flight per coordinator.

use crate::{
    config::RunConfig,
    errors::{DisplayErrorChain, LaunchError, PartitionError, PartitionErrorKind, RunError},
    launcher::{ExitIndicator, LaunchRequest, Launcher, SessionControl},
    partition::{Partition, partition_nodes},
    pipeline::{PartitionPipeline, PartitionStats},
    store::ResultStore,
    time::stopwatch,
};
use chrono::{DateTime, Local};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use testwire_metadata::{RunMode, TestNode};
use tokio::{io::AsyncReadExt, sync::watch};
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// The sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Creates a new handle along with a token observing it.
    pub fn new() -> (Self, CancelToken) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, CancelToken { receiver })
    }

    /// Cancels every token created from this handle. Cancelling twice has no further effect.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns another token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.sender.subscribe(),
        }
    }
}

/// The receiving half of a cancellation signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns a token that is never cancelled.
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once cancellation is requested. If the handle is dropped without cancelling,
    /// this never completes.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A summary of a finished run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// The number of partitions the run was split into.
    pub partitions: usize,

    /// Leaf outcome counts across all partitions.
    pub stats: PartitionStats,

    /// Whether the run was cancelled.
    pub cancelled: bool,

    /// When the run started.
    pub start_time: DateTime<Local>,

    /// How long the run took.
    pub duration: Duration,
}

/// Runs requested tests and publishes their results.
#[derive(Debug)]
pub struct RunCoordinator<L> {
    launcher: L,
    store: Arc<ResultStore>,
    config: RunConfig,
    in_flight: AtomicBool,
}

impl<L: Launcher> RunCoordinator<L> {
    /// Creates a new coordinator publishing into `store`.
    pub fn new(launcher: L, store: Arc<ResultStore>, config: RunConfig) -> Self {
        Self {
            launcher,
            store,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Returns the launcher.
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Returns the store results are published to.
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Returns true if a run is in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs the requested nodes.
    ///
    /// Partitions are run sequentially in request order. A partition that fails does not stop
    /// the others; all failures are returned together once every partition has been handled.
    /// After `cancel` fires, the current partition is drained and finalized, and the remaining
    /// partitions are finalized without being launched.
    pub async fn run(
        &self,
        nodes: &[TestNode],
        mode: RunMode,
        cancel: &CancelToken,
    ) -> Result<RunSummary, RunError> {
        let Some(_guard) = RunGuard::acquire(&self.in_flight) else {
            warn!("a test run is already in progress; ignoring this request");
            return Err(RunError::AlreadyRunning);
        };

        let stopwatch = stopwatch();
        let partitions = partition_nodes(nodes);
        info!(
            partitions = partitions.len(),
            ?mode,
            "starting test run"
        );

        let mut stats = PartitionStats::default();
        let mut cancelled = false;
        let mut failures = Vec::new();
        for partition in &partitions {
            let outcome = if cancel.is_cancelled() {
                self.skip_partition(partition)
            } else {
                self.run_partition(partition, mode, cancel).await
            };
            stats.merge(&outcome.stats);
            cancelled |= outcome.cancelled;
            if let Some(error) = outcome.error {
                warn!(
                    project = %partition.project,
                    kind = ?partition.kind,
                    error = %DisplayErrorChain::new(&error),
                    "partition failed"
                );
                failures.push(PartitionError {
                    project: partition.project.clone(),
                    kind: partition.kind,
                    error,
                });
            }
        }

        let snapshot = stopwatch.snapshot();
        let summary = RunSummary {
            partitions: partitions.len(),
            stats,
            cancelled,
            start_time: snapshot.start_time,
            duration: snapshot.duration,
        };
        info!(
            passed = stats.passed,
            failed = stats.failed,
            errored = stats.errored,
            skipped = stats.skipped,
            cancelled,
            "test run finished"
        );

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(RunError::PartitionsFailed { summary, failures })
        }
    }

    fn skip_partition(&self, partition: &Partition) -> PartitionOutcome {
        let Some(kind) = partition.kind else {
            return PartitionOutcome::cancelled(PartitionStats::default());
        };
        debug!(project = %partition.project, %kind, "run cancelled, not launching partition");
        let mut pipeline =
            PartitionPipeline::new(partition, kind, self.config.encoding(), self.store.clone());
        PartitionOutcome::cancelled(pipeline.finish(true, Duration::ZERO))
    }

    async fn run_partition(
        &self,
        partition: &Partition,
        mode: RunMode,
        cancel: &CancelToken,
    ) -> PartitionOutcome {
        let Some(kind) = partition.kind else {
            return PartitionOutcome::failed(
                PartitionStats::default(),
                PartitionErrorKind::NoFrameworkKind,
            );
        };

        let mut pipeline =
            PartitionPipeline::new(partition, kind, self.config.encoding(), self.store.clone());
        let request = LaunchRequest {
            project: partition.project.clone(),
            kind,
            mode,
            tests: pipeline.requested().iter().cloned().collect(),
        };
        info!(
            project = %request.project,
            %kind,
            tests = request.tests.len(),
            "starting partition"
        );

        let stopwatch = stopwatch();
        let session = match self.launcher.launch(&request, cancel).await {
            Ok(session) => session,
            Err(LaunchError::Cancelled) => {
                return PartitionOutcome::cancelled(pipeline.finish(true, stopwatch.elapsed()));
            }
            Err(error) => {
                // Nothing ran: leave the partition's leaves without results.
                let stats = pipeline.finish(true, stopwatch.elapsed());
                return PartitionOutcome::failed(stats, PartitionErrorKind::Launch(error));
            }
        };
        let (mut output, mut control) = session.into_parts();

        let mut buf = vec![0; READ_BUFFER_SIZE];
        let mut cancelled = false;
        let mut read_error = None;
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                read = output.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => pipeline.feed(&buf[..n], stopwatch.elapsed()),
                    Err(error) => {
                        read_error = Some(error);
                        break;
                    }
                },
            }
        }

        if cancelled {
            self.terminate(&mut *control).await;
            let drain = async {
                loop {
                    match output.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => pipeline.feed(&buf[..n], stopwatch.elapsed()),
                    }
                }
            };
            if tokio::time::timeout(self.config.drain_timeout(), drain)
                .await
                .is_err()
            {
                debug!(project = %request.project, %kind, "stopped draining output after timeout");
            }
        } else if let Some(error) = &read_error {
            // The output is gone, so the process can't report anything more.
            debug!(project = %request.project, %kind, %error, "terminating after read error");
            self.terminate(&mut *control).await;
        }
        drop(output);

        let exit: io::Result<ExitIndicator> = loop {
            tokio::select! {
                exit = control.wait() => break exit,
                () = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    self.terminate(&mut *control).await;
                }
            }
        };

        let stats = pipeline.finish(cancelled, stopwatch.elapsed());
        info!(
            project = %request.project,
            %kind,
            passed = stats.passed,
            failed = stats.failed,
            errored = stats.errored,
            skipped = stats.skipped,
            cancelled,
            "partition finished"
        );

        let error = match (read_error, exit) {
            (Some(error), _) => Some(PartitionErrorKind::Read(error)),
            (None, Err(error)) => Some(PartitionErrorKind::Wait(error)),
            (None, Ok(exit)) if !exit.is_success() && !cancelled => {
                Some(PartitionErrorKind::AbnormalExit(exit))
            }
            (None, Ok(_)) => None,
        };
        PartitionOutcome {
            stats,
            cancelled,
            error,
        }
    }

    async fn terminate(&self, control: &mut dyn SessionControl) {
        if let Err(error) = control.terminate().await {
            warn!(%error, "failed to terminate test process");
        }
    }
}

#[derive(Debug)]
struct PartitionOutcome {
    stats: PartitionStats,
    cancelled: bool,
    error: Option<PartitionErrorKind>,
}

impl PartitionOutcome {
    fn cancelled(stats: PartitionStats) -> Self {
        Self {
            stats,
            cancelled: true,
            error: None,
        }
    }

    fn failed(stats: PartitionStats, error: PartitionErrorKind) -> Self {
        Self {
            stats,
            cancelled: false,
            error: Some(error),
        }
    }
}

/// Marks a run as in flight until dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
