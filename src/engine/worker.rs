//! A single worker: claim → process → complete → notify, until told to stop
//! or the queue runs dry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::processor::Processor;
use crate::error::{Error, Result};
use crate::model::work::WorkItem;
use crate::notify::NotificationSink;
use crate::store::WorkItemStore;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_work_span};

/// Attempts at `mark_complete` before an item is left InProgress.
const COMPLETE_ATTEMPTS: u32 = 3;

/// Dense worker identifier, assigned in scale-up order starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between items. The stop flag is checked here.
    Idle,
    /// Waiting on `claim_next`.
    Claiming,
    /// Running the processor on a claimed item.
    Processing,
    /// Waiting on `mark_complete` and the notification.
    Completing,
    /// Exited. Terminal.
    Stopped,
}

impl WorkerState {
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Idle, Claiming)
                | (Idle, Stopped)
                | (Claiming, Processing)
                | (Claiming, Idle)      // nothing claimed, or the claim failed
                | (Processing, Completing)
                | (Completing, Idle)
        )
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Claiming => "claiming",
            WorkerState::Processing => "processing",
            WorkerState::Completing => "completing",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Why a worker exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// `claim_next` came back empty.
    Drained,
    /// The stop flag was observed.
    Stopped,
}

/// Returned by [`Worker::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub exit: WorkerExit,
    pub completed: u64,
}

/// Collaborators shared by every worker in a pool.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn WorkItemStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub processor: Arc<dyn Processor>,
}

pub struct Worker {
    id: WorkerId,
    state: WorkerState,
    stop: Arc<AtomicBool>,
    deps: WorkerDeps,
    retry_interval: Duration,
    completed: u64,
}

impl Worker {
    /// `retry_interval` is the pause after a failed store call.
    pub fn new(
        id: WorkerId,
        stop: Arc<AtomicBool>,
        deps: WorkerDeps,
        retry_interval: Duration,
    ) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            stop,
            deps,
            retry_interval,
            completed: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run until the stop flag is set or no pending work remains.
    ///
    /// The stop flag is only consulted between items, so a claimed item is
    /// always completed before the worker exits.
    pub async fn run(mut self) -> WorkerSummary {
        info!(worker_id = %self.id, "worker started");

        let exit = loop {
            if self.stop.load(Ordering::Acquire) {
                break WorkerExit::Stopped;
            }

            self.transition(WorkerState::Claiming);
            let item = match self.deps.store.claim_next().await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    self.transition(WorkerState::Idle);
                    break WorkerExit::Drained;
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "claim failed, will retry");
                    metrics::store_errors().add(1, &[KeyValue::new("operation", "claim")]);
                    self.transition(WorkerState::Idle);
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            let span = start_work_span(self.id.0, item.id);
            self.handle(item, &span).instrument(span.clone()).await;
            self.transition(WorkerState::Idle);
        };

        self.transition(WorkerState::Stopped);
        info!(
            worker_id = %self.id,
            completed = self.completed,
            reason = ?exit,
            "worker has stopped"
        );

        WorkerSummary {
            id: self.id,
            exit,
            completed: self.completed,
        }
    }

    async fn handle(&mut self, item: WorkItem, span: &Span) {
        record_state_transition(span, "pending", "in_progress");
        metrics::work_state_transitions().add(
            1,
            &[
                KeyValue::new("from", "pending"),
                KeyValue::new("to", "in_progress"),
            ],
        );
        info!(worker_id = %self.id, work_id = %item.id, "started work item");

        self.transition(WorkerState::Processing);
        let started = Instant::now();
        self.deps.processor.process(&item).await;
        let processing_ms = started.elapsed().as_millis() as f64;
        metrics::processing_duration_ms().record(processing_ms, &[]);

        self.transition(WorkerState::Completing);
        match self.complete(&item).await {
            Ok(done) => {
                record_state_transition(span, "in_progress", "completed");
                metrics::work_state_transitions().add(
                    1,
                    &[
                        KeyValue::new("from", "in_progress"),
                        KeyValue::new("to", "completed"),
                    ],
                );
                self.completed += 1;
                info!(worker_id = %self.id, work_id = %done.id, processing_ms, "completed work item");

                if let Err(e) = self.deps.notifier.notify(done.id, &done.title).await {
                    metrics::notification_failures().add(1, &[]);
                    warn!(work_id = %done.id, error = %e, "completion notification failed");
                }
            }
            Err(e) if e.is_invariant_violation() => {
                error!(work_id = %item.id, error = %e, "completion rejected by store");
            }
            Err(e) => {
                error!(work_id = %item.id, error = %e, "could not complete work item, leaving it in progress");
            }
        }
    }

    /// `mark_complete` with a few retries for transient store failures.
    async fn complete(&self, item: &WorkItem) -> Result<WorkItem> {
        let mut attempt = 1;
        loop {
            match self.deps.store.mark_complete(item).await {
                Ok(done) => return Ok(done),
                Err(e)
                    if e.is_invariant_violation()
                        || matches!(e, Error::NotFound(_))
                        || attempt >= COMPLETE_ATTEMPTS =>
                {
                    return Err(e);
                }
                Err(e) => {
                    warn!(work_id = %item.id, attempt, error = %e, "mark_complete failed, retrying");
                    metrics::store_errors().add(1, &[KeyValue::new("operation", "complete")]);
                    attempt += 1;
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    fn transition(&mut self, to: WorkerState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal worker transition {} -> {}",
            self.state,
            to
        );
        debug!(worker_id = %self.id, from = %self.state, to = %to, "worker transition");
        self.state = to;
    }
}
