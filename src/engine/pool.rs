//! Elastic worker pool.
//!
//! The pool owns every worker handle. Scale operations take the pool lock for
//! their whole duration, including the bounded wait in `scale_down`, so they
//! never interleave and the active count (the registry size) is never stale.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::processor::Processor;
use super::worker::{Worker, WorkerDeps, WorkerId, WorkerSummary};
use crate::config::duration_millis;
use crate::error::{Error, Result};
use crate::notify::NotificationSink;
use crate::store::WorkItemStore;
use crate::telemetry::metrics;

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Floor on registered workers. The pool starts with this many.
    pub min_workers: usize,
    /// Ceiling on registered workers.
    pub max_workers: usize,
    /// How long `scale_down` waits for a stopping worker before detaching it.
    #[serde(rename = "join_timeout_ms", with = "duration_millis")]
    pub join_timeout: Duration,
    /// Pause after a failed store call inside a worker.
    #[serde(rename = "claim_retry_interval_ms", with = "duration_millis")]
    pub claim_retry_interval: Duration,
    /// How long `shutdown` waits for all workers before aborting stragglers.
    #[serde(rename = "shutdown_timeout_ms", with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 5,
            join_timeout: Duration::from_secs(2),
            claim_retry_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::Config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.join_timeout.is_zero() || self.shutdown_timeout.is_zero() {
            return Err(Error::Config("pool timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// What a scale call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// A worker with this id was started.
    Added(WorkerId),
    /// Already at `max_workers`; nothing changed.
    AtCeiling,
    /// The highest worker was removed. `timed_out` means it did not exit
    /// within `join_timeout` and was detached instead of awaited.
    Removed { id: WorkerId, timed_out: bool },
    /// Already at `min_workers`; nothing changed.
    AtFloor,
    /// The pool has been shut down.
    Closed,
}

impl ScaleOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, ScaleOutcome::Added(_) | ScaleOutcome::Removed { .. })
    }
}

/// Result of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited on their own within the shutdown timeout.
    pub workers_stopped: usize,
    /// Workers that had to be aborted after the timeout.
    pub workers_aborted: usize,
    /// Items still InProgress after all workers are gone. `None` if the store
    /// could not be queried.
    pub abandoned_in_progress: Option<u64>,
}

struct WorkerHandle {
    id: WorkerId,
    stop: Arc<AtomicBool>,
    join: JoinHandle<WorkerSummary>,
}

#[derive(Default)]
struct PoolState {
    workers: BTreeMap<WorkerId, WorkerHandle>,
    /// Removed by `scale_down` but still finishing an item.
    detached: Vec<WorkerHandle>,
    closed: bool,
}

pub struct WorkerPool {
    deps: WorkerDeps,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Validate `config` and start `min_workers` workers.
    pub async fn start(
        store: Arc<dyn WorkItemStore>,
        notifier: Arc<dyn NotificationSink>,
        processor: Arc<dyn Processor>,
        config: PoolConfig,
    ) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            deps: WorkerDeps {
                store,
                notifier,
                processor,
            },
            config,
            state: Mutex::new(PoolState::default()),
        };

        {
            let mut state = pool.state.lock().await;
            for _ in 0..pool.config.min_workers {
                pool.spawn_worker(&mut state);
            }
        }

        info!(
            min = pool.config.min_workers,
            max = pool.config.max_workers,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn WorkItemStore> {
        Arc::clone(&self.deps.store)
    }

    /// Number of registered workers.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    /// Ids of registered workers, ascending.
    pub async fn worker_ids(&self) -> Vec<WorkerId> {
        self.state.lock().await.workers.keys().copied().collect()
    }

    /// Workers removed by a timed-out `scale_down` that are still tracked.
    pub async fn detached_count(&self) -> usize {
        self.state.lock().await.detached.len()
    }

    /// Add one worker unless the pool is at `max_workers`.
    pub async fn scale_up(&self) -> ScaleOutcome {
        let mut state = self.state.lock().await;
        if state.closed {
            return ScaleOutcome::Closed;
        }
        if state.workers.len() >= self.config.max_workers {
            debug!(active = state.workers.len(), "scale up skipped, at ceiling");
            record_scale("up", "at_limit");
            return ScaleOutcome::AtCeiling;
        }

        let id = self.spawn_worker(&mut state);
        record_scale("up", "ok");
        info!(worker_id = %id, active = state.workers.len(), "scaled up");
        ScaleOutcome::Added(id)
    }

    /// Stop and remove the highest-numbered worker unless the pool is at
    /// `min_workers`.
    ///
    /// Waits up to `join_timeout` for the worker to finish its current item.
    /// On timeout the worker is deregistered anyway and kept on a detached
    /// list: it still completes its in-flight item and exits on its own, and
    /// `shutdown` awaits it. It is never aborted here, since that would strand
    /// its item InProgress.
    pub async fn scale_down(&self) -> ScaleOutcome {
        let mut state = self.state.lock().await;
        if state.closed {
            return ScaleOutcome::Closed;
        }
        if state.workers.len() <= self.config.min_workers {
            debug!(active = state.workers.len(), "scale down skipped, at floor");
            record_scale("down", "at_limit");
            return ScaleOutcome::AtFloor;
        }
        let Some((id, mut handle)) = state.workers.pop_last() else {
            return ScaleOutcome::AtFloor;
        };

        handle.stop.store(true, Ordering::Release);
        metrics::active_workers().add(-1, &[]);

        let timed_out = match tokio::time::timeout(self.config.join_timeout, &mut handle.join).await
        {
            Ok(Ok(summary)) => {
                debug!(worker_id = %id, completed = summary.completed, "worker joined");
                false
            }
            Ok(Err(e)) => {
                error!(worker_id = %id, error = %e, "worker task failed");
                false
            }
            Err(_) => {
                warn!(
                    worker_id = %id,
                    timeout_ms = self.config.join_timeout.as_millis() as u64,
                    "worker did not stop in time, detaching; it finishes its item \
                     in the background and its id may be reused by the next scale up"
                );
                state.detached.push(handle);
                true
            }
        };

        record_scale("down", if timed_out { "timeout" } else { "ok" });
        info!(worker_id = %id, active = state.workers.len(), "scaled down");
        ScaleOutcome::Removed { id, timed_out }
    }

    /// Stop every worker, wait for them, and report leftovers.
    ///
    /// All workers (registered and detached) share one `shutdown_timeout`
    /// deadline. Stragglers past it are aborted, which is the only place a
    /// worker is forcibly terminated; any item it held stays InProgress and
    /// shows up in `abandoned_in_progress`.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut state = self.state.lock().await;
        state.closed = true;

        let registered = state.workers.len();
        let mut handles: Vec<WorkerHandle> =
            std::mem::take(&mut state.workers).into_values().collect();
        handles.append(&mut state.detached);
        metrics::active_workers().add(-(registered as i64), &[]);

        for handle in &handles {
            handle.stop.store(true, Ordering::Release);
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let mut report = ShutdownReport::default();
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle.join).await {
                Ok(Ok(_)) => report.workers_stopped += 1,
                Ok(Err(e)) => {
                    error!(worker_id = %handle.id, error = %e, "worker task failed");
                    report.workers_stopped += 1;
                }
                Err(_) => {
                    warn!(worker_id = %handle.id, "worker did not stop before shutdown deadline, aborting");
                    handle.join.abort();
                    report.workers_aborted += 1;
                }
            }
        }

        report.abandoned_in_progress = match self.deps.store.count_in_progress().await {
            Ok(0) => Some(0),
            Ok(n) => {
                warn!(in_progress = n, "work items left in progress after shutdown");
                Some(n)
            }
            Err(e) => {
                error!(error = %e, "could not count in-progress items after shutdown");
                None
            }
        };

        info!(
            stopped = report.workers_stopped,
            aborted = report.workers_aborted,
            "worker pool shut down"
        );
        report
    }

    /// Start a worker with the next dense id and register it. Caller holds
    /// the pool lock. Detached workers do not hold ids, so an id can briefly
    /// belong to both a detached worker and a new one.
    fn spawn_worker(&self, state: &mut PoolState) -> WorkerId {
        let id = WorkerId(state.workers.len() as u32 + 1);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker::new(
            id,
            Arc::clone(&stop),
            self.deps.clone(),
            self.config.claim_retry_interval,
        );
        let join = tokio::spawn(worker.run());

        state.workers.insert(id, WorkerHandle { id, stop, join });
        metrics::active_workers().add(1, &[]);
        id
    }
}

fn record_scale(direction: &'static str, result: &'static str) {
    metrics::scale_events().add(
        1,
        &[
            KeyValue::new("direction", direction),
            KeyValue::new("result", result),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let config = PoolConfig {
            min_workers: 4,
            max_workers: 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_empty_ceiling() {
        let config = PoolConfig {
            min_workers: 0,
            max_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn only_additions_and_removals_count_as_changes() {
        assert!(ScaleOutcome::Added(WorkerId(2)).changed());
        assert!(
            ScaleOutcome::Removed {
                id: WorkerId(2),
                timed_out: true
            }
            .changed()
        );
        assert!(!ScaleOutcome::AtCeiling.changed());
        assert!(!ScaleOutcome::AtFloor.changed());
        assert!(!ScaleOutcome::Closed.changed());
    }
}
