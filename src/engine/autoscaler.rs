//! Autoscaler: samples queue depth on a fixed interval and resizes the pool.
//!
//! ```text
//! pending == 0                  → scale down to min_workers, then exit
//! pending > active * ratio      → scale up by exactly one
//! otherwise                     → hold
//! ```

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::pool::{ScaleOutcome, WorkerPool};
use crate::config::duration_millis;
use crate::error::{Error, Result};
use crate::store::WorkItemStore;
use crate::telemetry::metrics;

/// Configuration for the autoscaler loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    /// Sampling period.
    #[serde(rename = "poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,
    /// Scale up when pending exceeds active workers times this.
    pub oversubscription_ratio: f64,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            oversubscription_ratio: 2.0,
        }
    }
}

impl AutoscalerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be non-zero".to_string()));
        }
        if !(self.oversubscription_ratio.is_finite() && self.oversubscription_ratio > 0.0) {
            return Err(Error::Config(format!(
                "oversubscription_ratio must be positive, got {}",
                self.oversubscription_ratio
            )));
        }
        Ok(())
    }
}

/// What one sample calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Queue is empty: shrink to the floor and stop sampling.
    Drain,
    /// Queue is oversubscribed: add one worker.
    ScaleUp,
    Hold,
}

/// Pure scaling rule.
pub fn decide(pending: u64, active: usize, ratio: f64) -> ScaleDecision {
    if pending == 0 {
        ScaleDecision::Drain
    } else if pending as f64 > active as f64 * ratio {
        ScaleDecision::ScaleUp
    } else {
        ScaleDecision::Hold
    }
}

/// Result of a single [`Autoscaler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub pending: u64,
    pub decision: ScaleDecision,
    /// Registered workers before the tick acted.
    pub active_before: usize,
    /// Registered workers after the tick acted.
    pub active_after: usize,
}

/// Why [`Autoscaler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoscalerExit {
    /// Observed an empty queue and shrank the pool to its floor.
    Drained,
    /// [`Autoscaler::shutdown`] was called.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscalerReport {
    pub ticks: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    /// Ticks where sampling the store failed.
    pub sample_errors: u64,
    pub peak_workers: usize,
    pub exit: AutoscalerExit,
}

/// Whether a `run` is in progress and whether it has been asked to stop.
#[derive(Default)]
struct RunState {
    running: bool,
    stop_requested: bool,
}

/// Samples the pool's own store and resizes the pool. Clones share the same
/// loop state, so a clone can stop a `run` happening elsewhere.
#[derive(Clone)]
pub struct Autoscaler {
    pool: Arc<WorkerPool>,
    store: Arc<dyn WorkItemStore>,
    config: AutoscalerConfig,
    state: Arc<Mutex<RunState>>,
    wake: Arc<Notify>,
}

impl Autoscaler {
    pub fn new(pool: Arc<WorkerPool>, config: AutoscalerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: pool.store(),
            pool,
            config,
            state: Arc::new(Mutex::new(RunState::default())),
            wake: Arc::new(Notify::new()),
        })
    }

    /// Stop the current `run` at its next wait.
    ///
    /// Only a run in progress is affected. A request made while no run is
    /// active is dropped, so a later `run` starts clean.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.running {
            state.stop_requested = true;
            drop(state);
            self.wake.notify_waiters();
        } else {
            debug!("autoscaler shutdown requested while idle, ignoring");
        }
    }

    /// True while a `run` is in progress.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Sample once and apply the decision.
    ///
    /// A `Drain` decision scales down repeatedly until the pool reports it is
    /// at its floor. A `ScaleUp` adds at most one worker.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let pending = self.store.count_pending().await?;
        let active_before = self.pool.active_count().await;
        let decision = decide(pending, active_before, self.config.oversubscription_ratio);
        info!(pending, active = active_before, ?decision, "autoscaler sample");

        match decision {
            ScaleDecision::Drain => {
                while let ScaleOutcome::Removed { .. } = self.pool.scale_down().await {}
            }
            ScaleDecision::ScaleUp => {
                self.pool.scale_up().await;
            }
            ScaleDecision::Hold => {}
        }

        Ok(TickOutcome {
            pending,
            decision,
            active_before,
            active_after: self.pool.active_count().await,
        })
    }

    /// Run the loop: sample immediately, then every `poll_interval`.
    ///
    /// Sampling errors are logged and retried next tick. The loop returns once
    /// it drains the pool on an empty queue, or on shutdown. Calling `run`
    /// again afterwards starts a fresh loop.
    pub async fn run(&self) -> AutoscalerReport {
        *self.state.lock() = RunState {
            running: true,
            stop_requested: false,
        };
        let pool_config = self.pool.config();
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            ratio = self.config.oversubscription_ratio,
            min = pool_config.min_workers,
            max = pool_config.max_workers,
            "autoscaler started"
        );

        let mut ticks = 0;
        let mut scale_ups = 0;
        let mut scale_downs = 0;
        let mut sample_errors = 0;
        let mut peak_workers = self.pool.active_count().await;

        let exit = loop {
            ticks += 1;
            match self.tick().await {
                Ok(outcome) => {
                    peak_workers = peak_workers
                        .max(outcome.active_before)
                        .max(outcome.active_after);
                    match outcome.decision {
                        ScaleDecision::Drain => {
                            scale_downs +=
                                outcome.active_before.saturating_sub(outcome.active_after) as u64;
                            info!(
                                active = outcome.active_after,
                                "no pending work, autoscaler exiting"
                            );
                            break AutoscalerExit::Drained;
                        }
                        ScaleDecision::ScaleUp if outcome.active_after > outcome.active_before => {
                            scale_ups += 1;
                        }
                        _ => {}
                    }
                }
                Err(e) => {
                    sample_errors += 1;
                    metrics::store_errors().add(1, &[KeyValue::new("operation", "count_pending")]);
                    error!(error = %e, "error while checking queue depth");
                }
            }

            // Register for the wake-up before checking the flag, so a
            // shutdown landing in between is not missed.
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();
            if self.state.lock().stop_requested {
                debug!("autoscaler shutdown requested");
                break AutoscalerExit::Shutdown;
            }

            tokio::select! {
                _ = woken => {
                    debug!("autoscaler shutdown requested");
                    break AutoscalerExit::Shutdown;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        };

        *self.state.lock() = RunState::default();

        AutoscalerReport {
            ticks,
            scale_ups,
            scale_downs,
            sample_errors,
            peak_workers,
            exit,
        }
    }
}
