//! Periodic reconciliation
//!
//! The [`CycleScheduler`] runs one reconciliation cycle every `reconcile.cycle_interval`
//! until its cancellation token fires. Failures are logged and the loop carries on;
//! the next tick simply tries again. A [`Notify`] trigger runs a cycle right away and
//! restarts the interval from there.
//!
//! # Example
//!
//! ```no_run
//! use bangumi_sync::{Config, ReconcileEngine};
//! use bangumi_sync::scheduler::CycleScheduler;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ReconcileEngine::new(Config::default()).await?;
//! let token = CancellationToken::new();
//! let scheduler = CycleScheduler::new(engine, token.clone());
//!
//! tokio::spawn(scheduler.run());
//! // ... later
//! token.cancel();
//! # Ok(())
//! # }
//! ```

use crate::ReconcileEngine;
use crate::error::Error;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs reconciliation cycles on a fixed interval
pub struct CycleScheduler {
    engine: ReconcileEngine,
    cancel_token: CancellationToken,
    trigger: Arc<Notify>,
}

impl CycleScheduler {
    /// Create a scheduler; cancelling `cancel_token` ends [`run`](Self::run)
    pub fn new(engine: ReconcileEngine, cancel_token: CancellationToken) -> Self {
        Self {
            engine,
            cancel_token,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Use `trigger` to request an out-of-schedule cycle
    pub fn with_trigger(mut self, trigger: Arc<Notify>) -> Self {
        self.trigger = trigger;
        self
    }

    /// Run until cancelled or until the engine stops accepting work
    ///
    /// The first cycle starts immediately. A cycle in progress when the token fires is
    /// allowed to finish; the engine is then stopped.
    pub async fn run(self) {
        let period = self.engine.config().reconcile.cycle_interval;
        info!(interval_secs = period.as_secs(), "Cycle scheduler started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    if self.engine.is_stopped() {
                        info!("Engine stopped, cycle scheduler exiting");
                        break;
                    }
                    self.tick().await;
                }
                _ = self.trigger.notified() => {
                    if self.engine.is_stopped() {
                        info!("Engine stopped, cycle scheduler exiting");
                        break;
                    }
                    info!("Cycle requested");
                    self.tick().await;
                    interval.reset();
                }
            }
        }

        self.engine.stop();
        info!("Cycle scheduler stopped");
    }

    async fn tick(&self) {
        if let Err(e) = self.engine.sync_virtual_subscriptions().await {
            error!(error = %e, "Failed to register virtual subscriptions");
        }

        match self.engine.run_cycle(&[]).await {
            Ok(report) => {
                debug!(
                    outcomes = report.outcomes.len(),
                    decayed = report.decayed,
                    "Scheduled cycle complete"
                );
            }
            Err(Error::ShuttingDown) => {
                warn!("Cycle skipped, engine is shutting down");
            }
            Err(e) => {
                error!(error = %e, "Scheduled cycle failed");
            }
        }
    }
}
