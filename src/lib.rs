//! # bangumi-sync
//!
//! Subscription reconciliation and download orchestration for airing bangumi.
//!
//! ## Design Philosophy
//!
//! bangumi-sync is designed to be:
//! - **Crash-safe** - every ledger mutation is a committed, conditional SQLite statement
//! - **Isolated** - a failing source or a broken filter only affects its own subscription
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! Each cycle asks a [`Source`] for the newest episode of every followed bangumi,
//! filters and de-duplicates the releases, records progress and queues one ledger
//! entry per new episode. Entries are then handed to a [`Dispatcher`] (an external
//! download daemon), and failed ones are retried on every later cycle.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bangumi_sync::{Config, ReconcileEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ReconcileEngine::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     engine.follow("Sousou no Frieren", None).await?;
//!     let report = engine.run_cycle(&[]).await?;
//!     println!("{} subscriptions updated", report.updated().count());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Duplicate resolution
pub mod dedup;
/// Download dispatchers
pub mod dispatcher;
/// Reconciliation engine and commands
pub mod engine;
/// Episode arithmetic and title parsing
pub mod episodes;
/// Error types
pub mod error;
/// Release filtering
pub mod filter;
/// Retry logic with exponential backoff
pub mod retry;
/// Periodic reconciliation
pub mod scheduler;
/// Episode sources
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DispatcherConfig, SourceConfig};
pub use db::Database;
pub use dispatcher::{Aria2Dispatcher, Completion, Dispatcher};
pub use engine::{CycleOptions, FilterUpdate, ReconcileEngine, SearchOptions};
pub use error::{DatabaseError, DispatchError, Error, FetchError, LedgerError, Result};
pub use scheduler::CycleScheduler;
pub use source::{RssSource, Source, StaticSource};
use std::sync::Arc;
use tokio::sync::Notify;

pub use types::{
    CommandOutcome, CycleReport, DownloadEntry, DownloadStatus, EntryId, Event, FilterRule,
    Release, Subscription, SubscriptionOutcome, SubscriptionStatus,
};

/// Run the engine on its schedule until a termination signal arrives.
///
/// Starts a [`CycleScheduler`], waits for a signal, then cancels the scheduler and waits
/// for the cycle in progress (if any) to finish.
///
/// - **Unix:** SIGTERM and SIGINT shut down. SIGHUP runs a reconciliation cycle now
///   instead of waiting for the next interval.
/// - **Windows/other:** Ctrl+C shuts down.
///
/// # Example
///
/// ```no_run
/// use bangumi_sync::{ReconcileEngine, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let engine = ReconcileEngine::new(config).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: ReconcileEngine) -> Result<()> {
    let cancel_token = tokio_util::sync::CancellationToken::new();
    let trigger = Arc::new(Notify::new());
    let scheduler =
        CycleScheduler::new(engine.clone(), cancel_token.clone()).with_trigger(trigger.clone());
    let handle = tokio::spawn(scheduler.run());

    wait_for_signal(&trigger).await;
    tracing::info!("Finishing the current cycle before exit");
    cancel_token.cancel();

    handle
        .await
        .map_err(|e| Error::Other(format!("Cycle scheduler task failed: {}", e)))?;

    let pending = engine.db.list_by_status(DownloadStatus::NotDownloaded).await?.len();
    let retrying = engine.db.list_retryable().await?.len();
    tracing::info!(pending, retrying, "Stopped; queued entries resume on next start");
    Ok(())
}

/// Wait for SIGTERM or SIGINT, requesting a cycle on every SIGHUP meanwhile
#[cfg(unix)]
async fn wait_for_signal(trigger: &Notify) {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            // Restricted environments (containers, tests) may refuse registration
            tracing::warn!(error = %e, "Could not register shutdown signals, using ctrl_c");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sighup) => Some(sighup),
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGHUP, cycles run on schedule only");
            None
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
                return;
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
                return;
            }
            Some(()) = async {
                match sighup.as_mut() {
                    Some(sighup) => sighup.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                tracing::info!("Received SIGHUP, reconciling now");
                trigger.notify_one();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(_trigger: &Notify) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}
