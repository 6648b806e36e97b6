//! Download dispatchers
//!
//! A [`Dispatcher`] hands ledger entries to an external download daemon and reports on
//! transfers it accepted. The engine never downloads anything itself.

use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::types::EntryId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod aria2;

pub use aria2::Aria2Dispatcher;

/// One release handed to the dispatcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Ledger entry the request belongs to
    pub entry_id: EntryId,
    /// Subscription name
    pub subscription: String,
    /// Episode number
    pub episode: u32,
    /// Release title
    pub title: String,
    /// Magnet URI, torrent URL or other locator
    pub locator: String,
}

/// Per-request answer of [`Dispatcher::submit`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The daemon took the transfer
    Accepted {
        /// Daemon-side transfer id
        handle: String,
    },
    /// The daemon refused the transfer
    Rejected {
        /// Why
        reason: String,
    },
}

/// Progress of an accepted transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferState {
    /// Queued or transferring
    Active,
    /// Finished successfully
    Complete,
    /// Finished with an error or removed
    Failed {
        /// Failure description
        reason: String,
    },
}

/// Completion report for [`ReconcileEngine::report_completion`](crate::ReconcileEngine::report_completion)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Completion {
    /// Transfer finished
    Succeeded,
    /// Transfer failed
    Failed {
        /// Failure description
        reason: String,
    },
}

/// Trait for external download daemons
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Submit releases
    ///
    /// Returns exactly one outcome per request, in request order.
    ///
    /// # Errors
    /// [`DispatchError`](crate::error::DispatchError) when the daemon cannot be reached
    /// at all. Per-request refusals are `SubmitOutcome::Rejected`, not errors.
    async fn submit(&self, requests: &[DispatchRequest]) -> Result<Vec<SubmitOutcome>>;

    /// Ask about a transfer previously accepted with `handle`
    async fn poll(&self, handle: &str) -> Result<TransferState>;
}

/// Build the configured dispatcher, if any
pub fn from_config(config: &DispatcherConfig) -> Result<Option<Arc<dyn Dispatcher>>> {
    match config {
        DispatcherConfig::Aria2 {
            rpc_url,
            secret,
            save_path,
        } => Ok(Some(Arc::new(Aria2Dispatcher::new(
            rpc_url.clone(),
            secret.clone(),
            save_path.clone(),
        )?))),
        DispatcherConfig::None => Ok(None),
    }
}
