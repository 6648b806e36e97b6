//! Custom test assertions for E2E tests

use bangumi_sync::{DownloadStatus, Event, ReconcileEngine};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;

/// Wait until `events` yields an event matching `predicate`
///
/// Returns `None` on timeout or when the channel closes.
pub async fn wait_for_event<F>(
    events: &mut Receiver<Event>,
    timeout: Duration,
    predicate: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Assert the status of every ledger entry of `subscription`, in episode order
pub async fn assert_entry_statuses(
    engine: &ReconcileEngine,
    subscription: &str,
    expected: &[(u32, DownloadStatus)],
) {
    let actual: Vec<(u32, DownloadStatus)> = engine
        .db
        .list_entries_for(subscription)
        .await
        .expect("Failed to list entries")
        .into_iter()
        .map(|e| (e.episode, e.status))
        .collect();
    assert_eq!(actual, expected, "ledger of {subscription}");
}
