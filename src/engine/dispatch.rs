//! Dispatch pass, retry pass and completion tracking.

use crate::dispatcher::{Completion, DispatchRequest, Dispatcher, SubmitOutcome, TransferState};
use crate::error::{DispatchError, Error, LedgerError, Result};
use crate::types::{DispatchSummary, DownloadEntry, DownloadStatus, EntryId, Event};
use std::sync::Arc;

use super::ReconcileEngine;

/// How a batch of submissions went
#[derive(Debug, Default)]
struct BatchResult {
    accepted: usize,
    rejected: usize,
}

impl ReconcileEngine {
    /// Hand pending entries to the dispatcher
    ///
    /// Every `not_downloaded` entry is submitted, then every `failed` entry is submitted
    /// once more unless a newer entry for the same episode took its place. Accepted entries move to `downloading`; rejected ones to `failed` with
    /// the reason. When the dispatcher cannot be reached the pass stops and the
    /// remaining entries keep their status for the next cycle.
    pub async fn dispatch_pending(&self) -> Result<DispatchSummary> {
        let Some(dispatcher) = self.dispatcher.clone() else {
            tracing::debug!("No dispatcher configured, entries stay queued");
            return Ok(DispatchSummary::default());
        };

        let fresh = self.db.list_by_status(DownloadStatus::NotDownloaded).await?;
        let retries = self.db.list_retryable().await?;

        let first = self.submit_entries(&dispatcher, &fresh).await?;

        let threshold = self.config.reconcile.warn_after_attempts;
        if threshold > 0 {
            for entry in retries.iter().filter(|e| e.attempts >= threshold) {
                tracing::warn!(
                    entry_id = %entry.id,
                    subscription = %entry.subscription,
                    episode = entry.episode,
                    attempts = entry.attempts,
                    error = entry.last_error.as_deref().unwrap_or(""),
                    "Entry keeps failing, retrying anyway"
                );
                self.emit_event(Event::RetriesExhausted {
                    id: entry.id,
                    name: entry.subscription.clone(),
                    episode: entry.episode,
                    attempts: entry.attempts,
                });
            }
        }

        let second = if first.stopped {
            BatchResult::default()
        } else {
            self.submit_entries(&dispatcher, &retries).await?.result
        };

        Ok(DispatchSummary {
            submitted: first.result.accepted,
            retried: second.accepted,
            rejected: first.result.rejected + second.rejected,
        })
    }

    /// Ask the dispatcher about every downloading entry
    ///
    /// Returns the number of entries that reached `downloaded` or `failed`.
    pub async fn poll_completions(&self) -> Result<usize> {
        let Some(dispatcher) = self.dispatcher.clone() else {
            return Ok(0);
        };

        let timeout = self.config.reconcile.dispatch_timeout;
        let mut finished = 0;

        for entry in self.db.list_by_status(DownloadStatus::Downloading).await? {
            let Some(handle) = entry.dispatch_handle.as_deref() else {
                tracing::warn!(entry_id = %entry.id, "Downloading entry has no dispatch handle");
                continue;
            };

            let state = match tokio::time::timeout(timeout, dispatcher.poll(handle)).await {
                Ok(Ok(state)) => state,
                Ok(Err(e)) => {
                    tracing::warn!(entry_id = %entry.id, handle, error = %e, "Poll failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        handle,
                        after_secs = timeout.as_secs(),
                        "Poll timed out"
                    );
                    continue;
                }
            };

            let completion = match state {
                TransferState::Active => continue,
                TransferState::Complete => Completion::Succeeded,
                TransferState::Failed { reason } => Completion::Failed { reason },
            };
            self.report_completion(entry.id, completion).await?;
            finished += 1;
        }

        Ok(finished)
    }

    /// Record the end of a transfer reported by the dispatcher
    ///
    /// # Errors
    /// [`LedgerError::InvalidTransition`] unless the entry is `downloading`.
    pub async fn report_completion(
        &self,
        id: EntryId,
        completion: Completion,
    ) -> Result<DownloadEntry> {
        match completion {
            Completion::Succeeded => {
                let entry = self.db.mark_succeeded(id).await?;
                tracing::info!(
                    entry_id = %id,
                    subscription = %entry.subscription,
                    episode = entry.episode,
                    "Episode downloaded"
                );
                self.emit_event(Event::Downloaded { id });
                Ok(entry)
            }
            Completion::Failed { reason } => {
                let entry = self.db.mark_failed(id, &reason).await?;
                tracing::warn!(
                    entry_id = %id,
                    subscription = %entry.subscription,
                    episode = entry.episode,
                    error = %reason,
                    "Download failed, will retry next cycle"
                );
                self.emit_event(Event::DownloadFailed { id, error: reason });
                Ok(entry)
            }
        }
    }

    /// Submit entries one at a time, each bounded by `dispatch_timeout`
    pub(crate) async fn submit_entries(
        &self,
        dispatcher: &Arc<dyn Dispatcher>,
        entries: &[DownloadEntry],
    ) -> Result<PassResult> {
        let timeout = self.config.reconcile.dispatch_timeout;
        let mut result = BatchResult::default();

        for entry in entries {
            let request = DispatchRequest {
                entry_id: entry.id,
                subscription: entry.subscription.clone(),
                episode: entry.episode,
                title: entry.title.clone(),
                locator: entry.locator.clone(),
            };

            let submitted =
                match tokio::time::timeout(timeout, dispatcher.submit(std::slice::from_ref(&request)))
                    .await
                {
                    Ok(submitted) => submitted,
                    Err(_) => Err(DispatchError::TimedOut {
                        dispatcher: dispatcher.name().to_string(),
                        after_secs: timeout.as_secs(),
                    }
                    .into()),
                };

            let outcome = match submitted.and_then(single_outcome) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.log_unreachable(dispatcher.as_ref(), &e);
                    return Ok(PassResult {
                        result,
                        stopped: true,
                    });
                }
            };

            self.apply_outcome(entry, outcome, &mut result).await?;
        }

        Ok(PassResult {
            result,
            stopped: false,
        })
    }

    async fn apply_outcome(
        &self,
        entry: &DownloadEntry,
        outcome: SubmitOutcome,
        result: &mut BatchResult,
    ) -> Result<()> {
        let recorded = match outcome {
            SubmitOutcome::Accepted { handle } => {
                let recorded = self.db.mark_enqueued(entry.id, &handle).await;
                if recorded.is_ok() {
                    tracing::debug!(
                        entry_id = %entry.id,
                        subscription = %entry.subscription,
                        episode = entry.episode,
                        handle = %handle,
                        "Entry handed to dispatcher"
                    );
                    self.emit_event(Event::DispatchAccepted {
                        id: entry.id,
                        handle,
                    });
                    result.accepted += 1;
                }
                recorded
            }
            SubmitOutcome::Rejected { reason } => {
                let recorded = self.db.mark_rejected(entry.id, &reason).await;
                if recorded.is_ok() {
                    tracing::warn!(
                        entry_id = %entry.id,
                        subscription = %entry.subscription,
                        episode = entry.episode,
                        error = %reason,
                        "Dispatcher rejected entry"
                    );
                    self.emit_event(Event::DispatchRejected {
                        id: entry.id,
                        reason,
                    });
                    result.rejected += 1;
                }
                recorded
            }
        };

        match recorded {
            Ok(_) => Ok(()),
            // Entry moved under us (e.g. a completion callback); leave it alone
            Err(Error::Ledger(e @ LedgerError::InvalidTransition { .. })) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Entry changed during dispatch");
                Ok(())
            }
            Err(Error::Ledger(e @ LedgerError::DuplicateEntry { .. })) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    subscription = %entry.subscription,
                    episode = entry.episode,
                    error = %e,
                    "Episode already active under a newer entry, left as failed"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn log_unreachable(&self, dispatcher: &dyn Dispatcher, error: &Error) {
        tracing::warn!(
            dispatcher = dispatcher.name(),
            error = %error,
            "Dispatcher unavailable, remaining entries stay queued"
        );
    }
}

/// One request was submitted, so exactly one outcome must come back
fn single_outcome(mut outcomes: Vec<SubmitOutcome>) -> Result<SubmitOutcome> {
    match (outcomes.pop(), outcomes.len()) {
        (Some(outcome), 0) => Ok(outcome),
        (last, rest) => Err(DispatchError::OutcomeMismatch {
            expected: 1,
            got: rest + usize::from(last.is_some()),
        }
        .into()),
    }
}

/// Outcome of [`ReconcileEngine::submit_entries`]
#[derive(Debug, Default)]
pub(crate) struct PassResult {
    result: BatchResult,
    /// The dispatcher became unavailable part-way
    stopped: bool,
}

impl PassResult {
    pub(crate) fn accepted(&self) -> usize {
        self.result.accepted
    }
}
