//! Download ledger: one durable entry per queued release.
//!
//! Status changes are single conditional `UPDATE` statements guarded by the set of
//! allowed predecessor states, so concurrent writers can never push an entry through
//! an illegal transition. Enqueue races are settled by the partial unique index on
//! active entries.

use crate::error::{DatabaseError, LedgerError};
use crate::types::{DownloadEntry, DownloadStatus, EntryId};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashSet;

use super::{Database, DownloadEntryRow, NewDownloadEntry};

const SELECT_ENTRY: &str = r#"
    SELECT id, subscription, episode, title, locator, status, attempts,
           dispatch_handle, last_error, created_at, updated_at
    FROM download_entries
"#;

/// Column changes applied together with a status transition
#[derive(Default)]
struct TransitionParams<'a> {
    handle: Option<&'a str>,
    error: Option<&'a str>,
    count_attempt: bool,
}

impl Database {
    /// Create a `not_downloaded` entry
    ///
    /// # Errors
    /// [`LedgerError::DuplicateEntry`] if an entry for the same subscription and episode
    /// is still not downloaded or downloading. Failed and downloaded entries do not block.
    pub async fn enqueue(&self, entry: &NewDownloadEntry) -> Result<DownloadEntry> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO download_entries (
                subscription, episode, title, locator, status, attempts,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&entry.subscription)
        .bind(i64::from(entry.episode))
        .bind(&entry.title)
        .bind(&entry.locator)
        .bind(DownloadStatus::NotDownloaded.to_i32())
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Ledger(LedgerError::DuplicateEntry {
                    subscription: entry.subscription.clone(),
                    episode: entry.episode,
                })
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to enqueue download entry: {}",
                e
            ))),
        })?;

        self.get_entry(EntryId(result.last_insert_rowid()))
            .await?
            .ok_or_else(|| {
                Error::Database(DatabaseError::NotFound(format!(
                    "download entry {} vanished after insert",
                    result.last_insert_rowid()
                )))
            })
    }

    /// Move an entry to `status`
    ///
    /// Allowed: not_downloaded → downloading, downloading → downloaded,
    /// downloading → failed, failed → downloading. Downloaded is terminal and
    /// same-state writes are rejected.
    ///
    /// # Errors
    /// [`LedgerError::InvalidTransition`] for an illegal move, [`LedgerError::NotFound`]
    /// for an unknown id.
    pub async fn update_status(&self, id: EntryId, status: DownloadStatus) -> Result<DownloadEntry> {
        self.transition(id, status, TransitionParams::default())
            .await
    }

    /// Record that the dispatcher accepted an entry
    ///
    /// Moves it to downloading, stores the handle and counts the attempt.
    ///
    /// # Errors
    /// [`LedgerError::DuplicateEntry`] when another entry for the same key is already
    /// active.
    pub async fn mark_enqueued(&self, id: EntryId, handle: &str) -> Result<DownloadEntry> {
        self.transition(
            id,
            DownloadStatus::Downloading,
            TransitionParams {
                handle: Some(handle),
                count_attempt: true,
                ..Default::default()
            },
        )
        .await
    }

    /// Record a finished transfer
    pub async fn mark_succeeded(&self, id: EntryId) -> Result<DownloadEntry> {
        self.transition(id, DownloadStatus::Downloaded, TransitionParams::default())
            .await
    }

    /// Record a failed transfer with its reason
    pub async fn mark_failed(&self, id: EntryId, reason: &str) -> Result<DownloadEntry> {
        self.transition(
            id,
            DownloadStatus::Failed,
            TransitionParams {
                error: Some(reason),
                ..Default::default()
            },
        )
        .await
    }

    /// Record that the dispatcher refused an entry
    ///
    /// Counts as an attempt that went through downloading straight to failed, so it is
    /// accepted from the same states as [`mark_enqueued`](Self::mark_enqueued).
    pub async fn mark_rejected(&self, id: EntryId, reason: &str) -> Result<DownloadEntry> {
        let now = Utc::now().timestamp();
        let predecessors = DownloadStatus::Downloading.allowed_predecessors();
        let sql = format!(
            r#"
            UPDATE download_entries
            SET status = ?, attempts = attempts + 1, last_error = ?, updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            placeholders(predecessors.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(DownloadStatus::Failed.to_i32())
            .bind(reason)
            .bind(now)
            .bind(id);
        for status in predecessors {
            query = query.bind(status.to_i32());
        }

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record rejection: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, DownloadStatus::Failed).await);
        }
        self.require_entry(id).await
    }

    /// Get an entry by ID
    pub async fn get_entry(&self, id: EntryId) -> Result<Option<DownloadEntry>> {
        let row = sqlx::query_as::<_, DownloadEntryRow>(&format!("{SELECT_ENTRY} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get download entry: {}",
                    e
                )))
            })?;

        row.map(DownloadEntry::try_from).transpose()
    }

    /// List entries with a given status, oldest first
    pub async fn list_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadEntry>> {
        let rows = sqlx::query_as::<_, DownloadEntryRow>(&format!(
            "{SELECT_ENTRY} WHERE status = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list download entries by status: {}",
                e
            )))
        })?;

        rows.into_iter().map(DownloadEntry::try_from).collect()
    }

    /// Failed entries eligible for another attempt, oldest first
    ///
    /// An entry is skipped once its subscription and episode have a newer entry that is
    /// queued, downloading or downloaded, which happens after `mark` lowers the episode
    /// or a release is downloaded by hand.
    pub async fn list_retryable(&self) -> Result<Vec<DownloadEntry>> {
        let rows = sqlx::query_as::<_, DownloadEntryRow>(&format!(
            r#"{SELECT_ENTRY} AS failed
            WHERE failed.status = ?
              AND NOT EXISTS (
                  SELECT 1 FROM download_entries AS other
                  WHERE other.subscription = failed.subscription
                    AND other.episode = failed.episode
                    AND other.status IN (?, ?, ?)
              )
            ORDER BY failed.created_at ASC, failed.id ASC"#
        ))
        .bind(DownloadStatus::Failed.to_i32())
        .bind(DownloadStatus::NotDownloaded.to_i32())
        .bind(DownloadStatus::Downloading.to_i32())
        .bind(DownloadStatus::Downloaded.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list retryable download entries: {}",
                e
            )))
        })?;

        rows.into_iter().map(DownloadEntry::try_from).collect()
    }

    /// List every entry of a subscription, by episode
    pub async fn list_entries_for(&self, subscription: &str) -> Result<Vec<DownloadEntry>> {
        let rows = sqlx::query_as::<_, DownloadEntryRow>(&format!(
            "{SELECT_ENTRY} WHERE subscription = ? ORDER BY episode ASC, id ASC"
        ))
        .bind(subscription)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list download entries: {}",
                e
            )))
        })?;

        rows.into_iter().map(DownloadEntry::try_from).collect()
    }

    /// Episodes of a subscription that already have a downloaded entry
    pub async fn downloaded_episodes(&self, subscription: &str) -> Result<HashSet<u32>> {
        let episodes: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT episode FROM download_entries WHERE subscription = ? AND status = ?",
        )
        .bind(subscription)
        .bind(DownloadStatus::Downloaded.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list downloaded episodes: {}",
                e
            )))
        })?;

        Ok(episodes
            .into_iter()
            .filter_map(|e| u32::try_from(e).ok())
            .collect())
    }

    /// Total number of ledger entries
    pub async fn count_entries(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count download entries: {}",
                    e
                )))
            })?;

        Ok(count)
    }

    async fn transition(
        &self,
        id: EntryId,
        to: DownloadStatus,
        params: TransitionParams<'_>,
    ) -> Result<DownloadEntry> {
        let TransitionParams {
            handle,
            error,
            count_attempt,
        } = params;

        let predecessors = to.allowed_predecessors();
        if predecessors.is_empty() {
            return Err(self.transition_error(id, to).await);
        }

        let now = Utc::now().timestamp();
        let sql = format!(
            r#"
            UPDATE download_entries
            SET status = ?,
                attempts = attempts + ?,
                dispatch_handle = COALESCE(?, dispatch_handle),
                last_error = COALESCE(?, last_error),
                updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            placeholders(predecessors.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(to.to_i32())
            .bind(i64::from(count_attempt))
            .bind(handle)
            .bind(error)
            .bind(now)
            .bind(id);
        for status in predecessors {
            query = query.bind(status.to_i32());
        }

        let result = match query.execute(&self.pool).await {
            Ok(result) => result,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(self.duplicate_error(id).await);
            }
            Err(e) => {
                return Err(Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update download status: {}",
                    e
                ))));
            }
        };

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, to).await);
        }
        self.require_entry(id).await
    }

    // Reactivating an entry collided with another active entry for its key
    async fn duplicate_error(&self, id: EntryId) -> Error {
        match self.get_entry(id).await {
            Ok(Some(entry)) => Error::Ledger(LedgerError::DuplicateEntry {
                subscription: entry.subscription,
                episode: entry.episode,
            }),
            Ok(None) => Error::Ledger(LedgerError::NotFound { id }),
            Err(e) => e,
        }
    }

    // Explain why a conditional update touched nothing
    async fn transition_error(&self, id: EntryId, to: DownloadStatus) -> Error {
        match self.get_entry(id).await {
            Ok(Some(entry)) => Error::Ledger(LedgerError::InvalidTransition {
                id,
                from: entry.status,
                to,
            }),
            Ok(None) => Error::Ledger(LedgerError::NotFound { id }),
            Err(e) => e,
        }
    }

    async fn require_entry(&self, id: EntryId) -> Result<DownloadEntry> {
        self.get_entry(id)
            .await?
            .ok_or(Error::Ledger(LedgerError::NotFound { id }))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
