//! Subscription CRUD, progress recording and status decay.

use crate::error::DatabaseError;
use crate::types::{Subscription, SubscriptionStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{Database, SubscriptionRow, UpsertSubscriptionParams};

const SELECT_SUBSCRIPTION: &str = r#"
    SELECT name, status, episode, updated_at, source, created_at
    FROM subscriptions
"#;

impl Database {
    /// Create a subscription, or overwrite status/episode/source of an existing one
    pub async fn upsert_subscription(&self, params: UpsertSubscriptionParams<'_>) -> Result<()> {
        let UpsertSubscriptionParams {
            name,
            status,
            episode,
            source,
        } = params;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (name, status, episode, source, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                status = excluded.status,
                episode = excluded.episode,
                source = excluded.source
            "#,
        )
        .bind(name)
        .bind(status.to_i32())
        .bind(i64::from(episode))
        .bind(source)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert subscription: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a subscription by exact name
    pub async fn get_subscription(&self, name: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "{SELECT_SUBSCRIPTION} WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get subscription: {}",
                e
            )))
        })?;

        row.map(Subscription::try_from).transpose()
    }

    /// List every subscription, including deleted ones
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "{SELECT_SUBSCRIPTION} ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list subscriptions: {}",
                e
            )))
        })?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// List subscriptions whose status is following or updated
    pub async fn list_followed_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "{SELECT_SUBSCRIPTION} WHERE status IN (?, ?) ORDER BY name ASC"
        ))
        .bind(SubscriptionStatus::Following.to_i32())
        .bind(SubscriptionStatus::Updated.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list followed subscriptions: {}",
                e
            )))
        })?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// Set the status of one subscription
    ///
    /// Returns false if no subscription has that name.
    pub async fn set_subscription_status(
        &self,
        name: &str,
        status: SubscriptionStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE subscriptions SET status = ? WHERE name = ?")
            .bind(status.to_i32())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set subscription status: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Set the status of every subscription, returning how many changed
    pub async fn set_all_subscription_status(&self, status: SubscriptionStatus) -> Result<u64> {
        let result = sqlx::query("UPDATE subscriptions SET status = ? WHERE status != ?")
            .bind(status.to_i32())
            .bind(status.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set all subscription statuses: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Overwrite the recorded episode (explicit user override, may decrease)
    pub async fn set_subscription_episode(&self, name: &str, episode: u32) -> Result<bool> {
        let result = sqlx::query("UPDATE subscriptions SET episode = ? WHERE name = ?")
            .bind(i64::from(episode))
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set subscription episode: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record reconciliation progress
    ///
    /// Sets `episode`, marks the subscription updated and stamps `updated_at`, but only
    /// when the stored episode is not already higher. Returns false when nothing changed,
    /// so recorded progress never regresses.
    pub async fn record_progress(
        &self,
        name: &str,
        episode: u32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET episode = ?, status = ?, updated_at = ?
            WHERE name = ? AND episode <= ?
            "#,
        )
        .bind(i64::from(episode))
        .bind(SubscriptionStatus::Updated.to_i32())
        .bind(at.timestamp())
        .bind(name)
        .bind(i64::from(episode))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record progress: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Reset `updated` subscriptions last updated before `cutoff` back to following
    pub async fn decay_updated_status(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = ?
            WHERE status = ? AND (updated_at IS NULL OR updated_at < ?)
            "#,
        )
        .bind(SubscriptionStatus::Following.to_i32())
        .bind(SubscriptionStatus::Updated.to_i32())
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to decay updated status: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}
