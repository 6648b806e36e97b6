//! Runtime state: small key/value settings that survive restarts.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const ACTIVE_SOURCE_KEY: &str = "active_source";

impl Database {
    /// Read a runtime state value
    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read runtime state '{}': {}",
                        key, e
                    )))
                })?;

        Ok(value)
    }

    /// Write a runtime state value
    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }

    /// Identifier of the source selected by the last `switch_source`
    pub async fn active_source(&self) -> Result<Option<String>> {
        self.get_state(ACTIVE_SOURCE_KEY).await
    }

    /// Persist the active source identifier
    pub async fn set_active_source(&self, source_id: &str) -> Result<()> {
        self.set_state(ACTIVE_SOURCE_KEY, source_id).await
    }
}
