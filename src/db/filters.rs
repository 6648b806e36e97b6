//! Per-subscription filter rules.

use crate::error::DatabaseError;
use crate::types::FilterRule;
use crate::{Error, Result};

use super::{Database, FilterRuleRow, join_list};

impl Database {
    /// Get the filter rule of a subscription, if one was ever stored
    pub async fn get_filter_rule(&self, subscription: &str) -> Result<Option<FilterRule>> {
        let row = sqlx::query_as::<_, FilterRuleRow>(
            r#"
            SELECT subscription, subtitle_groups, include_words, exclude_words, regex
            FROM filter_rules
            WHERE subscription = ?
            "#,
        )
        .bind(subscription)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get filter rule: {}",
                e
            )))
        })?;

        Ok(row.map(FilterRule::from))
    }

    /// Store the filter rule of a subscription, replacing any previous one
    pub async fn save_filter_rule(&self, subscription: &str, rule: &FilterRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO filter_rules (subscription, subtitle_groups, include_words, exclude_words, regex)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(subscription) DO UPDATE SET
                subtitle_groups = excluded.subtitle_groups,
                include_words = excluded.include_words,
                exclude_words = excluded.exclude_words,
                regex = excluded.regex
            "#,
        )
        .bind(subscription)
        .bind(join_list(&rule.subtitle_groups))
        .bind(join_list(&rule.include))
        .bind(join_list(&rule.exclude))
        .bind(rule.regex.as_deref().filter(|r| !r.is_empty()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save filter rule: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Create an empty filter rule unless one already exists
    pub async fn ensure_filter_rule(&self, subscription: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO filter_rules (subscription) VALUES (?)")
            .bind(subscription)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to create filter rule: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
