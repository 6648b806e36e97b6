//! Source-specific catalog: known bangumi and subtitle groups.
//!
//! Both tables belong to the active source and are rebuilt when it changes.

use crate::error::DatabaseError;
use crate::types::{CatalogEntry, SubtitleGroup};
use crate::{Error, Result};

use super::{CatalogRow, Database, SubtitleGroupRow, join_list};

impl Database {
    /// Replace the catalog and subtitle groups in one transaction
    pub async fn replace_catalog(
        &self,
        entries: &[CatalogEntry],
        groups: &[SubtitleGroup],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin catalog transaction: {}",
                e
            )))
        })?;

        for table in ["catalog", "subtitle_groups"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to clear {}: {}",
                        table, e
                    )))
                })?;
        }

        for entry in entries {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO catalog (name, keyword, subtitle_groups, update_day, cover)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.name)
            .bind(&entry.keyword)
            .bind(join_list(&entry.subtitle_groups))
            .bind(&entry.update_day)
            .bind(&entry.cover)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert catalog entry: {}",
                    e
                )))
            })?;
        }

        for group in groups {
            sqlx::query("INSERT OR REPLACE INTO subtitle_groups (id, name) VALUES (?, ?)")
                .bind(&group.id)
                .bind(&group.name)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert subtitle group: {}",
                        e
                    )))
                })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit catalog: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Drop and recreate the source-specific tables
    pub async fn rebuild_source_tables(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        for table in ["catalog", "subtitle_groups"] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to drop {}: {}",
                        table, e
                    )))
                })?;
        }

        Self::create_source_tables(&mut *conn).await
    }

    /// List the whole catalog, by name
    pub async fn list_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query_as::<_, CatalogRow>(
            r#"
            SELECT name, keyword, subtitle_groups, update_day, cover
            FROM catalog
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list catalog: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(CatalogEntry::from).collect())
    }

    /// Number of catalog entries
    pub async fn count_catalog(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalog")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count catalog: {}",
                    e
                )))
            })?;

        Ok(count)
    }

    /// Resolve a user-typed name against the catalog
    ///
    /// An exact match wins; otherwise the shortest name containing `name`
    /// (case-insensitive) is returned.
    pub async fn find_catalog_entry(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let pattern = format!("%{}%", escape_like(name));

        let row = sqlx::query_as::<_, CatalogRow>(
            r#"
            SELECT name, keyword, subtitle_groups, update_day, cover
            FROM catalog
            WHERE name = ? OR name LIKE ? ESCAPE '\'
            ORDER BY (name = ?) DESC, length(name) ASC, name ASC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(&pattern)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find catalog entry: {}",
                e
            )))
        })?;

        Ok(row.map(CatalogEntry::from))
    }

    /// List all subtitle groups of the active source
    pub async fn list_subtitle_groups(&self) -> Result<Vec<SubtitleGroup>> {
        let rows = sqlx::query_as::<_, SubtitleGroupRow>(
            "SELECT id, name FROM subtitle_groups ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list subtitle groups: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(SubtitleGroup::from).collect())
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
