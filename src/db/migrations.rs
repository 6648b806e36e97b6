//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    /// The journal runs in WAL mode with `synchronous = FULL`, so every committed
    /// ledger mutation survives a crash.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: subscriptions, filter rules and the download ledger
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        Self::begin(conn, 1).await?;

        let result = async {
            Self::create_subscriptions_schema(conn).await?;
            Self::create_ledger_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::finish(conn, 1, result).await?;

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Migration v2: source catalog, subtitle groups and runtime state
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");

        Self::begin(conn, 2).await?;

        let result = async {
            Self::create_source_tables(conn).await?;
            Self::exec_schema(
                conn,
                r#"
                CREATE TABLE runtime_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
                "runtime_state table",
            )
            .await?;
            Self::record_migration(conn, 2).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::finish(conn, 2, result).await?;

        tracing::info!("Database migration v2 complete");
        Ok(())
    }

    async fn create_subscriptions_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::exec_schema(
            conn,
            r#"
            CREATE TABLE subscriptions (
                name TEXT PRIMARY KEY,
                status INTEGER NOT NULL DEFAULT 1,
                episode INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "subscriptions table",
        )
        .await?;

        Self::exec_schema(
            conn,
            "CREATE INDEX idx_subscriptions_status ON subscriptions(status)",
            "subscriptions status index",
        )
        .await?;

        Self::exec_schema(
            conn,
            r#"
            CREATE TABLE filter_rules (
                subscription TEXT PRIMARY KEY
                    REFERENCES subscriptions(name) ON DELETE CASCADE,
                subtitle_groups TEXT,
                include_words TEXT,
                exclude_words TEXT,
                regex TEXT
            )
            "#,
            "filter_rules table",
        )
        .await
    }

    async fn create_ledger_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::exec_schema(
            conn,
            r#"
            CREATE TABLE download_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription TEXT NOT NULL,
                episode INTEGER NOT NULL,
                title TEXT NOT NULL,
                locator TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                dispatch_handle TEXT,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "download_entries table",
        )
        .await?;

        // At most one active (not downloaded / downloading) entry per key
        Self::exec_schema(
            conn,
            r#"
            CREATE UNIQUE INDEX idx_download_entries_active
            ON download_entries(subscription, episode)
            WHERE status IN (0, 1)
            "#,
            "active entry index",
        )
        .await?;

        Self::exec_schema(
            conn,
            "CREATE INDEX idx_download_entries_status ON download_entries(status)",
            "download_entries status index",
        )
        .await
    }

    /// Create the tables whose content depends on the active source
    pub(super) async fn create_source_tables(conn: &mut SqliteConnection) -> Result<()> {
        Self::exec_schema(
            conn,
            r#"
            CREATE TABLE IF NOT EXISTS catalog (
                name TEXT PRIMARY KEY,
                keyword TEXT NOT NULL,
                subtitle_groups TEXT,
                update_day TEXT,
                cover TEXT
            )
            "#,
            "catalog table",
        )
        .await?;

        Self::exec_schema(
            conn,
            r#"
            CREATE TABLE IF NOT EXISTS subtitle_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )
            "#,
            "subtitle_groups table",
        )
        .await
    }

    async fn exec_schema(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    async fn begin(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin migration v{}: {}",
                    version, e
                )))
            })?;
        Ok(())
    }

    // Commit on success, roll back and surface the original error otherwise
    async fn finish(conn: &mut SqliteConnection, version: i32, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {}",
                    e
                )))
            })?;
        Ok(version.unwrap_or(0))
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
