//! Error types for bangumi-sync
//!
//! This module provides the error taxonomy used across the crate:
//! - [`Error::Config`] for invalid rules and settings (bad regex, bad template)
//! - [`FetchError`] for source failures, recovered per subscription
//! - [`DispatchError`] for download-daemon failures
//! - [`LedgerError`] for download ledger conflicts and illegal transitions
//!
//! Every error carries enough context (subscription name, episode, entry id) to be
//! attributed to a single key, so one failing subscription never hides another.

use crate::types::{DownloadStatus, EntryId};
use thiserror::Error;

/// Result type alias for bangumi-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bangumi-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting or rule is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key or rule field that caused the error (e.g., "regex")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Source (remote listing) failure
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Download dispatcher failure
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Download ledger conflict or illegal transition
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Subscription, bangumi or source not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new fetches
    #[error("shutdown in progress: not accepting new fetches")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Fetch(e) => match e {
                FetchError::Failed { .. } => "fetch_failed",
                FetchError::TimedOut { .. } => "fetch_timed_out",
                FetchError::Malformed { .. } => "fetch_malformed",
            },
            Error::Dispatch(e) => match e {
                DispatchError::Unreachable { .. } => "dispatcher_unreachable",
                DispatchError::Rpc { .. } => "dispatcher_rpc_error",
                DispatchError::TimedOut { .. } => "dispatch_timed_out",
                DispatchError::OutcomeMismatch { .. } => "dispatch_outcome_mismatch",
            },
            Error::Ledger(e) => match e {
                LedgerError::DuplicateEntry { .. } => "duplicate_entry",
                LedgerError::InvalidTransition { .. } => "invalid_transition",
                LedgerError::NotFound { .. } => "entry_not_found",
            },
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether the error is a concurrent-enqueue race that callers may skip
    pub fn is_duplicate_entry(&self) -> bool {
        matches!(self, Error::Ledger(LedgerError::DuplicateEntry { .. }))
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Source failures. Recovered at the subscription level: skip, log, continue.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source could not produce a listing
    #[error("source {source_id} failed for '{subject}': {reason}")]
    Failed {
        /// Identifier of the source that failed
        source_id: String,
        /// Subscription name or search keyword being fetched
        subject: String,
        /// Underlying reason
        reason: String,
    },

    /// The fetch did not complete within the configured timeout
    #[error("source {source_id} timed out after {after_secs}s for '{subject}'")]
    TimedOut {
        /// Identifier of the source that timed out
        source_id: String,
        /// Subscription name or search keyword being fetched
        subject: String,
        /// Timeout that elapsed, in seconds
        after_secs: u64,
    },

    /// The source answered but the payload could not be parsed
    #[error("source {source_id} returned a malformed listing: {reason}")]
    Malformed {
        /// Identifier of the source
        source_id: String,
        /// Parse failure description
        reason: String,
    },
}

/// Download dispatcher failures
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Daemon could not be reached
    #[error("dispatcher {dispatcher} unreachable: {reason}")]
    Unreachable {
        /// Dispatcher name
        dispatcher: String,
        /// Connection failure description
        reason: String,
    },

    /// Daemon answered with an RPC-level error
    #[error("dispatcher {dispatcher} returned error {code}: {message}")]
    Rpc {
        /// Dispatcher name
        dispatcher: String,
        /// RPC error code
        code: i64,
        /// RPC error message
        message: String,
    },

    /// Submission did not complete within the configured timeout
    #[error("dispatcher {dispatcher} timed out after {after_secs}s")]
    TimedOut {
        /// Dispatcher name
        dispatcher: String,
        /// Timeout that elapsed, in seconds
        after_secs: u64,
    },

    /// Dispatcher returned a different number of outcomes than requests submitted
    #[error("dispatcher returned {got} outcomes for {expected} requests")]
    OutcomeMismatch {
        /// Number of requests submitted
        expected: usize,
        /// Number of outcomes returned
        got: usize,
    },
}

/// Download ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An active entry already exists for this key (concurrent enqueue race)
    #[error("an active download entry already exists for {subscription} episode {episode}")]
    DuplicateEntry {
        /// Subscription name
        subscription: String,
        /// Episode number
        episode: u32,
    },

    /// The requested status transition is not allowed
    #[error("entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Entry ID
        id: EntryId,
        /// Current status
        from: DownloadStatus,
        /// Requested status
        to: DownloadStatus,
    },

    /// No entry with this ID
    #[error("download entry {id} not found")]
    NotFound {
        /// Entry ID
        id: EntryId,
    },
}
