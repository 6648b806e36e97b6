//! Database layer for bangumi-sync
//!
//! Handles SQLite persistence for subscriptions, filter rules, the download ledger,
//! the source catalog and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`subscriptions`] - Subscription CRUD, progress and status decay
//! - [`filters`] - Per-subscription filter rules
//! - [`ledger`] - Download ledger: enqueue, conditional status transitions
//! - [`catalog`] - Source-specific bangumi catalog and subtitle groups
//! - [`state`] - Runtime state (active source)

use crate::error::{DatabaseError, Error, Result};
use crate::types::{
    CatalogEntry, DownloadEntry, DownloadStatus, EntryId, FilterRule, SubscriptionStatus,
    Subscription, SubtitleGroup,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod catalog;
mod filters;
mod ledger;
mod migrations;
mod state;
mod subscriptions;

/// New ledger entry to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDownloadEntry {
    /// Subscription the episode belongs to
    pub subscription: String,
    /// Episode number
    pub episode: u32,
    /// Release title
    pub title: String,
    /// Magnet link or URL
    pub locator: String,
}

/// Parameters for creating or re-following a subscription
pub struct UpsertSubscriptionParams<'a> {
    /// Subscription name
    pub name: &'a str,
    /// Status to store
    pub status: SubscriptionStatus,
    /// Last recorded episode
    pub episode: u32,
    /// Identifier of the serving source
    pub source: &'a str,
}

/// Subscription record from database
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    /// Unique name
    pub name: String,
    /// Status code (0=deleted, 1=following, 2=updated, 3=completed)
    pub status: i32,
    /// Last recorded episode
    pub episode: i64,
    /// Unix timestamp of the last update
    pub updated_at: Option<i64>,
    /// Serving source
    pub source: String,
    /// Unix timestamp when the subscription was created
    pub created_at: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = Error;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        let status = SubscriptionStatus::from_i32(row.status).ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Unknown subscription status {} for '{}'",
                row.status, row.name
            )))
        })?;

        Ok(Subscription {
            name: row.name,
            status,
            episode: to_episode(row.episode),
            updated_at: row.updated_at.map(from_timestamp),
            source: row.source,
            created_at: from_timestamp(row.created_at),
        })
    }
}

/// Filter rule record from database
#[derive(Debug, Clone, FromRow)]
pub struct FilterRuleRow {
    /// Subscription name
    pub subscription: String,
    /// Comma-separated subtitle group ids, in preference order
    pub subtitle_groups: Option<String>,
    /// Comma-separated include keywords
    pub include_words: Option<String>,
    /// Comma-separated exclude keywords
    pub exclude_words: Option<String>,
    /// Regex
    pub regex: Option<String>,
}

impl From<FilterRuleRow> for FilterRule {
    fn from(row: FilterRuleRow) -> Self {
        FilterRule {
            subtitle_groups: split_list(row.subtitle_groups.as_deref()),
            include: split_list(row.include_words.as_deref()),
            exclude: split_list(row.exclude_words.as_deref()),
            regex: row.regex.filter(|r| !r.is_empty()),
        }
    }
}

/// Download ledger record from database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadEntryRow {
    /// Entry ID
    pub id: i64,
    /// Subscription name
    pub subscription: String,
    /// Episode number
    pub episode: i64,
    /// Release title
    pub title: String,
    /// Magnet link or URL
    pub locator: String,
    /// Status code (0=not downloaded, 1=downloading, 2=downloaded, 3=failed)
    pub status: i32,
    /// Dispatch attempts
    pub attempts: i64,
    /// Dispatcher handle
    pub dispatch_handle: Option<String>,
    /// Last failure reason
    pub last_error: Option<String>,
    /// Unix timestamp when the entry was created
    pub created_at: i64,
    /// Unix timestamp of the last status change
    pub updated_at: i64,
}

impl TryFrom<DownloadEntryRow> for DownloadEntry {
    type Error = Error;

    fn try_from(row: DownloadEntryRow) -> Result<Self> {
        let status = DownloadStatus::from_i32(row.status).ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Unknown download status {} for entry {}",
                row.status, row.id
            )))
        })?;

        Ok(DownloadEntry {
            id: EntryId(row.id),
            subscription: row.subscription,
            episode: to_episode(row.episode),
            title: row.title,
            locator: row.locator,
            status,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            dispatch_handle: row.dispatch_handle,
            last_error: row.last_error,
            created_at: from_timestamp(row.created_at),
            updated_at: from_timestamp(row.updated_at),
        })
    }
}

/// Catalog record from database
#[derive(Debug, Clone, FromRow)]
pub struct CatalogRow {
    /// Unique display name
    pub name: String,
    /// Search keyword
    pub keyword: String,
    /// Comma-separated subtitle group ids
    pub subtitle_groups: Option<String>,
    /// Weekday the bangumi airs
    pub update_day: Option<String>,
    /// Cover URL
    pub cover: Option<String>,
}

impl From<CatalogRow> for CatalogEntry {
    fn from(row: CatalogRow) -> Self {
        CatalogEntry {
            name: row.name,
            keyword: row.keyword,
            subtitle_groups: split_list(row.subtitle_groups.as_deref()),
            update_day: row.update_day,
            cover: row.cover,
        }
    }
}

/// Subtitle group record from database
#[derive(Debug, Clone, FromRow)]
pub struct SubtitleGroupRow {
    /// Source-specific identifier
    pub id: String,
    /// Display name
    pub name: String,
}

impl From<SubtitleGroupRow> for SubtitleGroup {
    fn from(row: SubtitleGroupRow) -> Self {
        SubtitleGroup {
            id: row.id,
            name: row.name,
        }
    }
}

/// Database handle for bangumi-sync
pub struct Database {
    pool: SqlitePool,
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn to_episode(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Lists are stored comma-joined, the way filter keywords are entered
fn join_list(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(","))
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
