//! Core types for bangumi-sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a download ledger entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl EntryId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for EntryId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<EntryId> for i64 {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for EntryId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for EntryId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for EntryId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Subscription status
///
/// Subscriptions are never removed; `Deleted` keeps the history around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Unsubscribed by the user
    Deleted,
    /// Followed, no recent update
    Following,
    /// Followed, new episodes found within the decay window
    Updated,
    /// Finished airing, no longer reconciled
    Completed,
}

impl SubscriptionStatus {
    /// Convert integer status code to SubscriptionStatus
    pub fn from_i32(status: i32) -> Option<Self> {
        match status {
            0 => Some(SubscriptionStatus::Deleted),
            1 => Some(SubscriptionStatus::Following),
            2 => Some(SubscriptionStatus::Updated),
            3 => Some(SubscriptionStatus::Completed),
            _ => None,
        }
    }

    /// Convert SubscriptionStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            SubscriptionStatus::Deleted => 0,
            SubscriptionStatus::Following => 1,
            SubscriptionStatus::Updated => 2,
            SubscriptionStatus::Completed => 3,
        }
    }

    /// Statuses that take part in reconciliation
    pub fn is_followed(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Following | SubscriptionStatus::Updated
        )
    }

    /// Lowercase name used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Deleted => "deleted",
            SubscriptionStatus::Following => "following",
            SubscriptionStatus::Updated => "updated",
            SubscriptionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deleted" => Ok(SubscriptionStatus::Deleted),
            "following" => Ok(SubscriptionStatus::Following),
            "updated" => Ok(SubscriptionStatus::Updated),
            "completed" => Ok(SubscriptionStatus::Completed),
            _ => Err(format!("invalid subscription status: {s}")),
        }
    }
}

/// Download ledger entry status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Enqueued, not yet handed to the dispatcher
    NotDownloaded,
    /// Accepted by the dispatcher, transfer in progress
    Downloading,
    /// Transfer finished (terminal)
    Downloaded,
    /// Rejected or failed; picked up by the next retry pass
    Failed,
}

impl DownloadStatus {
    /// Convert integer status code to DownloadStatus
    pub fn from_i32(status: i32) -> Option<Self> {
        match status {
            0 => Some(DownloadStatus::NotDownloaded),
            1 => Some(DownloadStatus::Downloading),
            2 => Some(DownloadStatus::Downloaded),
            3 => Some(DownloadStatus::Failed),
            _ => None,
        }
    }

    /// Convert DownloadStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadStatus::NotDownloaded => 0,
            DownloadStatus::Downloading => 1,
            DownloadStatus::Downloaded => 2,
            DownloadStatus::Failed => 3,
        }
    }

    /// Statuses from which a transition into `self` is allowed
    ///
    /// not_downloaded -> downloading -> {downloaded, failed}; failed -> downloading.
    pub fn allowed_predecessors(&self) -> &'static [DownloadStatus] {
        match self {
            DownloadStatus::NotDownloaded => &[],
            DownloadStatus::Downloading => {
                &[DownloadStatus::NotDownloaded, DownloadStatus::Failed]
            }
            DownloadStatus::Downloaded | DownloadStatus::Failed => &[DownloadStatus::Downloading],
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }

    /// Active entries block a second enqueue for the same (subscription, episode)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DownloadStatus::NotDownloaded | DownloadStatus::Downloading
        )
    }

    /// Lowercase name used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::NotDownloaded => "not_downloaded",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate release for one episode, as produced by a source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release title as published
    pub title: String,
    /// Episode number
    pub episode: u32,
    /// Subtitle group identifier, if the source knows it
    pub subtitle_group: Option<String>,
    /// Magnet link or URL handed to the dispatcher
    pub locator: String,
    /// Publication time, used as a dedup tie-break
    pub published_at: Option<DateTime<Utc>>,
}

impl Release {
    /// Create a release without group or publication time
    pub fn new(title: impl Into<String>, episode: u32, locator: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            episode,
            subtitle_group: None,
            locator: locator.into(),
            published_at: None,
        }
    }

    /// Set the subtitle group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.subtitle_group = Some(group.into());
        self
    }

    /// Set the publication time
    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}

/// A followed title
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique name
    pub name: String,
    /// Current status
    pub status: SubscriptionStatus,
    /// Last recorded episode
    pub episode: u32,
    /// When reconciliation last found new episodes
    pub updated_at: Option<DateTime<Utc>>,
    /// Identifier of the source serving this subscription
    pub source: String,
    /// When the subscription was created
    pub created_at: DateTime<Utc>,
}

/// Per-subscription filter rule
///
/// `subtitle_groups` doubles as the preference order for duplicate resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Allowed subtitle group ids (empty = all)
    #[serde(default)]
    pub subtitle_groups: Vec<String>,
    /// Substrings that must all appear in the title
    #[serde(default)]
    pub include: Vec<String>,
    /// Substrings that must not appear in the title
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Regex the title must match
    #[serde(default)]
    pub regex: Option<String>,
}

impl FilterRule {
    /// True when no predicate is configured
    pub fn is_empty(&self) -> bool {
        self.subtitle_groups.is_empty()
            && self.include.is_empty()
            && self.exclude.is_empty()
            && self.regex.is_none()
    }
}

/// Inclusive episode bounds used by search
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeBounds {
    /// Lowest accepted episode
    pub min: Option<u32>,
    /// Highest accepted episode
    pub max: Option<u32>,
}

impl EpisodeBounds {
    /// Whether `episode` lies within the bounds
    pub fn contains(&self, episode: u32) -> bool {
        self.min.is_none_or(|min| episode >= min) && self.max.is_none_or(|max| episode <= max)
    }
}

/// Download ledger entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEntry {
    /// Entry ID
    pub id: EntryId,
    /// Subscription name
    pub subscription: String,
    /// Episode number
    pub episode: u32,
    /// Release title
    pub title: String,
    /// Magnet link or URL
    pub locator: String,
    /// Current status
    pub status: DownloadStatus,
    /// Number of times the entry was handed to the dispatcher
    pub attempts: u32,
    /// Opaque handle returned by the dispatcher
    pub dispatch_handle: Option<String>,
    /// Last failure reason
    pub last_error: Option<String>,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// When the entry last changed status
    pub updated_at: DateTime<Utc>,
}

/// A bangumi known to the active source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Unique display name
    pub name: String,
    /// Search keyword used with the source
    pub keyword: String,
    /// Subtitle groups offering this bangumi
    pub subtitle_groups: Vec<String>,
    /// Weekday the bangumi airs (e.g., "Sat")
    pub update_day: Option<String>,
    /// Cover URL
    pub cover: Option<String>,
}

/// Subtitle group known to the active source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleGroup {
    /// Source-specific identifier
    pub id: String,
    /// Display name
    pub name: String,
}

/// Stage of the per-subscription reconciliation state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStage {
    /// Waiting for the next cycle
    Idle,
    /// Asking the source for the latest listing
    Fetching,
    /// Applying the filter rule
    Filtering,
    /// Picking one release per episode
    Resolving,
    /// Intersecting with the new-episode range
    Selecting,
    /// Recording progress and ledger entries
    Persisting,
    /// Handing entries to the dispatcher
    Dispatching,
}

/// Result of reconciling one subscription
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionOutcome {
    /// New episodes were selected
    Updated {
        /// Subscription name
        name: String,
        /// New last-recorded episode
        episode: u32,
        /// Episodes that received a ledger entry
        enqueued: Vec<u32>,
    },
    /// Nothing new
    UpToDate {
        /// Subscription name
        name: String,
    },
    /// The source failed; subscription left untouched
    FetchFailed {
        /// Subscription name
        name: String,
        /// Failure description
        reason: String,
    },
    /// The filter rule is invalid; subscription left untouched
    ConfigError {
        /// Subscription name
        name: String,
        /// Failure description
        reason: String,
    },
    /// Not processed this cycle
    Skipped {
        /// Subscription name
        name: String,
        /// Why it was skipped
        reason: String,
    },
}

impl SubscriptionOutcome {
    /// Subscription the outcome belongs to
    pub fn name(&self) -> &str {
        match self {
            SubscriptionOutcome::Updated { name, .. }
            | SubscriptionOutcome::UpToDate { name }
            | SubscriptionOutcome::FetchFailed { name, .. }
            | SubscriptionOutcome::ConfigError { name, .. }
            | SubscriptionOutcome::Skipped { name, .. } => name,
        }
    }
}

/// Counts from one dispatch pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Fresh entries accepted by the dispatcher
    pub submitted: usize,
    /// Previously failed entries accepted by the dispatcher
    pub retried: usize,
    /// Entries rejected (now `failed`)
    pub rejected: usize,
}

/// Result of one reconciliation cycle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// One outcome per subscription considered
    pub outcomes: Vec<SubscriptionOutcome>,
    /// Dispatch pass counts
    pub dispatch: DispatchSummary,
    /// Subscriptions whose status decayed back to following
    pub decayed: u64,
}

impl CycleReport {
    /// Outcomes that produced new episodes
    pub fn updated(&self) -> impl Iterator<Item = &SubscriptionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SubscriptionOutcome::Updated { .. }))
    }

    /// Outcome for a given subscription
    pub fn outcome_for(&self, name: &str) -> Option<&SubscriptionOutcome> {
        self.outcomes.iter().find(|o| o.name() == name)
    }
}

/// Severity of a command result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// The command did what was asked
    Success,
    /// The command had no effect or a partial one
    Warning,
    /// The command was refused
    Error,
    /// Informational answer, nothing changed
    Info,
}

/// Structured payload attached to a command result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandData {
    /// A single subscription
    Subscription(Subscription),
    /// A filter rule after update
    Filter {
        /// Subscription name
        name: String,
        /// Subtitle groups the bangumi offers
        available_groups: Vec<SubtitleGroup>,
        /// Resulting rule
        rule: FilterRule,
    },
    /// Search results, sorted by episode
    Releases(Vec<Release>),
    /// Followed subscriptions with their rules
    Followed(Vec<FollowedSummary>),
    /// Ledger entries created by a manual download
    Entries(Vec<DownloadEntry>),
}

/// Followed subscription plus its filter rule, as listed by `list_followed`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowedSummary {
    /// Subscription record
    pub subscription: Subscription,
    /// Filter rule (default when never customized)
    pub rule: FilterRule,
    /// Weekday from the catalog, if known
    pub update_day: Option<String>,
}

/// Tagged result of a user command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Severity
    pub kind: OutcomeKind,
    /// Human-readable message
    pub message: String,
    /// Optional structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CommandData>,
}

impl CommandOutcome {
    /// Successful outcome
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Success, message)
    }

    /// Warning outcome
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Warning, message)
    }

    /// Error outcome
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Error, message)
    }

    /// Informational outcome
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Info, message)
    }

    fn new(kind: OutcomeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a payload
    pub fn with_data(mut self, data: CommandData) -> Self {
        self.data = Some(data);
        self
    }

    /// True for `OutcomeKind::Success`
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

/// Event emitted by the reconciliation engine
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// New episodes were recorded for a subscription
    SubscriptionUpdated {
        /// Subscription name
        name: String,
        /// New last-recorded episode
        episode: u32,
    },

    /// A ledger entry was created
    Enqueued {
        /// Entry ID
        id: EntryId,
        /// Subscription name
        name: String,
        /// Episode number
        episode: u32,
    },

    /// The dispatcher accepted an entry
    DispatchAccepted {
        /// Entry ID
        id: EntryId,
        /// Dispatcher handle
        handle: String,
    },

    /// The dispatcher rejected an entry
    DispatchRejected {
        /// Entry ID
        id: EntryId,
        /// Rejection reason
        reason: String,
    },

    /// Transfer finished
    Downloaded {
        /// Entry ID
        id: EntryId,
    },

    /// Transfer failed after being accepted
    DownloadFailed {
        /// Entry ID
        id: EntryId,
        /// Failure reason
        error: String,
    },

    /// An entry keeps failing; still retried every cycle
    RetriesExhausted {
        /// Entry ID
        id: EntryId,
        /// Subscription name
        name: String,
        /// Episode number
        episode: u32,
        /// Attempts so far
        attempts: u32,
    },

    /// A source fetch failed for a subscription
    FetchFailed {
        /// Subscription name
        name: String,
        /// Failure description
        error: String,
    },

    /// A reconciliation cycle finished
    CycleComplete {
        /// Subscriptions with new episodes
        updated: usize,
        /// Subscriptions whose fetch failed
        failed: usize,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_status_round_trips_through_i32() {
        for status in [
            SubscriptionStatus::Deleted,
            SubscriptionStatus::Following,
            SubscriptionStatus::Updated,
            SubscriptionStatus::Completed,
        ] {
            assert_eq!(SubscriptionStatus::from_i32(status.to_i32()), Some(status));
        }
        assert_eq!(SubscriptionStatus::from_i32(42), None);
    }

    #[test]
    fn only_following_and_updated_are_reconciled() {
        assert!(SubscriptionStatus::Following.is_followed());
        assert!(SubscriptionStatus::Updated.is_followed());
        assert!(!SubscriptionStatus::Deleted.is_followed());
        assert!(!SubscriptionStatus::Completed.is_followed());
    }

    #[test]
    fn download_status_transitions() {
        use DownloadStatus::*;

        assert!(NotDownloaded.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Downloaded));
        assert!(Downloading.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Downloading));

        assert!(!Downloaded.can_transition_to(Downloading));
        assert!(!Downloaded.can_transition_to(Failed));
        assert!(!NotDownloaded.can_transition_to(Downloaded));
        assert!(!Failed.can_transition_to(Downloaded));
        assert!(!Downloading.can_transition_to(Downloading));
        assert!(!Failed.can_transition_to(NotDownloaded));
    }

    #[test]
    fn active_statuses() {
        assert!(DownloadStatus::NotDownloaded.is_active());
        assert!(DownloadStatus::Downloading.is_active());
        assert!(!DownloadStatus::Downloaded.is_active());
        assert!(!DownloadStatus::Failed.is_active());
    }

    #[test]
    fn episode_bounds_are_inclusive() {
        let bounds = EpisodeBounds {
            min: Some(3),
            max: Some(5),
        };
        assert!(!bounds.contains(2));
        assert!(bounds.contains(3));
        assert!(bounds.contains(5));
        assert!(!bounds.contains(6));
        assert!(EpisodeBounds::default().contains(0));
    }

    #[test]
    fn command_outcome_serializes_with_lowercase_kind() {
        let outcome = CommandOutcome::warning("Frieren already followed");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "warning");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn subscription_outcome_is_tagged() {
        let outcome = SubscriptionOutcome::FetchFailed {
            name: "Frieren".into(),
            reason: "timeout".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "fetch_failed");
        assert_eq!(outcome.name(), "Frieren");
    }
}
