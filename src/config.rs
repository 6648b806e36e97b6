//! Configuration types for bangumi-sync
//!
//! Configuration is an explicit value handed to the engine, the source and the
//! dispatcher at construction. Nothing is read from process-wide state.

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Main configuration
///
/// Fields are organized into sub-configs:
/// - [`persistence`](PersistenceConfig) - database location
/// - [`reconcile`](ReconcileConfig) - scan depth, dedupe, timeouts, concurrency
/// - [`retry`](RetryConfig) - backoff for transient source failures
/// - [`source`](SourceConfig) - which remote source to use
/// - [`dispatcher`](DispatcherConfig) - which download daemon to hand releases to
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Reconciliation behavior
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Retry behavior for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Active source
    #[serde(default)]
    pub source: SourceConfig,

    /// Download dispatcher
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl Config {
    /// Check settings that would otherwise fail deep inside a cycle
    pub fn validate(&self) -> Result<()> {
        if self.reconcile.max_concurrent_subscriptions == 0 {
            return Err(Error::config(
                "max_concurrent_subscriptions must be at least 1",
                "max_concurrent_subscriptions",
            ));
        }
        if self.reconcile.max_page == 0 {
            return Err(Error::config("max_page must be at least 1", "max_page"));
        }
        if self.reconcile.cycle_interval.is_zero() {
            return Err(Error::config(
                "cycle_interval must be greater than zero",
                "cycle_interval",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier must be >= 1.0",
                "backoff_multiplier",
            ));
        }
        if let SourceConfig::Rss {
            feed_url_template,
            search_url_template,
            ..
        } = &self.source
        {
            for (key, template) in [
                ("feed_url_template", feed_url_template),
                ("search_url_template", search_url_template),
            ] {
                if !template.contains("{keyword}") {
                    return Err(Error::config(
                        format!("{key} must contain a {{keyword}} placeholder"),
                        key,
                    ));
                }
                let sample = template.replace("{keyword}", "k").replace("{page}", "1");
                validate_http_url(&sample, key)?;
            }
        }
        if let DispatcherConfig::Aria2 { rpc_url, .. } = &self.dispatcher {
            validate_http_url(rpc_url, "rpc_url")?;
        }
        Ok(())
    }
}

fn validate_http_url(value: &str, key: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| Error::config(format!("{key} is not a valid URL: {e}"), key))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(Error::config(
            format!("{key} scheme '{scheme}' is not allowed; only http and https are supported"),
            key,
        )),
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./bangumi-sync.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Reconciliation behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum number of listing pages a source scans per fetch (default: 3)
    #[serde(default = "default_max_page")]
    pub max_page: u32,

    /// Let the source skip listing rows published more than 30 days ago (default: true)
    ///
    /// This only affects what the source reads. It never re-opens episodes that
    /// already have a `downloaded` ledger entry; see `reopen_downloaded`.
    #[serde(default = "default_true")]
    pub ignore_old_row: bool,

    /// Keep one release per episode (default: true)
    #[serde(default = "default_true")]
    pub dedupe: bool,

    /// Re-enqueue episodes that already have a `downloaded` entry (default: false)
    #[serde(default)]
    pub reopen_downloaded: bool,

    /// Subscriptions reconciled concurrently (default: 4)
    #[serde(default = "default_max_concurrent_subscriptions")]
    pub max_concurrent_subscriptions: usize,

    /// Timeout for one source fetch (default: 30 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Timeout for one dispatcher call (default: 30 seconds)
    #[serde(default = "default_dispatch_timeout", with = "duration_serde")]
    pub dispatch_timeout: Duration,

    /// How long `updated` status sticks before decaying to `following` (default: 24 hours)
    #[serde(default = "default_status_decay", with = "duration_serde")]
    pub status_decay: Duration,

    /// Interval between scheduled cycles (default: 2 hours)
    #[serde(default = "default_cycle_interval", with = "duration_serde")]
    pub cycle_interval: Duration,

    /// Attempts after which a failing entry is surfaced as a warning (default: 3)
    #[serde(default = "default_warn_after_attempts")]
    pub warn_after_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_page: default_max_page(),
            ignore_old_row: true,
            dedupe: true,
            reopen_downloaded: false,
            max_concurrent_subscriptions: default_max_concurrent_subscriptions(),
            fetch_timeout: default_fetch_timeout(),
            dispatch_timeout: default_dispatch_timeout(),
            status_decay: default_status_decay(),
            cycle_interval: default_cycle_interval(),
            warn_after_attempts: default_warn_after_attempts(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Remote source selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// RSS/Atom feed source
    Rss {
        /// Source identifier stored on subscriptions
        id: String,
        /// Per-bangumi feed URL; `{keyword}` is replaced with the url-encoded keyword
        feed_url_template: String,
        /// Search feed URL; `{keyword}` is replaced with the url-encoded search keyword
        search_url_template: String,
        /// User-Agent sent with feed requests
        #[serde(default = "default_user_agent")]
        user_agent: String,
    },
    /// In-memory source, populated by the embedder
    Static {
        /// Source identifier stored on subscriptions
        id: String,
    },
}

impl SourceConfig {
    /// Identifier of the configured source
    pub fn id(&self) -> &str {
        match self {
            SourceConfig::Rss { id, .. } | SourceConfig::Static { id } => id,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Static {
            id: "static".to_string(),
        }
    }
}

/// Download dispatcher selection
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatcherConfig {
    /// aria2 JSON-RPC daemon
    Aria2 {
        /// JSON-RPC endpoint (e.g., "http://localhost:6800/jsonrpc")
        rpc_url: String,
        /// `--rpc-secret` token
        #[serde(default)]
        secret: Option<String>,
        /// Base directory; each subscription downloads into `<save_path>/<name>/<episode>`
        save_path: PathBuf,
    },
    /// No dispatcher: entries stay `not_downloaded`
    #[default]
    None,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bangumi-sync.db")
}

fn default_true() -> bool {
    true
}

fn default_max_page() -> u32 {
    3
}

fn default_max_concurrent_subscriptions() -> usize {
    4
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_status_decay() -> Duration {
    Duration::from_secs(60 * 60 * 24)
}

fn default_cycle_interval() -> Duration {
    Duration::from_secs(60 * 60 * 2)
}

fn default_warn_after_attempts() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_user_agent() -> String {
    "bangumi-sync feed reader".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.reconcile.max_page, 3);
        assert!(config.reconcile.ignore_old_row);
        assert!(config.reconcile.dedupe);
        assert!(!config.reconcile.reopen_downloaded);
        assert_eq!(config.reconcile.status_decay, Duration::from_secs(86_400));
        assert_eq!(config.source.id(), "static");
        assert!(matches!(config.dispatcher, DispatcherConfig::None));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.reconcile.max_concurrent_subscriptions, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.persistence.database_path,
            PathBuf::from("bangumi-sync.db")
        );
    }

    #[test]
    fn tagged_source_and_dispatcher_deserialize() {
        let json = r#"{
            "source": {
                "type": "rss",
                "id": "mikan",
                "feed_url_template": "https://mikan.example/RSS/Search?searchstr={keyword}",
                "search_url_template": "https://mikan.example/RSS/Search?searchstr={keyword}"
            },
            "dispatcher": {
                "type": "aria2",
                "rpc_url": "http://localhost:6800/jsonrpc",
                "save_path": "/srv/bangumi"
            },
            "reconcile": { "fetch_timeout": 5, "dedupe": false }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.source.id(), "mikan");
        match &config.source {
            SourceConfig::Rss { user_agent, .. } => {
                assert_eq!(user_agent, "bangumi-sync feed reader")
            }
            other => panic!("unexpected source: {other:?}"),
        }
        match &config.dispatcher {
            DispatcherConfig::Aria2 { secret, .. } => assert!(secret.is_none()),
            other => panic!("unexpected dispatcher: {other:?}"),
        }
        assert_eq!(config.reconcile.fetch_timeout, Duration::from_secs(5));
        assert!(!config.reconcile.dedupe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = ReconcileConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["status_decay"], 86_400);
        assert_eq!(json["cycle_interval"], 7_200);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.reconcile.max_concurrent_subscriptions = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "config_error");
    }

    #[test]
    fn validate_rejects_template_without_placeholder() {
        let config = Config {
            source: SourceConfig::Rss {
                id: "mikan".into(),
                feed_url_template: "https://mikan.example/RSS/Bangumi".into(),
                search_url_template: "https://mikan.example/RSS/Search?searchstr={keyword}"
                    .into(),
                user_agent: "test".into(),
            },
            ..Default::default()
        };
        match config.validate().unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("feed_url_template")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_non_http_rpc_url() {
        let config = Config {
            dispatcher: DispatcherConfig::Aria2 {
                rpc_url: "ws://localhost:6800/jsonrpc".into(),
                secret: None,
                save_path: PathBuf::from("/srv/bangumi"),
            },
            ..Default::default()
        };
        match config.validate().unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("rpc_url")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
