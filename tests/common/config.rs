//! Test configuration helpers for engines wired to mock HTTP servers

use bangumi_sync::config::{PersistenceConfig, RetryConfig};
use bangumi_sync::{Config, DispatcherConfig, ReconcileEngine, SourceConfig};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Source id used by every E2E engine
pub const SOURCE_ID: &str = "mikan";

/// Configuration reading feeds from `feeds` and dispatching to `aria2_url`
///
/// Retries are disabled so failure tests do not wait on backoff.
pub fn test_config(data_dir: &Path, feeds: &MockServer, aria2_url: Option<String>) -> Config {
    let mut config = Config {
        persistence: PersistenceConfig {
            database_path: data_dir.join("bangumi.db"),
        },
        source: SourceConfig::Rss {
            id: SOURCE_ID.to_string(),
            feed_url_template: format!("{}/RSS/Bangumi?keyword={{keyword}}", feeds.uri()),
            search_url_template: format!(
                "{}/RSS/Search?searchstr={{keyword}}&page={{page}}",
                feeds.uri()
            ),
            user_agent: "bangumi-sync e2e".to_string(),
        },
        dispatcher: match aria2_url {
            Some(rpc_url) => DispatcherConfig::Aria2 {
                rpc_url,
                secret: Some("s3cret".to_string()),
                save_path: data_dir.join("downloads"),
            },
            None => DispatcherConfig::None,
        },
        ..Default::default()
    };
    config.reconcile.max_page = 1;
    config.reconcile.fetch_timeout = Duration::from_secs(5);
    config.reconcile.dispatch_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Create an engine in a fresh temporary directory
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn create_engine(
    feeds: &MockServer,
    aria2_url: Option<String>,
) -> (ReconcileEngine, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path(), feeds, aria2_url);
    let engine = ReconcileEngine::new(config)
        .await
        .expect("Failed to create engine");
    (engine, temp_dir)
}
