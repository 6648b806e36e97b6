//! Reconciliation engine split into focused submodules.
//!
//! The `ReconcileEngine` struct and its methods are organized by concern:
//! - [`cycle`] - per-subscription reconciliation and status decay
//! - [`dispatch`] - dispatch pass, retry pass and completion tracking
//! - [`commands`] - user-level commands returning [`CommandOutcome`](crate::types::CommandOutcome)

mod commands;
mod cycle;
mod dispatch;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use commands::{FilterUpdate, SearchOptions};
pub use cycle::CycleOptions;

use crate::config::Config;
use crate::db::Database;
use crate::dispatcher::{self, Dispatcher};
use crate::error::{Error, Result};
use crate::source::{self, Source};
use crate::types::Event;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Buffer size of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Main engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ReconcileEngine {
    /// Database instance for persistence
    /// Public for integration tests to inspect subscriptions and the ledger
    pub db: Arc<Database>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Registered sources by id
    pub(crate) sources: Arc<HashMap<String, Arc<dyn Source>>>,
    /// Source used when no active source was persisted
    pub(crate) default_source: String,
    /// Download daemon, if one is configured
    pub(crate) dispatcher: Option<Arc<dyn Dispatcher>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Cleared by [`stop`](Self::stop); no fetch starts while false
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl ReconcileEngine {
    /// Create an engine from configuration
    ///
    /// Opens (and migrates) the database, builds the configured source and dispatcher.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let source = source::from_config(&config.source)?;
        let dispatcher = dispatcher::from_config(&config.dispatcher)?;

        Self::with_components(config, db, vec![source], dispatcher)
    }

    /// Create an engine around explicit components
    ///
    /// The first source is the default; any of them can be made active with
    /// [`switch_source`](Self::switch_source).
    pub fn with_components(
        config: Config,
        db: Database,
        sources: Vec<Arc<dyn Source>>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Result<Self> {
        config.validate()?;

        let default_source = sources
            .first()
            .map(|s| s.id().to_string())
            .ok_or_else(|| Error::config("at least one source is required", "source"))?;

        let mut registry = HashMap::with_capacity(sources.len());
        for source in sources {
            let id = source.id().to_string();
            if registry.insert(id.clone(), source).is_some() {
                return Err(Error::config(
                    format!("source '{}' registered twice", id),
                    "source",
                ));
            }
        }

        tracing::info!(
            sources = registry.len(),
            default_source = %default_source,
            dispatcher = dispatcher.as_ref().map(|d| d.name()).unwrap_or("none"),
            "Reconcile engine initialized"
        );

        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            db: Arc::new(db),
            config: Arc::new(config),
            sources: Arc::new(registry),
            default_source,
            dispatcher,
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to engine events
    ///
    /// Each subscriber receives every event independently. A subscriber that falls more
    /// than 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop accepting new work
    ///
    /// Fetches already running finish, as does a dispatch pass that already started.
    /// Later cycles fail with [`Error::ShuttingDown`].
    pub fn stop(&self) {
        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Reconcile engine stopped accepting new work");
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        !self.accepting_new.load(Ordering::SeqCst)
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Id of the source new follows and searches go to
    pub async fn active_source_id(&self) -> Result<String> {
        Ok(self
            .db
            .active_source()
            .await?
            .filter(|id| self.sources.contains_key(id))
            .unwrap_or_else(|| self.default_source.clone()))
    }

    pub(crate) async fn active_source(&self) -> Result<Arc<dyn Source>> {
        let id = self.active_source_id().await?;
        self.source(&id)
    }

    pub(crate) fn source(&self, id: &str) -> Result<Arc<dyn Source>> {
        self.sources
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("source '{}'", id)))
    }

    /// Send an event; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
