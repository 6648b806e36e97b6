use super::{Catalog, CandidateQuery, EpisodeListing, Source, SourceQuery, VirtualSubscription};
use crate::error::{FetchError, Result};
use crate::types::Release;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// In-memory source
///
/// Listings are keyed by keyword. Embedders fill it from their own data and tests use it
/// to script source behavior, including failures.
pub struct StaticSource {
    id: String,
    state: RwLock<StaticState>,
}

#[derive(Default)]
struct StaticState {
    catalog: Catalog,
    releases: HashMap<String, Vec<Release>>,
    failing: HashSet<String>,
    virtual_subscriptions: Vec<VirtualSubscription>,
}

impl StaticSource {
    /// Create an empty source
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(StaticState::default()),
        }
    }

    /// Replace the catalog
    pub fn set_catalog(&self, catalog: Catalog) {
        self.write(|state| state.catalog = catalog);
    }

    /// Replace the listing for a keyword
    pub fn set_releases(&self, keyword: &str, releases: Vec<Release>) {
        self.write(|state| {
            state.releases.insert(keyword.to_string(), releases);
        });
    }

    /// Append one release to a keyword's listing
    pub fn push_release(&self, keyword: &str, release: Release) {
        self.write(|state| {
            state
                .releases
                .entry(keyword.to_string())
                .or_default()
                .push(release);
        });
    }

    /// Make every fetch for `keyword` fail until [`clear_failure`](Self::clear_failure)
    pub fn fail(&self, keyword: &str) {
        self.write(|state| {
            state.failing.insert(keyword.to_string());
        });
    }

    /// Stop failing fetches for `keyword`
    pub fn clear_failure(&self, keyword: &str) {
        self.write(|state| {
            state.failing.remove(keyword);
        });
    }

    /// Register a subscription the source provides on its own
    pub fn add_virtual_subscription(&self, name: impl Into<String>, episode: u32) {
        let name = name.into();
        self.write(|state| {
            state
                .virtual_subscriptions
                .push(VirtualSubscription { name, episode });
        });
    }

    // A poisoned lock only means a panicking writer; the data is still usable
    fn write(&self, f: impl FnOnce(&mut StaticState)) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    fn read<T>(&self, f: impl FnOnce(&StaticState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn listing(&self, keyword: &str, subject: &str) -> Result<Vec<Release>> {
        self.read(|state| {
            if state.failing.contains(keyword) {
                return Err(FetchError::Failed {
                    source_id: self.id.clone(),
                    subject: subject.to_string(),
                    reason: "connection refused".to_string(),
                }
                .into());
            }
            Ok(state.releases.get(keyword).cloned().unwrap_or_default())
        })
    }
}

#[async_trait]
impl Source for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_max_episode(&self, query: &SourceQuery) -> Result<EpisodeListing> {
        let releases = self.listing(&query.keyword, &query.name)?;
        Ok(EpisodeListing::from_releases(releases))
    }

    async fn fetch_candidates(
        &self,
        keyword: &str,
        query: &CandidateQuery,
    ) -> Result<Vec<Release>> {
        let mut releases = self.listing(keyword, keyword)?;
        if let Some(subtitle) = &query.subtitle {
            releases.retain(|r| r.subtitle_group.as_deref() == Some(subtitle.as_str()));
        }
        Ok(releases)
    }

    async fn fetch_catalog(&self) -> Result<Catalog> {
        Ok(self.read(|state| state.catalog.clone()))
    }

    fn virtual_subscriptions(&self) -> Vec<VirtualSubscription> {
        self.read(|state| state.virtual_subscriptions.clone())
    }
}
