//! Remote sources of episode listings
//!
//! A [`Source`] answers "what is the newest episode of this bangumi and which releases
//! exist for it". Two implementations ship with the crate:
//! - [`RssSource`] reads RSS 2.0 or Atom feeds over HTTP
//! - [`StaticSource`] serves an in-memory catalog filled by the embedder

use crate::config::SourceConfig;
use crate::error::Result;
use crate::types::{CatalogEntry, Release, SubtitleGroup};
use async_trait::async_trait;
use std::sync::Arc;

mod feed;
mod static_source;

pub use feed::RssSource;
pub use static_source::StaticSource;

/// Parameters of a latest-episode fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceQuery {
    /// Subscription name
    pub name: String,
    /// Keyword the source searches for
    pub keyword: String,
    /// Maximum number of listing pages to scan
    pub max_page: u32,
    /// Skip rows published long ago
    pub ignore_old_row: bool,
}

/// Latest listing for one bangumi
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpisodeListing {
    /// Highest episode number observed
    pub max_episode: u32,
    /// Every release observed, in listing order
    pub releases: Vec<Release>,
}

impl EpisodeListing {
    /// Build a listing whose maximum is taken from the releases
    pub fn from_releases(releases: Vec<Release>) -> Self {
        let max_episode = releases.iter().map(|r| r.episode).max().unwrap_or(0);
        Self {
            max_episode,
            releases,
        }
    }
}

/// Parameters of a keyword search
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CandidateQuery {
    /// Maximum number of listing pages to scan
    pub max_page: u32,
    /// Restrict to one subtitle group, when the source supports it
    pub subtitle: Option<String>,
}

/// Bangumi and subtitle groups known to a source
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Known bangumi
    pub entries: Vec<CatalogEntry>,
    /// Known subtitle groups
    pub subtitle_groups: Vec<SubtitleGroup>,
}

/// A subscription a source provides on its own, without a catalog follow
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualSubscription {
    /// Subscription name
    pub name: String,
    /// Episode to start from when first registered
    pub episode: u32,
}

/// Trait for remote episode listings
///
/// Implementations must be cheap to share: the engine holds them as `Arc<dyn Source>`
/// and fetches for several subscriptions concurrently.
#[async_trait]
pub trait Source: Send + Sync {
    /// Identifier stored on subscriptions served by this source
    fn id(&self) -> &str;

    /// Fetch the latest listing for one bangumi
    ///
    /// # Errors
    /// [`FetchError`](crate::error::FetchError) when the listing cannot be obtained.
    async fn fetch_max_episode(&self, query: &SourceQuery) -> Result<EpisodeListing>;

    /// Search releases by keyword
    async fn fetch_candidates(&self, keyword: &str, query: &CandidateQuery)
    -> Result<Vec<Release>>;

    /// Fetch the bangumi catalog
    async fn fetch_catalog(&self) -> Result<Catalog> {
        Ok(Catalog::default())
    }

    /// Subscriptions this source provides by itself
    fn virtual_subscriptions(&self) -> Vec<VirtualSubscription> {
        Vec::new()
    }
}

/// Build the configured source
pub fn from_config(config: &SourceConfig) -> Result<Arc<dyn Source>> {
    match config {
        SourceConfig::Rss {
            id,
            feed_url_template,
            search_url_template,
            user_agent,
        } => Ok(Arc::new(RssSource::new(
            id.clone(),
            feed_url_template.clone(),
            search_url_template.clone(),
            user_agent,
        )?)),
        SourceConfig::Static { id } => Ok(Arc::new(StaticSource::new(id.clone()))),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
