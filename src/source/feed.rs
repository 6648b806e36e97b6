//! RSS/Atom feed source
//!
//! Every feed item becomes a [`Release`] when its title carries an episode number and
//! the item links to something downloadable (enclosure, magnet or plain link).

use super::{CandidateQuery, EpisodeListing, Source, SourceQuery};
use crate::episodes::{parse_episode, parse_subtitle_group};
use crate::error::{Error, FetchError, Result};
use crate::types::Release;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Rows older than this are skipped when `ignore_old_row` is set
const OLD_ROW_AGE_DAYS: i64 = 30;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw item common to RSS and Atom
#[derive(Clone, Debug)]
struct FeedItem {
    title: String,
    link: Option<String>,
    enclosure: Option<String>,
    published: Option<DateTime<Utc>>,
}

/// Source backed by RSS 2.0 or Atom feeds
///
/// `feed_url_template` and `search_url_template` contain a `{keyword}` placeholder and
/// optionally a `{page}` placeholder; without `{page}` only one page is read.
pub struct RssSource {
    id: String,
    http_client: reqwest::Client,
    feed_url_template: String,
    search_url_template: String,
}

impl RssSource {
    /// Create a feed source
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(
        id: String,
        feed_url_template: String,
        search_url_template: String,
        user_agent: &str,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            id,
            http_client,
            feed_url_template,
            search_url_template,
        })
    }

    fn page_urls(template: &str, keyword: &str, max_page: u32) -> Vec<String> {
        let with_keyword = template.replace("{keyword}", &urlencoding::encode(keyword));
        if with_keyword.contains("{page}") {
            (1..=max_page.max(1))
                .map(|page| with_keyword.replace("{page}", &page.to_string()))
                .collect()
        } else {
            vec![with_keyword]
        }
    }

    async fn fetch_page(&self, url: &str, subject: &str) -> Result<Vec<FeedItem>> {
        debug!(source = %self.id, url = %url, "Fetching feed page");

        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::TimedOut {
                    source_id: self.id.clone(),
                    subject: subject.to_string(),
                    after_secs: HTTP_TIMEOUT.as_secs(),
                }
            } else {
                FetchError::Failed {
                    source_id: self.id.clone(),
                    subject: subject.to_string(),
                    reason: format!("connection failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Failed {
                source_id: self.id.clone(),
                subject: subject.to_string(),
                reason: format!("feed returned HTTP {}", status.as_u16()),
            }
            .into());
        }

        let content = response.text().await.map_err(|e| FetchError::Failed {
            source_id: self.id.clone(),
            subject: subject.to_string(),
            reason: format!("connection dropped while reading feed: {}", e),
        })?;

        parse_feed(&content).map_err(|reason| {
            FetchError::Malformed {
                source_id: self.id.clone(),
                reason,
            }
            .into()
        })
    }

    async fn fetch_releases(&self, urls: Vec<String>, subject: &str) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        for url in urls {
            let items = self.fetch_page(&url, subject).await?;
            if items.is_empty() {
                break;
            }
            releases.extend(items.into_iter().filter_map(to_release));
        }
        Ok(releases)
    }
}

#[async_trait]
impl Source for RssSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_max_episode(&self, query: &SourceQuery) -> Result<EpisodeListing> {
        let urls = Self::page_urls(&self.feed_url_template, &query.keyword, query.max_page);
        let mut releases = self.fetch_releases(urls, &query.name).await?;

        if query.ignore_old_row {
            let cutoff = Utc::now() - chrono::Duration::days(OLD_ROW_AGE_DAYS);
            releases.retain(|r| r.published_at.is_none_or(|at| at >= cutoff));
        }

        Ok(EpisodeListing::from_releases(releases))
    }

    async fn fetch_candidates(
        &self,
        keyword: &str,
        query: &CandidateQuery,
    ) -> Result<Vec<Release>> {
        let urls = Self::page_urls(&self.search_url_template, keyword, query.max_page);
        let mut releases = self.fetch_releases(urls, keyword).await?;

        if let Some(subtitle) = &query.subtitle {
            releases.retain(|r| {
                r.subtitle_group
                    .as_deref()
                    .is_some_and(|g| g.eq_ignore_ascii_case(subtitle))
            });
        }

        Ok(releases)
    }
}

/// Parse feed content, trying RSS first and Atom second
fn parse_feed(content: &str) -> std::result::Result<Vec<FeedItem>, String> {
    match parse_as_rss(content) {
        Ok(items) => {
            debug!("Parsed feed as RSS, found {} items", items.len());
            Ok(items)
        }
        Err(rss_err) => match parse_as_atom(content) {
            Ok(items) => {
                debug!("Parsed feed as Atom, found {} items", items.len());
                Ok(items)
            }
            Err(atom_err) => Err(format!(
                "not an RSS or Atom feed. RSS error: {}. Atom error: {}",
                rss_err, atom_err
            )),
        },
    }
}

fn parse_as_rss(content: &str) -> std::result::Result<Vec<FeedItem>, String> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| e.to_string())?;

    Ok(channel
        .items()
        .iter()
        .map(|item| FeedItem {
            title: item.title().unwrap_or("").trim().to_string(),
            link: item.link().map(str::to_string),
            enclosure: item.enclosure().map(|enc| enc.url().to_string()),
            published: item.pub_date().and_then(|date| {
                DateTime::parse_from_rfc2822(date)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        })
        .collect())
}

fn parse_as_atom(content: &str) -> std::result::Result<Vec<FeedItem>, String> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes()).map_err(|e| e.to_string())?;

    Ok(feed
        .entries()
        .iter()
        .map(|entry| {
            let enclosure = entry
                .links()
                .iter()
                .find(|link| {
                    link.rel() == "enclosure"
                        || link.mime_type() == Some("application/x-bittorrent")
                })
                .map(|link| link.href().to_string());

            FeedItem {
                title: entry.title().as_str().trim().to_string(),
                link: entry.links().first().map(|link| link.href().to_string()),
                enclosure,
                published: Some(
                    entry
                        .published()
                        .copied()
                        .unwrap_or_else(|| *entry.updated())
                        .with_timezone(&Utc),
                ),
            }
        })
        .collect())
}

fn to_release(item: FeedItem) -> Option<Release> {
    let Some(episode) = parse_episode(&item.title) else {
        debug!(title = %item.title, "Feed item skipped: no episode number");
        return None;
    };

    // Prefer an explicit magnet link, then the enclosure, then the item link
    let locator = item
        .link
        .as_ref()
        .filter(|link| link.starts_with("magnet:"))
        .or(item.enclosure.as_ref())
        .or(item.link.as_ref())
        .cloned();
    let Some(locator) = locator else {
        debug!(title = %item.title, "Feed item skipped: nothing to download");
        return None;
    };

    let mut release = Release::new(item.title.clone(), episode, locator);
    release.subtitle_group = parse_subtitle_group(&item.title);
    release.published_at = item.published;
    Some(release)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0">
  <channel>
    <title>Frieren</title>
    <link>https://mikan.example/</link>
    <description>feed</description>
    <item>
      <title>[LoliHouse] Sousou no Frieren - 05 [1080p]</title>
      <link>https://mikan.example/Episode/abc</link>
      <pubDate>Sat, 06 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://mikan.example/Download/abc.torrent" length="1" type="application/x-bittorrent"/>
    </item>
    <item>
      <title>[LoliHouse] Sousou no Frieren [01-04] [1080p]</title>
      <link>https://mikan.example/Episode/batch</link>
    </item>
    <item>
      <title>[Nekomoe] Sousou no Frieren - 04 [720p]</title>
      <link>magnet:?xt=urn:btih:def</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Frieren</title>
  <id>urn:feed</id>
  <updated>2024-01-06T12:00:00Z</updated>
  <entry>
    <title>[SweetSub] Frieren 第06话</title>
    <id>urn:entry:1</id>
    <updated>2024-01-13T12:00:00Z</updated>
    <link href="https://example.org/6.torrent" rel="enclosure"/>
  </entry>
</feed>"#;

    #[test]
    fn rss_items_become_releases() {
        let releases: Vec<_> = parse_feed(RSS)
            .unwrap()
            .into_iter()
            .filter_map(to_release)
            .collect();

        assert_eq!(releases.len(), 2, "batch item has no single episode");
        assert_eq!(releases[0].episode, 5);
        assert_eq!(releases[0].subtitle_group.as_deref(), Some("LoliHouse"));
        assert_eq!(
            releases[0].locator,
            "https://mikan.example/Download/abc.torrent"
        );
        assert!(releases[0].published_at.is_some());
        assert_eq!(releases[1].locator, "magnet:?xt=urn:btih:def");
    }

    #[test]
    fn atom_entries_become_releases() {
        let releases: Vec<_> = parse_feed(ATOM)
            .unwrap()
            .into_iter()
            .filter_map(to_release)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].episode, 6);
        assert_eq!(releases[0].locator, "https://example.org/6.torrent");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(parse_feed("<html>not a feed</html>").is_err());
    }

    #[test]
    fn page_placeholder_expands() {
        let urls = RssSource::page_urls(
            "https://mikan.example/RSS/Search?searchstr={keyword}&page={page}",
            "葬送 的",
            3,
        );
        assert_eq!(urls.len(), 3);
        assert!(urls[0].contains("searchstr=%E8%91%AC%E9%80%81%20%E7%9A%84"));
        assert!(urls[2].ends_with("page=3"));

        let single = RssSource::page_urls("https://x/{keyword}", "a", 5);
        assert_eq!(single, vec!["https://x/a".to_string()]);
    }
}
