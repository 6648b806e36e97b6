//! User-level commands.
//!
//! Commands return a [`CommandOutcome`] for anything the user can fix (unknown name,
//! invalid regex, source unavailable) and reserve `Err` for persistence failures.

use crate::db::{NewDownloadEntry, UpsertSubscriptionParams};
use crate::dedup::{self, DedupeMode};
use crate::error::{Error, Result};
use crate::filter::{ReleaseFilter, compile_regex};
use crate::source::{CandidateQuery, Source, SourceQuery};
use crate::types::{
    CatalogEntry, CommandData, CommandOutcome, EpisodeBounds, Event, FilterRule, FollowedSummary, Release,
    SubscriptionStatus,
};

use super::ReconcileEngine;

/// Changes to a filter rule; `None` leaves a field as it is, an empty string clears it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterUpdate {
    /// Comma-separated subtitle group names, in preference order
    pub subtitle: Option<String>,
    /// Comma-separated substrings that must all appear
    pub include: Option<String>,
    /// Comma-separated substrings that must not appear
    pub exclude: Option<String>,
    /// Regular expression the title must match
    pub regex: Option<String>,
}

/// Options of [`ReconcileEngine::search`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Pages to scan (defaults to `reconcile.max_page`)
    pub count: Option<u32>,
    /// Regular expression the title must match
    pub regex: Option<String>,
    /// Keep every release instead of one per episode
    pub dupe: bool,
    /// Lowest episode to keep
    pub min_episode: Option<u32>,
    /// Highest episode to keep
    pub max_episode: Option<u32>,
    /// Only releases from this subtitle group
    pub subtitle: Option<String>,
}

impl ReconcileEngine {
    /// Follow a bangumi from the catalog
    ///
    /// `name` is matched fuzzily. Without `episode` the subscription starts at the
    /// source's current episode so the back-catalog is not downloaded.
    pub async fn follow(&self, name: &str, episode: Option<u32>) -> Result<CommandOutcome> {
        let source = self.active_source().await?;

        if self.db.count_catalog().await? == 0
            && let Err(e) = self.refresh_catalog(source.as_ref()).await
        {
            return Ok(CommandOutcome::error(format!(
                "Catalog unavailable from {}: {}",
                source.id(),
                e
            )));
        }

        // Sources without a catalog are followed by name, which doubles as keyword
        let entry = match self.db.find_catalog_entry(name).await? {
            Some(entry) => entry,
            None if self.db.count_catalog().await? == 0 => CatalogEntry {
                name: name.to_string(),
                keyword: name.to_string(),
                subtitle_groups: Vec::new(),
                update_day: None,
                cover: None,
            },
            None => return Ok(CommandOutcome::error(format!("{} not found", name))),
        };

        if let Some(existing) = self.db.get_subscription(&entry.name).await?
            && existing.status.is_followed()
        {
            return Ok(CommandOutcome::warning(format!(
                "{} already followed",
                entry.name
            ))
            .with_data(CommandData::Subscription(existing)));
        }

        let episode = match episode {
            Some(episode) => episode,
            None => {
                let query = SourceQuery {
                    name: entry.name.clone(),
                    keyword: entry.keyword.clone(),
                    max_page: self.config.reconcile.max_page,
                    ignore_old_row: self.config.reconcile.ignore_old_row,
                };
                match source.fetch_max_episode(&query).await {
                    Ok(listing) => listing.max_episode,
                    Err(e) => {
                        return Ok(CommandOutcome::error(format!(
                            "Could not fetch current episode of {}: {}",
                            entry.name, e
                        )));
                    }
                }
            }
        };

        self.db
            .upsert_subscription(UpsertSubscriptionParams {
                name: &entry.name,
                status: SubscriptionStatus::Following,
                episode,
                source: source.id(),
            })
            .await?;
        self.db.ensure_filter_rule(&entry.name).await?;

        tracing::info!(subscription = %entry.name, episode, "Subscription followed");

        let outcome = CommandOutcome::success(format!(
            "{} followed at episode {}",
            entry.name, episode
        ));
        Ok(match self.db.get_subscription(&entry.name).await? {
            Some(subscription) => outcome.with_data(CommandData::Subscription(subscription)),
            None => outcome,
        })
    }

    /// Stop following a subscription; its history is kept
    pub async fn unfollow(&self, name: &str) -> Result<CommandOutcome> {
        if !self
            .db
            .set_subscription_status(name, SubscriptionStatus::Deleted)
            .await?
        {
            return Ok(CommandOutcome::error(format!("{} not subscribed", name)));
        }
        tracing::info!(subscription = %name, "Subscription unfollowed");
        Ok(CommandOutcome::success(format!("{} unfollowed", name)))
    }

    /// Stop following everything
    pub async fn unfollow_all(&self) -> Result<CommandOutcome> {
        let changed = self
            .db
            .set_all_subscription_status(SubscriptionStatus::Deleted)
            .await?;
        tracing::info!(changed, "All subscriptions unfollowed");
        Ok(CommandOutcome::warning(format!(
            "All subscriptions unfollowed ({} changed)",
            changed
        )))
    }

    /// Set the recorded episode, or report it when `episode` is `None`
    ///
    /// This is the only way the recorded episode can go down.
    pub async fn mark(&self, name: &str, episode: Option<u32>) -> Result<CommandOutcome> {
        let Some(subscription) = self.db.get_subscription(name).await? else {
            return Ok(CommandOutcome::error(format!("{} not subscribed", name)));
        };

        let Some(episode) = episode else {
            return Ok(CommandOutcome::info(format!(
                "{} is at episode {}",
                name, subscription.episode
            ))
            .with_data(CommandData::Subscription(subscription)));
        };

        self.db.set_subscription_episode(name, episode).await?;
        tracing::info!(
            subscription = %name,
            from = subscription.episode,
            to = episode,
            "Episode marked"
        );
        Ok(CommandOutcome::success(format!(
            "{} marked as episode {}",
            name, episode
        )))
    }

    /// Set a subscription's status by name (`following`, `updated`, `completed`, `deleted`)
    pub async fn set_status(&self, name: &str, status: &str) -> Result<CommandOutcome> {
        let status: SubscriptionStatus = match status.trim().to_lowercase().parse() {
            Ok(status) => status,
            Err(message) => return Ok(CommandOutcome::error(message)),
        };

        if !self.db.set_subscription_status(name, status).await? {
            return Ok(CommandOutcome::error(format!("{} not subscribed", name)));
        }
        tracing::info!(subscription = %name, status = %status, "Subscription status set");
        Ok(CommandOutcome::success(format!(
            "{} status set to {}",
            name, status
        )))
    }

    /// Change a subscription's filter rule
    ///
    /// Subtitle group names are resolved to ids and dropped unless the bangumi offers
    /// them. An invalid regex leaves the stored rule untouched.
    pub async fn update_filter(&self, name: &str, update: FilterUpdate) -> Result<CommandOutcome> {
        let FilterUpdate {
            subtitle,
            include,
            exclude,
            regex,
        } = update;

        match self.db.get_subscription(name).await? {
            Some(subscription) if subscription.status.is_followed() => {}
            _ => return Ok(CommandOutcome::error(format!("{} not subscribed", name))),
        }

        let mut rule = self.db.get_filter_rule(name).await?.unwrap_or_default();

        let offered: Option<Vec<String>> = self
            .db
            .find_catalog_entry(name)
            .await?
            .filter(|entry| entry.name == name)
            .map(|entry| entry.subtitle_groups);
        let available_groups: Vec<_> = self
            .db
            .list_subtitle_groups()
            .await?
            .into_iter()
            .filter(|g| offered.as_ref().is_none_or(|ids| ids.contains(&g.id)))
            .collect();

        if let Some(subtitle) = subtitle {
            rule.subtitle_groups = split_words(&subtitle)
                .into_iter()
                .filter_map(|wanted| {
                    available_groups
                        .iter()
                        .find(|g| g.name.eq_ignore_ascii_case(&wanted) || g.id == wanted)
                        .map(|g| g.id.clone())
                })
                .collect();
        }
        if let Some(include) = include {
            rule.include = split_words(&include);
        }
        if let Some(exclude) = exclude {
            rule.exclude = split_words(&exclude);
        }
        if let Some(regex) = regex {
            let regex = regex.trim();
            if regex.is_empty() {
                rule.regex = None;
            } else {
                if let Err(e) = compile_regex(regex) {
                    tracing::warn!(subscription = %name, error = %e, "Filter update rejected");
                    return Ok(CommandOutcome::error(e.to_string()));
                }
                rule.regex = Some(regex.to_string());
            }
        }

        self.db.save_filter_rule(name, &rule).await?;
        tracing::info!(subscription = %name, rule = ?rule, "Filter rule updated");

        Ok(
            CommandOutcome::success(format!("Filter of {} updated", name)).with_data(
                CommandData::Filter {
                    name: name.to_string(),
                    available_groups,
                    rule,
                },
            ),
        )
    }

    /// Search the active source, returning releases sorted by episode
    pub async fn search(&self, keyword: &str, options: SearchOptions) -> Result<CommandOutcome> {
        let SearchOptions {
            count,
            regex,
            dupe,
            min_episode,
            max_episode,
            subtitle,
        } = options;

        let release_filter = match ReleaseFilter::compile(&FilterRule {
            regex,
            ..FilterRule::default()
        }) {
            Ok(release_filter) => release_filter.with_bounds(EpisodeBounds {
                min: min_episode,
                max: max_episode,
            }),
            Err(e @ Error::Config { .. }) => return Ok(CommandOutcome::error(e.to_string())),
            Err(e) => return Err(e),
        };

        let source = self.active_source().await?;
        let query = CandidateQuery {
            max_page: count.unwrap_or(self.config.reconcile.max_page),
            subtitle,
        };
        let candidates = match source.fetch_candidates(keyword, &query).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(keyword = %keyword, error = %e, "Search failed");
                return Ok(CommandOutcome::error(format!("Search failed: {}", e)));
            }
        };

        let mode = if dupe {
            DedupeMode::KeepAll
        } else {
            DedupeMode::OnePerEpisode
        };
        let releases: Vec<Release> = dedup::resolve_with(release_filter.apply(candidates), &[], mode);

        Ok(
            CommandOutcome::success(format!("{} releases found", releases.len()))
                .with_data(CommandData::Releases(releases)),
        )
    }

    /// Make another registered source active
    ///
    /// The source-specific tables are rebuilt and refilled from the new source.
    pub async fn switch_source(&self, source_id: &str) -> Result<CommandOutcome> {
        let source = match self.source(source_id) {
            Ok(source) => source,
            Err(_) => {
                let mut known: Vec<_> = self.sources.keys().cloned().collect();
                known.sort();
                return Ok(CommandOutcome::error(format!(
                    "{} is not a registered source (known: {})",
                    source_id,
                    known.join(", ")
                )));
            }
        };

        self.db.rebuild_source_tables().await?;
        self.db.set_active_source(source_id).await?;
        tracing::info!(source = %source_id, "Active source switched");

        if let Err(e) = self.refresh_catalog(source.as_ref()).await {
            return Ok(CommandOutcome::warning(format!(
                "Using {} as source; catalog not loaded: {}",
                source_id, e
            )));
        }
        Ok(CommandOutcome::success(format!(
            "Using {} as source",
            source_id
        )))
    }

    /// Followed subscriptions with their filter rules, by weekday then name
    pub async fn list_followed(&self) -> Result<CommandOutcome> {
        let mut followed = Vec::new();
        for subscription in self.db.list_followed_subscriptions().await? {
            let rule = self
                .db
                .get_filter_rule(&subscription.name)
                .await?
                .unwrap_or_default();
            let update_day = self
                .db
                .find_catalog_entry(&subscription.name)
                .await?
                .filter(|entry| entry.name == subscription.name)
                .and_then(|entry| entry.update_day);
            followed.push(FollowedSummary {
                subscription,
                rule,
                update_day,
            });
        }

        followed.sort_by(|a, b| {
            weekday_rank(a.update_day.as_deref())
                .cmp(&weekday_rank(b.update_day.as_deref()))
                .then_with(|| a.subscription.name.cmp(&b.subscription.name))
        });

        let message = if followed.is_empty() {
            "No subscriptions followed".to_string()
        } else {
            format!("{} subscriptions followed", followed.len())
        };
        Ok(CommandOutcome::info(message).with_data(CommandData::Followed(followed)))
    }

    /// Enqueue one release by hand and dispatch it right away
    pub async fn download(
        &self,
        name: &str,
        title: &str,
        episode: u32,
        locator: &str,
    ) -> Result<CommandOutcome> {
        if self.is_stopped() {
            return Err(Error::ShuttingDown);
        }

        let new_entry = NewDownloadEntry {
            subscription: name.to_string(),
            episode,
            title: title.to_string(),
            locator: locator.to_string(),
        };
        let entry = match self.db.enqueue(&new_entry).await {
            Ok(entry) => entry,
            Err(e) if e.is_duplicate_entry() => {
                return Ok(CommandOutcome::warning(format!(
                    "{} episode {} is already queued",
                    name, episode
                )));
            }
            Err(e) => return Err(e),
        };
        self.emit_event(Event::Enqueued {
            id: entry.id,
            name: name.to_string(),
            episode,
        });

        let Some(dispatcher) = self.dispatcher.clone() else {
            return Ok(
                CommandOutcome::warning(format!(
                    "{} episode {} queued; no dispatcher configured",
                    name, episode
                ))
                .with_data(CommandData::Entries(vec![entry])),
            );
        };

        let pass = self
            .submit_entries(&dispatcher, std::slice::from_ref(&entry))
            .await?;
        let entry = self.db.get_entry(entry.id).await?.unwrap_or(entry);

        let outcome = if pass.accepted() == 1 {
            CommandOutcome::success(format!(
                "{} episode {} sent to {}",
                name,
                episode,
                dispatcher.name()
            ))
        } else {
            CommandOutcome::warning(format!(
                "{} episode {} queued but not accepted by {}",
                name,
                episode,
                dispatcher.name()
            ))
        };
        Ok(outcome.with_data(CommandData::Entries(vec![entry])))
    }

    /// Register subscriptions that sources provide on their own
    ///
    /// Existing subscriptions are left untouched, including unfollowed ones.
    pub async fn sync_virtual_subscriptions(&self) -> Result<CommandOutcome> {
        let mut source_ids: Vec<_> = self.sources.keys().cloned().collect();
        source_ids.sort();

        let mut added = Vec::new();
        for source_id in source_ids {
            let source = self.source(&source_id)?;
            for virtual_subscription in source.virtual_subscriptions() {
                if self
                    .db
                    .get_subscription(&virtual_subscription.name)
                    .await?
                    .is_some()
                {
                    continue;
                }
                self.db
                    .upsert_subscription(UpsertSubscriptionParams {
                        name: &virtual_subscription.name,
                        status: SubscriptionStatus::Following,
                        episode: virtual_subscription.episode,
                        source: &source_id,
                    })
                    .await?;
                self.db.ensure_filter_rule(&virtual_subscription.name).await?;
                tracing::info!(
                    subscription = %virtual_subscription.name,
                    source = %source_id,
                    "Virtual subscription registered"
                );
                added.push(virtual_subscription.name);
            }
        }

        Ok(if added.is_empty() {
            CommandOutcome::info("No new virtual subscriptions")
        } else {
            CommandOutcome::success(format!(
                "Registered {} virtual subscriptions: {}",
                added.len(),
                added.join(", ")
            ))
        })
    }

    /// Reload catalog and subtitle groups from `source`
    pub(crate) async fn refresh_catalog(&self, source: &dyn Source) -> Result<usize> {
        let catalog = source.fetch_catalog().await?;
        self.db
            .replace_catalog(&catalog.entries, &catalog.subtitle_groups)
            .await?;
        tracing::info!(
            source = %source.id(),
            entries = catalog.entries.len(),
            groups = catalog.subtitle_groups.len(),
            "Catalog refreshed"
        );
        Ok(catalog.entries.len())
    }
}

fn split_words(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Monday first; unknown days last
fn weekday_rank(day: Option<&str>) -> usize {
    const DAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
    day.map(|d| d.trim().to_lowercase())
        .and_then(|d| DAYS.iter().position(|prefix| d.starts_with(prefix)))
        .unwrap_or(DAYS.len())
}
