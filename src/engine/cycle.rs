//! Per-subscription reconciliation and status decay.

use crate::db::NewDownloadEntry;
use crate::dedup::{self, DedupeMode};
use crate::episodes::episode_range;
use crate::error::{Error, FetchError, Result};
use crate::filter::ReleaseFilter;
use crate::retry::fetch_with_retry;
use crate::source::SourceQuery;
use crate::types::{
    CycleReport, DispatchSummary, Event, ReconcileStage, Release, Subscription,
    SubscriptionOutcome, SubtitleGroup,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;

use super::ReconcileEngine;

/// Knobs for a single cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleOptions {
    /// Create ledger entries for newly selected episodes
    ///
    /// When false the cycle only records progress, like a "check only" update.
    pub enqueue: bool,
    /// Poll running transfers and run the dispatch pass after reconciling
    pub dispatch: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            enqueue: true,
            dispatch: true,
        }
    }
}

impl ReconcileEngine {
    /// Run one reconciliation cycle
    ///
    /// An empty `names` reconciles every followed subscription. Fetch failures and bad
    /// filter rules are reported per subscription in the [`CycleReport`]; only
    /// persistence failures abort the cycle.
    ///
    /// # Errors
    /// [`Error::ShuttingDown`] after [`stop`](Self::stop), or a database error.
    pub async fn run_cycle(&self, names: &[String]) -> Result<CycleReport> {
        self.run_cycle_with(names, CycleOptions::default()).await
    }

    /// [`run_cycle`](Self::run_cycle) with explicit options
    pub async fn run_cycle_with(
        &self,
        names: &[String],
        options: CycleOptions,
    ) -> Result<CycleReport> {
        if self.is_stopped() {
            return Err(Error::ShuttingDown);
        }

        tracing::info!(requested = names.len(), "Reconciliation cycle started");

        let decayed = self.decay_status().await?;
        let (subscriptions, mut outcomes) = self.select_subscriptions(names).await?;
        let groups = self.db.list_subtitle_groups().await?;

        let results: Vec<(usize, Result<SubscriptionOutcome>)> = stream::iter(
            subscriptions.into_iter().enumerate(),
        )
        .map(|(position, subscription)| {
            let groups = &groups;
            async move {
                (
                    position,
                    self.reconcile_subscription(subscription, groups, options)
                        .await,
                )
            }
        })
        .buffer_unordered(self.config.reconcile.max_concurrent_subscriptions)
        .collect()
        .await;

        let mut ordered = results;
        ordered.sort_by_key(|(position, _)| *position);
        for (_, result) in ordered {
            outcomes.push(result?);
        }

        let dispatch = if options.dispatch && !self.is_stopped() {
            self.poll_completions().await?;
            self.dispatch_pending().await?
        } else {
            DispatchSummary::default()
        };

        let report = CycleReport {
            outcomes,
            dispatch,
            decayed,
        };

        let updated = report.updated().count();
        let failed = report
            .outcomes
            .iter()
            .filter(|o| matches!(o, SubscriptionOutcome::FetchFailed { .. }))
            .count();

        tracing::info!(
            subscriptions = report.outcomes.len(),
            updated,
            failed,
            submitted = report.dispatch.submitted,
            retried = report.dispatch.retried,
            rejected = report.dispatch.rejected,
            "Reconciliation cycle finished"
        );
        self.emit_event(Event::CycleComplete { updated, failed });

        Ok(report)
    }

    /// Reset subscriptions whose `updated` status is older than the decay window
    async fn decay_status(&self) -> Result<u64> {
        let window = chrono::Duration::from_std(self.config.reconcile.status_decay)
            .map_err(|e| Error::config(format!("status_decay out of range: {}", e), "status_decay"))?;
        let decayed = self.db.decay_updated_status(Utc::now() - window).await?;
        if decayed > 0 {
            tracing::info!(decayed, "Subscriptions returned to following");
        }
        Ok(decayed)
    }

    /// Resolve the subscriptions to reconcile; names that cannot be reconciled are
    /// reported as skipped right away
    async fn select_subscriptions(
        &self,
        names: &[String],
    ) -> Result<(Vec<Subscription>, Vec<SubscriptionOutcome>)> {
        if names.is_empty() {
            return Ok((self.db.list_followed_subscriptions().await?, Vec::new()));
        }

        let mut selected = Vec::with_capacity(names.len());
        let mut skipped = Vec::new();
        for name in names {
            match self.db.get_subscription(name).await? {
                Some(subscription) if subscription.status.is_followed() => {
                    selected.push(subscription)
                }
                Some(subscription) => skipped.push(SubscriptionOutcome::Skipped {
                    name: name.clone(),
                    reason: format!("subscription is {}", subscription.status),
                }),
                None => skipped.push(SubscriptionOutcome::Skipped {
                    name: name.clone(),
                    reason: "not subscribed".to_string(),
                }),
            }
        }
        Ok((selected, skipped))
    }

    async fn reconcile_subscription(
        &self,
        subscription: Subscription,
        groups: &[SubtitleGroup],
        options: CycleOptions,
    ) -> Result<SubscriptionOutcome> {
        let name = subscription.name.clone();

        if self.is_stopped() {
            return Ok(SubscriptionOutcome::Skipped {
                name,
                reason: "shutting down".to_string(),
            });
        }

        let Some(source) = self.sources.get(&subscription.source).cloned() else {
            tracing::warn!(
                subscription = %name,
                source = %subscription.source,
                "Subscription served by an unregistered source"
            );
            return Ok(SubscriptionOutcome::Skipped {
                name,
                reason: format!("source '{}' is not registered", subscription.source),
            });
        };

        log_stage(&name, ReconcileStage::Fetching);
        let query = SourceQuery {
            name: name.clone(),
            keyword: self.keyword_for(&name).await?,
            max_page: self.config.reconcile.max_page,
            ignore_old_row: self.config.reconcile.ignore_old_row,
        };

        let fetch_timeout = self.config.reconcile.fetch_timeout;
        let source_ref = &source;
        let query_ref = &query;
        let fetched = fetch_with_retry(&self.config.retry, || async move {
            match tokio::time::timeout(fetch_timeout, source_ref.fetch_max_episode(query_ref))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::TimedOut {
                    source_id: source_ref.id().to_string(),
                    subject: query_ref.name.clone(),
                    after_secs: fetch_timeout.as_secs(),
                }
                .into()),
            }
        })
        .await;

        let listing = match fetched {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(
                    subscription = %name,
                    source = %source.id(),
                    error = %e,
                    "Fetch failed, subscription left unchanged"
                );
                self.emit_event(Event::FetchFailed {
                    name: name.clone(),
                    error: e.to_string(),
                });
                return Ok(SubscriptionOutcome::FetchFailed {
                    name,
                    reason: e.to_string(),
                });
            }
        };

        tracing::debug!(
            subscription = %name,
            recorded = subscription.episode,
            observed = listing.max_episode,
            releases = listing.releases.len(),
            "Listing fetched"
        );

        log_stage(&name, ReconcileStage::Filtering);
        let rule = self.db.get_filter_rule(&name).await?.unwrap_or_default();
        let release_filter = match ReleaseFilter::compile(&rule) {
            Ok(release_filter) => release_filter,
            Err(e @ Error::Config { .. }) => {
                tracing::warn!(subscription = %name, error = %e, "Filter rule rejected");
                return Ok(SubscriptionOutcome::ConfigError {
                    name,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        let qualifying = release_filter.apply(normalize_groups(listing.releases, groups));

        log_stage(&name, ReconcileStage::Resolving);
        let mode = if self.config.reconcile.dedupe {
            DedupeMode::OnePerEpisode
        } else {
            DedupeMode::KeepAll
        };
        let resolved = dedup::resolve_with(qualifying, &rule.subtitle_groups, mode);

        log_stage(&name, ReconcileStage::Selecting);
        let range = episode_range(subscription.episode, listing.max_episode);
        let selected: Vec<Release> = resolved
            .into_iter()
            .filter(|r| range.contains(&r.episode))
            .collect();

        let Some(latest) = selected.iter().map(|r| r.episode).max() else {
            log_stage(&name, ReconcileStage::Idle);
            return Ok(SubscriptionOutcome::UpToDate { name });
        };

        log_stage(&name, ReconcileStage::Persisting);
        // Ledger first: progress only moves once every selected episode has an entry
        let enqueued = if options.enqueue {
            self.enqueue_releases(&name, &selected).await?
        } else {
            Vec::new()
        };

        if self.db.record_progress(&name, latest, Utc::now()).await? {
            tracing::info!(
                subscription = %name,
                from = subscription.episode,
                to = latest,
                "Subscription updated"
            );
            self.emit_event(Event::SubscriptionUpdated {
                name: name.clone(),
                episode: latest,
            });
        } else {
            tracing::debug!(
                subscription = %name,
                episode = latest,
                "Recorded episode already ahead, progress kept"
            );
        }

        log_stage(&name, ReconcileStage::Idle);
        Ok(SubscriptionOutcome::Updated {
            name,
            episode: latest,
            enqueued,
        })
    }

    /// Create ledger entries, returning the episodes that got one
    pub(crate) async fn enqueue_releases(
        &self,
        subscription: &str,
        releases: &[Release],
    ) -> Result<Vec<u32>> {
        let downloaded = if self.config.reconcile.reopen_downloaded {
            HashSet::new()
        } else {
            self.db.downloaded_episodes(subscription).await?
        };

        let mut enqueued = Vec::with_capacity(releases.len());
        for release in releases {
            if downloaded.contains(&release.episode) {
                tracing::debug!(
                    subscription = %subscription,
                    episode = release.episode,
                    "Episode already downloaded, not enqueued"
                );
                continue;
            }

            let new_entry = NewDownloadEntry {
                subscription: subscription.to_string(),
                episode: release.episode,
                title: release.title.clone(),
                locator: release.locator.clone(),
            };
            match self.db.enqueue(&new_entry).await {
                Ok(entry) => {
                    self.emit_event(Event::Enqueued {
                        id: entry.id,
                        name: subscription.to_string(),
                        episode: entry.episode,
                    });
                    enqueued.push(entry.episode);
                }
                Err(e) if e.is_duplicate_entry() => {
                    tracing::debug!(
                        subscription = %subscription,
                        episode = release.episode,
                        "Episode already queued"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(enqueued)
    }

    /// Search keyword for a subscription: the catalog keyword, else the name itself
    pub(crate) async fn keyword_for(&self, name: &str) -> Result<String> {
        Ok(self
            .db
            .find_catalog_entry(name)
            .await?
            .filter(|entry| entry.name == name)
            .map(|entry| entry.keyword)
            .unwrap_or_else(|| name.to_string()))
    }
}

/// Rewrite subtitle group names to catalog ids so they compare against filter rules
pub(crate) fn normalize_groups(releases: Vec<Release>, groups: &[SubtitleGroup]) -> Vec<Release> {
    if groups.is_empty() {
        return releases;
    }
    releases
        .into_iter()
        .map(|mut release| {
            if let Some(group) = &release.subtitle_group
                && !groups.iter().any(|g| &g.id == group)
                && let Some(known) = groups.iter().find(|g| g.name.eq_ignore_ascii_case(group))
            {
                release.subtitle_group = Some(known.id.clone());
            }
            release
        })
        .collect()
}

fn log_stage(subscription: &str, stage: ReconcileStage) {
    tracing::debug!(subscription = %subscription, stage = ?stage, "Reconcile stage");
}
