//! Duplicate resolution: one release per episode
//!
//! When several releases exist for the same episode the winner is picked by:
//! 1. subtitle group appearing earliest in the preference list (unlisted groups last)
//! 2. most recent publication time (a known time beats an unknown one)
//! 3. first seen in input order

use crate::types::Release;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Whether to collapse releases of the same episode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DedupeMode {
    /// Keep one release per episode
    #[default]
    OnePerEpisode,
    /// Keep every release, only sort by episode
    KeepAll,
}

/// Pick one release per distinct episode, sorted by episode ascending
pub fn resolve(releases: Vec<Release>, preference: &[String]) -> Vec<Release> {
    let mut winners: BTreeMap<u32, (RankKey, Release)> = BTreeMap::new();

    for (position, release) in releases.into_iter().enumerate() {
        let key = rank(&release, preference, position);
        match winners.get(&release.episode) {
            Some((best, _)) if *best <= key => {}
            _ => {
                winners.insert(release.episode, (key, release));
            }
        }
    }

    winners.into_values().map(|(_, release)| release).collect()
}

/// [`resolve`], or a stable episode sort when `mode` is [`DedupeMode::KeepAll`]
pub fn resolve_with(releases: Vec<Release>, preference: &[String], mode: DedupeMode) -> Vec<Release> {
    match mode {
        DedupeMode::OnePerEpisode => resolve(releases, preference),
        DedupeMode::KeepAll => {
            let mut all = releases;
            all.sort_by_key(|r| r.episode);
            all
        }
    }
}

// Lower sorts first: preference index, then newest timestamp, then input position
type RankKey = (usize, Reverse<Option<i64>>, usize);

fn rank(release: &Release, preference: &[String], position: usize) -> RankKey {
    let preferred = release
        .subtitle_group
        .as_ref()
        .and_then(|group| preference.iter().position(|p| p == group))
        .unwrap_or(preference.len());
    let published = release.published_at.map(|t| t.timestamp_millis());
    (preferred, Reverse(published), position)
}
