//! Release filtering
//!
//! A [`ReleaseFilter`] is a compiled [`FilterRule`]. A release qualifies when it passes
//! every configured predicate: subtitle-group allow-list, include substrings, exclude
//! substrings, regex and episode bounds. An empty rule passes everything.

use crate::error::{Error, Result};
use crate::types::{EpisodeBounds, FilterRule, Release};
use regex::Regex;
use tracing::debug;

/// Compiled-size limit for user-supplied patterns
const REGEX_SIZE_LIMIT: usize = 1024 * 1024;

/// A filter rule with its regex compiled once
#[derive(Clone, Debug)]
pub struct ReleaseFilter {
    subtitle_groups: Vec<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    regex: Option<Regex>,
    bounds: EpisodeBounds,
}

impl ReleaseFilter {
    /// Compile a rule
    ///
    /// # Errors
    /// Returns [`Error::Config`] with key `"regex"` if the pattern does not compile.
    pub fn compile(rule: &FilterRule) -> Result<Self> {
        let regex = rule
            .regex
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(compile_regex)
            .transpose()?;

        Ok(Self {
            subtitle_groups: rule.subtitle_groups.clone(),
            include: lowercase_all(&rule.include),
            exclude: lowercase_all(&rule.exclude),
            regex,
            bounds: EpisodeBounds::default(),
        })
    }

    /// Restrict accepted episodes to `bounds`
    pub fn with_bounds(mut self, bounds: EpisodeBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Whether a release passes every predicate
    pub fn matches(&self, release: &Release) -> bool {
        if !self.subtitle_groups.is_empty() {
            let allowed = release
                .subtitle_group
                .as_ref()
                .is_some_and(|group| self.subtitle_groups.contains(group));
            if !allowed {
                debug!(
                    title = %release.title,
                    group = ?release.subtitle_group,
                    "Release rejected: subtitle group not allowed"
                );
                return false;
            }
        }

        let title = release.title.to_lowercase();

        if let Some(missing) = self.include.iter().find(|word| !title.contains(word.as_str())) {
            debug!(
                title = %release.title,
                include = %missing,
                "Release rejected: include keyword missing"
            );
            return false;
        }

        if let Some(hit) = self.exclude.iter().find(|word| title.contains(word.as_str())) {
            debug!(
                title = %release.title,
                exclude = %hit,
                "Release rejected: exclude keyword present"
            );
            return false;
        }

        if let Some(re) = &self.regex
            && !re.is_match(&release.title)
        {
            debug!(
                title = %release.title,
                regex = %re.as_str(),
                "Release rejected: regex did not match"
            );
            return false;
        }

        if !self.bounds.contains(release.episode) {
            debug!(
                title = %release.title,
                episode = release.episode,
                "Release rejected: episode out of bounds"
            );
            return false;
        }

        true
    }

    /// Keep the qualifying releases, preserving input order
    pub fn apply(&self, candidates: Vec<Release>) -> Vec<Release> {
        candidates.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// Compile `rule` and apply it to `candidates`
pub fn filter(candidates: Vec<Release>, rule: &FilterRule) -> Result<Vec<Release>> {
    Ok(ReleaseFilter::compile(rule)?.apply(candidates))
}

/// Compile a user pattern with the crate's size limit
pub(crate) fn compile_regex(pattern: &str) -> Result<Regex> {
    regex::RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| Error::config(format!("invalid regex '{}': {}", pattern, e), "regex"))
}

fn lowercase_all(words: &[String]) -> Vec<String> {
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
