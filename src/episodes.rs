//! Episode arithmetic and title parsing
//!
//! [`episode_range`] and [`new_episodes`] compute which episode numbers are newly
//! available. [`parse_episode`] and [`parse_subtitle_group`] recover structured data
//! from fansub release titles for sources that only publish a title.

use crate::error::Result;
use regex::Regex;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

/// Episodes newer than `last_recorded` up to and including `max_observed`
///
/// Empty when `max_observed <= last_recorded`.
pub fn episode_range(last_recorded: u32, max_observed: u32) -> RangeInclusive<u32> {
    // (n+1)..=n is empty, so this also covers max_observed == last_recorded
    match last_recorded.checked_add(1) {
        Some(first) => first..=max_observed,
        #[allow(clippy::reversed_empty_ranges)]
        None => 1..=0,
    }
}

/// Ordered list of new episodes, or the fetch error
///
/// A failed fetch is never mistaken for "nothing new".
pub fn new_episodes(last_recorded: u32, max_observed: Result<u32>) -> Result<Vec<u32>> {
    Ok(episode_range(last_recorded, max_observed?).collect())
}

#[allow(clippy::expect_used)]
static BATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\[【(\s])\d{1,4}(?:-|\s*[~～]\s*)\d{1,4}(?:\s*(?:fin|end|合集))?(?:$|[\]】)\s])")
        .expect("batch regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static CHINESE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"第\s*(\d{1,4})\s*[话話集]").expect("chinese episode regex is valid")
});

#[allow(clippy::expect_used)]
static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bS\d{1,2}E(\d{1,4})\b").expect("season episode regex is valid")
});

#[allow(clippy::expect_used)]
static EP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bEP?\.?\s?(\d{1,4})(?:v\d)?\b").expect("ep marker regex is valid")
});

#[allow(clippy::expect_used)]
static DASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s-\s(\d{1,4})(?:v\d)?(?:$|[\s\[(.])").expect("dash regex is valid")
});

#[allow(clippy::expect_used)]
static HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d{1,4})\b").expect("hash regex is valid"));

#[allow(clippy::expect_used)]
static BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\[【](\d{1,4})(?:v\d)?(?:\s?(?:end|fin))?[\]】]")
        .expect("bracket regex is valid")
});

#[allow(clippy::expect_used)]
static VERSIONED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,4})v\d\b").expect("versioned regex is valid"));

#[allow(clippy::expect_used)]
static LEADING_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[\[【]([^\]】]+)[\]】]").expect("leading group regex is valid")
});

/// Extract the episode number from a release title
///
/// Recognizes `Title - 05`, `第05话`, `第5集`, `EP05`, `E05`, `S01E05`, `#05`, `[05]`
/// and `05v2`. Batch releases (`[01-12]`) return `None`, as do bare bracketed
/// numbers that look like a resolution or a year.
pub fn parse_episode(title: &str) -> Option<u32> {
    if BATCH.is_match(title) {
        return None;
    }

    // Explicit markers are trusted as-is
    for re in [&*CHINESE, &*SEASON_EPISODE, &*EP_MARKER, &*DASH, &*HASH] {
        if let Some(n) = capture_number(re, title) {
            return Some(n);
        }
    }

    // Bare numbers need a plausibility check
    for re in [&*BRACKET, &*VERSIONED] {
        for caps in re.captures_iter(title) {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok())
                && plausible_bare_number(n)
            {
                return Some(n);
            }
        }
    }

    None
}

/// Extract the leading `[Group]` tag of a release title
pub fn parse_subtitle_group(title: &str) -> Option<String> {
    let group = LEADING_GROUP.captures(title)?.get(1)?.as_str().trim();
    if group.is_empty() || group.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(group.to_string())
}

fn capture_number(re: &Regex, title: &str) -> Option<u32> {
    re.captures(title)?.get(1)?.as_str().parse().ok()
}

fn plausible_bare_number(n: u32) -> bool {
    !matches!(n, 480 | 576 | 720 | 1080 | 1440 | 2160) && !(1900..=2100).contains(&n)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, FetchError};

    #[test]
    fn range_is_exclusive_of_last_and_inclusive_of_max() {
        assert_eq!(episode_range(3, 5).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(episode_range(0, 2).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn range_is_empty_when_nothing_new() {
        assert!(episode_range(5, 5).is_empty());
        assert!(episode_range(7, 5).is_empty());
        assert!(episode_range(u32::MAX, u32::MAX).is_empty());
    }

    #[test]
    fn new_episodes_propagates_fetch_failure() {
        let err = new_episodes(
            3,
            Err(Error::Fetch(FetchError::Failed {
                source_id: "mikan".into(),
                subject: "Frieren".into(),
                reason: "refused".into(),
            })),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "fetch_failed");

        assert_eq!(new_episodes(3, Ok(5)).unwrap(), vec![4, 5]);
        assert!(new_episodes(5, Ok(5)).unwrap().is_empty());
    }

    #[test]
    fn parses_common_title_shapes() {
        let cases = [
            ("[LoliHouse] Sousou no Frieren - 05 [WebRip 1080p HEVC-10bit AAC]", 5),
            ("[Nekomoe kissaten] Kaiju No. 8 - 12v2 [1080p]", 12),
            ("【喵萌奶茶屋】葬送的芙莉莲 第05话 1080p", 5),
            ("[桜都字幕组] 葬送的芙莉莲 第5集 [简体内嵌]", 5),
            ("Frieren EP05 1080p", 5),
            ("Frieren E07 WEB-DL", 7),
            ("Frieren S01E09 1080p WEB", 9),
            ("Frieren #11", 11),
            ("[SweetSub][Frieren][05][WebRip][1080P][CHS]", 5),
            ("Frieren 08v2 (1080p)", 8),
            ("[Group] One Piece - 1100 [1080p]", 1100),
        ];
        for (title, expected) in cases {
            assert_eq!(parse_episode(title), Some(expected), "title: {title}");
        }
    }

    #[test]
    fn rejects_batches_and_bare_resolution_or_year() {
        for title in [
            "[LoliHouse] Sousou no Frieren [01-28] [1080p]",
            "Frieren 01~12 Fin",
            "[Group][Frieren][1080][2024]",
            "Frieren Complete 1080p",
        ] {
            assert_eq!(parse_episode(title), None, "title: {title}");
        }
    }

    #[test]
    fn dash_after_number_in_title_is_not_a_batch() {
        assert_eq!(parse_episode("[Group] Kaiju No. 8 - 03 [1080p]"), Some(3));
    }

    #[test]
    fn leading_group_tag() {
        assert_eq!(
            parse_subtitle_group("[LoliHouse] Frieren - 05 [1080p]").as_deref(),
            Some("LoliHouse")
        );
        assert_eq!(
            parse_subtitle_group("【喵萌奶茶屋】葬送的芙莉莲 第05话").as_deref(),
            Some("喵萌奶茶屋")
        );
        assert_eq!(parse_subtitle_group("Frieren - 05"), None);
        assert_eq!(parse_subtitle_group("[05] Frieren"), None);
    }
}
