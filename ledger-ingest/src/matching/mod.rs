//! Planning-key identification
//!
//! The cascade assigns a key per narrative; forced overrides then replace
//! keys by record identifier; finally every key is exploded into the fixed
//! segment columns of the active key scheme.

pub mod cascade;
pub mod fuzzy;

pub use cascade::{MatchResult, MatchTier, MatcherSettings, PlanningKeyMatcher};

use crate::normalize::{
    canonicalize_key, split_segments, IGNORED_MARKER, NOT_IDENTIFIED, NOT_INFORMED,
};
use crate::vocabulary::ForcedOverrideMap;
use tracing::info;

/// Replace cascade results by forced overrides, keyed by trimmed record id
///
/// Runs over the whole batch after the cascade and wins over every tier,
/// `NotIdentified` included. Returns the number of records overridden.
pub fn apply_forced_overrides<S: AsRef<str>>(
    record_ids: &[S],
    results: &mut [MatchResult],
    overrides: &ForcedOverrideMap,
) -> usize {
    if overrides.is_empty() {
        return 0;
    }

    let mut applied = 0;
    for (record_id, result) in record_ids.iter().zip(results.iter_mut()) {
        if let Some(key) = overrides.get(record_id.as_ref()) {
            let key = if key == IGNORED_MARKER {
                IGNORED_MARKER.to_string()
            } else {
                canonicalize_key(key)
            };
            result.key = Some(key);
            result.forced = true;
            applied += 1;
        }
    }

    info!(applied, "Forced planning key overrides applied");
    applied
}

/// Explode a key into exactly `width` segments
///
/// Blank and sentinel keys become `width` × "NÃO INFORMADO"; the ignored
/// marker is replicated verbatim; otherwise segments are padded with the
/// not-informed sentinel or truncated.
pub fn decompose_key(key: &str, width: usize) -> Vec<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() || trimmed == NOT_IDENTIFIED || trimmed == NOT_INFORMED {
        return vec![NOT_INFORMED.to_string(); width];
    }
    if trimmed == IGNORED_MARKER {
        return vec![IGNORED_MARKER.to_string(); width];
    }

    let mut segments: Vec<String> = split_segments(trimmed)
        .into_iter()
        .take(width)
        .map(str::to_string)
        .collect();
    segments.resize(width, NOT_INFORMED.to_string());
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose_pads_and_truncates() {
        assert_eq!(
            decompose_key("* A * B *", 4),
            vec!["A", "B", NOT_INFORMED, NOT_INFORMED]
        );
        assert_eq!(decompose_key("* A * B * C * D * E *", 3), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_decompose_sentinels() {
        for key in ["", "  ", NOT_IDENTIFIED, NOT_INFORMED] {
            assert_eq!(decompose_key(key, 7), vec![NOT_INFORMED; 7]);
        }
        assert_eq!(decompose_key("#", 4), vec!["#"; 4]);
    }

    #[test]
    fn test_decompose_always_has_width() {
        let keys = ["* A *", "* A * B * C * D * E * F * G * H *", "#", "", "lone"];
        for width in [1, 4, 7] {
            for key in keys {
                assert_eq!(decompose_key(key, width).len(), width);
            }
        }
    }

    #[test]
    fn test_overrides_win_over_every_outcome() {
        let overrides = ForcedOverrideMap::from_pairs([
            ("2024NE0001", "X|Y"),
            ("2024NE0002", "#"),
        ]);
        let ids = vec!["2024NE0001 ".to_string(), "2024NE0002".to_string(), "2024NE0003".to_string()];
        let mut results = vec![
            MatchResult::matched(MatchTier::Direct, "* A * B *"),
            MatchResult::not_identified(),
            MatchResult::matched(MatchTier::SpecialCase, "* C * D *"),
        ];

        let applied = apply_forced_overrides(&ids, &mut results, &overrides);

        assert_eq!(applied, 2);
        assert_eq!(results[0].final_key(), "* X * Y *");
        assert!(results[0].forced);
        assert_eq!(results[1].final_key(), "#");
        assert_eq!(results[2].final_key(), "* C * D *");
        assert!(!results[2].forced);
    }
}
