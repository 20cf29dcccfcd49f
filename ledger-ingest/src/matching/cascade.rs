//! Planning-key matching cascade
//!
//! Tiers run in strict priority order and stop at the first hit:
//! sentinel → direct substring → delimiter-normalized → special case →
//! windowed substring → fuzzy (opt-in) → not identified.

use super::fuzzy::best_match;
use crate::normalize::{
    bracket_narrative, canonicalize_comparison_form, canonicalize_key, split_segments,
    to_pipe_form, NOT_IDENTIFIED, NOT_INFORMED,
};
use crate::vocabulary::{ControlledVocabulary, SpecialCaseDictionary};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Matches echoed at debug level per run
const DEBUG_SAMPLE_LIMIT: usize = 10;

/// Progress log interval, in records
const PROGRESS_LOG_INTERVAL: usize = 1000;

/// Tier that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Direct,
    DelimiterNormalized,
    SpecialCase,
    WindowedSubstring,
    Fuzzy,
    NotIdentified,
}

/// Outcome of the cascade for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub tier: MatchTier,
    /// Canonical key; `None` only for `NotIdentified` without an override
    pub key: Option<String>,
    /// Key replaced by a forced override
    #[serde(default)]
    pub forced: bool,
}

impl MatchResult {
    pub fn matched(tier: MatchTier, key: impl Into<String>) -> Self {
        Self {
            tier,
            key: Some(key.into()),
            forced: false,
        }
    }

    pub fn not_identified() -> Self {
        Self {
            tier: MatchTier::NotIdentified,
            key: None,
            forced: false,
        }
    }

    /// Stored key value: the assigned key or the not-identified sentinel
    pub fn final_key(&self) -> &str {
        self.key.as_deref().unwrap_or(NOT_IDENTIFIED)
    }

    pub fn is_identified(&self) -> bool {
        self.key.is_some()
    }
}

/// Cascade tuning passed in by the caller
#[derive(Debug, Clone)]
pub struct MatcherSettings {
    /// Segment count W of the active key scheme
    pub segment_width: usize,
    pub fuzzy_enabled: bool,
    /// Minimum fuzzy score, 0-100
    pub fuzzy_cutoff: f64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            segment_width: 7,
            fuzzy_enabled: false,
            fuzzy_cutoff: ledger_common::config::DEFAULT_FUZZY_CUTOFF,
        }
    }
}

/// Assigns planning keys to narratives
pub struct PlanningKeyMatcher {
    vocabulary: ControlledVocabulary,
    special_cases: SpecialCaseDictionary,
    settings: MatcherSettings,
}

impl PlanningKeyMatcher {
    pub fn new(
        vocabulary: ControlledVocabulary,
        special_cases: SpecialCaseDictionary,
        settings: MatcherSettings,
    ) -> Self {
        Self {
            vocabulary,
            special_cases,
            settings,
        }
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    fn window_width(&self) -> usize {
        self.settings.segment_width.max(1)
    }

    /// Run the cascade for one cleaned narrative
    pub fn identify(&self, narrative: &str) -> MatchResult {
        let trimmed = narrative.trim();
        if trimmed.is_empty() || trimmed == NOT_INFORMED {
            return MatchResult::not_identified();
        }

        let bracketed = bracket_narrative(trimmed);

        if let Some(key) = self
            .vocabulary
            .keys()
            .iter()
            .find(|key| bracketed.contains(key.as_str()))
        {
            return MatchResult::matched(MatchTier::Direct, key.as_str());
        }

        let bracketed_pipe = to_pipe_form(&bracketed);
        if let Some(key) = self.vocabulary.lookup_pipe(&bracketed_pipe) {
            return MatchResult::matched(MatchTier::DelimiterNormalized, key);
        }

        let plain_comparison = canonicalize_comparison_form(trimmed);
        let pipe_comparison = canonicalize_comparison_form(&bracketed_pipe);
        if let Some(key) = self
            .special_cases
            .find_in(&[plain_comparison.as_str(), pipe_comparison.as_str()])
        {
            return MatchResult::matched(MatchTier::SpecialCase, canonicalize_key(key));
        }

        let segments = split_segments(&bracketed);
        let width = self.window_width();
        if segments.len() < width {
            return MatchResult::not_identified();
        }

        for window in segments.windows(width) {
            let candidate = format!("* {} *", window.join(" * "));
            if self.vocabulary.contains(&candidate) {
                return MatchResult::matched(MatchTier::WindowedSubstring, candidate);
            }
            if let Some(key) = self.vocabulary.lookup_pipe(&to_pipe_form(&candidate)) {
                return MatchResult::matched(MatchTier::WindowedSubstring, key);
            }
        }

        if self.settings.fuzzy_enabled {
            let query = format!("* {} *", segments[..width].join(" * "));
            let choices = self.vocabulary.keys().iter().map(String::as_str);
            if let Some((index, score)) = best_match(&query, choices, self.settings.fuzzy_cutoff) {
                let key = &self.vocabulary.keys()[index];
                debug!(score, key = %key, "Fuzzy match accepted");
                return MatchResult::matched(MatchTier::Fuzzy, key.as_str());
            }
        }

        MatchResult::not_identified()
    }

    /// Run the cascade over a batch of `(record id, narrative)` pairs
    ///
    /// Logs a bounded sample of matches at debug level and progress every
    /// thousand records.
    pub fn identify_all<'a, I>(&self, records: I) -> Vec<MatchResult>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
        I::IntoIter: ExactSizeIterator,
    {
        let records = records.into_iter();
        let total = records.len();
        info!(total, "Identifying planning keys");

        let mut sampled = 0;
        let mut results = Vec::with_capacity(total);
        for (index, (record_id, narrative)) in records.enumerate() {
            let result = self.identify(narrative);
            if result.is_identified() && sampled < DEBUG_SAMPLE_LIMIT {
                sampled += 1;
                debug!(
                    record_id,
                    tier = ?result.tier,
                    key = result.final_key(),
                    "Planning key matched"
                );
            }
            results.push(result);

            let processed = index + 1;
            if processed % PROGRESS_LOG_INTERVAL == 0 {
                info!(processed, total, "Planning key identification progress");
            }
        }

        let identified = results.iter().filter(|r| r.is_identified()).count();
        info!(identified, total, "Planning key identification finished");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(keys: &[&str], cases: &[(&str, &str)], width: usize) -> PlanningKeyMatcher {
        PlanningKeyMatcher::new(
            ControlledVocabulary::from_keys(keys.iter().copied()),
            SpecialCaseDictionary::from_pairs(cases.iter().copied()),
            MatcherSettings {
                segment_width: width,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_sentinel_short_circuits() {
        let m = matcher(&["NÃO INFORMADO*X"], &[("não informado", "A*B")], 2);
        assert_eq!(m.identify(NOT_INFORMED), MatchResult::not_identified());
        assert_eq!(m.identify("   "), MatchResult::not_identified());
    }

    #[test]
    fn test_direct_match() {
        let m = matcher(&["EDUCACAO*ENSINO MEDIO*GESTAO ESCOLAR"], &[], 3);
        let result = m.identify("* EDUCACAO * ENSINO MEDIO * GESTAO ESCOLAR *");
        assert_eq!(result.tier, MatchTier::Direct);
        assert_eq!(result.final_key(), "* EDUCACAO * ENSINO MEDIO * GESTAO ESCOLAR *");
    }

    #[test]
    fn test_direct_match_inside_longer_narrative() {
        let m = matcher(&["A*B"], &[], 2);
        let result = m.identify("PAGAMENTO REF * A * B * PARCELA 3");
        assert_eq!(result.tier, MatchTier::Direct);
        assert_eq!(result.final_key(), "* A * B *");
    }

    #[test]
    fn test_direct_first_vocabulary_entry_wins() {
        let m = matcher(&["B*C", "A*B"], &[], 2);
        let result = m.identify("A*B*C");
        assert_eq!(result.final_key(), "* B * C *");
    }

    #[test]
    fn test_direct_beats_special_case() {
        let m = matcher(&["A*B"], &[("a", "X*Y")], 2);
        assert_eq!(m.identify("A * B").tier, MatchTier::Direct);
    }

    #[test]
    fn test_delimiter_normalized_match() {
        let m = matcher(&["A*B"], &[], 2);
        let result = m.identify("A | B");
        assert_eq!(result.tier, MatchTier::DelimiterNormalized);
        assert_eq!(result.final_key(), "* A * B *");
    }

    #[test]
    fn test_special_case_match() {
        let m = matcher(
            &["EDUCACAO*MERENDA"],
            &[("Bolsa Atleta", "ESPORTE*BOLSA ATLETA"), ("bolsa", "OUTRO*BOLSA")],
            2,
        );
        let result = m.identify("PAGAMENTO DA BOLSA ATLETA - 2024");
        assert_eq!(result.tier, MatchTier::SpecialCase);
        assert_eq!(result.final_key(), "* ESPORTE * BOLSA ATLETA *");
    }

    #[test]
    fn test_special_case_matches_accented_narrative() {
        let m = matcher(&[], &[("gestao escolar", "E*GE")], 2);
        let result = m.identify("Apoio à GESTÇŸO ESCOLAR");
        assert_eq!(result.tier, MatchTier::SpecialCase);
        assert_eq!(result.final_key(), "* E * GE *");
    }

    #[test]
    fn test_windowed_requires_exact_window() {
        let m = matcher(&["A*B*C"], &[], 3);
        // Windows [X,A,B] [A,B,C D] [B,C D,E]; none is a key
        let result = m.identify("X * A * B * C D * E");
        assert_eq!(result, MatchResult::not_identified());
    }

    #[test]
    fn test_windowed_pipe_match_when_direct_misses() {
        let m = matcher(&["A*B*C*D"], &[], 3);
        // Segment "A | B" only lines up with the key in pipe form
        let result = m.identify("X * A | B * C * D");
        assert_eq!(result.tier, MatchTier::WindowedSubstring);
        assert_eq!(result.final_key(), "* A * B * C * D *");
    }

    #[test]
    fn test_windowed_never_fires_below_width() {
        let m = matcher(&["A*B*C"], &[], 3);
        assert_eq!(m.identify("A | B"), MatchResult::not_identified());

        let fuzzy = PlanningKeyMatcher::new(
            ControlledVocabulary::from_keys(["A*B*C"]),
            SpecialCaseDictionary::default(),
            MatcherSettings {
                segment_width: 3,
                fuzzy_enabled: true,
                fuzzy_cutoff: 0.0,
            },
        );
        assert_eq!(fuzzy.identify("A * B"), MatchResult::not_identified());
    }

    #[test]
    fn test_fuzzy_disabled_by_default() {
        let m = matcher(&["EDUCACAO*ENSINO MEDIO*GESTAO ESCOLAR"], &[], 3);
        let result = m.identify("EDUCACAO*ENSINO MEDIO*GESTAO ESCOLARR");
        assert_eq!(result, MatchResult::not_identified());
    }

    #[test]
    fn test_fuzzy_accepts_close_match() {
        let m = PlanningKeyMatcher::new(
            ControlledVocabulary::from_keys(["EDUCACAO*ENSINO MEDIO*GESTAO ESCOLAR"]),
            SpecialCaseDictionary::default(),
            MatcherSettings {
                segment_width: 3,
                fuzzy_enabled: true,
                fuzzy_cutoff: 90.0,
            },
        );
        let result = m.identify("EDUCACAO*ENSINO MEDIO*GESTAO ESCOLARR");
        assert_eq!(result.tier, MatchTier::Fuzzy);
        assert_eq!(result.final_key(), "* EDUCACAO * ENSINO MEDIO * GESTAO ESCOLAR *");
    }

    #[test]
    fn test_identify_all_preserves_order() {
        let m = matcher(&["A*B"], &[], 2);
        let results = m.identify_all(vec![("1", "A*B"), ("2", NOT_INFORMED), ("3", "A | B")]);
        let tiers: Vec<MatchTier> = results.iter().map(|r| r.tier).collect();
        assert_eq!(
            tiers,
            vec![
                MatchTier::Direct,
                MatchTier::NotIdentified,
                MatchTier::DelimiterNormalized
            ]
        );
    }
}
