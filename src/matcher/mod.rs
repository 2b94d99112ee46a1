//! Transcript matcher.
//!
//! Decides whether a fragment of recognized speech satisfies the line the
//! performer is expected to say. Speech-to-text on actors is noisy, so the
//! matcher runs a permissive cascade of tiers and accepts on the first one
//! that succeeds:
//!
//! ```text
//!  spoken ──normalize──▶ Containment ─▶ FuzzySearch ─▶ WordOverlap ─▶ LeadWord
//!                            │              │              │             │
//!                            └──────────────┴──── first hit wins ────────┘
//! ```
//!
//! Every tier is a [`MatchTier`] so thresholds can be tuned or a tier swapped
//! without touching the sequencer.

mod fuzzy_index;
mod tiers;

pub use fuzzy_index::{dissimilarity, FuzzyIndex, SearchHit};
pub use tiers::{ContainmentTier, FuzzySearchTier, LeadWordTier, WordOverlapTier};

use crate::script::ScriptIndex;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"));

/// Strips punctuation, folds case and trims.
pub fn normalize(text: &str) -> String {
    NON_WORD.replace_all(text, "").to_lowercase().trim().to_string()
}

/// Default stopwords: articles, common auxiliaries, conjunctions and relative
/// pronouns.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "the", // articles
    "am", "is", "are", "was", "were", "be", "been", "being", "do", "does", "did", "have", "has",
    "had", "will", "would", "shall", "should", "can", "could", "may", "might", "must",
    "and", "or", "but", "nor", "so", "yet", "if", // conjunctions
    "that", "which", "who", "whom", "whose", // relative pronouns
];

/// Tuning constants for the word-level tiers. Their values are empirical.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatcherTuning {
    /// Spoken text must be longer than this for a containment hit.
    #[serde(default = "default_min_spoken_chars")]
    pub min_spoken_chars: usize,
    #[serde(default = "default_prefix_chars")]
    pub prefix_chars: usize,
    /// Both tokens must be at least this long to compare prefixes.
    #[serde(default = "default_prefix_min_token_chars")]
    pub prefix_min_token_chars: usize,
    /// Both tokens must be at least this long to compare by substring.
    #[serde(default = "default_substring_min_token_chars")]
    pub substring_min_token_chars: usize,
    /// A single matched word this long is enough on its own.
    #[serde(default = "default_important_word_chars")]
    pub important_word_chars: usize,
    #[serde(default = "default_min_matched_words")]
    pub min_matched_words: usize,
    #[serde(default = "default_stopwords")]
    pub stopwords: Vec<String>,
}

fn default_min_spoken_chars() -> usize {
    3
}

fn default_prefix_chars() -> usize {
    3
}

fn default_prefix_min_token_chars() -> usize {
    4
}

fn default_substring_min_token_chars() -> usize {
    5
}

fn default_important_word_chars() -> usize {
    4
}

fn default_min_matched_words() -> usize {
    2
}

fn default_stopwords() -> Vec<String> {
    DEFAULT_STOPWORDS.iter().map(|w| w.to_string()).collect()
}

impl Default for MatcherTuning {
    fn default() -> Self {
        Self {
            min_spoken_chars: default_min_spoken_chars(),
            prefix_chars: default_prefix_chars(),
            prefix_min_token_chars: default_prefix_min_token_chars(),
            substring_min_token_chars: default_substring_min_token_chars(),
            important_word_chars: default_important_word_chars(),
            min_matched_words: default_min_matched_words(),
            stopwords: default_stopwords(),
        }
    }
}

impl MatcherTuning {
    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.iter().any(|s| s == word)
    }

    /// Whitespace tokens with stopwords removed.
    pub fn content_words<'a>(&self, normalized: &'a str) -> Vec<&'a str> {
        normalized
            .split_whitespace()
            .filter(|w| !self.is_stopword(w))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Containment,
    FuzzySearch,
    WordOverlap,
    LeadWord,
}

/// One comparison request, already normalized.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub spoken: &'a str,
    pub target: &'a str,
    pub sensitivity: f64,
    pub target_index: usize,
}

pub trait MatchTier: Send {
    fn kind(&self) -> TierKind;

    fn matches(&self, input: &MatchInput<'_>, tuning: &MatcherTuning) -> bool;

    /// Called whenever the script or the sensitivity changes.
    fn rebuild(&mut self, _normalized_lines: &[String], _sensitivity: f64) {}
}

/// The four-tier cascade plus the per-script search index.
pub struct TranscriptMatcher {
    tiers: Vec<Box<dyn MatchTier>>,
    tuning: MatcherTuning,
    normalized_lines: Vec<String>,
    indexed_sensitivity: Option<f64>,
}

impl TranscriptMatcher {
    pub fn new(tuning: MatcherTuning) -> Self {
        Self::with_tiers(
            tuning,
            vec![
                Box::new(ContainmentTier),
                Box::new(FuzzySearchTier::default()),
                Box::new(WordOverlapTier),
                Box::new(LeadWordTier),
            ],
        )
    }

    pub fn with_tiers(tuning: MatcherTuning, tiers: Vec<Box<dyn MatchTier>>) -> Self {
        Self {
            tiers,
            tuning,
            normalized_lines: Vec::new(),
            indexed_sensitivity: None,
        }
    }

    pub fn tuning(&self) -> &MatcherTuning {
        &self.tuning
    }

    /// Indexes every line of the script. Must be called once per session.
    pub fn index_script(&mut self, script: &ScriptIndex, sensitivity: f64) {
        self.normalized_lines = script.lines().iter().map(|l| normalize(&l.text)).collect();
        self.rebuild(sensitivity);
    }

    /// Rebuilds the index when the sensitivity actually changed.
    pub fn set_sensitivity(&mut self, sensitivity: f64) {
        if self.indexed_sensitivity != Some(sensitivity) {
            self.rebuild(sensitivity);
        }
    }

    fn rebuild(&mut self, sensitivity: f64) {
        for tier in self.tiers.iter_mut() {
            tier.rebuild(&self.normalized_lines, sensitivity);
        }
        self.indexed_sensitivity = Some(sensitivity);
        debug!(
            "Matcher index rebuilt: {} lines, sensitivity {:.2}",
            self.normalized_lines.len(),
            sensitivity
        );
    }

    /// Returns the first tier that accepts `spoken` for `target`.
    pub fn evaluate(
        &self,
        spoken: &str,
        target: &str,
        sensitivity: f64,
        target_index: usize,
    ) -> Option<TierKind> {
        let spoken = normalize(spoken);
        let target = normalize(target);
        let input = MatchInput {
            spoken: &spoken,
            target: &target,
            sensitivity,
            target_index,
        };

        self.tiers
            .iter()
            .find(|tier| tier.matches(&input, &self.tuning))
            .map(|tier| tier.kind())
    }

    pub fn matches(&self, spoken: &str, target: &str, sensitivity: f64, target_index: usize) -> bool {
        self.evaluate(spoken, target, sensitivity, target_index)
            .is_some()
    }
}

impl Default for TranscriptMatcher {
    fn default() -> Self {
        Self::new(MatcherTuning::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{test_line, ScriptIndex};

    fn matcher_for(lines: &[&str], sensitivity: f64) -> TranscriptMatcher {
        let lines = lines
            .iter()
            .enumerate()
            .map(|(i, text)| test_line(&format!("l{i}"), "ANNA", text, None))
            .collect();
        let script = ScriptIndex::from_lines("t", Some("ANNA"), lines).unwrap();
        let mut matcher = TranscriptMatcher::default();
        matcher.index_script(&script, sensitivity);
        matcher
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Hello, World!  "), "hello world");
        assert_eq!(normalize("Don't stop."), "dont stop");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn containment_implies_match_for_every_sensitivity() {
        for sensitivity in [0.1, 0.2, 0.4, 0.6, 0.8] {
            let matcher = matcher_for(&["I love you dearly", "And I you"], sensitivity);
            assert_eq!(
                matcher.evaluate("i love you", "I love you dearly", sensitivity, 0),
                Some(TierKind::Containment)
            );
        }
    }

    #[test]
    fn short_spoken_text_needs_another_tier() {
        let matcher = matcher_for(&["Go away now", "Fine"], 0.4);
        // "go" is contained in the target but too short for containment.
        assert!(!ContainmentTier.matches(
            &MatchInput {
                spoken: "go",
                target: "go away now",
                sensitivity: 0.4,
                target_index: 0
            },
            matcher.tuning()
        ));
        // Other tiers still accept it independently.
        assert!(LeadWordTier.matches(
            &MatchInput {
                spoken: "go",
                target: "go away now",
                sensitivity: 0.4,
                target_index: 0
            },
            matcher.tuning()
        ));
        assert!(matcher.matches("go", "Go away now", 0.4, 0));
        assert!(!matcher.matches("", "Go away now", 0.4, 0));
    }

    #[test]
    fn permissive_cascade_still_has_a_floor() {
        let matcher = matcher_for(&["I love you dearly", "And I you"], 0.4);
        let tuning = MatcherTuning::default();
        let input = MatchInput {
            spoken: "uh i think i",
            target: "i love you dearly",
            sensitivity: 0.4,
            target_index: 0,
        };
        assert!(!WordOverlapTier.matches(&input, &tuning));
        assert!(!matcher.matches("uh i think i", "I love you dearly", 0.4, 0));
    }

    #[test]
    fn noisy_transcription_matches_through_word_overlap() {
        let matcher = matcher_for(&["Tomorrow we sail for Portugal", "Then go"], 0.1);
        assert_eq!(
            matcher.evaluate("tomorow we sailing to portugal", "Tomorrow we sail for Portugal", 0.1, 0),
            Some(TierKind::WordOverlap)
        );
    }

    #[test]
    fn fuzzy_tier_requires_the_awaited_line() {
        let lines = ["whither goest thou stranger", "the night is dark and full of wonder"];
        let matcher = matcher_for(&lines, 0.5);
        let fuzzy = {
            let mut tier = FuzzySearchTier::default();
            tier.rebuild(&lines.iter().map(|l| normalize(l)).collect::<Vec<_>>(), 0.5);
            tier
        };
        let tuning = matcher.tuning().clone();
        let input = |target_index| MatchInput {
            spoken: "whither goes thou strange",
            target: lines[target_index],
            sensitivity: 0.5,
            target_index,
        };
        assert!(fuzzy.matches(&input(0), &tuning));
        assert!(!fuzzy.matches(&input(1), &tuning));
    }

    #[test]
    fn empty_target_never_matches() {
        let matcher = matcher_for(&["", "Next"], 0.8);
        assert!(!matcher.matches("whatever i say here", "", 0.8, 0));
    }

    #[test]
    fn tuning_is_configurable() {
        let mut tuning = MatcherTuning::default();
        tuning.min_matched_words = 1;
        let input = MatchInput {
            spoken: "she ran",
            target: "he ran home",
            sensitivity: 0.1,
            target_index: 0,
        };
        assert!(WordOverlapTier.matches(&input, &tuning));
        assert!(!WordOverlapTier.matches(&input, &MatcherTuning::default()));
    }
}
