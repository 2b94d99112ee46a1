use super::fuzzy_index::FuzzyIndex;
use super::{MatchInput, MatchTier, MatcherTuning, TierKind};

fn prefix(word: &str, chars: usize) -> &str {
    match word.char_indices().nth(chars) {
        Some((end, _)) => &word[..end],
        None => word,
    }
}

/// One string fully contains the other.
pub struct ContainmentTier;

impl MatchTier for ContainmentTier {
    fn kind(&self) -> TierKind {
        TierKind::Containment
    }

    fn matches(&self, input: &MatchInput<'_>, tuning: &MatcherTuning) -> bool {
        if input.spoken.is_empty() || input.target.is_empty() {
            return false;
        }
        let contained =
            input.target.contains(input.spoken) || input.spoken.contains(input.target);
        contained && input.spoken.chars().count() > tuning.min_spoken_chars
    }
}

/// Nearest line in the whole script must be the awaited one.
#[derive(Default)]
pub struct FuzzySearchTier {
    index: FuzzyIndex,
}

impl MatchTier for FuzzySearchTier {
    fn kind(&self) -> TierKind {
        TierKind::FuzzySearch
    }

    fn matches(&self, input: &MatchInput<'_>, _tuning: &MatcherTuning) -> bool {
        match self.index.best(input.spoken) {
            Some(hit) => hit.index == input.target_index && hit.score < input.sensitivity,
            None => false,
        }
    }

    fn rebuild(&mut self, normalized_lines: &[String], sensitivity: f64) {
        self.index = FuzzyIndex::build(normalized_lines.iter().cloned(), sensitivity);
    }
}

/// Enough content words of the target were heard.
pub struct WordOverlapTier;

impl WordOverlapTier {
    fn is_counterpart(spoken: &str, target: &str, tuning: &MatcherTuning) -> bool {
        if spoken == target {
            return true;
        }

        let spoken_len = spoken.chars().count();
        let target_len = target.chars().count();

        if spoken_len >= tuning.prefix_min_token_chars
            && target_len >= tuning.prefix_min_token_chars
            && prefix(spoken, tuning.prefix_chars) == prefix(target, tuning.prefix_chars)
        {
            return true;
        }

        spoken_len >= tuning.substring_min_token_chars
            && target_len >= tuning.substring_min_token_chars
            && (spoken.contains(target) || target.contains(spoken))
    }
}

impl MatchTier for WordOverlapTier {
    fn kind(&self) -> TierKind {
        TierKind::WordOverlap
    }

    fn matches(&self, input: &MatchInput<'_>, tuning: &MatcherTuning) -> bool {
        let spoken_words = tuning.content_words(input.spoken);
        if spoken_words.is_empty() {
            return false;
        }

        let matched: Vec<&str> = tuning
            .content_words(input.target)
            .into_iter()
            .filter(|target| {
                spoken_words
                    .iter()
                    .any(|spoken| Self::is_counterpart(spoken, target, tuning))
            })
            .collect();

        let has_important = matched
            .iter()
            .any(|w| w.chars().count() >= tuning.important_word_chars);

        has_important || matched.len() >= tuning.min_matched_words
    }
}

/// The performer started the line with the right word.
pub struct LeadWordTier;

impl MatchTier for LeadWordTier {
    fn kind(&self) -> TierKind {
        TierKind::LeadWord
    }

    fn matches(&self, input: &MatchInput<'_>, tuning: &MatcherTuning) -> bool {
        let spoken = tuning.content_words(input.spoken);
        let target = tuning.content_words(input.target);

        match (spoken.first(), target.first()) {
            (Some(spoken), Some(target)) => {
                spoken == target
                    || prefix(spoken, tuning.prefix_chars) == prefix(target, tuning.prefix_chars)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(spoken: &'a str, target: &'a str) -> MatchInput<'a> {
        MatchInput {
            spoken,
            target,
            sensitivity: 0.4,
            target_index: 0,
        }
    }

    #[test]
    fn prefix_respects_char_boundaries() {
        assert_eq!(prefix("héllo", 3), "hél");
        assert_eq!(prefix("hi", 3), "hi");
    }

    #[test]
    fn containment_in_either_direction() {
        let tuning = MatcherTuning::default();
        assert!(ContainmentTier.matches(&input("love you", "i love you dearly"), &tuning));
        assert!(ContainmentTier.matches(&input("well i love you dearly", "i love you"), &tuning));
        assert!(!ContainmentTier.matches(&input("you", "i love you"), &tuning));
    }

    #[test]
    fn counterpart_rules() {
        let tuning = MatcherTuning::default();
        assert!(WordOverlapTier::is_counterpart("you", "you", &tuning));
        // shared prefix needs both tokens at four characters or more
        assert!(WordOverlapTier::is_counterpart("strangers", "strange", &tuning));
        assert!(!WordOverlapTier::is_counterpart("str", "strange", &tuning));
        // substring needs both tokens at five characters or more
        assert!(WordOverlapTier::is_counterpart("unkindness", "kindness", &tuning));
        assert!(!WordOverlapTier::is_counterpart("kind", "unkind", &tuning));
    }

    #[test]
    fn word_overlap_counts_target_words() {
        let tuning = MatcherTuning::default();
        // two short words are enough
        assert!(WordOverlapTier.matches(&input("go now", "go now or never"), &tuning));
        // one short word is not
        assert!(!WordOverlapTier.matches(&input("go", "go now or never"), &tuning));
        // one important word is
        assert!(WordOverlapTier.matches(&input("never", "go now or never"), &tuning));
        // stopwords never count
        assert!(!WordOverlapTier.matches(&input("and the", "and the"), &tuning));
    }

    #[test]
    fn lead_word_skips_stopwords() {
        let tuning = MatcherTuning::default();
        assert!(LeadWordTier.matches(&input("the wind", "wind blows"), &tuning));
        assert!(LeadWordTier.matches(&input("windy", "wind blows"), &tuning));
        assert!(!LeadWordTier.matches(&input("blows wind", "wind blows"), &tuning));
        assert!(!LeadWordTier.matches(&input("the", "wind blows"), &tuning));
    }
}
