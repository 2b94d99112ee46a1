//! Approximate search over every line of the script.
//!
//! Scores are dissimilarities in `[0, 1]`: 0 is an exact hit, 1 is unrelated.

use strsim::normalized_levenshtein;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub index: usize,
    pub score: f64,
}

/// Searchable snapshot of normalized line texts with a score ceiling.
#[derive(Debug, Clone, Default)]
pub struct FuzzyIndex {
    entries: Vec<String>,
    threshold: f64,
}

impl FuzzyIndex {
    pub fn build<I>(texts: I, threshold: f64) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            entries: texts.into_iter().collect(),
            threshold,
        }
    }

    /// All entries scoring within the threshold, best first. Equal scores keep
    /// script order.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        if query.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, text)| SearchHit {
                index,
                score: dissimilarity(query, text),
            })
            .filter(|hit| hit.score <= self.threshold)
            .collect();

        hits.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.index.cmp(&b.index)));
        hits
    }

    pub fn best(&self, query: &str) -> Option<SearchHit> {
        self.search(query).into_iter().next()
    }
}

/// Smaller of the windowed distance (query against its best-matching stretch
/// of `text`) and the whole-string normalized Levenshtein distance.
pub fn dissimilarity(query: &str, text: &str) -> f64 {
    let query_len = query.chars().count();
    if query_len == 0 {
        return 1.0;
    }

    let windowed = substring_distance(query, text) as f64 / query_len as f64;
    let whole = 1.0 - normalized_levenshtein(query, text);
    windowed.min(whole).clamp(0.0, 1.0)
}

/// Edit distance of `pattern` against the closest substring of `text`
/// (free leading and trailing text).
fn substring_distance(pattern: &str, text: &str) -> usize {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    if text.is_empty() {
        return pattern.len();
    }

    // prev[j]: cost of matching pattern[..i] ending at text[..j]
    let mut prev = vec![0usize; text.len() + 1];
    let mut curr = vec![0usize; text.len() + 1];

    for (i, p) in pattern.iter().enumerate() {
        curr[0] = i + 1;
        for (j, t) in text.iter().enumerate() {
            let substitution = prev[j] + usize::from(p != t);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev.iter().copied().min().unwrap_or(pattern.len())
}
