//! Word-level similarity used for diversity and near-duplicate detection

use ahash::{HashSet, HashSetExt};

const TRIM_CHARS: &[char] = &[
    '.', ',', '!', '?', ';', ':', '"', '\'', '(', ')', '[', ']', '{', '}', '/', '-',
];

/// Content similarity above this marks two documents as near-duplicates
pub const DUPLICATE_SIMILARITY: f64 = 0.8;

/// Lower-cased words longer than two characters, punctuation trimmed
pub fn word_set(text: &str) -> HashSet<String> {
    let mut words = HashSet::new();
    for word in text.split_whitespace() {
        let word = word.trim_matches(TRIM_CHARS).to_lowercase();
        if word.chars().count() > 2 {
            words.insert(word);
        }
    }
    words
}

/// Jaccard similarity of two word sets
///
/// Two empty sets are identical (1.0); one empty set shares nothing (0.0).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Jaccard similarity of the word sets of two texts
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&word_set(a), &word_set(b))
}
