//! Term extraction shared by the indexing and query paths of the lexical index

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "will", "with", "this", "but", "they", "have",
    "had", "what", "said", "each", "which", "she", "do", "how", "their", "if", "up", "out", "many",
    "then", "them", "these", "so", "some", "her", "would", "make", "like", "into", "him", "time",
    "two", "more", "go", "no", "way", "could", "my", "than", "first", "been", "call", "who", "oil",
    "sit", "now", "find", "down", "day", "did", "get", "come", "made", "may", "part",
];

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\b\w+\b").expect("static word pattern is valid"))
}

/// Tokenizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Stop-word list to load (only "english" ships built in)
    pub language: String,
    pub remove_stop_words: bool,
    /// Inclusive bounds on term length, counted in characters
    pub min_term_length: usize,
    pub max_term_length: usize,
    pub enable_stemming: bool,
    pub custom_stop_words: Vec<String>,
    pub case_sensitive: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            remove_stop_words: true,
            min_term_length: 2,
            max_term_length: 50,
            enable_stemming: false,
            custom_stop_words: Vec::new(),
            case_sensitive: false,
        }
    }
}

/// A surviving token with its location in the source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub term: String,
    /// Byte offset of the token start in the original text
    pub start: usize,
    /// Byte offset one past the token end in the original text
    pub end: usize,
    /// 0-based index among surviving tokens
    pub position: usize,
}

/// Detailed breakdown of how a text tokenizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAnalysis {
    pub original_text: String,
    pub token_count: usize,
    pub unique_tokens: usize,
    pub tokens: Vec<String>,
    pub positions: Vec<TokenPosition>,
    pub term_frequencies: std::collections::BTreeMap<String, usize>,
}

/// Deterministic text → terms pipeline
///
/// case-fold → `\b\w+\b` split → length filter → stop words → optional stemming
#[derive(Debug, Clone)]
pub struct Tokenizer {
    config: TokenizerConfig,
    stop_words: HashSet<String>,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        let mut stop_words = HashSet::new();

        if config.remove_stop_words {
            if config.language.eq_ignore_ascii_case("english") {
                stop_words.extend(ENGLISH_STOP_WORDS.iter().map(|w| w.to_string()));
            } else {
                tracing::debug!(
                    "No built-in stop words for language '{}', using custom list only",
                    config.language
                );
            }

            for word in &config.custom_stop_words {
                if config.case_sensitive {
                    stop_words.insert(word.clone());
                } else {
                    stop_words.insert(word.to_lowercase());
                }
            }
        }

        Self { config, stop_words }
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    /// Split text into normalized terms
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokenize_with_positions(text)
            .into_iter()
            .map(|t| t.term)
            .collect()
    }

    /// Same pipeline as [`tokenize`](Self::tokenize), keeping offsets for snippet generation
    pub fn tokenize_with_positions(&self, text: &str) -> Vec<TokenPosition> {
        let mut tokens = Vec::new();

        for m in word_regex().find_iter(text) {
            let Some(term) = self.normalize_token(m.as_str()) else {
                continue;
            };

            tokens.push(TokenPosition {
                term,
                start: m.start(),
                end: m.end(),
                position: tokens.len(),
            });
        }

        tokens
    }

    fn normalize_token(&self, raw: &str) -> Option<String> {
        let word = if self.config.case_sensitive {
            raw.to_string()
        } else {
            raw.to_lowercase()
        };

        let len = word.chars().count();
        if len < self.config.min_term_length || len > self.config.max_term_length {
            return None;
        }

        if self.config.remove_stop_words && self.stop_words.contains(&word) {
            return None;
        }

        if self.config.enable_stemming {
            Some(stem(&word))
        } else {
            Some(word)
        }
    }

    /// Normalize a raw query for display and caching: case-fold, collapse
    /// whitespace, strip punctuation around each word, apply length filter
    pub fn normalize_query(&self, query: &str) -> String {
        let query = if self.config.case_sensitive {
            query.trim().to_string()
        } else {
            query.trim().to_lowercase()
        };

        query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| {
                let len = w.chars().count();
                !w.is_empty()
                    && len >= self.config.min_term_length
                    && len <= self.config.max_term_length
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn analyze(&self, text: &str) -> TokenAnalysis {
        let positions = self.tokenize_with_positions(text);
        let tokens: Vec<String> = positions.iter().map(|p| p.term.clone()).collect();

        let mut term_frequencies = std::collections::BTreeMap::new();
        for token in &tokens {
            *term_frequencies.entry(token.clone()).or_insert(0) += 1;
        }

        TokenAnalysis {
            original_text: text.to_string(),
            token_count: tokens.len(),
            unique_tokens: term_frequencies.len(),
            tokens,
            positions,
            term_frequencies,
        }
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

/// Count occurrences of each term
pub fn term_frequencies(tokens: &[String]) -> HashMap<String, usize> {
    let mut freqs = HashMap::with_capacity(tokens.len());
    for token in tokens {
        *freqs.entry(token.clone()).or_insert(0) += 1;
    }
    freqs
}

/// Light suffix-stripping stemmer (plural, -ed, -ing, -ly)
pub fn stem(word: &str) -> String {
    if word.len() <= 2 {
        return word.to_string();
    }

    let mut w = word.to_string();

    if w.ends_with("sses") || w.ends_with("ies") {
        w.truncate(w.len() - 2);
    } else if w.ends_with("ss") {
        // unchanged
    } else if w.ends_with('s') {
        w.truncate(w.len() - 1);
    }

    if w.ends_with("ed") {
        if w.len() > 4 {
            w.truncate(w.len() - 2);
        }
    } else if w.ends_with("ing") && w.len() > 5 {
        w.truncate(w.len() - 3);
    }

    if w.ends_with("ly") && w.len() > 4 {
        w.truncate(w.len() - 2);
    }

    w
}
