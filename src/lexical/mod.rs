//! In-memory lexical search: tokenizer, inverted index and BM25 scoring
//!
//! The [`LexicalIndex`] owns every indexed document and serializes mutations
//! behind a readers-writer lock, so many searches may run in parallel while
//! add/update/delete/rebuild calls are exclusive.

mod engine;
mod index;
mod tokenizer;

pub use engine::LexicalIndex;
pub use index::{bm25_term_score, raw_idf, InvertedIndex};
pub use tokenizer::{
    stem, term_frequencies, TokenAnalysis, TokenPosition, Tokenizer, TokenizerConfig,
};

use crate::error::{CragError, Result};
use crate::retrieval::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Longest accepted query, in characters
pub const MAX_QUERY_LENGTH: usize = 1000;

/// A document as supplied by callers, before tokenization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A document owned by the lexical index
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub id: String,
    pub content: String,
    pub terms: Vec<String>,
    pub term_frequencies: ahash::HashMap<String, usize>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// BM25 tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Parameters {
    /// Term-frequency saturation
    pub k1: f64,
    /// Length normalization strength, in [0, 1]
    pub b: f64,
    /// Lowest IDF a matching term may contribute with. Terms present in more
    /// than half the corpus have a negative raw IDF; they are scored with this
    /// floor instead, so a match never lowers a document's score.
    pub idf_floor: f64,
}

impl Default for Bm25Parameters {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            idf_floor: 0.01,
        }
    }
}

impl Bm25Parameters {
    pub fn validate(&self) -> Result<()> {
        if !(self.k1 > 0.0 && self.k1.is_finite()) {
            return Err(CragError::InvalidArgument(format!(
                "k1 must be positive, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(CragError::InvalidArgument(format!(
                "b must be within [0, 1], got {}",
                self.b
            )));
        }
        if !(self.idf_floor >= 0.0 && self.idf_floor.is_finite()) {
            return Err(CragError::InvalidArgument(format!(
                "idf_floor must be non-negative, got {}",
                self.idf_floor
            )));
        }
        Ok(())
    }
}

/// Per-call search options
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Maximum results; 0 means unlimited
    pub top_k: usize,
    pub min_score: f64,
    pub highlight: bool,
    /// Per-term multiplicative boosts, keyed by normalized term
    pub boosts: HashMap<String, f64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.0,
            highlight: false,
            boosts: HashMap::new(),
        }
    }
}

impl SearchOptions {
    pub fn with_top_k(top_k: usize) -> Self {
        Self {
            top_k,
            ..Default::default()
        }
    }
}

/// Contribution of one query term to a document score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermScore {
    pub term: String,
    pub tf: usize,
    pub df: usize,
    pub idf: f64,
    /// `tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))`
    pub normalization: f64,
    pub boost: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreExplanation {
    pub document_id: String,
    pub query: String,
    pub document_length: usize,
    pub average_document_length: f64,
    pub total_documents: usize,
    pub terms: Vec<TermScore>,
    pub total_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub unique_terms: usize,
    pub average_document_length: f64,
    /// Rough in-memory footprint of the postings
    pub index_size_bytes: usize,
    pub last_updated: DateTime<Utc>,
    /// Searches served since the index was created
    pub search_count: u64,
    pub total_search_time: Duration,
    pub average_search_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermStatistics {
    pub term: String,
    pub document_count: usize,
    pub total_frequency: usize,
    pub idf: f64,
}

/// Reject blank or oversized query text
pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(CragError::InvalidArgument(
            "Query text cannot be empty".to_string(),
        ));
    }

    let len = query.chars().count();
    if len > MAX_QUERY_LENGTH {
        return Err(CragError::InvalidArgument(format!(
            "Query too long: {} characters (max {})",
            len, MAX_QUERY_LENGTH
        )));
    }

    Ok(())
}
