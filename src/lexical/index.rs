//! Inverted index bookkeeping and the BM25 scoring formula

use super::Bm25Parameters;
use ahash::{HashMap, HashMapExt};

/// Bytes charged per posting entry in the size estimate
const POSTING_OVERHEAD_BYTES: usize = 20;

/// Term → document postings plus corpus length statistics
///
/// Invariants, checked by [`is_consistent`](Self::is_consistent):
/// every term maps to at least one document, `term_document_count[t]`
/// equals the posting list size, and the average length is the mean of
/// `document_lengths`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvertedIndex {
    postings: HashMap<String, HashMap<String, usize>>,
    document_lengths: HashMap<String, usize>,
    term_document_count: HashMap<String, usize>,
    total_documents: usize,
    average_document_length: f64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document's contribution. The caller removes any earlier
    /// contribution under the same id first.
    pub fn insert(&mut self, id: &str, frequencies: &HashMap<String, usize>, length: usize) {
        for (term, &count) in frequencies {
            let docs = self.postings.entry(term.clone()).or_insert_with(HashMap::new);
            if docs.insert(id.to_string(), count).is_none() {
                *self.term_document_count.entry(term.clone()).or_insert(0) += 1;
            }
        }

        if self.document_lengths.insert(id.to_string(), length).is_none() {
            self.total_documents += 1;
        }

        self.recompute_average();
    }

    /// Remove a document's contribution, dropping terms left without documents
    pub fn remove<'a>(&mut self, id: &str, terms: impl IntoIterator<Item = &'a String>) {
        for term in terms {
            let Some(docs) = self.postings.get_mut(term) else {
                continue;
            };

            if docs.remove(id).is_some() {
                if docs.is_empty() {
                    self.postings.remove(term);
                    self.term_document_count.remove(term);
                } else if let Some(count) = self.term_document_count.get_mut(term) {
                    *count -= 1;
                }
            }
        }

        if self.document_lengths.remove(id).is_some() {
            self.total_documents -= 1;
        }

        self.recompute_average();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn recompute_average(&mut self) {
        self.average_document_length = if self.total_documents == 0 {
            0.0
        } else {
            let total: usize = self.document_lengths.values().sum();
            total as f64 / self.total_documents as f64
        };
    }

    pub fn postings(&self, term: &str) -> Option<&HashMap<String, usize>> {
        self.postings.get(term)
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.term_document_count.get(term).copied().unwrap_or(0)
    }

    pub fn term_frequency(&self, term: &str, id: &str) -> usize {
        self.postings
            .get(term)
            .and_then(|docs| docs.get(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn document_length(&self, id: &str) -> Option<usize> {
        self.document_lengths.get(id).copied()
    }

    pub fn total_documents(&self) -> usize {
        self.total_documents
    }

    pub fn average_document_length(&self) -> f64 {
        self.average_document_length
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn terms(&self) -> impl Iterator<Item = &String> {
        self.postings.keys()
    }

    /// IDF used for scoring, clamped below at `params.idf_floor`
    pub fn idf(&self, term: &str, params: &Bm25Parameters) -> f64 {
        raw_idf(self.total_documents, self.document_frequency(term)).max(params.idf_floor)
    }

    pub fn estimated_size_bytes(&self) -> usize {
        self.postings
            .iter()
            .map(|(term, docs)| term.len() + POSTING_OVERHEAD_BYTES * docs.len())
            .sum()
    }

    pub fn is_consistent(&self) -> bool {
        let counts_match = self.postings.len() == self.term_document_count.len()
            && self.postings.iter().all(|(term, docs)| {
                !docs.is_empty() && self.term_document_count.get(term) == Some(&docs.len())
            });

        let total: usize = self.document_lengths.values().sum();
        let expected_avg = if self.total_documents == 0 {
            0.0
        } else {
            total as f64 / self.total_documents as f64
        };

        counts_match
            && self.total_documents == self.document_lengths.len()
            && (self.average_document_length - expected_avg).abs() < 1e-12
    }
}

/// `ln((N - df + 0.5) / (df + 0.5))`
pub fn raw_idf(total_documents: usize, document_frequency: usize) -> f64 {
    let n = total_documents as f64;
    let df = document_frequency as f64;
    ((n - df + 0.5) / (df + 0.5)).ln()
}

/// Score one term in one document
///
/// Returns `(normalization, score)` where
/// `normalization = tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))`
/// and `score = idf * normalization * boost`.
pub fn bm25_term_score(
    tf: usize,
    document_length: usize,
    average_document_length: f64,
    idf: f64,
    boost: f64,
    params: &Bm25Parameters,
) -> (f64, f64) {
    let tf = tf as f64;
    let length_ratio = if average_document_length > 0.0 {
        document_length as f64 / average_document_length
    } else {
        1.0
    };

    let numerator = tf * (params.k1 + 1.0);
    let denominator = tf + params.k1 * (1.0 - params.b + params.b * length_ratio);
    let normalization = if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    };

    (normalization, idf * normalization * boost)
}
