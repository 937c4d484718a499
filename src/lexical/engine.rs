//! Thread-safe BM25 search over the inverted index

use super::index::{bm25_term_score, InvertedIndex};
use super::tokenizer::{term_frequencies, Tokenizer, TokenizerConfig};
use super::{
    Bm25Parameters, IndexStats, IndexedDocument, ScoreExplanation, SearchOptions, SourceDocument,
    TermScore, TermStatistics,
};
use crate::error::{CragError, Result};
use crate::retrieval::{metadata_title, metadata_url, RankedResult, RankedSearcher, SourceKind};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Characters of context kept on each side of a highlighted term
const HIGHLIGHT_WINDOW: usize = 50;

struct IndexState {
    documents: HashMap<String, IndexedDocument>,
    inverted: InvertedIndex,
    params: Bm25Parameters,
    last_updated: DateTime<Utc>,
}

impl IndexState {
    fn remove(&mut self, id: &str) -> Option<IndexedDocument> {
        let old = self.documents.remove(id)?;
        self.inverted.remove(id, old.term_frequencies.keys());
        Some(old)
    }

    fn insert(&mut self, doc: IndexedDocument) {
        self.remove(&doc.id);
        self.inverted
            .insert(&doc.id, &doc.term_frequencies, doc.terms.len());
        self.documents.insert(doc.id.clone(), doc);
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// In-memory BM25 index
///
/// Mutations take the write lock; searches hold the read lock for the
/// whole scoring pass so they see one consistent snapshot.
pub struct LexicalIndex {
    tokenizer: Tokenizer,
    state: RwLock<IndexState>,
    search_count: AtomicU64,
    search_nanos: AtomicU64,
}

impl LexicalIndex {
    pub fn new(tokenizer: TokenizerConfig, params: Bm25Parameters) -> Result<Self> {
        params.validate()?;

        Ok(Self {
            tokenizer: Tokenizer::new(tokenizer),
            state: RwLock::new(IndexState {
                documents: HashMap::new(),
                inverted: InvertedIndex::new(),
                params,
                last_updated: Utc::now(),
            }),
            search_count: AtomicU64::new(0),
            search_nanos: AtomicU64::new(0),
        })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    // Every mutation leaves the state consistent before releasing the guard,
    // so a poisoned lock still holds a usable index.
    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn prepare(&self, doc: SourceDocument) -> Result<IndexedDocument> {
        if doc.id.trim().is_empty() {
            return Err(CragError::InvalidArgument(
                "Document id cannot be empty".to_string(),
            ));
        }

        let terms = self.tokenizer.tokenize(&doc.content);
        let term_frequencies = term_frequencies(&terms);

        Ok(IndexedDocument {
            id: doc.id,
            content: doc.content,
            terms,
            term_frequencies,
            metadata: doc.metadata,
            created_at: Utc::now(),
        })
    }

    /// Index a document, replacing any existing document with the same id
    pub fn add_document(&self, doc: SourceDocument) -> Result<()> {
        let indexed = self.prepare(doc)?;

        let mut state = self.write();
        tracing::debug!(
            "Indexing document {} ({} terms)",
            indexed.id,
            indexed.terms.len()
        );
        state.insert(indexed);
        state.touch();

        Ok(())
    }

    /// Index a batch under a single write lock. Nothing is indexed if any
    /// document is invalid.
    pub fn add_documents(&self, docs: Vec<SourceDocument>) -> Result<()> {
        let prepared = docs
            .into_iter()
            .map(|doc| self.prepare(doc))
            .collect::<Result<Vec<_>>>()?;

        let count = prepared.len();
        let mut state = self.write();
        for doc in prepared {
            state.insert(doc);
        }
        state.touch();

        tracing::info!(
            "Indexed {} documents ({} total)",
            count,
            state.documents.len()
        );
        Ok(())
    }

    pub fn update_document(&self, doc: SourceDocument) -> Result<()> {
        self.add_document(doc)
    }

    pub fn delete_document(&self, id: &str) -> Result<()> {
        let mut state = self.write();
        if state.remove(id).is_none() {
            return Err(CragError::not_found(id));
        }
        state.touch();

        tracing::debug!("Deleted document {}", id);
        Ok(())
    }

    /// Delete several documents, stopping at the first unknown id
    pub fn delete_documents(&self, ids: &[String]) -> Result<usize> {
        let mut state = self.write();
        let mut deleted = 0;

        for id in ids {
            if state.remove(id).is_none() {
                state.touch();
                return Err(CragError::not_found(id.as_str()));
            }
            deleted += 1;
        }
        state.touch();

        Ok(deleted)
    }

    pub fn get_document(&self, id: &str) -> Option<IndexedDocument> {
        self.read().documents.get(id).cloned()
    }

    /// All document ids, sorted
    pub fn list_documents(&self) -> Vec<String> {
        let state = self.read();
        let mut ids: Vec<String> = state.documents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn document_count(&self) -> usize {
        self.read().documents.len()
    }

    pub fn term_count(&self) -> usize {
        self.read().inverted.term_count()
    }

    pub fn is_empty(&self) -> bool {
        self.document_count() == 0
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.documents.clear();
        state.inverted.clear();
        state.touch();

        tracing::info!("Cleared lexical index");
    }

    /// Rebuild the inverted index from the stored documents
    pub fn build_index(&self) {
        let mut state = self.write();
        let state = &mut *state;

        state.inverted.clear();
        for doc in state.documents.values_mut() {
            doc.terms = self.tokenizer.tokenize(&doc.content);
            doc.term_frequencies = term_frequencies(&doc.terms);
            state
                .inverted
                .insert(&doc.id, &doc.term_frequencies, doc.terms.len());
        }
        state.touch();

        tracing::info!(
            "Rebuilt lexical index: {} documents, {} terms",
            state.inverted.total_documents(),
            state.inverted.term_count()
        );
    }

    pub fn parameters(&self) -> Bm25Parameters {
        self.read().params
    }

    pub fn set_parameters(&self, params: Bm25Parameters) -> Result<()> {
        params.validate()?;
        let mut state = self.write();
        state.params = params;
        state.touch();
        Ok(())
    }

    /// Unique query terms in first-seen order
    fn query_terms(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tokenizer
            .tokenize(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    /// Rank every document containing at least one query term
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<RankedResult> {
        let started = Instant::now();
        let results = self.rank(query, options);

        let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.search_count.fetch_add(1, Ordering::Relaxed);
        self.search_nanos.fetch_add(nanos, Ordering::Relaxed);
        results
    }

    fn rank(&self, query: &str, options: &SearchOptions) -> Vec<RankedResult> {
        let terms = self.query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let state = self.read();
        let inverted = &state.inverted;
        let avg_len = inverted.average_document_length();

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in &terms {
            let Some(postings) = inverted.postings(term) else {
                continue;
            };

            let idf = inverted.idf(term, &state.params);
            let boost = options.boosts.get(term).copied().unwrap_or(1.0);

            for (id, &tf) in postings {
                let doc_len = inverted.document_length(id).unwrap_or(0);
                let (_, score) = bm25_term_score(tf, doc_len, avg_len, idf, boost, &state.params);
                *scores.entry(id.as_str()).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(&str, f64)> = scores
            .into_iter()
            .filter(|(_, score)| *score >= options.min_score)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        if options.top_k > 0 {
            ranked.truncate(options.top_k);
        }

        let highlighters = if options.highlight {
            highlight_patterns(&terms)
        } else {
            Vec::new()
        };

        let results: Vec<RankedResult> = ranked
            .into_iter()
            .enumerate()
            .filter_map(|(i, (id, score))| {
                let doc = state.documents.get(id)?;
                let mut result = RankedResult::new(id, doc.content.clone(), score, SourceKind::Lexical)
                    .with_title(metadata_title(&doc.metadata))
                    .with_url(metadata_url(&doc.metadata))
                    .with_metadata(doc.metadata.clone())
                    .with_rank(i + 1);
                result.highlights = highlight(&doc.content, &highlighters);
                Some(result)
            })
            .collect();

        tracing::debug!(
            "Lexical search '{}' matched {} documents",
            query,
            results.len()
        );
        results
    }

    pub fn multi_search(
        &self,
        queries: &[String],
        options: &SearchOptions,
    ) -> BTreeMap<String, Vec<RankedResult>> {
        queries
            .iter()
            .map(|q| (q.clone(), self.search(q, options)))
            .collect()
    }

    /// Per-term BM25 breakdown for one document
    pub fn explain_score(&self, query: &str, id: &str) -> Result<ScoreExplanation> {
        let terms = self.query_terms(query);
        let state = self.read();

        if !state.documents.contains_key(id) {
            return Err(CragError::not_found(id));
        }

        let inverted = &state.inverted;
        let doc_len = inverted.document_length(id).unwrap_or(0);
        let avg_len = inverted.average_document_length();

        let mut breakdown = Vec::with_capacity(terms.len());
        for term in terms {
            let tf = inverted.term_frequency(&term, id);
            if tf == 0 {
                continue;
            }

            let df = inverted.document_frequency(&term);
            let idf = inverted.idf(&term, &state.params);
            let (normalization, score) =
                bm25_term_score(tf, doc_len, avg_len, idf, 1.0, &state.params);

            breakdown.push(TermScore {
                term,
                tf,
                df,
                idf,
                normalization,
                boost: 1.0,
                score,
            });
        }

        Ok(ScoreExplanation {
            document_id: id.to_string(),
            query: query.to_string(),
            document_length: doc_len,
            average_document_length: avg_len,
            total_documents: inverted.total_documents(),
            total_score: breakdown.iter().map(|t| t.score).sum(),
            terms: breakdown,
        })
    }

    pub fn stats(&self) -> IndexStats {
        let search_count = self.search_count.load(Ordering::Relaxed);
        let search_nanos = self.search_nanos.load(Ordering::Relaxed);
        let average_search_time = match search_count {
            0 => Duration::ZERO,
            n => Duration::from_nanos(search_nanos / n),
        };

        let state = self.read();
        IndexStats {
            document_count: state.documents.len(),
            unique_terms: state.inverted.term_count(),
            average_document_length: state.inverted.average_document_length(),
            index_size_bytes: state.inverted.estimated_size_bytes(),
            last_updated: state.last_updated,
            search_count,
            total_search_time: Duration::from_nanos(search_nanos),
            average_search_time,
        }
    }

    /// Indexed terms starting with `prefix`, most widespread first
    pub fn suggest_terms(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = if self.tokenizer.config().case_sensitive {
            prefix.to_string()
        } else {
            prefix.to_lowercase()
        };

        let state = self.read();
        let mut matches: Vec<(&String, usize)> = state
            .inverted
            .terms()
            .filter(|t| t.starts_with(&prefix))
            .map(|t| (t, state.inverted.document_frequency(t)))
            .collect();

        matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        matches
            .into_iter()
            .take(limit)
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn term_statistics(&self, terms: &[String]) -> Vec<TermStatistics> {
        let state = self.read();
        terms
            .iter()
            .map(|term| {
                let total_frequency = state
                    .inverted
                    .postings(term)
                    .map(|docs| docs.values().sum())
                    .unwrap_or(0);

                TermStatistics {
                    term: term.clone(),
                    document_count: state.inverted.document_frequency(term),
                    total_frequency,
                    idf: state.inverted.idf(term, &state.params),
                }
            })
            .collect()
    }

    /// Snapshot of the inverted index, for consistency checks
    pub fn inverted_index(&self) -> InvertedIndex {
        self.read().inverted.clone()
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self {
            tokenizer: Tokenizer::default(),
            state: RwLock::new(IndexState {
                documents: HashMap::new(),
                inverted: InvertedIndex::new(),
                params: Bm25Parameters::default(),
                last_updated: Utc::now(),
            }),
            search_count: AtomicU64::new(0),
            search_nanos: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl RankedSearcher for LexicalIndex {
    fn name(&self) -> &str {
        "lexical_search"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RankedResult>> {
        Ok(LexicalIndex::search(
            self,
            query,
            &SearchOptions::with_top_k(top_k),
        ))
    }
}

fn highlight_patterns(terms: &[String]) -> Vec<Regex> {
    terms
        .iter()
        .filter_map(|t| Regex::new(&format!("(?i){}", regex::escape(t))).ok())
        .collect()
}

/// One marked snippet per term found in `content`, around its first occurrence
fn highlight(content: &str, patterns: &[Regex]) -> Vec<String> {
    patterns
        .iter()
        .filter_map(|re| {
            let m = re.find(content)?;

            let start = content[..m.start()]
                .char_indices()
                .rev()
                .nth(HIGHLIGHT_WINDOW - 1)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let end = content[m.end()..]
                .char_indices()
                .nth(HIGHLIGHT_WINDOW)
                .map(|(i, _)| m.end() + i)
                .unwrap_or(content.len());

            let window = &content[start..end];
            Some(re.replace_all(window, "<mark>$0</mark>").into_owned())
        })
        .collect()
}
