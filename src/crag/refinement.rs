//! Knowledge refinement: relevance filter, de-duplication and multi-factor re-rank
//!
//! Every sub-score is a pure function returning a value in [0, 1].

use super::web::url_host;
use super::Document;
use crate::retrieval::{text_similarity, DUPLICATE_SIMILARITY};
use chrono::{DateTime, Duration, Utc};

/// Refined output never exceeds this many documents
pub const MAX_REFINED_DOCUMENTS: usize = 10;

const AUTHORITATIVE_HOSTS: &[&str] = &["wikipedia.org", "stackoverflow.com", "github.com"];
const AUTHORITATIVE_SUFFIXES: &[&str] = &["gov", "edu", "org"];

/// Filters, de-duplicates and re-ranks documents for a query
#[derive(Debug, Clone)]
pub struct KnowledgeRefinement {
    relevance_threshold: f64,
}

impl Default for KnowledgeRefinement {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl KnowledgeRefinement {
    pub fn new(relevance_threshold: f64) -> Self {
        Self {
            relevance_threshold: relevance_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn relevance_threshold(&self) -> f64 {
        self.relevance_threshold
    }

    pub fn refine(&self, query: &str, documents: Vec<Document>) -> Vec<Document> {
        self.refine_at(query, documents, Utc::now())
    }

    /// [`refine`](Self::refine) with an explicit clock for freshness scoring
    pub fn refine_at(
        &self,
        query: &str,
        documents: Vec<Document>,
        now: DateTime<Utc>,
    ) -> Vec<Document> {
        if documents.is_empty() {
            return documents;
        }

        let input = documents.len();

        // Step 1: Relevance filter
        let relevant = self.filter_relevant(query, documents, self.relevance_threshold);

        // Step 2: Remove duplicates
        let unique = remove_duplicates(relevant);

        // Step 3: Re-rank
        let mut ranked = rerank(query, unique, now);

        // Step 4: Cap
        ranked.truncate(MAX_REFINED_DOCUMENTS);

        tracing::debug!("Refinement kept {} of {} documents", ranked.len(), input);
        ranked
    }

    /// Keep documents whose composite relevance reaches `threshold`, with
    /// their score replaced by that relevance
    pub fn filter_relevant(
        &self,
        query: &str,
        documents: Vec<Document>,
        threshold: f64,
    ) -> Vec<Document> {
        documents
            .into_iter()
            .filter_map(|mut doc| {
                let relevance = relevance_score(query, &doc);
                if relevance >= threshold {
                    doc.score = relevance;
                    Some(doc)
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Drop later documents that duplicate an earlier one
pub fn remove_duplicates(documents: Vec<Document>) -> Vec<Document> {
    let mut unique: Vec<Document> = Vec::with_capacity(documents.len());
    for doc in documents {
        if !unique.iter().any(|kept| are_duplicates(&doc, kept)) {
            unique.push(doc);
        }
    }
    unique
}

/// Sort by comprehensive score, replacing each document's score with it
pub fn rerank(query: &str, documents: Vec<Document>, now: DateTime<Utc>) -> Vec<Document> {
    let mut scored: Vec<Document> = documents
        .into_iter()
        .map(|mut doc| {
            doc.score = comprehensive_score(query, &doc, now);
            doc
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// Same URL, same title ignoring case, or near-identical content
pub fn are_duplicates(a: &Document, b: &Document) -> bool {
    if !a.url.is_empty() && a.url == b.url {
        return true;
    }

    if !a.title.is_empty() && !b.title.is_empty() && a.title.to_lowercase() == b.title.to_lowercase()
    {
        return true;
    }

    text_similarity(&a.content, &b.content) > DUPLICATE_SIMILARITY
}

/// Lower-cased query words with surrounding punctuation removed
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// `0.4 * tf + 0.3 * title + 0.2 * position + 0.1 * phrase`, clamped to [0, 1]
pub fn relevance_score(query: &str, doc: &Document) -> f64 {
    let terms = query_terms(query);
    let content = doc.content.to_lowercase();
    let title = doc.title.to_lowercase();

    let score = tf_score(&terms, &content) * 0.4
        + title_score(&terms, &title) * 0.3
        + position_score(&terms, &content) * 0.2
        + phrase_score(&terms, &content) * 0.1;

    score.clamp(0.0, 1.0)
}

/// `0.5 relevance + 0.2 quality + 0.1 authority + 0.1 freshness + 0.1 length`
pub fn comprehensive_score(query: &str, doc: &Document, now: DateTime<Utc>) -> f64 {
    relevance_score(query, doc) * 0.5
        + quality_score(doc) * 0.2
        + authority_score(&doc.url) * 0.1
        + freshness_score(doc.retrieved_at, now) * 0.1
        + length_score(&doc.content) * 0.1
}

/// Query-term occurrences per tenth of the content's word count, capped at 1
pub fn tf_score(terms: &[String], content: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let words = content.split_whitespace().count();
    if words == 0 {
        return 0.0;
    }

    let occurrences: usize = terms.iter().map(|t| content.matches(t.as_str()).count()).sum();
    (occurrences as f64 / (words as f64 * 0.1)).min(1.0)
}

/// Fraction of query terms found in the title
pub fn title_score(terms: &[String], title: &str) -> f64 {
    if terms.is_empty() || title.is_empty() {
        return 0.0;
    }

    let matched = terms.iter().filter(|t| title.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64
}

/// Mean of `1 - first_offset / len` over query terms; absent terms count 0
pub fn position_score(terms: &[String], content: &str) -> f64 {
    if terms.is_empty() || content.is_empty() {
        return 0.0;
    }

    let len = content.len() as f64;
    let total: f64 = terms
        .iter()
        .filter_map(|t| content.find(t.as_str()))
        .map(|idx| 1.0 - idx as f64 / len)
        .sum();

    total / terms.len() as f64
}

/// 1.0 for the full query as a substring, else the longest contiguous
/// sub-phrase of at least two words over the query length
pub fn phrase_score(terms: &[String], content: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    if content.contains(&terms.join(" ")) {
        return 1.0;
    }

    let n = terms.len();
    if n < 2 {
        return 0.0;
    }

    let mut longest = 0;
    for i in 0..n - 1 {
        for j in (i + 2)..=n {
            if j - i > longest && content.contains(&terms[i..j].join(" ")) {
                longest = j - i;
            }
        }
    }

    longest as f64 / n as f64
}

/// Length band, title, https and sentence structure
pub fn quality_score(doc: &Document) -> f64 {
    let len = doc.content.chars().count();
    let mut score = 0.0;

    if (100..=5000).contains(&len) {
        score += 0.4;
    } else if len >= 50 {
        score += 0.2;
    }

    if !doc.title.is_empty() {
        score += 0.2;
    }

    if doc.url.starts_with("https://") {
        score += 0.2;
    } else if doc.url.starts_with("http://") {
        score += 0.1;
    }

    if has_good_structure(&doc.content) {
        score += 0.2;
    }

    f64::min(score, 1.0)
}

/// Sentence punctuation plus both upper- and lower-case letters
pub fn has_good_structure(content: &str) -> bool {
    let has_punctuation = content.contains(['.', '!', '?']);
    let has_upper = content.chars().any(char::is_uppercase);
    let has_lower = content.chars().any(char::is_lowercase);
    let has_sentence = content
        .split(['.', '!', '?'])
        .any(|s| !s.trim().is_empty());

    has_punctuation && has_upper && has_lower && has_sentence
}

/// 0.9 for reference hosts, 0.6 for other https, 0.3 otherwise, 0.5 without a URL
pub fn authority_score(url: &str) -> f64 {
    if url.is_empty() {
        return 0.5;
    }

    if let Some(host) = url_host(url) {
        let reference = AUTHORITATIVE_HOSTS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
            || AUTHORITATIVE_SUFFIXES
                .iter()
                .any(|tld| host.ends_with(&format!(".{}", tld)));
        if reference {
            return 0.9;
        }
    }

    if url.starts_with("https://") {
        0.6
    } else {
        0.3
    }
}

/// Step decay by age; unknown timestamps are neutral
pub fn freshness_score(retrieved_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(at) = retrieved_at else {
        return 0.5;
    };

    let age = now.signed_duration_since(at);
    if age < Duration::days(1) {
        1.0
    } else if age < Duration::days(7) {
        0.8
    } else if age < Duration::days(30) {
        0.6
    } else if age < Duration::days(365) {
        0.4
    } else {
        0.2
    }
}

/// Peaks at 200 to 2000 characters
pub fn length_score(content: &str) -> f64 {
    let len = content.chars().count();
    if (200..=2000).contains(&len) {
        1.0
    } else if (100..=5000).contains(&len) {
        0.8
    } else if len >= 50 {
        0.6
    } else if len >= 20 {
        0.4
    } else {
        0.2
    }
}
