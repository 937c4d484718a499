//! Corrective retrieval: confidence evaluation, routing and knowledge refinement
//!
//! The [`CorrectionProcessor`] grades retrieved documents with the
//! [`ConfidenceEvaluator`], picks an action from the confidence tier, optionally
//! pulls in web results, and passes the survivors through
//! [`KnowledgeRefinement`].

mod evaluator;
mod processor;
mod refinement;
mod web;

pub use evaluator::{
    build_evaluation_prompt, heuristic_scores, parse_evaluation_response, truncate_content,
    ConfidenceEvaluator, TextGenerator,
};
pub use processor::CorrectionProcessor;
pub use refinement::{
    are_duplicates, authority_score, freshness_score, has_good_structure, length_score,
    phrase_score, position_score, quality_score, query_terms, relevance_score, tf_score,
    title_score, KnowledgeRefinement, MAX_REFINED_DOCUMENTS,
};
pub use web::{url_host, web_document_id, SearchFilters, WebDocument, WebSearcher};

use crate::error::{CragError, Result};
use crate::retrieval::{Metadata, RankedResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Source label given to documents that came from web search
pub const WEB_SEARCH_SOURCE: &str = "web_search";

/// A document flowing through the correction stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub score: f64,
    /// Producer label, e.g. "hybrid" or "web_search"
    pub source: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    /// `None` when the retrieval time is unknown
    #[serde(default)]
    pub retrieved_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            title: String::new(),
            url: String::new(),
            score: 0.0,
            source: String::new(),
            metadata: Metadata::new(),
            retrieved_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_retrieved_at(mut self, at: DateTime<Utc>) -> Self {
        self.retrieved_at = Some(at);
        self
    }
}

impl From<RankedResult> for Document {
    fn from(result: RankedResult) -> Self {
        Self {
            id: result.document_id,
            content: result.content,
            title: result.title,
            url: result.url,
            score: result.score,
            source: result.source_kind.to_string(),
            metadata: result.metadata,
            retrieved_at: Some(result.retrieved_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Low,
    None,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "high",
            Self::Low => "low",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CragAction {
    UseRetrieved,
    EnrichWithWeb,
    ReplaceWithWeb,
}

impl fmt::Display for CragAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UseRetrieved => "use_retrieved",
            Self::EnrichWithWeb => "enrich_with_web",
            Self::ReplaceWithWeb => "replace_with_web",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentScore {
    pub document_id: String,
    pub relevance_score: f64,
    pub quality_score: f64,
    pub overall_score: f64,
    /// True when the text-generation backend was skipped or unusable
    #[serde(default)]
    pub heuristic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub confidence_tier: ConfidenceTier,
    /// Mean of the per-document overall scores
    pub overall_score: f64,
    pub document_scores: Vec<DocumentScore>,
    pub reasoning: String,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub action: CragAction,
    pub confidence_tier: ConfidenceTier,
    pub reasoning: String,
    pub documents: Vec<Document>,
    pub evaluation: EvaluationResult,
    pub decided_at: DateTime<Utc>,
}

/// Terminal output of the correction stage for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub query: String,
    pub final_documents: Vec<Document>,
    pub routing_decision: RoutingDecision,
    pub web_search_used: bool,
    pub processing_time: Duration,
    pub processed_at: DateTime<Utc>,
}

/// Weights for combining per-document evaluation signals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationCriteria {
    pub relevance_weight: f64,
    pub quality_weight: f64,
    /// Reserved for richer scoring policies
    pub freshness_weight: f64,
    /// Reserved for richer scoring policies
    pub authority_weight: f64,
}

impl Default for EvaluationCriteria {
    fn default() -> Self {
        Self {
            relevance_weight: 0.4,
            quality_weight: 0.3,
            freshness_weight: 0.2,
            authority_weight: 0.1,
        }
    }
}

/// Runtime settings for the correction stage
#[derive(Debug, Clone, PartialEq)]
pub struct CragConfig {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub web_search_enabled: bool,
    pub max_web_results: usize,
    pub web_search_timeout: Duration,
    pub refinement_enabled: bool,
    pub relevance_threshold: f64,
    pub max_documents: usize,
    pub evaluation_timeout: Duration,
    /// Documents graded by the text-generation backend at the same time
    pub max_concurrent_evaluations: usize,
    pub criteria: EvaluationCriteria,
}

impl Default for CragConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.8,
            low_threshold: 0.5,
            web_search_enabled: true,
            max_web_results: 5,
            web_search_timeout: Duration::from_secs(10),
            refinement_enabled: true,
            relevance_threshold: 0.3,
            max_documents: 10,
            evaluation_timeout: Duration::from_secs(5),
            max_concurrent_evaluations: 4,
            criteria: EvaluationCriteria::default(),
        }
    }
}

impl CragConfig {
    pub fn validate(&self) -> Result<()> {
        validate_thresholds(self.high_threshold, self.low_threshold)?;

        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(CragError::InvalidArgument(format!(
                "relevance_threshold must be within [0, 1], got {}",
                self.relevance_threshold
            )));
        }
        if self.max_documents == 0 {
            return Err(CragError::InvalidArgument(
                "max_documents must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_evaluations == 0 {
            return Err(CragError::InvalidArgument(
                "max_concurrent_evaluations must be greater than zero".to_string(),
            ));
        }
        if self.web_search_enabled && self.max_web_results == 0 {
            return Err(CragError::InvalidArgument(
                "max_web_results must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_thresholds(high: f64, low: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&high) || !(0.0..=1.0).contains(&low) || low > high {
        return Err(CragError::InvalidArgument(format!(
            "thresholds must satisfy 0 <= low ({}) <= high ({}) <= 1",
            low, high
        )));
    }
    Ok(())
}
