//! Hybrid search combining semantic and lexical search

use super::fusion::FusionEngine;
use super::provenance::{result_overlap, OverlapMetrics, RankedResult, SourceKind};
use crate::error::{CragError, Result};
use crate::lexical::validate_query;
use crate::upstream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Anything that can answer "top-k documents for this query"
///
/// Implemented by the lexical index and by semantic (embedding + vector
/// store) backends.
#[async_trait]
pub trait RankedSearcher: Send + Sync {
    /// Service name used in logs and upstream errors
    fn name(&self) -> &str;

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RankedResult>>;
}

/// Retrieval knobs for one hybrid search
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchOptions {
    pub enable_semantic: bool,
    pub enable_lexical: bool,
    pub semantic_top_k: usize,
    pub lexical_top_k: usize,
    pub final_top_k: usize,
    pub min_score: f64,
    pub semantic_timeout: Duration,
    pub lexical_timeout: Duration,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            enable_semantic: true,
            enable_lexical: true,
            semantic_top_k: 20,
            lexical_top_k: 20,
            final_top_k: 10,
            min_score: 0.0,
            semantic_timeout: Duration::from_secs(10),
            lexical_timeout: Duration::from_secs(5),
        }
    }
}

impl HybridSearchOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.enable_semantic && !self.enable_lexical {
            return Err(CragError::InvalidArgument(
                "at least one of semantic or lexical search must be enabled".to_string(),
            ));
        }
        if self.final_top_k == 0
            || (self.enable_semantic && self.semantic_top_k == 0)
            || (self.enable_lexical && self.lexical_top_k == 0)
        {
            return Err(CragError::InvalidArgument(
                "top-k values must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-source and fused rankings for one query, side by side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchComparison {
    pub query: String,
    pub semantic_results: Vec<RankedResult>,
    pub lexical_results: Vec<RankedResult>,
    pub hybrid_results: Vec<RankedResult>,
    pub overlap: OverlapMetrics,
}

/// Orchestrates both searchers and fuses their rankings
pub struct HybridRetriever {
    semantic: Option<Arc<dyn RankedSearcher>>,
    lexical: Option<Arc<dyn RankedSearcher>>,
    fusion: FusionEngine,
    options: HybridSearchOptions,
}

impl HybridRetriever {
    /// Create a new hybrid retriever
    ///
    /// A source is used only when it is both supplied and enabled.
    pub fn new(
        semantic: Option<Arc<dyn RankedSearcher>>,
        lexical: Option<Arc<dyn RankedSearcher>>,
        fusion: FusionEngine,
        options: HybridSearchOptions,
    ) -> Result<Self> {
        options.validate()?;

        let semantic = semantic.filter(|_| options.enable_semantic);
        let lexical = lexical.filter(|_| options.enable_lexical);
        if semantic.is_none() && lexical.is_none() {
            return Err(CragError::InvalidArgument(
                "hybrid retriever needs at least one enabled searcher".to_string(),
            ));
        }

        Ok(Self {
            semantic,
            lexical,
            fusion,
            options,
        })
    }

    pub fn options(&self) -> &HybridSearchOptions {
        &self.options
    }

    /// Perform hybrid search
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedResult>> {
        validate_query(query)?;

        // Step 1: Both sources concurrently
        let (semantic, lexical) = tokio::join!(
            self.source_search(
                self.semantic.as_deref(),
                query,
                self.options.semantic_top_k,
                self.options.semantic_timeout,
                SourceKind::Semantic,
                cancel,
            ),
            self.source_search(
                self.lexical.as_deref(),
                query,
                self.options.lexical_top_k,
                self.options.lexical_timeout,
                SourceKind::Lexical,
                cancel,
            )
        );

        // Step 2: Degrade failed sources to empty lists
        let mut failures = Vec::new();
        let semantic = self.degrade(semantic, &mut failures)?;
        let lexical = self.degrade(lexical, &mut failures)?;

        // Step 3: Fuse
        let mut results = self.fusion.fuse(semantic, lexical);

        if results.is_empty() && !failures.is_empty() {
            return Err(CragError::upstream("hybrid_search", failures.join("; ")));
        }

        // Step 4: Final filtering
        results.retain(|r| r.score >= self.options.min_score);
        results.truncate(self.options.final_top_k);

        tracing::debug!(
            "Hybrid search '{}' returned {} results ({} source failures)",
            query,
            results.len(),
            failures.len()
        );
        Ok(results)
    }

    /// Run each source and the fusion of both with the same `top_k`
    ///
    /// Failed sources contribute an empty list, as in [`search`](Self::search).
    pub async fn compare(
        &self,
        query: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchComparison> {
        validate_query(query)?;
        if top_k == 0 {
            return Err(CragError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }

        let (semantic, lexical) = tokio::join!(
            self.source_search(
                self.semantic.as_deref(),
                query,
                top_k,
                self.options.semantic_timeout,
                SourceKind::Semantic,
                cancel,
            ),
            self.source_search(
                self.lexical.as_deref(),
                query,
                top_k,
                self.options.lexical_timeout,
                SourceKind::Lexical,
                cancel,
            )
        );

        let mut failures = Vec::new();
        let semantic = self.degrade(semantic, &mut failures)?;
        let lexical = self.degrade(lexical, &mut failures)?;
        if semantic.is_empty() && lexical.is_empty() && !failures.is_empty() {
            return Err(CragError::upstream("hybrid_search", failures.join("; ")));
        }

        let overlap = result_overlap(&semantic, &lexical);
        let mut hybrid_results = self.fusion.fuse(semantic.clone(), lexical.clone());
        hybrid_results.retain(|r| r.score >= self.options.min_score);
        hybrid_results.truncate(top_k);

        tracing::debug!(
            "Compared search methods for '{}': overlap {:.2} ({} shared)",
            query,
            overlap.overlap_ratio,
            overlap.common_count
        );

        Ok(SearchComparison {
            query: query.to_string(),
            semantic_results: semantic,
            lexical_results: lexical,
            hybrid_results,
            overlap,
        })
    }

    async fn source_search(
        &self,
        searcher: Option<&dyn RankedSearcher>,
        query: &str,
        top_k: usize,
        timeout: Duration,
        kind: SourceKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedResult>> {
        let Some(searcher) = searcher else {
            return Ok(Vec::new());
        };

        let results =
            upstream::guarded(searcher.name(), timeout, cancel, searcher.search(query, top_k))
                .await?;

        Ok(results
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, mut r)| {
                r.origin_rank = i + 1;
                r.source_kind = kind;
                r
            })
            .collect())
    }

    fn degrade(
        &self,
        outcome: Result<Vec<RankedResult>>,
        failures: &mut Vec<String>,
    ) -> Result<Vec<RankedResult>> {
        match outcome {
            Ok(results) => Ok(results),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!("Search source failed, continuing without it: {}", e);
                failures.push(e.to_string());
                Ok(Vec::new())
            }
        }
    }
}
