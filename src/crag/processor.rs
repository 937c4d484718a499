//! Confidence-gated routing between retrieved and web documents

use super::evaluator::ConfidenceEvaluator;
use super::refinement::KnowledgeRefinement;
use super::web::{WebDocument, WebSearcher};
use super::{ConfidenceTier, CorrectionResult, CragAction, CragConfig, Document, RoutingDecision};
use crate::error::{CragError, Result};
use crate::upstream;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const WEB_SERVICE: &str = "web_search";

/// Runs evaluate → route → (web) → refine → cap for one query
pub struct CorrectionProcessor {
    evaluator: ConfidenceEvaluator,
    web: Option<Arc<dyn WebSearcher>>,
    refinement: KnowledgeRefinement,
    config: CragConfig,
}

impl CorrectionProcessor {
    pub fn new(
        evaluator: ConfidenceEvaluator,
        web: Option<Arc<dyn WebSearcher>>,
        config: CragConfig,
    ) -> Result<Self> {
        config.validate()?;

        if config.web_search_enabled && web.is_none() {
            tracing::info!("Web search enabled but no backend configured; routing locally");
        }

        Ok(Self {
            evaluator,
            web,
            refinement: KnowledgeRefinement::new(config.relevance_threshold),
            config,
        })
    }

    pub fn config(&self) -> &CragConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &ConfidenceEvaluator {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut ConfidenceEvaluator {
        &mut self.evaluator
    }

    /// Web search is usable only when enabled and backed by a searcher
    pub fn web_search_available(&self) -> bool {
        self.config.web_search_enabled && self.web.is_some()
    }

    /// Evaluate the retrieved documents and decide what to do with them
    pub async fn evaluate_and_route(
        &self,
        query: &str,
        documents: Vec<Document>,
        cancel: &CancellationToken,
    ) -> Result<RoutingDecision> {
        let evaluation = self.evaluator.evaluate(query, &documents, cancel).await?;
        let score = evaluation.overall_score;
        let web = self.web_search_available();

        let (action, reasoning) = match evaluation.confidence_tier {
            ConfidenceTier::High => (
                CragAction::UseRetrieved,
                format!(
                    "High confidence ({:.2}) in retrieved documents. Using retrieved content directly.",
                    score
                ),
            ),
            ConfidenceTier::Low if web => (
                CragAction::EnrichWithWeb,
                format!(
                    "Moderate confidence ({:.2}) in retrieved documents. Enriching with web search.",
                    score
                ),
            ),
            ConfidenceTier::Low => (
                CragAction::UseRetrieved,
                format!(
                    "Moderate confidence ({:.2}) in retrieved documents. Web search disabled, using retrieved content.",
                    score
                ),
            ),
            ConfidenceTier::None if web => (
                CragAction::ReplaceWithWeb,
                format!(
                    "Low confidence ({:.2}) in retrieved documents. Replacing with web search results.",
                    score
                ),
            ),
            ConfidenceTier::None => (
                CragAction::UseRetrieved,
                format!(
                    "Low confidence ({:.2}) in retrieved documents. Web search disabled, using retrieved content with refinement.",
                    score
                ),
            ),
        };

        tracing::info!(
            "Routing query with {} confidence ({:.2}) to {}",
            evaluation.confidence_tier,
            score,
            action
        );

        Ok(RoutingDecision {
            action,
            confidence_tier: evaluation.confidence_tier,
            reasoning,
            documents,
            evaluation,
            decided_at: Utc::now(),
        })
    }

    /// Full correction cycle for one query
    pub async fn process_query(
        &self,
        query: &str,
        documents: Vec<Document>,
        cancel: &CancellationToken,
    ) -> Result<CorrectionResult> {
        let started = Instant::now();

        // Step 1: Evaluate and route
        let mut decision = self.evaluate_and_route(query, documents, cancel).await?;

        // Step 2: Execute the routing action
        let mut web_search_used = false;
        let mut final_documents = match decision.action {
            CragAction::UseRetrieved => self.maybe_refine(query, decision.documents.clone()),
            CragAction::EnrichWithWeb | CragAction::ReplaceWithWeb => {
                match self.web_search(query, cancel).await {
                    Ok(web_docs) => {
                        web_search_used = true;
                        let web_docs: Vec<Document> =
                            web_docs.into_iter().map(Document::from).collect();

                        let combined = if decision.action == CragAction::EnrichWithWeb {
                            let mut combined = decision.documents.clone();
                            combined.extend(web_docs);
                            combined
                        } else {
                            web_docs
                        };
                        self.maybe_refine(query, combined)
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Web search failed, using retrieved documents: {}", e);
                        decision.reasoning.push_str(&format!(
                            " Web search failed ({}); falling back to retrieved documents.",
                            e
                        ));
                        decision.documents.clone()
                    }
                }
            }
        };

        // Step 3: Cap
        final_documents.truncate(self.config.max_documents);

        let processing_time = started.elapsed();
        tracing::debug!(
            "Correction finished in {:?} with {} documents (web used: {})",
            processing_time,
            final_documents.len(),
            web_search_used
        );

        Ok(CorrectionResult {
            query: query.to_string(),
            final_documents,
            routing_decision: decision,
            web_search_used,
            processing_time,
            processed_at: Utc::now(),
        })
    }

    /// Result for documents that could not go through the full correction cycle
    ///
    /// Confidence comes from the keyword heuristic and the documents are used
    /// as retrieved, refined when refinement is enabled. `note` explains why
    /// and is prepended to the reasoning.
    pub fn retrieved_only(
        &self,
        query: &str,
        documents: Vec<Document>,
        note: &str,
        started: Instant,
    ) -> CorrectionResult {
        let evaluation = self.evaluator.evaluate_heuristically(query, &documents);
        let reasoning = format!(
            "{} Using retrieved documents with heuristic confidence {:.2}.",
            note, evaluation.overall_score
        );

        let mut final_documents = self.maybe_refine(query, documents.clone());
        final_documents.truncate(self.config.max_documents);

        CorrectionResult {
            query: query.to_string(),
            final_documents,
            routing_decision: RoutingDecision {
                action: CragAction::UseRetrieved,
                confidence_tier: evaluation.confidence_tier,
                reasoning,
                documents,
                evaluation,
                decided_at: Utc::now(),
            },
            web_search_used: false,
            processing_time: started.elapsed(),
            processed_at: Utc::now(),
        }
    }

    async fn web_search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WebDocument>> {
        let Some(web) = &self.web else {
            return Err(CragError::upstream(
                WEB_SERVICE,
                "no web search backend configured",
            ));
        };

        let results = upstream::guarded(
            WEB_SERVICE,
            self.config.web_search_timeout,
            cancel,
            web.search(query, self.config.max_web_results),
        )
        .await?;

        tracing::debug!("Web search returned {} documents", results.len());
        Ok(results)
    }

    fn maybe_refine(&self, query: &str, documents: Vec<Document>) -> Vec<Document> {
        if self.config.refinement_enabled {
            self.refinement.refine(query, documents)
        } else {
            documents
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crag::{SearchFilters, WEB_SEARCH_SOURCE};
    use crate::retrieval::Metadata;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticWeb(usize);

    #[async_trait]
    impl WebSearcher for StaticWeb {
        async fn search_with_filters(
            &self,
            query: &str,
            filters: &SearchFilters,
        ) -> Result<Vec<WebDocument>> {
            Ok((0..self.0.min(filters.max_results))
                .map(|i| WebDocument {
                    title: format!("{} result {}", query, i),
                    content: format!("All about {} from the web, entry {}.", query, i),
                    url: format!("https://example.com/{}", i),
                    score: 0.9,
                    source: "static".to_string(),
                    snippet: String::new(),
                    metadata: Metadata::new(),
                    retrieved_at: Utc::now(),
                })
                .collect())
        }
    }

    struct BrokenWeb;

    #[async_trait]
    impl WebSearcher for BrokenWeb {
        async fn search_with_filters(
            &self,
            _query: &str,
            _filters: &SearchFilters,
        ) -> Result<Vec<WebDocument>> {
            Err(CragError::upstream("web", "rate limited"))
        }
    }

    struct SlowWeb;

    #[async_trait]
    impl WebSearcher for SlowWeb {
        async fn search_with_filters(
            &self,
            _query: &str,
            _filters: &SearchFilters,
        ) -> Result<Vec<WebDocument>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn processor(web: Option<Arc<dyn WebSearcher>>, config: CragConfig) -> CorrectionProcessor {
        let evaluator = ConfidenceEvaluator::heuristic(&config).unwrap();
        CorrectionProcessor::new(evaluator, web, config).unwrap()
    }

    fn unrelated() -> Vec<Document> {
        vec![Document::new("local", "Notes about baking sourdough bread.")]
    }

    fn relevant() -> Vec<Document> {
        vec![Document::new(
            "local",
            "Tokio is an asynchronous runtime for Rust with timers and networking.",
        )
        .with_title("Tokio runtime")]
    }

    #[tokio::test]
    async fn test_high_confidence_uses_retrieved() {
        let p = processor(Some(Arc::new(StaticWeb(3))), CragConfig::default());
        let result = p
            .process_query("tokio runtime", relevant(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.routing_decision.action, CragAction::UseRetrieved);
        assert!(!result.web_search_used);
        assert_eq!(result.final_documents[0].id, "local");
    }

    #[tokio::test]
    async fn test_no_confidence_replaces_with_web() {
        let p = processor(Some(Arc::new(StaticWeb(3))), CragConfig::default());
        let result = p
            .process_query("tokio runtime", unrelated(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.routing_decision.action, CragAction::ReplaceWithWeb);
        assert!(result.web_search_used);
        assert!(!result.final_documents.is_empty());
        assert!(result
            .final_documents
            .iter()
            .all(|d| d.source == WEB_SEARCH_SOURCE));
    }

    #[tokio::test]
    async fn test_low_confidence_enriches() {
        let config = CragConfig {
            high_threshold: 0.95,
            low_threshold: 0.1,
            refinement_enabled: false,
            ..Default::default()
        };
        let docs = vec![Document::new("local", "tokio only")];
        let p = processor(Some(Arc::new(StaticWeb(2))), config);
        let result = p
            .process_query("tokio runtime", docs, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.routing_decision.action, CragAction::EnrichWithWeb);
        assert_eq!(result.final_documents.len(), 3);
        assert_eq!(result.final_documents[0].id, "local");
    }

    #[tokio::test]
    async fn test_web_disabled_falls_back_to_retrieved() {
        let config = CragConfig {
            web_search_enabled: false,
            ..Default::default()
        };
        let p = processor(Some(Arc::new(StaticWeb(3))), config);
        let decision = p
            .evaluate_and_route("tokio runtime", unrelated(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(decision.confidence_tier, ConfidenceTier::None);
        assert_eq!(decision.action, CragAction::UseRetrieved);
        assert!(decision.reasoning.contains("Web search disabled"));
    }

    #[tokio::test]
    async fn test_missing_backend_counts_as_disabled() {
        let p = processor(None, CragConfig::default());
        assert!(!p.web_search_available());

        let decision = p
            .evaluate_and_route("tokio runtime", unrelated(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(decision.action, CragAction::UseRetrieved);
    }

    #[tokio::test]
    async fn test_web_failure_keeps_retrieved_unchanged() {
        let p = processor(Some(Arc::new(BrokenWeb)), CragConfig::default());
        let result = p
            .process_query("tokio runtime", unrelated(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.routing_decision.action, CragAction::ReplaceWithWeb);
        assert!(!result.web_search_used);
        assert_eq!(result.final_documents, unrelated());
        assert!(result.routing_decision.reasoning.contains("Web search failed"));
    }

    #[tokio::test]
    async fn test_web_timeout_degrades() {
        let config = CragConfig {
            web_search_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let p = processor(Some(Arc::new(SlowWeb)), config);
        let result = p
            .process_query("tokio runtime", unrelated(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.web_search_used);
        assert_eq!(result.final_documents, unrelated());
    }

    #[test]
    fn test_retrieved_only_uses_documents_as_is() {
        let config = CragConfig {
            max_documents: 1,
            refinement_enabled: false,
            ..Default::default()
        };
        let p = processor(Some(Arc::new(StaticWeb(3))), config);
        let docs = vec![
            Document::new("a", "Tokio runtime for Rust"),
            Document::new("b", "Tokio runtime internals"),
        ];

        let result = p.retrieved_only("tokio runtime", docs, "Correction timed out.", Instant::now());

        assert_eq!(result.routing_decision.action, CragAction::UseRetrieved);
        assert_eq!(result.routing_decision.confidence_tier, ConfidenceTier::High);
        assert!(result.routing_decision.reasoning.starts_with("Correction timed out."));
        assert!(!result.web_search_used);
        assert_eq!(result.routing_decision.documents.len(), 2);
        assert_eq!(result.final_documents.len(), 1);
        assert_eq!(result.final_documents[0].id, "a");
    }

    #[tokio::test]
    async fn test_caps_final_documents() {
        let config = CragConfig {
            max_documents: 2,
            refinement_enabled: false,
            ..Default::default()
        };
        let docs: Vec<Document> = (0..5)
            .map(|i| {
                Document::new(format!("d{}", i), "Tokio runtime for Rust").with_title("Tokio runtime")
            })
            .collect();
        let p = processor(None, config);
        let result = p
            .process_query("tokio runtime", docs, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.final_documents.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_routes_to_web() {
        let p = processor(Some(Arc::new(StaticWeb(2))), CragConfig::default());
        let result = p
            .process_query("tokio runtime", Vec::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.routing_decision.confidence_tier, ConfidenceTier::None);
        assert!(result.web_search_used);
    }
}
