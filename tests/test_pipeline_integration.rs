//! End-to-end query tests: lexical index + semantic backend + web fallback

use async_trait::async_trait;
use chrono::Utc;
use crag_search::crag::{
    ConfidenceEvaluator, CorrectionProcessor, CragAction, CragConfig, SearchFilters,
    TextGenerator, WebDocument, WebSearcher, WEB_SEARCH_SOURCE,
};
use crag_search::lexical::{LexicalIndex, SourceDocument};
use crag_search::pipeline::RagPipeline;
use crag_search::retrieval::{
    FusionEngine, HybridRetriever, HybridSearchOptions, Metadata, RankedResult, RankedSearcher,
    SourceKind,
};
use crag_search::{CragError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Vector store stand-in: always answers with its nearest neighbours
struct Neighbours(Vec<(&'static str, &'static str, f64)>);

#[async_trait]
impl RankedSearcher for Neighbours {
    fn name(&self) -> &str {
        "semantic_search"
    }

    async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<RankedResult>> {
        Ok(self
            .0
            .iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (id, content, score))| {
                RankedResult::new(*id, *content, *score, SourceKind::Semantic).with_rank(i + 1)
            })
            .collect())
    }
}

struct Down;

#[async_trait]
impl RankedSearcher for Down {
    fn name(&self) -> &str {
        "down"
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RankedResult>> {
        Err(CragError::upstream("down", "connection refused"))
    }
}

struct Sleepy;

#[async_trait]
impl RankedSearcher for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RankedResult>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

/// LLM judge that takes a fixed time per document
struct PacedJudge(Duration);

#[async_trait]
impl TextGenerator for PacedJudge {
    async fn generate_completion(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(self.0).await;
        Ok(r#"{"relevance_score": 0.9, "quality_score": 0.8}"#.to_string())
    }
}

struct CountingWeb {
    calls: AtomicUsize,
}

#[async_trait]
impl WebSearcher for CountingWeb {
    async fn search_with_filters(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<WebDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..filters.max_results.min(2))
            .map(|i| WebDocument {
                title: format!("{} overview {}", query, i),
                content: format!("An overview of {} from source number {}.", query, i),
                url: format!("https://physics.example.edu/page/{}", i),
                score: 0.7,
                source: "counting".to_string(),
                snippet: String::new(),
                metadata: Metadata::new(),
                retrieved_at: Utc::now(),
            })
            .collect())
    }
}

fn corpus() -> Arc<dyn RankedSearcher> {
    let index = LexicalIndex::default();
    index
        .add_documents(vec![
            SourceDocument::new("tokio", "Tokio is an async runtime for Rust."),
            SourceDocument::new("bread", "Sourdough bread needs a starter."),
            SourceDocument::new("serde", "Serde serializes Rust data structures."),
        ])
        .unwrap();
    Arc::new(index)
}

fn on_topic() -> Arc<dyn RankedSearcher> {
    Arc::new(Neighbours(vec![
        ("tokio", "Tokio is an async runtime for Rust.", 0.92),
        (
            "runtime-guide",
            "The tokio async runtime schedules tasks cooperatively.",
            0.81,
        ),
    ]))
}

fn off_topic() -> Arc<dyn RankedSearcher> {
    Arc::new(Neighbours(vec![
        ("bread", "Sourdough bread needs a starter.", 0.21),
        ("serde", "Serde serializes Rust data structures.", 0.18),
    ]))
}

fn build(
    semantic: Arc<dyn RankedSearcher>,
    lexical: Arc<dyn RankedSearcher>,
    options: HybridSearchOptions,
) -> (RagPipeline, Arc<CountingWeb>) {
    build_with_judge(semantic, lexical, options, None, CragConfig::default())
}

fn build_with_judge(
    semantic: Arc<dyn RankedSearcher>,
    lexical: Arc<dyn RankedSearcher>,
    options: HybridSearchOptions,
    judge: Option<Arc<dyn TextGenerator>>,
    config: CragConfig,
) -> (RagPipeline, Arc<CountingWeb>) {
    let retriever =
        HybridRetriever::new(Some(semantic), Some(lexical), FusionEngine::default(), options)
            .unwrap();

    let web = Arc::new(CountingWeb {
        calls: AtomicUsize::new(0),
    });
    let evaluator = ConfidenceEvaluator::new(judge, &config).unwrap();
    let processor =
        CorrectionProcessor::new(evaluator, Some(web.clone() as Arc<dyn WebSearcher>), config)
            .unwrap();

    (RagPipeline::new(retriever, processor), web)
}

#[tokio::test]
async fn test_relevant_corpus_answers_locally() {
    let (pipeline, web) = build(on_topic(), corpus(), HybridSearchOptions::default());

    let result = pipeline
        .answer("tokio async runtime", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.routing_decision.action, CragAction::UseRetrieved);
    assert!(!result.web_search_used);
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);

    let ids: Vec<&str> = result.final_documents.iter().map(|d| d.id.as_str()).collect();
    assert!(ids.contains(&"tokio"));
    assert!(ids.contains(&"runtime-guide"));
    assert!(result.final_documents.iter().all(|d| d.source == "hybrid"));
    println!("✓ local answer: {:?}", ids);
}

#[tokio::test]
async fn test_irrelevant_corpus_is_replaced_by_web() {
    let (pipeline, web) = build(off_topic(), corpus(), HybridSearchOptions::default());

    let result = pipeline
        .answer("lattice quantum chromodynamics", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.routing_decision.action, CragAction::ReplaceWithWeb);
    assert!(result.web_search_used);
    assert_eq!(web.calls.load(Ordering::SeqCst), 1);
    assert!(!result.final_documents.is_empty());
    assert!(result
        .final_documents
        .iter()
        .all(|d| d.source == WEB_SEARCH_SOURCE));
}

#[tokio::test]
async fn test_failed_semantic_source_degrades_to_lexical() {
    let (pipeline, _) = build(Arc::new(Down), corpus(), HybridSearchOptions::default());

    let result = pipeline
        .answer("tokio async runtime", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.routing_decision.action, CragAction::UseRetrieved);
    assert_eq!(result.final_documents[0].id, "tokio");
    assert_eq!(result.final_documents[0].source, "lexical");
}

#[tokio::test]
async fn test_slow_semantic_source_is_skipped_after_its_timeout() {
    let options = HybridSearchOptions {
        semantic_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let (pipeline, _) = build(Arc::new(Sleepy), corpus(), options);

    let result = pipeline
        .answer("tokio async runtime", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.final_documents[0].id, "tokio");
}

#[tokio::test]
async fn test_both_sources_failing_is_upstream_error() {
    let (pipeline, web) = build(Arc::new(Down), Arc::new(Down), HybridSearchOptions::default());

    let err = pipeline
        .answer("tokio async runtime", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_upstream());
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_slow_retrieval_past_request_budget_is_timeout() {
    let options = HybridSearchOptions {
        semantic_timeout: Duration::from_secs(10),
        ..Default::default()
    };
    let (pipeline, _) = build(Arc::new(Sleepy), corpus(), options);
    let pipeline = pipeline.with_request_timeout(Duration::from_millis(50));

    let err = pipeline
        .answer("tokio async runtime", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        CragError::Timeout { service, .. } => assert_eq!(service, "pipeline"),
        other => panic!("expected timeout, got {}", other),
    }
}

#[tokio::test]
async fn test_slow_correction_degrades_to_retrieved_documents() {
    let judge: Arc<dyn TextGenerator> = Arc::new(PacedJudge(Duration::from_secs(2)));
    let (pipeline, web) = build_with_judge(
        on_topic(),
        corpus(),
        HybridSearchOptions::default(),
        Some(judge),
        CragConfig::default(),
    );
    let pipeline = pipeline.with_request_timeout(Duration::from_millis(200));

    let result = pipeline
        .answer("tokio async runtime", &CancellationToken::new())
        .await
        .unwrap();

    let decision = &result.routing_decision;
    assert_eq!(decision.action, CragAction::UseRetrieved);
    assert!(decision.reasoning.contains("request budget"));
    assert!(decision.evaluation.document_scores.iter().all(|s| s.heuristic));
    assert!(!result.web_search_used);
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);

    let ids: Vec<&str> = result.final_documents.iter().map(|d| d.id.as_str()).collect();
    assert!(ids.contains(&"tokio"));
}

#[tokio::test]
async fn test_many_documents_with_paced_judge_fit_request_budget() {
    let index = LexicalIndex::default();
    index
        .add_documents(
            (0..10)
                .map(|i| {
                    SourceDocument::new(
                        format!("rust{}", i),
                        format!("Rust language feature number {} explained", i),
                    )
                })
                .collect(),
        )
        .unwrap();
    let lexical: Arc<dyn RankedSearcher> = Arc::new(index);

    let judge: Arc<dyn TextGenerator> = Arc::new(PacedJudge(Duration::from_millis(150)));
    let config = CragConfig {
        evaluation_timeout: Duration::from_millis(500),
        ..Default::default()
    };
    let (pipeline, _) = build_with_judge(
        Arc::new(Neighbours(Vec::new())),
        lexical,
        HybridSearchOptions::default(),
        Some(judge),
        config,
    );
    let pipeline = pipeline.with_request_timeout(Duration::from_millis(600));

    let result = pipeline
        .answer("rust language", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.routing_decision.action, CragAction::UseRetrieved);
    assert_eq!(result.routing_decision.evaluation.document_scores.len(), 10);
    assert!(!result.final_documents.is_empty());
    assert!(result
        .final_documents
        .iter()
        .all(|d| d.id.starts_with("rust")));
}

#[tokio::test]
async fn test_cancelled_query_aborts() {
    let (pipeline, web) = build(on_topic(), corpus(), HybridSearchOptions::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline
        .answer("tokio async runtime", &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_query_is_rejected() {
    let (pipeline, _) = build(on_topic(), corpus(), HybridSearchOptions::default());

    for query in ["", "   \t"] {
        let err = pipeline
            .answer(query, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CragError::InvalidArgument(_)));
    }
}
