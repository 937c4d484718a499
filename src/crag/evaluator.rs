//! Retrieval confidence evaluation
//!
//! Each document is scored for relevance and quality, either by a
//! text-generation backend or by a keyword-overlap heuristic. The mean score
//! is classified into a [`ConfidenceTier`].

use super::{
    validate_thresholds, ConfidenceTier, CragConfig, Document, DocumentScore, EvaluationCriteria,
    EvaluationResult,
};
use crate::error::{CragError, Result};
use crate::lexical::{Tokenizer, TokenizerConfig};
use crate::upstream;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LLM_SERVICE: &str = "llm_evaluator";
const PROMPT_CONTENT_CHARS: usize = 1000;

/// Text-generation backend used for document grading
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_completion(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ScorePayload {
    relevance_score: f64,
    quality_score: f64,
}

/// Grades retrieved documents and classifies overall confidence
pub struct ConfidenceEvaluator {
    generator: Option<Arc<dyn TextGenerator>>,
    criteria: EvaluationCriteria,
    high_threshold: f64,
    low_threshold: f64,
    timeout: Duration,
    concurrency: usize,
    tokenizer: Tokenizer,
}

impl ConfidenceEvaluator {
    /// Create an evaluator; without a generator every document is scored heuristically
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: &CragConfig) -> Result<Self> {
        validate_thresholds(config.high_threshold, config.low_threshold)?;

        Ok(Self {
            generator,
            criteria: config.criteria,
            high_threshold: config.high_threshold,
            low_threshold: config.low_threshold,
            timeout: config.evaluation_timeout,
            concurrency: config.max_concurrent_evaluations.max(1),
            tokenizer: Tokenizer::new(TokenizerConfig::default()),
        })
    }

    pub fn heuristic(config: &CragConfig) -> Result<Self> {
        Self::new(None, config)
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.high_threshold, self.low_threshold)
    }

    pub fn set_thresholds(&mut self, high: f64, low: f64) -> Result<()> {
        validate_thresholds(high, low)?;
        self.high_threshold = high;
        self.low_threshold = low;
        tracing::info!("Confidence thresholds set to high={} low={}", high, low);
        Ok(())
    }

    pub fn criteria(&self) -> &EvaluationCriteria {
        &self.criteria
    }

    pub fn uses_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Evaluate retrieval quality for a query
    ///
    /// Up to `max_concurrent_evaluations` documents are graded at once and
    /// scores keep the input order. Backend failures and unparsable responses
    /// fall back to the heuristic; only cancellation is returned as an error.
    pub async fn evaluate(
        &self,
        query: &str,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult> {
        if documents.is_empty() {
            return Ok(Self::empty_evaluation());
        }

        let document_scores: Vec<DocumentScore> = stream::iter(documents)
            .map(|doc| self.evaluate_document(query, doc, cancel))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(self.summarize(document_scores))
    }

    /// Keyword-overlap evaluation only, without touching the generator
    pub fn evaluate_heuristically(&self, query: &str, documents: &[Document]) -> EvaluationResult {
        if documents.is_empty() {
            return Self::empty_evaluation();
        }

        let document_scores = documents
            .iter()
            .map(|doc| {
                let (r, q) = heuristic_scores(&self.tokenizer, query, doc);
                self.document_score(doc, r, q, true)
            })
            .collect();
        self.summarize(document_scores)
    }

    fn empty_evaluation() -> EvaluationResult {
        EvaluationResult {
            confidence_tier: ConfidenceTier::None,
            overall_score: 0.0,
            document_scores: Vec::new(),
            reasoning: "No documents retrieved".to_string(),
            evaluated_at: Utc::now(),
        }
    }

    fn summarize(&self, document_scores: Vec<DocumentScore>) -> EvaluationResult {
        let overall_score = document_scores.iter().map(|s| s.overall_score).sum::<f64>()
            / document_scores.len() as f64;
        let confidence_tier = self.classify(overall_score);
        let reasoning = self.reasoning(confidence_tier, overall_score, &document_scores);

        tracing::debug!(
            "Evaluated {} documents: tier={} score={:.3}",
            document_scores.len(),
            confidence_tier,
            overall_score
        );

        EvaluationResult {
            confidence_tier,
            overall_score,
            document_scores,
            reasoning,
            evaluated_at: Utc::now(),
        }
    }

    pub fn classify(&self, score: f64) -> ConfidenceTier {
        if score >= self.high_threshold {
            ConfidenceTier::High
        } else if score >= self.low_threshold {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::None
        }
    }

    async fn evaluate_document(
        &self,
        query: &str,
        doc: &Document,
        cancel: &CancellationToken,
    ) -> Result<DocumentScore> {
        let (relevance, quality, heuristic) = match &self.generator {
            None => {
                let (r, q) = heuristic_scores(&self.tokenizer, query, doc);
                (r, q, true)
            }
            Some(generator) => {
                let prompt = build_evaluation_prompt(query, doc);
                let response = upstream::guarded(
                    LLM_SERVICE,
                    self.timeout,
                    cancel,
                    generator.generate_completion(&prompt),
                )
                .await;

                match response.and_then(|text| parse_evaluation_response(&text)) {
                    Ok((r, q)) => (r, q, false),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            "LLM evaluation of document {} unusable, using heuristic: {}",
                            doc.id,
                            e
                        );
                        let (r, q) = heuristic_scores(&self.tokenizer, query, doc);
                        (r, q, true)
                    }
                }
            }
        };

        Ok(self.document_score(doc, relevance, quality, heuristic))
    }

    fn document_score(
        &self,
        doc: &Document,
        relevance: f64,
        quality: f64,
        heuristic: bool,
    ) -> DocumentScore {
        let weighted =
            relevance * self.criteria.relevance_weight + quality * self.criteria.quality_weight;

        DocumentScore {
            document_id: doc.id.clone(),
            relevance_score: relevance,
            quality_score: quality,
            // Never below the relevance signal
            overall_score: weighted.max(relevance),
            heuristic,
        }
    }

    fn reasoning(&self, tier: ConfidenceTier, score: f64, scores: &[DocumentScore]) -> String {
        let mut reasoning = format!("Overall relevance score: {:.2}. ", score);

        reasoning.push_str(match tier {
            ConfidenceTier::High => {
                "Retrieved documents show high relevance and quality. \
                 Direct use of retrieved content is recommended."
            }
            ConfidenceTier::Low => {
                "Retrieved documents show moderate relevance. \
                 Enrichment with additional sources may improve answer quality."
            }
            ConfidenceTier::None => {
                "Retrieved documents show low relevance to the query. \
                 Web search for alternative sources is recommended."
            }
        });

        let above = scores
            .iter()
            .filter(|s| s.overall_score >= self.high_threshold)
            .count();
        reasoning.push_str(&format!(
            " {} out of {} documents scored above high threshold ({:.2}).",
            above,
            scores.len(),
            self.high_threshold
        ));

        let heuristic = scores.iter().filter(|s| s.heuristic).count();
        if heuristic > 0 && self.generator.is_some() {
            reasoning.push_str(&format!(
                " {} documents were scored heuristically after LLM fallback.",
                heuristic
            ));
        }

        reasoning
    }
}

/// Prompt asking a text-generation backend for relevance and quality scores
pub fn build_evaluation_prompt(query: &str, doc: &Document) -> String {
    format!(
        r#"Please evaluate the relevance and quality of the following document for the given query.

Query: {}

Document Title: {}
Document Content: {}

Please provide scores from 0.0 to 1.0 for:
1. Relevance: How well does the document answer or relate to the query?
2. Quality: How accurate, comprehensive, and well-written is the document?

Respond in JSON format:
{{
  "relevance_score": 0.0,
  "quality_score": 0.0,
  "explanation": "Brief explanation of the scores"
}}"#,
        query,
        doc.title,
        truncate_content(&doc.content, PROMPT_CONTENT_CHARS)
    )
}

/// Cut to at most `max_chars` characters, preferring a word boundary within
/// the last 100 characters, and mark the cut with "..."
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let Some((cut, _)) = content.char_indices().nth(max_chars) else {
        return content.to_string();
    };

    let mut truncated = &content[..cut];
    if let Some(space) = truncated.rfind(' ') {
        let space_chars = truncated[..space].chars().count();
        if space_chars + 100 > max_chars {
            truncated = &truncated[..space];
        }
    }

    format!("{}...", truncated)
}

/// Extract `(relevance, quality)` from the outermost JSON object in a response
pub fn parse_evaluation_response(response: &str) -> Result<(f64, f64)> {
    let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) else {
        return Err(CragError::MalformedResponse(
            "no JSON object found in response".to_string(),
        ));
    };
    if end < start {
        return Err(CragError::MalformedResponse(
            "unbalanced JSON object in response".to_string(),
        ));
    }

    let payload: ScorePayload = serde_json::from_str(&response[start..=end])
        .map_err(|e| CragError::MalformedResponse(format!("failed to parse JSON: {}", e)))?;

    if !payload.relevance_score.is_finite() || !payload.quality_score.is_finite() {
        return Err(CragError::MalformedResponse(
            "scores must be finite numbers".to_string(),
        ));
    }

    Ok((
        payload.relevance_score.clamp(0.0, 1.0),
        payload.quality_score.clamp(0.0, 1.0),
    ))
}

/// Keyword-overlap relevance and length/title quality, both in [0, 1]
pub fn heuristic_scores(tokenizer: &Tokenizer, query: &str, doc: &Document) -> (f64, f64) {
    let mut terms = tokenizer.tokenize(query);
    if terms.is_empty() {
        terms = query.to_lowercase().split_whitespace().map(str::to_string).collect();
    }
    terms.sort();
    terms.dedup();

    let relevance = if terms.is_empty() {
        0.0
    } else {
        let content = doc.content.to_lowercase();
        let title = doc.title.to_lowercase();
        let n = terms.len() as f64;

        let in_content = terms.iter().filter(|t| content.contains(t.as_str())).count() as f64;
        let in_title = terms.iter().filter(|t| title.contains(t.as_str())).count() as f64;

        (in_content / n + 0.5 * in_title / n).min(1.0)
    };

    let len = doc.content.chars().count();
    let mut quality: f64 = 0.5;
    if len > 100 {
        quality += 0.2;
    }
    if len > 500 {
        quality += 0.2;
    }
    if !doc.title.is_empty() {
        quality += 0.1;
    }

    (relevance, quality.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedGenerator(&'static str);

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate_completion(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl TextGenerator for DownGenerator {
        async fn generate_completion(&self, _prompt: &str) -> Result<String> {
            Err(CragError::upstream("llm", "503 service unavailable"))
        }
    }

    fn evaluator(generator: Option<Arc<dyn TextGenerator>>) -> ConfidenceEvaluator {
        ConfidenceEvaluator::new(generator, &CragConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_documents() {
        let result = evaluator(None)
            .evaluate("query", &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.confidence_tier, ConfidenceTier::None);
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.reasoning, "No documents retrieved");
    }

    #[tokio::test]
    async fn test_heuristic_high_and_none() {
        let e = evaluator(None);
        let cancel = CancellationToken::new();

        let relevant = vec![Document::new(
            "d1",
            "Rust ownership rules guarantee memory safety without a garbage collector.",
        )
        .with_title("Rust ownership")];
        let result = e.evaluate("rust ownership", &relevant, &cancel).await.unwrap();
        assert_eq!(result.confidence_tier, ConfidenceTier::High);
        assert!(result.document_scores[0].heuristic);

        let unrelated = vec![Document::new("d2", "Gardening tips for tomatoes.")];
        let result = e.evaluate("rust ownership", &unrelated, &cancel).await.unwrap();
        assert_eq!(result.confidence_tier, ConfidenceTier::None);
    }

    #[tokio::test]
    async fn test_llm_scores_and_floor_rule() {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator(
            "Sure! {\"relevance_score\": 0.9, \"quality_score\": 0.5, \"explanation\": \"ok\"}",
        ));
        let result = evaluator(Some(generator))
            .evaluate("q", &[Document::new("d", "x")], &CancellationToken::new())
            .await
            .unwrap();

        let score = &result.document_scores[0];
        assert!(!score.heuristic);
        assert_eq!(score.relevance_score, 0.9);
        // 0.9*0.4 + 0.5*0.3 = 0.51 < 0.9
        assert_eq!(score.overall_score, 0.9);
        assert_eq!(result.confidence_tier, ConfidenceTier::High);
    }

    #[tokio::test]
    async fn test_malformed_response_falls_back() {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator("I cannot help"));
        let result = evaluator(Some(generator))
            .evaluate("rust", &[Document::new("d", "rust")], &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.document_scores[0].heuristic);
        assert!(result.reasoning.contains("heuristically"));
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back() {
        let generator: Arc<dyn TextGenerator> = Arc::new(DownGenerator);
        let result = evaluator(Some(generator))
            .evaluate("rust", &[Document::new("d", "rust")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.document_scores[0].heuristic);
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let generator: Arc<dyn TextGenerator> = Arc::new(DownGenerator);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = evaluator(Some(generator))
            .evaluate("rust", &[Document::new("d", "rust")], &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    struct SlowGenerator {
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        async fn generate_completion(&self, _prompt: &str) -> Result<String> {
            use std::sync::atomic::Ordering;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(r#"{"relevance_score": 0.6, "quality_score": 0.6}"#.to_string())
        }
    }

    #[tokio::test]
    async fn test_documents_are_graded_concurrently_in_order() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let generator = Arc::new(SlowGenerator {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = CragConfig {
            max_concurrent_evaluations: 4,
            evaluation_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let e = ConfidenceEvaluator::new(
            Some(generator.clone() as Arc<dyn TextGenerator>),
            &config,
        )
        .unwrap();
        let docs: Vec<Document> = (0..12)
            .map(|i| Document::new(format!("d{}", i), "text"))
            .collect();

        let started = std::time::Instant::now();
        let result = e
            .evaluate("q", &docs, &CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        // Sequential grading would take 1.2s
        assert!(elapsed < Duration::from_millis(900), "took {:?}", elapsed);
        assert_eq!(generator.peak.load(Ordering::SeqCst), 4);
        let ids: Vec<&str> = result
            .document_scores
            .iter()
            .map(|s| s.document_id.as_str())
            .collect();
        let expected: Vec<String> = (0..12).map(|i| format!("d{}", i)).collect();
        assert_eq!(ids, expected);
        assert!(result.document_scores.iter().all(|s| !s.heuristic));
    }

    #[tokio::test]
    async fn test_heuristic_evaluation_skips_generator() {
        let generator: Arc<dyn TextGenerator> = Arc::new(DownGenerator);
        let e = evaluator(Some(generator));
        let docs = [Document::new("d", "rust ownership and borrowing")];

        let result = e.evaluate_heuristically("rust ownership", &docs);
        assert_eq!(result.confidence_tier, ConfidenceTier::High);
        assert!(result.document_scores[0].heuristic);
        assert_eq!(
            e.evaluate_heuristically("rust", &[]).confidence_tier,
            ConfidenceTier::None
        );
    }

    #[test]
    fn test_classify_and_thresholds() {
        let mut e = evaluator(None);
        assert_eq!(e.classify(0.8), ConfidenceTier::High);
        assert_eq!(e.classify(0.5), ConfidenceTier::Low);
        assert_eq!(e.classify(0.49), ConfidenceTier::None);

        e.set_thresholds(0.9, 0.2).unwrap();
        assert_eq!(e.classify(0.8), ConfidenceTier::Low);
        assert!(e.set_thresholds(0.2, 0.9).is_err());
        assert_eq!(e.thresholds(), (0.9, 0.2));
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(
            parse_evaluation_response(r#"{"relevance_score": 1.4, "quality_score": -0.2}"#)
                .unwrap(),
            (1.0, 0.0)
        );
        assert!(matches!(
            parse_evaluation_response("no json"),
            Err(CragError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_evaluation_response("} backwards {"),
            Err(CragError::MalformedResponse(_))
        ));
        assert!(parse_evaluation_response(r#"{"relevance_score": "high"}"#).is_err());
    }

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 10), "short");

        let text = format!("{} tail", "word ".repeat(300));
        let truncated = truncate_content(&text, 1000);
        assert!(truncated.ends_with("..."));
        assert!(truncated.chars().count() <= 1003);
        assert!(!truncated.trim_end_matches("...").ends_with(' '));

        let unbroken = "x".repeat(1200);
        assert_eq!(truncate_content(&unbroken, 1000).chars().count(), 1003);

        let wide = "é".repeat(1200);
        assert_eq!(truncate_content(&wide, 1000).chars().count(), 1003);
    }

    #[test]
    fn test_prompt_contains_query_and_title() {
        let doc = Document::new("d", "body text").with_title("My Title");
        let prompt = build_evaluation_prompt("what is rust", &doc);
        assert!(prompt.contains("Query: what is rust"));
        assert!(prompt.contains("Document Title: My Title"));
        assert!(prompt.contains("\"relevance_score\": 0.0"));
    }

    #[test]
    fn test_heuristic_scores() {
        let tokenizer = Tokenizer::default();
        let doc = Document::new("d", "alpha beta").with_title("alpha");
        let (relevance, quality) = heuristic_scores(&tokenizer, "alpha gamma", &doc);
        // content: 1/2, title: 0.5 * 1/2
        assert!((relevance - 0.75).abs() < 1e-12);
        assert!((quality - 0.6).abs() < 1e-12);

        let long = Document::new("d", "z".repeat(600));
        assert!((heuristic_scores(&tokenizer, "q", &long).1 - 0.9).abs() < 1e-12);
    }
}
