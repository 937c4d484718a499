//! End-to-end query path: hybrid retrieval followed by correction

use crate::crag::{CorrectionProcessor, CorrectionResult, Document};
use crate::error::{CragError, Result};
use crate::lexical::validate_query;
use crate::retrieval::HybridRetriever;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RagPipeline {
    retriever: HybridRetriever,
    processor: CorrectionProcessor,
    request_timeout: Duration,
}

impl RagPipeline {
    pub fn new(retriever: HybridRetriever, processor: CorrectionProcessor) -> Self {
        Self {
            retriever,
            processor,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn processor(&self) -> &CorrectionProcessor {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut CorrectionProcessor {
        &mut self.processor
    }

    /// Retrieve, evaluate and correct documents for a query
    ///
    /// The request timeout bounds the whole pass. Retrieval that overruns it
    /// is an error. Correction that overruns it degrades to the retrieved
    /// documents when there are any. Cancelling `cancel` aborts any
    /// outstanding external call.
    pub async fn answer(&self, query: &str, cancel: &CancellationToken) -> Result<CorrectionResult> {
        validate_query(query)?;

        let started = std::time::Instant::now();
        let deadline = Instant::now() + self.request_timeout;

        let retrieved = match timeout_at(deadline, self.retriever.search(query, cancel)).await {
            Ok(outcome) => outcome?,
            Err(_) => return Err(self.timed_out("retrieval")),
        };
        tracing::debug!("Retrieved {} candidates for correction", retrieved.len());

        let documents: Vec<Document> = retrieved.into_iter().map(Document::from).collect();
        let correction = self.processor.process_query(query, documents.clone(), cancel);

        match timeout_at(deadline, correction).await {
            Ok(outcome) => outcome,
            Err(_) if documents.is_empty() => Err(self.timed_out("correction")),
            Err(_) => {
                let note = format!(
                    "Correction did not finish within the {:?} request budget.",
                    self.request_timeout
                );
                Ok(self.processor.retrieved_only(query, documents, &note, started))
            }
        }
    }

    fn timed_out(&self, stage: &str) -> CragError {
        tracing::warn!("Query {} exceeded {:?}", stage, self.request_timeout);
        CragError::Timeout {
            service: "pipeline".to_string(),
            after: self.request_timeout,
        }
    }
}
