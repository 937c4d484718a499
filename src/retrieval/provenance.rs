//! Unified ranked-result representation and fusion provenance

use ahash::{HashSet, HashSetExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Open key/value metadata carried alongside a document
pub type Metadata = serde_json::Map<String, Value>;

/// Which stage produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Lexical,
    Semantic,
    Hybrid,
    Web,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-source scores and ranks recorded by the fusion engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionProvenance {
    pub has_semantic: bool,
    pub has_lexical: bool,
    pub semantic_score: Option<f64>,
    pub semantic_rank: Option<usize>,
    pub lexical_score: Option<f64>,
    pub lexical_rank: Option<usize>,
}

impl FusionProvenance {
    /// Number of sources that contributed to the fused score
    pub fn source_count(&self) -> usize {
        usize::from(self.has_semantic) + usize::from(self.has_lexical)
    }

    /// Smaller of the two original ranks
    pub fn best_rank(&self) -> Option<usize> {
        match (self.semantic_rank, self.lexical_rank) {
            (Some(s), Some(l)) => Some(s.min(l)),
            (s, l) => s.or(l),
        }
    }
}

/// A document with a stage-specific score
///
/// Scores are only comparable within the stage that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub score: f64,
    pub source_kind: SourceKind,
    /// 1-based rank assigned by the producing stage
    pub origin_rank: usize,
    #[serde(default)]
    pub metadata: Metadata,
    pub retrieved_at: DateTime<Utc>,

    /// Marked snippets, only filled by lexical search with highlighting on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,

    /// Set by the fusion engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<FusionProvenance>,
}

impl RankedResult {
    pub fn new(
        document_id: impl Into<String>,
        content: impl Into<String>,
        score: f64,
        source_kind: SourceKind,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            content: content.into(),
            title: String::new(),
            url: String::new(),
            score,
            source_kind,
            origin_rank: 0,
            metadata: Metadata::new(),
            retrieved_at: Utc::now(),
            highlights: Vec::new(),
            provenance: None,
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

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.origin_rank = rank;
        self
    }

    /// Get a short preview of the content, cut on a character boundary
    pub fn preview(&self, max_chars: usize) -> String {
        match self.content.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &self.content[..idx]),
            None => self.content.clone(),
        }
    }
}

/// Look up a title in document metadata (`title`, then `chunk_title`)
pub fn metadata_title(metadata: &Metadata) -> String {
    ["title", "chunk_title"]
        .iter()
        .find_map(|key| metadata.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// Look up a URL in document metadata
pub fn metadata_url(metadata: &Metadata) -> String {
    metadata
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Agreement between a semantic and a lexical result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapMetrics {
    pub semantic_count: usize,
    pub lexical_count: usize,
    pub common_count: usize,
    /// Shared ids over distinct ids across both lists, 0 when both are empty
    pub overlap_ratio: f64,
    /// Shared ids in lexical rank order
    pub common_ids: Vec<String>,
}

pub fn result_overlap(semantic: &[RankedResult], lexical: &[RankedResult]) -> OverlapMetrics {
    let semantic_ids: HashSet<&str> = semantic.iter().map(|r| r.document_id.as_str()).collect();

    let mut lexical_ids: HashSet<&str> = HashSet::new();
    let mut common_ids = Vec::new();
    for result in lexical {
        let id = result.document_id.as_str();
        if lexical_ids.insert(id) && semantic_ids.contains(id) {
            common_ids.push(id.to_string());
        }
    }

    let union = semantic_ids.len() + lexical_ids.len() - common_ids.len();
    let overlap_ratio = if union == 0 {
        0.0
    } else {
        common_ids.len() as f64 / union as f64
    };

    OverlapMetrics {
        semantic_count: semantic_ids.len(),
        lexical_count: lexical_ids.len(),
        common_count: common_ids.len(),
        overlap_ratio,
        common_ids,
    }
}
