//! Hybrid retrieval: ranked-search capability, rank fusion and provenance
//!
//! Semantic and lexical searchers run concurrently; their rankings are merged
//! by the [`FusionEngine`] using one of several fusion algorithms.

mod fusion;
mod hybrid;
mod provenance;
mod similarity;

pub use fusion::{
    fuse, fusion_quality, normalize_scores, sort_with_ties, FusionAlgorithm, FusionEngine,
    FusionOptions, NormalizationMethod, TieBreaking, TIE_TOLERANCE,
};
pub use hybrid::{HybridRetriever, HybridSearchOptions, RankedSearcher, SearchComparison};
pub use provenance::{
    metadata_title, metadata_url, result_overlap, FusionProvenance, Metadata, OverlapMetrics,
    RankedResult, SourceKind,
};
pub use similarity::{jaccard, text_similarity, word_set, DUPLICATE_SIMILARITY};
