//! Rank fusion of semantic and lexical result lists
//!
//! Supported algorithms:
//! - Reciprocal Rank Fusion: `Σ 1 / (k + rank)`
//! - Weighted: `semantic * w_s + lexical * w_l`
//! - Borda: `Σ (candidates - rank + 1)`
//! - CombSUM / CombMNZ over (normalized) scores

use super::provenance::{FusionProvenance, RankedResult, SourceKind};
use super::similarity::{jaccard, word_set, DUPLICATE_SIMILARITY};
use crate::error::{CragError, Result};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Scores closer than this are treated as tied
pub const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionAlgorithm {
    #[default]
    Rrf,
    Weighted,
    Borda,
    CombSum,
    CombMnz,
}

impl FromStr for FusionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "rrf" | "reciprocal_rank" => Ok(Self::Rrf),
            "weighted" => Ok(Self::Weighted),
            "borda" => Ok(Self::Borda),
            "comb_sum" | "combsum" => Ok(Self::CombSum),
            "comb_mnz" | "combmnz" => Ok(Self::CombMnz),
            other => Err(format!("unknown fusion algorithm '{}'", other)),
        }
    }
}

impl fmt::Display for FusionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rrf => "rrf",
            Self::Weighted => "weighted",
            Self::Borda => "borda",
            Self::CombSum => "comb_sum",
            Self::CombMnz => "comb_mnz",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    None,
    #[default]
    MinMax,
    ZScore,
    Sum,
}

impl FromStr for NormalizationMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "min_max" | "minmax" => Ok(Self::MinMax),
            "z_score" | "zscore" => Ok(Self::ZScore),
            "sum" => Ok(Self::Sum),
            other => Err(format!("unknown normalization '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaking {
    #[default]
    PreferSemantic,
    PreferLexical,
    /// Smaller of the two original ranks wins
    PreferLowerRank,
}

impl FromStr for TieBreaking {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "prefer_semantic" | "semantic" => Ok(Self::PreferSemantic),
            "prefer_lexical" | "lexical" => Ok(Self::PreferLexical),
            "prefer_lower_rank" | "rank" => Ok(Self::PreferLowerRank),
            other => Err(format!("unknown tie-breaking strategy '{}'", other)),
        }
    }
}

/// Fusion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionOptions {
    pub algorithm: FusionAlgorithm,
    /// RRF constant `k`
    pub rrf_constant: f64,
    pub semantic_weight: f64,
    pub lexical_weight: f64,
    pub normalization: NormalizationMethod,
    pub tie_breaking: TieBreaking,
    pub enable_diversity: bool,
    /// Multiplicative boost `1 + w` for results passing the diversity gate
    pub diversity_weight: f64,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            algorithm: FusionAlgorithm::Rrf,
            rrf_constant: 60.0,
            semantic_weight: 0.6,
            lexical_weight: 0.4,
            normalization: NormalizationMethod::MinMax,
            tie_breaking: TieBreaking::PreferSemantic,
            enable_diversity: false,
            diversity_weight: 0.1,
        }
    }
}

impl FusionOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.rrf_constant > 0.0 && self.rrf_constant.is_finite()) {
            return Err(CragError::InvalidArgument(format!(
                "rrf_constant must be positive, got {}",
                self.rrf_constant
            )));
        }
        if self.semantic_weight < 0.0 || self.lexical_weight < 0.0 {
            return Err(CragError::InvalidArgument(
                "fusion weights must be non-negative".to_string(),
            ));
        }
        if self.diversity_weight < 0.0 {
            return Err(CragError::InvalidArgument(
                "diversity_weight must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-document fusion state
struct FusionCandidate {
    result: RankedResult,
    semantic_score: f64,
    semantic_rank: usize,
    lexical_score: f64,
    lexical_rank: usize,
    has_semantic: bool,
    has_lexical: bool,
    original_semantic_score: Option<f64>,
    original_lexical_score: Option<f64>,
}

impl FusionCandidate {
    fn from_result(result: RankedResult) -> Self {
        Self {
            result,
            semantic_score: 0.0,
            semantic_rank: 0,
            lexical_score: 0.0,
            lexical_rank: 0,
            has_semantic: false,
            has_lexical: false,
            original_semantic_score: None,
            original_lexical_score: None,
        }
    }

    fn source_count(&self) -> f64 {
        f64::from(u8::from(self.has_semantic) + u8::from(self.has_lexical))
    }

    fn score(&self, options: &FusionOptions, total_candidates: usize) -> f64 {
        let mut score = 0.0;
        match options.algorithm {
            FusionAlgorithm::Rrf => {
                if self.has_semantic {
                    score += 1.0 / (options.rrf_constant + self.semantic_rank as f64);
                }
                if self.has_lexical {
                    score += 1.0 / (options.rrf_constant + self.lexical_rank as f64);
                }
            }
            FusionAlgorithm::Weighted => {
                if self.has_semantic {
                    score += self.semantic_score * options.semantic_weight;
                }
                if self.has_lexical {
                    score += self.lexical_score * options.lexical_weight;
                }
            }
            FusionAlgorithm::Borda => {
                let total = total_candidates as f64;
                if self.has_semantic {
                    score += total - self.semantic_rank as f64 + 1.0;
                }
                if self.has_lexical {
                    score += total - self.lexical_rank as f64 + 1.0;
                }
            }
            FusionAlgorithm::CombSum => {
                score = self.semantic_score + self.lexical_score;
            }
            FusionAlgorithm::CombMnz => {
                score = (self.semantic_score + self.lexical_score) * self.source_count();
            }
        }
        score
    }

    fn provenance(&self) -> FusionProvenance {
        FusionProvenance {
            has_semantic: self.has_semantic,
            has_lexical: self.has_lexical,
            semantic_score: self.original_semantic_score,
            semantic_rank: self.has_semantic.then_some(self.semantic_rank),
            lexical_score: self.original_lexical_score,
            lexical_rank: self.has_lexical.then_some(self.lexical_rank),
        }
    }
}

/// Stateless fusion engine holding validated options
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    options: FusionOptions,
}

impl FusionEngine {
    pub fn new(options: FusionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &FusionOptions {
        &self.options
    }

    pub fn fuse(&self, semantic: Vec<RankedResult>, lexical: Vec<RankedResult>) -> Vec<RankedResult> {
        fuse(semantic, lexical, &self.options)
    }
}

/// Merge two ranked lists into one
///
/// If either list is empty the other is returned untouched.
pub fn fuse(
    mut semantic: Vec<RankedResult>,
    mut lexical: Vec<RankedResult>,
    options: &FusionOptions,
) -> Vec<RankedResult> {
    if semantic.is_empty() {
        return lexical;
    }
    if lexical.is_empty() {
        return semantic;
    }

    let original_semantic: Vec<f64> = semantic.iter().map(|r| r.score).collect();
    let original_lexical: Vec<f64> = lexical.iter().map(|r| r.score).collect();

    // Step 1: Normalize each list independently
    normalize_scores(&mut semantic, options.normalization);
    normalize_scores(&mut lexical, options.normalization);

    // Step 2: One candidate per distinct document, in first-seen order
    let mut candidates: Vec<FusionCandidate> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (i, result) in semantic.into_iter().enumerate() {
        if positions.contains_key(&result.document_id) {
            continue;
        }
        positions.insert(result.document_id.clone(), candidates.len());

        let mut candidate = FusionCandidate::from_result(result);
        candidate.semantic_score = candidate.result.score;
        candidate.semantic_rank = i + 1;
        candidate.has_semantic = true;
        candidate.original_semantic_score = Some(original_semantic[i]);
        candidates.push(candidate);
    }

    for (i, result) in lexical.into_iter().enumerate() {
        let score = result.score;
        let pos = match positions.get(&result.document_id) {
            Some(&pos) => {
                if candidates[pos].has_lexical {
                    continue;
                }
                fill_missing_fields(&mut candidates[pos].result, &result);
                pos
            }
            None => {
                let pos = candidates.len();
                positions.insert(result.document_id.clone(), pos);
                candidates.push(FusionCandidate::from_result(result));
                pos
            }
        };

        let candidate = &mut candidates[pos];
        candidate.lexical_score = score;
        candidate.lexical_rank = i + 1;
        candidate.has_lexical = true;
        candidate.original_lexical_score = Some(original_lexical[i]);
    }

    // Step 3: Score
    let total = candidates.len();
    let mut fused: Vec<RankedResult> = candidates
        .into_iter()
        .map(|candidate| {
            let score = candidate.score(options, total);
            let provenance = candidate.provenance();
            let mut result = candidate.result;
            result.score = score;
            result.source_kind = SourceKind::Hybrid;
            result.provenance = Some(provenance);
            result
        })
        .collect();

    // Step 4: Order with tie-breaking
    sort_with_ties(&mut fused, options.tie_breaking);

    // Step 5: Diversity gate
    if options.enable_diversity && options.diversity_weight > 0.0 {
        fused = apply_diversity(fused, options.diversity_weight);
        sort_with_ties(&mut fused, options.tie_breaking);
    }

    for (i, result) in fused.iter_mut().enumerate() {
        result.origin_rank = i + 1;
    }

    fused
}

fn fill_missing_fields(target: &mut RankedResult, other: &RankedResult) {
    if target.content.is_empty() {
        target.content = other.content.clone();
    }
    if target.title.is_empty() {
        target.title = other.title.clone();
    }
    if target.url.is_empty() {
        target.url = other.url.clone();
    }
}

/// Rescale scores in place. Degenerate lists (zero range, zero deviation,
/// zero sum) are left unchanged.
pub fn normalize_scores(results: &mut [RankedResult], method: NormalizationMethod) {
    if results.is_empty() {
        return;
    }

    match method {
        NormalizationMethod::None => {}
        NormalizationMethod::MinMax => {
            let min = results.iter().map(|r| r.score).fold(f64::INFINITY, f64::min);
            let max = results
                .iter()
                .map(|r| r.score)
                .fold(f64::NEG_INFINITY, f64::max);
            let range = max - min;
            if range > 0.0 {
                for r in results.iter_mut() {
                    r.score = (r.score - min) / range;
                }
            }
        }
        NormalizationMethod::ZScore => {
            let n = results.len() as f64;
            let mean = results.iter().map(|r| r.score).sum::<f64>() / n;
            let variance = results
                .iter()
                .map(|r| (r.score - mean).powi(2))
                .sum::<f64>()
                / n;
            let std_dev = variance.sqrt();
            if std_dev > 0.0 {
                for r in results.iter_mut() {
                    r.score = (r.score - mean) / std_dev;
                }
            }
        }
        NormalizationMethod::Sum => {
            // A non-positive total has no meaningful share; scores stay raw
            let sum: f64 = results.iter().map(|r| r.score).sum();
            if sum > 0.0 {
                for r in results.iter_mut() {
                    r.score /= sum;
                }
            } else {
                tracing::debug!(
                    "Skipping sum normalization of {} results with total score {}",
                    results.len(),
                    sum
                );
            }
        }
    }
}

fn tie_order(a: &RankedResult, b: &RankedResult, strategy: TieBreaking) -> Ordering {
    let pa = a.provenance.as_ref();
    let pb = b.provenance.as_ref();

    let preferred = match strategy {
        TieBreaking::PreferSemantic => {
            let has = |p: Option<&FusionProvenance>| p.is_some_and(|p| p.has_semantic);
            has(pb).cmp(&has(pa))
        }
        TieBreaking::PreferLexical => {
            let has = |p: Option<&FusionProvenance>| p.is_some_and(|p| p.has_lexical);
            has(pb).cmp(&has(pa))
        }
        TieBreaking::PreferLowerRank => {
            let rank = |p: Option<&FusionProvenance>| {
                p.and_then(FusionProvenance::best_rank).unwrap_or(usize::MAX)
            };
            rank(pa).cmp(&rank(pb))
        }
    };

    preferred.then_with(|| a.document_id.cmp(&b.document_id))
}

/// Sort by score descending; runs of scores within [`TIE_TOLERANCE`] of the
/// run head are ordered by the tie-breaking strategy, then by document id.
pub fn sort_with_ties(results: &mut [RankedResult], strategy: TieBreaking) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });

    let mut start = 0;
    while start < results.len() {
        let head = results[start].score;
        let mut end = start + 1;
        while end < results.len() && (head - results[end].score).abs() < TIE_TOLERANCE {
            end += 1;
        }
        if end - start > 1 {
            results[start..end].sort_by(|a, b| tie_order(a, b, strategy));
        }
        start = end;
    }
}

/// Keep results whose word-level similarity to every kept result is at most
/// the duplicate threshold, boosting each kept score by `1 + weight`.
fn apply_diversity(results: Vec<RankedResult>, weight: f64) -> Vec<RankedResult> {
    let mut kept: Vec<RankedResult> = Vec::with_capacity(results.len());
    let mut kept_words: Vec<HashSet<String>> = Vec::with_capacity(results.len());

    for mut result in results {
        let words = word_set(&format!("{} {}", result.content, result.title));
        if kept_words
            .iter()
            .any(|seen| jaccard(&words, seen) > DUPLICATE_SIMILARITY)
        {
            tracing::debug!("Diversity gate dropped {}", result.document_id);
            continue;
        }

        result.score *= 1.0 + weight;
        kept.push(result);
        kept_words.push(words);
    }

    kept
}

/// Heuristic quality of a fused list in [0, 1]
///
/// `0.3 * min(variance, 1) + 0.3 * source diversity + 0.4 * method coverage`
pub fn fusion_quality(results: &[RankedResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }

    let mut quality = 0.0;

    if results.len() > 1 {
        let n = results.len() as f64;
        let mean = results.iter().map(|r| r.score).sum::<f64>() / n;
        let variance = results
            .iter()
            .map(|r| (r.score - mean).powi(2))
            .sum::<f64>()
            / n;
        quality += variance.min(1.0) * 0.3;
    }

    let diversity = if results.len() <= 1 {
        1.0
    } else {
        let mut kinds = HashSet::new();
        for r in results {
            kinds.insert(r.source_kind);
        }
        (kinds.len() as f64 / 2.0).min(1.0)
    };
    quality += diversity * 0.3;

    let has_semantic = results.iter().any(|r| match &r.provenance {
        Some(p) => p.has_semantic,
        None => r.source_kind == SourceKind::Semantic,
    });
    let has_lexical = results.iter().any(|r| match &r.provenance {
        Some(p) => p.has_lexical,
        None => r.source_kind == SourceKind::Lexical,
    });
    let coverage = 0.5 * f64::from(u8::from(has_semantic)) + 0.5 * f64::from(u8::from(has_lexical));
    quality += coverage * 0.4;

    quality.min(1.0)
}
