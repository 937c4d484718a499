use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{CragError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        // Validate schema version
        Self::validate_schema_version(config, &mut errors);

        // Validate scoring settings
        Self::validate_bm25(config, &mut errors);
        Self::validate_tokenizer(config, &mut errors);

        // Validate fusion settings
        Self::validate_fusion(config, &mut errors);

        // Validate retrieval settings
        Self::validate_hybrid(config, &mut errors);

        // Validate correction settings
        Self::validate_crag(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CragError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_bm25(config: &Config, errors: &mut Vec<ValidationError>) {
        let bm25 = &config.bm25;
        if !(bm25.k1 > 0.0 && bm25.k1.is_finite()) {
            errors.push(ValidationError::new(
                "bm25.k1",
                format!("k1 must be greater than 0, got {}", bm25.k1),
            ));
        }

        if !(0.0..=1.0).contains(&bm25.b) {
            errors.push(ValidationError::new(
                "bm25.b",
                format!("b must be between 0.0 and 1.0, got {}", bm25.b),
            ));
        }

        if !(bm25.idf_floor >= 0.0 && bm25.idf_floor.is_finite()) {
            errors.push(ValidationError::new(
                "bm25.idf_floor",
                "IDF floor must be non-negative",
            ));
        }
    }

    fn validate_tokenizer(config: &Config, errors: &mut Vec<ValidationError>) {
        let tokenizer = &config.tokenizer;
        if tokenizer.min_term_length == 0 {
            errors.push(ValidationError::new(
                "tokenizer.min_term_length",
                "Minimum term length must be greater than 0",
            ));
        }

        if tokenizer.min_term_length > tokenizer.max_term_length {
            errors.push(ValidationError::new(
                "tokenizer.max_term_length",
                format!(
                    "Maximum term length ({}) is below minimum ({})",
                    tokenizer.max_term_length, tokenizer.min_term_length
                ),
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let fusion = &config.fusion;
        if !(fusion.rrf_constant > 0.0 && fusion.rrf_constant.is_finite()) {
            errors.push(ValidationError::new(
                "fusion.rrf_constant",
                format!("RRF constant must be greater than 0, got {}", fusion.rrf_constant),
            ));
        }

        for (path, weight) in [
            ("fusion.semantic_weight", fusion.semantic_weight),
            ("fusion.lexical_weight", fusion.lexical_weight),
            ("fusion.diversity_weight", fusion.diversity_weight),
        ] {
            if weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be non-negative, got {}", weight),
                ));
            }
        }
    }

    fn validate_hybrid(config: &Config, errors: &mut Vec<ValidationError>) {
        let hybrid = &config.hybrid;
        if !hybrid.enable_semantic && !hybrid.enable_lexical {
            errors.push(ValidationError::new(
                "hybrid.enable_lexical",
                "At least one of semantic or lexical search must be enabled",
            ));
        }

        for (path, value) in [
            ("hybrid.semantic_top_k", hybrid.semantic_top_k),
            ("hybrid.lexical_top_k", hybrid.lexical_top_k),
            ("hybrid.final_top_k", hybrid.final_top_k),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Top-k must be greater than 0"));
            }
        }

        for (path, value) in [
            ("hybrid.semantic_timeout", &hybrid.semantic_timeout),
            ("hybrid.lexical_timeout", &hybrid.lexical_timeout),
            ("hybrid.request_timeout", &hybrid.request_timeout),
        ] {
            Self::validate_duration(path, value, errors);
        }
    }

    fn validate_crag(config: &Config, errors: &mut Vec<ValidationError>) {
        let crag = &config.crag;
        for (path, value) in [
            ("crag.high_threshold", crag.high_threshold),
            ("crag.low_threshold", crag.low_threshold),
            ("crag.relevance_threshold", crag.relevance_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Threshold must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }

        if crag.low_threshold > crag.high_threshold {
            errors.push(ValidationError::new(
                "crag.low_threshold",
                format!(
                    "Low threshold ({}) must not exceed high threshold ({})",
                    crag.low_threshold, crag.high_threshold
                ),
            ));
        }

        if crag.max_documents == 0 {
            errors.push(ValidationError::new(
                "crag.max_documents",
                "Max documents must be greater than 0",
            ));
        }

        if crag.max_concurrent_evaluations == 0 {
            errors.push(ValidationError::new(
                "crag.max_concurrent_evaluations",
                "Max concurrent evaluations must be greater than 0",
            ));
        }

        if crag.web_search_enabled && crag.max_web_results == 0 {
            errors.push(ValidationError::new(
                "crag.max_web_results",
                "Max web results must be greater than 0 when web search is enabled",
            ));
        }

        let criteria = &crag.criteria;
        for (path, weight) in [
            ("crag.criteria.relevance_weight", criteria.relevance_weight),
            ("crag.criteria.quality_weight", criteria.quality_weight),
            ("crag.criteria.freshness_weight", criteria.freshness_weight),
            ("crag.criteria.authority_weight", criteria.authority_weight),
        ] {
            if weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be non-negative, got {}", weight),
                ));
            }
        }

        Self::validate_duration("crag.web_search_timeout", &crag.web_search_timeout, errors);
        Self::validate_duration("crag.evaluation_timeout", &crag.evaluation_timeout, errors);
    }

    fn validate_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        match parse_duration(value) {
            Ok(d) if d.is_zero() => {
                errors.push(ValidationError::new(path, "Duration must be greater than 0"));
            }
            Ok(_) => {}
            Err(_) => {
                errors.push(ValidationError::new(
                    path,
                    format!("Invalid duration format: {}", value),
                ));
            }
        }
    }
}
