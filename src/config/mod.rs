//! Configuration management for crag-search
//!
//! A TOML file with one section per pipeline stage. Values can be overridden
//! through `CRAG_SECTION__KEY` environment variables and named profiles.

use crate::crag::{CragConfig, EvaluationCriteria};
use crate::error::{CragError, Result};
use crate::lexical::{Bm25Parameters, TokenizerConfig};
use crate::retrieval::{FusionAlgorithm, FusionOptions, HybridSearchOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub bm25: Bm25Parameters,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub fusion: FusionOptions,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub crag: CragSection,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Hybrid retrieval settings; timeouts are duration strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub enable_semantic: bool,
    pub enable_lexical: bool,
    pub semantic_top_k: usize,
    pub lexical_top_k: usize,
    pub final_top_k: usize,
    pub min_score: f64,
    pub semantic_timeout: String,
    pub lexical_timeout: String,
    /// Bound on a whole query, retrieval and correction included
    pub request_timeout: String,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enable_semantic: true,
            enable_lexical: true,
            semantic_top_k: 20,
            lexical_top_k: 20,
            final_top_k: 10,
            min_score: 0.0,
            semantic_timeout: "10s".to_string(),
            lexical_timeout: "5s".to_string(),
            request_timeout: "30s".to_string(),
        }
    }
}

/// Correction-stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CragSection {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub web_search_enabled: bool,
    pub max_web_results: usize,
    pub web_search_timeout: String,
    pub refinement_enabled: bool,
    pub relevance_threshold: f64,
    pub max_documents: usize,
    pub evaluation_timeout: String,
    pub max_concurrent_evaluations: usize,
    pub criteria: EvaluationCriteria,
}

impl Default for CragSection {
    fn default() -> Self {
        Self {
            high_threshold: 0.8,
            low_threshold: 0.5,
            web_search_enabled: true,
            max_web_results: 5,
            web_search_timeout: "10s".to_string(),
            refinement_enabled: true,
            relevance_threshold: 0.3,
            max_documents: 10,
            evaluation_timeout: "5s".to_string(),
            max_concurrent_evaluations: 4,
            criteria: EvaluationCriteria::default(),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_algorithm: Option<FusionAlgorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement_enabled: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CragError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CragError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CragError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| CragError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| CragError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(algorithm) = overrides.fusion_algorithm {
            self.fusion.algorithm = algorithm;
        }
        if let Some(top_k) = overrides.final_top_k {
            self.hybrid.final_top_k = top_k;
        }
        if let Some(high) = overrides.high_threshold {
            self.crag.high_threshold = high;
        }
        if let Some(low) = overrides.low_threshold {
            self.crag.low_threshold = low;
        }
        if let Some(enabled) = overrides.web_search_enabled {
            self.crag.web_search_enabled = enabled;
        }
        if let Some(enabled) = overrides.refinement_enabled {
            self.crag.refinement_enabled = enabled;
        }

        tracing::debug!("Applied configuration profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: CRAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("CRAG_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "BM25__K1" => self.bm25.k1 = parse_env(path, value)?,
            "BM25__B" => self.bm25.b = parse_env(path, value)?,
            "BM25__IDF_FLOOR" => self.bm25.idf_floor = parse_env(path, value)?,
            "TOKENIZER__ENABLE_STEMMING" => {
                self.tokenizer.enable_stemming = parse_env(path, value)?
            }
            "TOKENIZER__REMOVE_STOP_WORDS" => {
                self.tokenizer.remove_stop_words = parse_env(path, value)?
            }
            "FUSION__ALGORITHM" => self.fusion.algorithm = parse_env(path, value)?,
            "FUSION__RRF_CONSTANT" => self.fusion.rrf_constant = parse_env(path, value)?,
            "FUSION__NORMALIZATION" => self.fusion.normalization = parse_env(path, value)?,
            "FUSION__TIE_BREAKING" => self.fusion.tie_breaking = parse_env(path, value)?,
            "FUSION__ENABLE_DIVERSITY" => self.fusion.enable_diversity = parse_env(path, value)?,
            "HYBRID__ENABLE_SEMANTIC" => self.hybrid.enable_semantic = parse_env(path, value)?,
            "HYBRID__ENABLE_LEXICAL" => self.hybrid.enable_lexical = parse_env(path, value)?,
            "HYBRID__FINAL_TOP_K" => self.hybrid.final_top_k = parse_env(path, value)?,
            "HYBRID__SEMANTIC_TIMEOUT" => self.hybrid.semantic_timeout = value.to_string(),
            "HYBRID__LEXICAL_TIMEOUT" => self.hybrid.lexical_timeout = value.to_string(),
            "HYBRID__REQUEST_TIMEOUT" => self.hybrid.request_timeout = value.to_string(),
            "CRAG__HIGH_THRESHOLD" => self.crag.high_threshold = parse_env(path, value)?,
            "CRAG__LOW_THRESHOLD" => self.crag.low_threshold = parse_env(path, value)?,
            "CRAG__WEB_SEARCH_ENABLED" => self.crag.web_search_enabled = parse_env(path, value)?,
            "CRAG__REFINEMENT_ENABLED" => self.crag.refinement_enabled = parse_env(path, value)?,
            "CRAG__MAX_DOCUMENTS" => self.crag.max_documents = parse_env(path, value)?,
            "CRAG__MAX_CONCURRENT_EVALUATIONS" => {
                self.crag.max_concurrent_evaluations = parse_env(path, value)?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CragError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("crag-search").join("config.toml"))
    }

    /// Runtime options for the hybrid retriever
    pub fn hybrid_options(&self) -> Result<HybridSearchOptions> {
        Ok(HybridSearchOptions {
            enable_semantic: self.hybrid.enable_semantic,
            enable_lexical: self.hybrid.enable_lexical,
            semantic_top_k: self.hybrid.semantic_top_k,
            lexical_top_k: self.hybrid.lexical_top_k,
            final_top_k: self.hybrid.final_top_k,
            min_score: self.hybrid.min_score,
            semantic_timeout: parse_duration(&self.hybrid.semantic_timeout)?,
            lexical_timeout: parse_duration(&self.hybrid.lexical_timeout)?,
        })
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration(&self.hybrid.request_timeout)
    }

    /// Runtime settings for the correction stage
    pub fn crag_config(&self) -> Result<CragConfig> {
        Ok(CragConfig {
            high_threshold: self.crag.high_threshold,
            low_threshold: self.crag.low_threshold,
            web_search_enabled: self.crag.web_search_enabled,
            max_web_results: self.crag.max_web_results,
            web_search_timeout: parse_duration(&self.crag.web_search_timeout)?,
            refinement_enabled: self.crag.refinement_enabled,
            relevance_threshold: self.crag.relevance_threshold,
            max_documents: self.crag.max_documents,
            evaluation_timeout: parse_duration(&self.crag.evaluation_timeout)?,
            max_concurrent_evaluations: self.crag.max_concurrent_evaluations,
            criteria: self.crag.criteria,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            bm25: Bm25Parameters::default(),
            tokenizer: TokenizerConfig::default(),
            fusion: FusionOptions::default(),
            hybrid: HybridConfig::default(),
            crag: CragSection::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| CragError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse "250ms", "5s", "2m", "1h" or bare seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || CragError::Config(format!("Invalid duration format: '{}'", s));

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }
    let value: u64 = number.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => value.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{NormalizationMethod, TieBreaking};
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        let err = parse_duration("18446744073709551615m").unwrap_err();
        assert!(matches!(err, CragError::Config(_)));
        assert!(parse_duration("10000000000000000h").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.fusion.algorithm = FusionAlgorithm::Borda;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.fusion.algorithm, FusionAlgorithm::Borda);
        assert_eq!(loaded.hybrid, config.hybrid);
        assert_eq!(loaded.crag, config.crag);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[_meta]
schema_version = "1.0.0"

[fusion]
algorithm = "comb_mnz"
normalization = "z_score"

[hybrid]
lexical_timeout = "500ms"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fusion.algorithm, FusionAlgorithm::CombMnz);
        assert_eq!(config.fusion.normalization, NormalizationMethod::ZScore);
        assert_eq!(config.fusion.tie_breaking, TieBreaking::PreferSemantic);
        assert_eq!(config.bm25, Bm25Parameters::default());
        assert_eq!(
            config.hybrid_options().unwrap().lexical_timeout,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/crag/config.toml")).unwrap_err();
        assert!(matches!(err, CragError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                web_search_enabled: Some(false),
                final_top_k: Some(3),
                ..Default::default()
            },
        );

        config.apply_profile("offline").unwrap();
        assert!(!config.crag.web_search_enabled);
        assert_eq!(config.hybrid.final_top_k, 3);
        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_values() {
        let mut config = Config::default();
        config.set_value_from_env("BM25__K1", "1.5").unwrap();
        config.set_value_from_env("FUSION__ALGORITHM", "weighted").unwrap();
        config.set_value_from_env("CRAG__WEB_SEARCH_ENABLED", "false").unwrap();
        config.set_value_from_env("UNKNOWN__KEY", "x").unwrap();

        assert_eq!(config.bm25.k1, 1.5);
        assert_eq!(config.fusion.algorithm, FusionAlgorithm::Weighted);
        assert!(!config.crag.web_search_enabled);

        let err = config.set_value_from_env("BM25__B", "wide").unwrap_err();
        assert!(matches!(err, CragError::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_runtime_conversions() {
        let config = Config::default();
        let crag = config.crag_config().unwrap();
        assert_eq!(crag, CragConfig::default());
        assert_eq!(config.hybrid_options().unwrap(), HybridSearchOptions::default());
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(30));
    }
}
