use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for crag-search
#[derive(Error, Debug)]
pub enum CragError {
    /// Document id absent from the lexical index
    #[error("Document not found: {id}")]
    NotFound { id: String },

    /// Caller supplied an unusable argument (empty query, zero top-k, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An external collaborator returned an error
    #[error("Upstream failure in {service}: {message}")]
    UpstreamFailure { service: String, message: String },

    /// An external collaborator did not answer within its deadline
    #[error("Upstream {service} timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    /// The enclosing query was cancelled while waiting on an external call
    #[error("Cancelled while waiting on {service}")]
    Cancelled { service: String },

    /// A text-generation backend returned an unparsable scoring payload
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CragError {
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Failures of an external collaborator, which callers degrade around
    /// instead of surfacing.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamFailure { .. } | Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for crag-search operations
pub type Result<T> = std::result::Result<T, CragError>;
