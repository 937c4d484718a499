//! CLI command definitions and parsing
use crate::error::{CragError, Result};
use crate::lexical::SourceDocument;
use crate::retrieval::Metadata;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "crag-search",
    version,
    author = "neur0map",
    about = "Hybrid BM25 + semantic retrieval with corrective augmentation",
    long_about = "crag-search indexes a document corpus for BM25 search, fuses lexical and semantic \
                  rankings, and grades the fused results to decide whether they can be used as-is, \
                  should be enriched with web results, or replaced entirely."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/crag-search/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Retrieve, grade and correct documents for a query
    Query {
        /// Search query text
        query: String,

        /// JSONL corpus, one {id, content, title?, url?, metadata?} object per line
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Maximum number of documents to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Configuration profile to apply
        #[arg(short, long)]
        profile: Option<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Lexical (BM25) search only
    Search {
        /// Search query text
        query: String,

        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Maximum number of results to return
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Mark matched terms in result snippets
        #[arg(long)]
        highlight: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show the per-term BM25 breakdown for one document
    Explain {
        query: String,

        /// Document id to explain
        document_id: String,

        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,
    },

    /// Show lexical index statistics for a corpus
    Stats {
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Debug, Deserialize)]
struct CorpusRecord {
    id: String,
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

impl From<CorpusRecord> for SourceDocument {
    fn from(record: CorpusRecord) -> Self {
        let mut metadata = record.metadata;
        if let Some(title) = record.title {
            metadata.insert("title".to_string(), title.into());
        }
        if let Some(url) = record.url {
            metadata.insert("url".to_string(), url.into());
        }
        SourceDocument::new(record.id, record.content).with_metadata(metadata)
    }
}

/// Read a JSONL corpus; blank lines are skipped
pub fn load_corpus(path: &Path) -> Result<Vec<SourceDocument>> {
    let file = std::fs::File::open(path).map_err(|e| CragError::Io {
        source: e,
        context: format!("Failed to open corpus: {:?}", path),
    })?;

    let mut documents = Vec::new();
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| CragError::Io {
            source: e,
            context: format!("Failed to read corpus line {}", i + 1),
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let record: CorpusRecord = serde_json::from_str(&line).map_err(|e| CragError::Json {
            source: e,
            context: format!("Invalid corpus record on line {}", i + 1),
        })?;
        documents.push(record.into());
    }

    tracing::debug!("Loaded {} documents from {:?}", documents.len(), path);
    Ok(documents)
}
