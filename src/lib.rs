//! crag-search - hybrid retrieval with corrective augmentation
//!
//! Lexical (BM25) and semantic rankings are fused into one result list, which
//! a confidence evaluator grades. Weak results are enriched with or replaced
//! by web results.

pub mod cli;
pub mod config;
pub mod crag;
pub mod error;
pub mod lexical;
pub mod pipeline;
pub mod retrieval;
pub mod upstream;

pub use error::{CragError, Result};
