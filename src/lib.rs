use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Knowledge source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Dimension mismatch at position {position}: expected {expected}, found {found}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        found: usize,
    },

    #[error("Got {embeddings} embeddings for {documents} documents")]
    EmbeddingCountMismatch { documents: usize, embeddings: usize },

    #[error("Index contains no documents")]
    EmptyIndex,

    #[error("No index found at {}; run `rag-relay build-index` first", path.display())]
    IndexNotFound { path: PathBuf },

    #[error("Corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Upstream LLM error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod query;
pub mod server;
