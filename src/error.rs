//! Error types for the vecbatch crate
//!
//! Item-level failures never surface here; they are reported per record in
//! `BatchResult`. This type covers setting things up: configuration, client
//! construction and reading input.

use thiserror::Error;

use crate::client::EmbeddingError;

/// Result type for vecbatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vecbatch operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding client error
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
