//! Error types for embedding clients

use std::time::Duration;

use thiserror::Error;

/// Errors reported by an embedding client, either for a whole call or for one item
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code
        status_code: u16,
        /// Error message
        message: String,
    },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The service rejected the call because a rate limit was hit
    #[error("Rate limit exceeded. Please retry after {retry_after:?}")]
    RateLimited {
        /// Time until the limit resets
        retry_after: Duration,
    },

    /// Unexpected response format
    #[error("Unexpected response format: {0}")]
    UnexpectedResponse(String),

    /// The service answered without a vector for this item
    #[error("no vector returned for item")]
    MissingVector,

    /// The service rejected this particular item
    #[error("{0}")]
    Item(String),
}

impl From<serde_json::Error> for EmbeddingError {
    fn from(err: serde_json::Error) -> Self {
        Self::UnexpectedResponse(err.to_string())
    }
}
