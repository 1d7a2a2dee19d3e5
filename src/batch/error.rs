//! Per-item error types for batched vectorization

use std::sync::Arc;

use thiserror::Error;

use crate::client::EmbeddingError;

/// Why a single record ended up without a vector.
///
/// None of these abort the enclosing call; they are recorded against the
/// record's index and the remaining records carry on.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The rendered text costs more than the service accepts in one request
    #[error("text too long for vectorization")]
    TextTooLong {
        /// Estimated cost of the text
        cost: usize,
        /// Ceiling it was measured against
        ceiling: usize,
    },

    /// The service rejected this item
    #[error("vectorization failed: {0}")]
    VectorizationFailed(#[source] EmbeddingError),

    /// The whole request carrying this item failed
    #[error("vectorization call failed: {0}")]
    CallFailed(#[source] Arc<EmbeddingError>),

    /// A rate-limit wait would overrun the deadline, or the call was cancelled
    #[error("context deadline exceeded or cancelled")]
    DeadlineExceeded,
}

impl BatchError {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    pub fn is_text_too_long(&self) -> bool {
        matches!(self, Self::TextTooLong { .. })
    }
}
