//! # Embedding Clients
//!
//! The scheduler talks to the embedding service through `EmbeddingClient`.
//! One call carries one sub-batch of texts and returns a position-aligned
//! vector or error per text, plus the rate-limit feedback the service
//! reported with the response.
//!
//! ## Key Components
//!
//! - `EmbeddingClient`: the seam between the scheduler and a backend
//! - `OpenAiClient`: OpenAI-compatible `/embeddings` backend over HTTP
//! - `RateLimitedClient`: client-side request pacing for any backend
//! - `ScriptedClient`: deterministic in-memory backend for tests and demos

use std::future::Future;

use crate::context::CallContext;
use crate::ratelimit::RateLimitFeedback;

mod error;
pub mod mock;
pub mod openai;
pub mod ratelimited;

pub use error::EmbeddingError;
pub use mock::ScriptedClient;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use ratelimited::RateLimitedClient;

/// A single embedding vector
pub type Embedding = Vec<f32>;

/// Response to one vectorize call
#[derive(Debug)]
pub struct VectorizeResponse {
    /// Per-text results aligned with the submitted texts, or the error that
    /// failed the whole call
    pub outcome: Result<Vec<Result<Embedding, EmbeddingError>>, EmbeddingError>,

    /// Rate-limit counters reported with the response, if any
    pub rate_limits: Option<RateLimitFeedback>,
}

impl VectorizeResponse {
    /// Every text vectorized
    pub fn vectors(vectors: Vec<Embedding>, rate_limits: Option<RateLimitFeedback>) -> Self {
        Self {
            outcome: Ok(vectors.into_iter().map(Ok).collect()),
            rate_limits,
        }
    }

    /// The whole call failed
    pub fn failed(error: EmbeddingError, rate_limits: Option<RateLimitFeedback>) -> Self {
        Self {
            outcome: Err(error),
            rate_limits,
        }
    }
}

/// Backend that turns texts into vectors
pub trait EmbeddingClient: Send + Sync {
    /// Vectorize one sub-batch of texts
    fn vectorize(
        &self,
        ctx: &CallContext,
        texts: &[String],
    ) -> impl Future<Output = VectorizeResponse> + Send;
}

impl<C: EmbeddingClient> EmbeddingClient for std::sync::Arc<C> {
    fn vectorize(
        &self,
        ctx: &CallContext,
        texts: &[String],
    ) -> impl Future<Output = VectorizeResponse> + Send {
        (**self).vectorize(ctx, texts)
    }
}
