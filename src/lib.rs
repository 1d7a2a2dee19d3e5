//! # vecbatch - Rate-limit aware batching for embedding services
//!
//! This crate batches text-bearing records for an external embedding
//! service while staying inside the rate limits the service reports back
//! with every response: remaining requests, remaining tokens and the time
//! until they reset. Each call also runs under a time budget.
//!
//! ## Features
//!
//! - Greedy, order-preserving packing of texts into sub-batches under a token ceiling
//! - Adapts the ceiling to the capacity reported after every response
//! - Waits for rate-limit resets when the deadline allows, aborts cleanly when it does not
//! - Per-record results: one failed record never aborts the others
//! - Concurrent callers on one scheduler are served one at a time, in arrival order
//! - OpenAI-compatible HTTP client reading `x-ratelimit-*` headers
//! - Optional client-side request pacing with `governor`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use vecbatch::client::OpenAiClient;
//! use tracing::info_span;
//! use vecbatch::{CallContext, ClassConfig, Record, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAiClient::from_env()?;
//!     let scheduler = Scheduler::new(client, Duration::from_secs(30), info_span!("indexer"));
//!
//!     let records = vec![
//!         Record::new("Article").with_property("title", "Batching under rate limits"),
//!         Record::new("Article").with_property("title", "Skipped on purpose"),
//!     ];
//!     let result = scheduler
//!         .submit(
//!             &CallContext::background(),
//!             &records,
//!             &[false, true],
//!             &ClassConfig::new().vectorize_class_name(true),
//!         )
//!         .await;
//!
//!     for (index, error) in &result.errors {
//!         eprintln!("record {} failed: {}", index, error);
//!     }
//!     Ok(())
//! }
//! ```

mod error;

pub mod batch;
pub mod client;
pub mod context;
pub mod ratelimit;
pub mod record;
pub mod render;
pub mod scheduler;
pub mod tokens;

pub use batch::{BatchError, BatchResult, ItemOutcome};
pub use context::{CallContext, CancelHandle};
pub use error::{Error, Result};
pub use record::{ClassConfig, Record};
pub use scheduler::{Scheduler, SchedulerConfig};

/// Re-export of commonly used types
pub mod prelude {
    pub use crate::batch::{BatchError, BatchResult, ItemOutcome};
    pub use crate::client::{EmbeddingClient, EmbeddingError, VectorizeResponse};
    pub use crate::context::CallContext;
    pub use crate::error::{Error, Result};
    pub use crate::ratelimit::RateLimitFeedback;
    pub use crate::record::{ClassConfig, Record};
    pub use crate::render::TextRenderer;
    pub use crate::scheduler::{Scheduler, SchedulerConfig};
    pub use crate::tokens::TokenEstimator;
}
