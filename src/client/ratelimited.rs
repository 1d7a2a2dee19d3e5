use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug_span, info_span, Instrument};

use super::{EmbeddingClient, VectorizeResponse};
use crate::context::CallContext;

/// Paces calls to an embedding client with a fixed client-side quota.
///
/// This sits in front of the service's own limits: the scheduler still adapts
/// to whatever the service reports, the quota only keeps the request rate
/// below a known ceiling.
#[derive(Clone)]
pub struct RateLimitedClient<C: EmbeddingClient> {
    client: C,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<C> RateLimitedClient<C>
where
    C: EmbeddingClient,
{
    pub fn new(client: C, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            client,
            limiter: Arc::new(limiter),
        }
    }

    /// Allow at most `requests` calls per minute
    pub fn per_minute(client: C, requests: NonZeroU32) -> Self {
        Self::new(client, RateLimiter::direct(Quota::per_minute(requests)))
    }

    pub fn inner(&self) -> &C {
        &self.client
    }
}

impl<C: EmbeddingClient> EmbeddingClient for RateLimitedClient<C> {
    async fn vectorize(&self, ctx: &CallContext, texts: &[String]) -> VectorizeResponse {
        self.limiter.until_ready().instrument(debug_span!("limiter")).await;
        self.client
            .vectorize(ctx, texts)
            .instrument(info_span!("vectorize", texts = texts.len()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedClient;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_passes_through() {
        let client = RateLimitedClient::per_minute(
            ScriptedClient::new(),
            NonZeroU32::new(600).unwrap(),
        );
        let response = client
            .vectorize(&CallContext::background(), &["hello".to_string()])
            .await;
        assert_eq!(response.outcome.unwrap().len(), 1);
        assert_eq!(client.inner().calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_paces_requests() {
        // 600 per minute is one every 100ms once the single-cell burst is spent
        let quota = Quota::per_minute(NonZeroU32::new(600).unwrap())
            .allow_burst(NonZeroU32::new(1).unwrap());
        let client = RateLimitedClient::new(ScriptedClient::new(), RateLimiter::direct(quota));

        let started = Instant::now();
        for _ in 0..3 {
            client
                .vectorize(&CallContext::background(), &["x".to_string()])
                .await;
        }
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
