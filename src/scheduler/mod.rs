//! # Batching Scheduler
//!
//! The scheduler takes a slice of records, renders the ones the caller did
//! not skip, cuts the texts into sub-batches sized to the capacity the
//! embedding service last reported and sends them one after another. Every
//! record ends up skipped, vectorized or failed; `submit` itself never fails.
//!
//! ## Key Components
//!
//! - `Scheduler`: owns the rate-limit state and runs submit calls
//! - `SchedulerConfig`: time budget and batching limits
//!
//! ## Concurrency
//!
//! Submit calls on one scheduler run strictly one at a time, in the order
//! they arrive. The rate-limit state lives behind the same FIFO mutex that
//! serializes the calls, so a call always sees the feedback of every call
//! admitted before it.

mod config;


pub use config::{SchedulerConfig, SchedulerConfigBuilder, DEFAULT_MAX_BATCH_ITEMS};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn, Instrument, Span};

use crate::batch::{pending_items, BatchError, BatchResult, Packer, PendingItem, SubBatch};
use crate::client::{EmbeddingClient, EmbeddingError};
use crate::context::CallContext;
use crate::ratelimit::{Admission, RateLimitState};
use crate::record::{ClassConfig, Record};
use crate::render::{PropertyRenderer, TextRenderer};
use crate::tokens::{TokenEstimator, WhitespaceEstimator};

/// Whether a call keeps going after a sub-batch
enum Flow {
    Continue,
    Abort,
}

/// Batches records for an embedding client under its reported rate limits
pub struct Scheduler<C, R = PropertyRenderer> {
    client: C,
    renderer: R,
    estimator: Box<dyn TokenEstimator>,
    config: SchedulerConfig,
    /// Tokio's mutex is fair, which gives FIFO admission
    state: Mutex<RateLimitState>,
    span: Span,
}

impl<C: EmbeddingClient> Scheduler<C> {
    /// Create a scheduler with the given per-call time budget.
    ///
    /// Submit calls are recorded as children of `span`.
    pub fn new(client: C, time_budget: Duration, span: Span) -> Self {
        Self::with_config(
            client,
            SchedulerConfig::builder().time_budget(time_budget).build(),
        )
        .with_span(span)
    }

    /// Create a scheduler from a full configuration, logging under the current span
    pub fn with_config(client: C, config: SchedulerConfig) -> Self {
        Self {
            client,
            renderer: PropertyRenderer,
            estimator: Box::new(WhitespaceEstimator),
            config,
            state: Mutex::new(RateLimitState::new()),
            span: Span::current(),
        }
    }
}

impl<C, R> Scheduler<C, R>
where
    C: EmbeddingClient,
    R: TextRenderer,
{
    /// Replace the text renderer
    pub fn with_renderer<R2: TextRenderer>(self, renderer: R2) -> Scheduler<C, R2> {
        Scheduler {
            client: self.client,
            renderer,
            estimator: self.estimator,
            config: self.config,
            state: self.state,
            span: self.span,
        }
    }

    /// Replace the token cost estimator
    pub fn with_estimator(mut self, estimator: impl TokenEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Record submit calls under `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Parent span of every submit call
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Snapshot of the rate-limit state, taken in turn with submit calls
    pub async fn rate_limits(&self) -> RateLimitState {
        self.state.lock().await.clone()
    }

    /// Vectorize `records`, leaving out those flagged in `skip`.
    ///
    /// `skip` runs parallel to `records`; missing entries count as not
    /// skipped. The call finishes by the earlier of the context's deadline and
    /// the configured time budget, counted from now.
    pub async fn submit(
        &self,
        ctx: &CallContext,
        records: &[Record],
        skip: &[bool],
        class_config: &ClassConfig,
    ) -> BatchResult {
        let ctx = ctx.clone().with_timeout(self.config.time_budget);
        let span = tracing::info_span!(parent: &self.span, "submit", records = records.len());
        self.run(&ctx, records, skip, class_config)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        ctx: &CallContext,
        records: &[Record],
        skip: &[bool],
        class_config: &ClassConfig,
    ) -> BatchResult {
        if skip.len() != records.len() {
            warn!(
                "Skip mask has {} entries for {} records",
                skip.len(),
                records.len()
            );
        }

        let mut state = self.state.lock().await;
        debug!("Admitted");

        let mut result = BatchResult::with_len(records.len());
        let mut packer = Packer::new(self.render(records, skip, class_config));
        let mut probe = self.config.probe_unconstrained && state.is_unconstrained();

        while !packer.is_empty() {
            let max_items = if probe { 1 } else { self.config.max_batch_items };
            let next = packer.next_batch(state.ceiling(), max_items);

            for too_long in next.too_long {
                debug!(
                    "Record {} costs {} tokens, over the ceiling of {}",
                    too_long.index, too_long.cost, too_long.ceiling
                );
                result.set_error(
                    too_long.index,
                    BatchError::TextTooLong {
                        cost: too_long.cost,
                        ceiling: too_long.ceiling,
                    },
                );
            }

            let Some(batch) = next.batch else {
                continue;
            };
            probe = false;

            if let Flow::Abort = self.process(ctx, &mut state, batch, &mut result).await {
                let abandoned = Self::fail_deadline(packer.drain(), &mut result);
                if abandoned > 0 {
                    warn!("Abandoned {} unsent records", abandoned);
                }
                break;
            }
        }

        info!(
            "Vectorized {} of {} records, {} failed",
            result.success_count(),
            records.len(),
            result.error_count()
        );
        result
    }

    fn render(&self, records: &[Record], skip: &[bool], class_config: &ClassConfig) -> Vec<PendingItem> {
        let items = pending_items(
            records,
            skip,
            class_config,
            &self.renderer,
            self.estimator.as_ref(),
        );
        trace!(
            "Rendered {} of {} records for embedding",
            items.len(),
            records.len()
        );
        items
    }

    /// Wait for capacity if needed, then send one sub-batch and merge its results
    async fn process(
        &self,
        ctx: &CallContext,
        state: &mut RateLimitState,
        batch: SubBatch,
        result: &mut BatchResult,
    ) -> Flow {
        let texts = batch.texts();
        let mut retries = 0;

        loop {
            if !Self::wait_for_capacity(ctx, state, batch.cost()).await {
                Self::fail_deadline(batch.into_items(), result);
                return Flow::Abort;
            }

            debug!(
                "Dispatching {} records costing {} tokens",
                batch.len(),
                batch.cost()
            );
            let response = self.client.vectorize(ctx, &texts).await;
            if let Some(feedback) = &response.rate_limits {
                trace!(?feedback, "Applying rate limit feedback");
                state.apply(feedback);
            }

            match response.outcome {
                Err(EmbeddingError::RateLimited { retry_after })
                    if retries < self.config.max_rate_limit_retries =>
                {
                    retries += 1;
                    info!(
                        "Sub-batch rate limited, retrying after {:?} (attempt {}/{})",
                        retry_after, retries, self.config.max_rate_limit_retries
                    );
                }
                Err(error) => {
                    debug!("Sub-batch of {} records failed: {}", batch.len(), error);
                    let error = Arc::new(error);
                    for item in batch.items() {
                        result.set_error(item.index, BatchError::CallFailed(Arc::clone(&error)));
                    }
                    return Flow::Continue;
                }
                Ok(outcomes) => {
                    Self::merge(&batch, outcomes, result);
                    return Flow::Continue;
                }
            }
        }
    }

    /// Apply the wait-or-abort policy; `false` means the call must stop
    async fn wait_for_capacity(ctx: &CallContext, state: &mut RateLimitState, cost: usize) -> bool {
        match state.admit(cost, ctx) {
            Admission::Ready => true,
            Admission::Abort => {
                warn!("Deadline reached before rate limits reset");
                false
            }
            Admission::Wait(wait) => {
                info!("Rate limit exhausted, waiting {:?} for reset", wait);
                if ctx.sleep(wait).await {
                    state.replenish();
                    true
                } else {
                    warn!("Wait for rate limit reset cut short");
                    false
                }
            }
        }
    }

    fn merge(
        batch: &SubBatch,
        outcomes: Vec<Result<Vec<f32>, EmbeddingError>>,
        result: &mut BatchResult,
    ) {
        if outcomes.len() > batch.len() {
            warn!(
                "Client returned {} results for {} texts",
                outcomes.len(),
                batch.len()
            );
        }
        let mut outcomes = outcomes.into_iter();
        for item in batch.items() {
            match outcomes.next() {
                Some(Ok(vector)) => result.set_vector(item.index, vector),
                Some(Err(error)) => {
                    debug!("Record {} failed: {}", item.index, error);
                    result.set_error(item.index, BatchError::VectorizationFailed(error));
                }
                None => result.set_error(
                    item.index,
                    BatchError::VectorizationFailed(EmbeddingError::MissingVector),
                ),
            }
        }
    }

    fn fail_deadline(items: impl IntoIterator<Item = PendingItem>, result: &mut BatchResult) -> usize {
        let mut count = 0;
        for item in items {
            result.set_error(item.index, BatchError::DeadlineExceeded);
            count += 1;
        }
        count
    }
}
