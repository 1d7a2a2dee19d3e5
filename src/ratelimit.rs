//! # Rate Limit State
//!
//! Tracks the capacity the embedding service reports back after every call
//! and decides whether the next sub-batch can go out now, has to wait for a
//! reset, or has to be abandoned because the wait would overrun the caller's
//! deadline.
//!
//! ## Key Components
//!
//! - `RateLimitFeedback`: absolute counters reported with a response
//! - `RateLimitState`: the limiter shared by every call of one scheduler
//! - `Ceiling`: token bounds the packer fills sub-batches against
//! - `Admission`: outcome of the wait-or-abort policy
//!
//! The state moves between three phases: `Unconstrained` until the first
//! feedback arrives, then `Constrained` while there is room for the next
//! sub-batch and `Exhausted` when there is not. Feedback always replaces the
//! previous counters since the service reports absolute remaining capacity.

use std::time::Duration;

use tokio::time::Instant;

use crate::context::CallContext;

/// Stand-in for a counter the service has not bounded
pub const UNBOUNDED: usize = usize::MAX;

// Resets further out than this are clamped
const MAX_RESET: Duration = Duration::from_secs(24 * 60 * 60);

/// Rate-limit counters reported by the service with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitFeedback {
    /// Requests left in the current window
    pub remaining_requests: usize,

    /// Tokens left in the current window
    pub remaining_tokens: usize,

    /// Time until the counters are replenished
    pub reset_after: Duration,

    /// Requests allowed per window, when reported
    pub limit_requests: Option<usize>,

    /// Tokens allowed per window, when reported
    pub limit_tokens: Option<usize>,
}

impl RateLimitFeedback {
    pub fn new(remaining_requests: usize, remaining_tokens: usize, reset_after: Duration) -> Self {
        Self {
            remaining_requests,
            remaining_tokens,
            reset_after,
            limit_requests: None,
            limit_tokens: None,
        }
    }

    /// Feedback from a service that imposes no limits
    pub fn unlimited() -> Self {
        Self::new(UNBOUNDED, UNBOUNDED, Duration::ZERO)
    }

    /// Attach the full per-window limits
    pub fn with_limits(mut self, limit_requests: usize, limit_tokens: usize) -> Self {
        self.limit_requests = Some(limit_requests);
        self.limit_tokens = Some(limit_tokens);
        self
    }
}

/// Phase of the limiter relative to the next sub-batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterPhase {
    /// No feedback received yet
    Unconstrained,
    /// Room for the next sub-batch
    Constrained,
    /// No requests left, or not enough tokens for the next sub-batch
    Exhausted,
}

/// Token bounds for packing one sub-batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceiling {
    /// Tokens that can be spent right now; multi-item sub-batches stay within it
    pub available: usize,

    /// Largest cost the service accepts at all; a single item above it is too long
    pub limit: usize,
}

impl Ceiling {
    pub const UNBOUNDED: Ceiling = Ceiling {
        available: UNBOUNDED,
        limit: UNBOUNDED,
    };

    /// A ceiling where what is available is also the hard limit
    pub fn fixed(ceiling: usize) -> Self {
        Self {
            available: ceiling,
            limit: ceiling,
        }
    }
}

/// Decision of the wait-or-abort policy for one sub-batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch immediately
    Ready,
    /// Wait this long for the reset, then dispatch
    Wait(Duration),
    /// Waiting would overrun the deadline, or the call is already done
    Abort,
}

#[derive(Debug, Clone, Copy)]
struct Observed {
    remaining_requests: usize,
    remaining_tokens: usize,
    limit_requests: Option<usize>,
    limit_tokens: Option<usize>,
    /// Largest remaining-tokens value ever reported
    peak_tokens: usize,
    reset_at: Instant,
}

/// Limiter state shared by all calls going through one scheduler
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    observed: Option<Observed>,
}

impl RateLimitState {
    /// A limiter that has not heard from the service yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the counters with freshly reported ones
    pub fn apply(&mut self, feedback: &RateLimitFeedback) {
        let reset_at = Instant::now() + feedback.reset_after.min(MAX_RESET);
        let peak_tokens = self
            .observed
            .map_or(feedback.remaining_tokens, |o| o.peak_tokens.max(feedback.remaining_tokens));
        self.observed = Some(Observed {
            remaining_requests: feedback.remaining_requests,
            remaining_tokens: feedback.remaining_tokens,
            limit_requests: feedback.limit_requests,
            limit_tokens: feedback.limit_tokens,
            peak_tokens,
            reset_at,
        });
    }

    /// Assume the window has reset after a completed wait.
    ///
    /// Counters go back to the reported limits, or to unbounded when the
    /// service never reported any, until the next real feedback arrives.
    pub fn replenish(&mut self) {
        if let Some(observed) = self.observed.as_mut() {
            observed.remaining_requests = observed.limit_requests.unwrap_or(UNBOUNDED);
            observed.remaining_tokens = observed.limit_tokens.unwrap_or(UNBOUNDED);
            observed.reset_at = Instant::now();
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.observed.is_none()
    }

    pub fn remaining_requests(&self) -> Option<usize> {
        self.observed.map(|o| o.remaining_requests)
    }

    pub fn remaining_tokens(&self) -> Option<usize> {
        self.observed.map(|o| o.remaining_tokens)
    }

    /// Time left until the last reported reset, zero if it already passed
    pub fn reset_after(&self) -> Duration {
        self.observed
            .map(|o| o.reset_at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Phase of the limiter for a sub-batch costing `cost` tokens
    pub fn phase(&self, cost: usize) -> LimiterPhase {
        match self.observed {
            None => LimiterPhase::Unconstrained,
            Some(o) if o.remaining_requests == 0 || cost > o.remaining_tokens => {
                LimiterPhase::Exhausted
            }
            Some(_) => LimiterPhase::Constrained,
        }
    }

    /// Bounds the packer fills the next sub-batch against.
    ///
    /// Without a reported per-window limit, the largest remaining-tokens value
    /// seen so far stands in for it. A drained window says nothing about the
    /// limit, so it is treated as unknown until the reset.
    pub fn ceiling(&self) -> Ceiling {
        match self.observed {
            None => Ceiling::UNBOUNDED,
            Some(o) => {
                let limit = match o.limit_tokens {
                    Some(limit) => limit,
                    None if o.remaining_requests == 0 || o.remaining_tokens == 0 => UNBOUNDED,
                    None => o.peak_tokens,
                };
                Ceiling {
                    available: o.remaining_tokens,
                    limit: limit.max(o.remaining_tokens),
                }
            }
        }
    }

    /// Wait-or-abort policy for a sub-batch costing `cost` tokens
    pub fn admit(&self, cost: usize, ctx: &CallContext) -> Admission {
        if ctx.is_done() {
            return Admission::Abort;
        }
        match self.phase(cost) {
            LimiterPhase::Unconstrained | LimiterPhase::Constrained => Admission::Ready,
            LimiterPhase::Exhausted => {
                let wait = self.reset_after();
                if ctx.would_exceed(wait) {
                    Admission::Abort
                } else {
                    Admission::Wait(wait)
                }
            }
        }
    }
}
