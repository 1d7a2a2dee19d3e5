//! # Scripted Embedding Client
//!
//! Provides a `ScriptedClient` that implements `EmbeddingClient` without any
//! network access. Texts steer its behaviour through leading directives, so a
//! test can describe a whole rate-limit scenario in the records themselves:
//!
//! - `tokens N`   : report `N` remaining tokens with this response
//! - `requests N` : report `N` remaining requests with this response
//! - `reset N`    : report a reset `N` milliseconds out
//! - `wait N`     : take `N` milliseconds to answer
//! - `error MSG`  : reject this text with `MSG`
//! - `fail MSG`   : fail the whole call with `MSG`
//!
//! Responses without directives report the configured full limits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{Embedding, EmbeddingClient, EmbeddingError, VectorizeResponse};
use crate::context::CallContext;
use crate::ratelimit::RateLimitFeedback;

/// A deterministic in-memory embedding backend
#[derive(Debug, Clone)]
pub struct ScriptedClient {
    limit_requests: usize,
    limit_tokens: usize,
    reset_after: Duration,
    report_limits: bool,
    /// Every dispatched sub-batch, shared across clones
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedClient {
    /// A client reporting 100 requests and 100 tokens per window, resetting after one second
    pub fn new() -> Self {
        Self {
            limit_requests: 100,
            limit_tokens: 100,
            reset_after: Duration::from_secs(1),
            report_limits: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Full capacity reported when no directive overrides it
    pub fn with_capacity(mut self, requests: usize, tokens: usize) -> Self {
        self.limit_requests = requests;
        self.limit_tokens = tokens;
        self
    }

    /// Default reset delay reported with each response
    pub fn with_reset_after(mut self, reset_after: Duration) -> Self {
        self.reset_after = reset_after;
        self
    }

    /// Also report the full per-window limits
    pub fn with_reported_limits(mut self) -> Self {
        self.report_limits = true;
        self
    }

    /// Texts of every sub-batch dispatched so far
    pub async fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().await.clone()
    }

    /// A stable vector derived from the text
    fn embed(text: &str) -> Embedding {
        let words = text.split_whitespace().count();
        vec![text.len() as f32, words as f32, 1.0]
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive<'a> {
    Tokens(usize),
    Requests(usize),
    Reset(u64),
    Wait(u64),
    Error(&'a str),
    Fail(&'a str),
    None,
}

fn directive(text: &str) -> Directive<'_> {
    let mut words = text.splitn(2, char::is_whitespace);
    let keyword = words.next().unwrap_or_default();
    let rest = words.next().unwrap_or_default().trim();
    let number = rest.split_whitespace().next().and_then(|n| n.parse::<u64>().ok());

    match (keyword, number) {
        ("tokens", Some(n)) => Directive::Tokens(n as usize),
        ("requests", Some(n)) => Directive::Requests(n as usize),
        ("reset", Some(n)) => Directive::Reset(n),
        ("wait", Some(n)) => Directive::Wait(n),
        ("error", _) => Directive::Error(rest),
        ("fail", _) => Directive::Fail(rest),
        _ => Directive::None,
    }
}

impl EmbeddingClient for ScriptedClient {
    async fn vectorize(&self, _ctx: &CallContext, texts: &[String]) -> VectorizeResponse {
        self.calls.lock().await.push(texts.to_vec());

        let mut feedback = RateLimitFeedback::new(self.limit_requests, self.limit_tokens, self.reset_after);
        if self.report_limits {
            feedback = feedback.with_limits(self.limit_requests, self.limit_tokens);
        }

        let mut wait = Duration::ZERO;
        let mut failure = None;
        for text in texts {
            match directive(text) {
                Directive::Tokens(n) => feedback.remaining_tokens = n,
                Directive::Requests(n) => feedback.remaining_requests = n,
                Directive::Reset(ms) => feedback.reset_after = Duration::from_millis(ms),
                Directive::Wait(ms) => wait += Duration::from_millis(ms),
                Directive::Fail(msg) => failure = Some(msg.to_string()),
                Directive::Error(_) | Directive::None => {}
            }
        }

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        if let Some(message) = failure {
            return VectorizeResponse::failed(
                EmbeddingError::Api {
                    status_code: 500,
                    message,
                },
                Some(feedback),
            );
        }

        let outcomes = texts
            .iter()
            .map(|text| match directive(text) {
                Directive::Error(msg) => Err(EmbeddingError::Item(msg.to_string())),
                _ => Ok(Self::embed(text)),
            })
            .collect();

        VectorizeResponse {
            outcome: Ok(outcomes),
            rate_limits: Some(feedback),
        }
    }
}
