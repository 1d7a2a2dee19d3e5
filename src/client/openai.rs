//! OpenAI-compatible embeddings backend
//!
//! This module provides an `EmbeddingClient` for services speaking the
//! OpenAI `/embeddings` protocol. Besides the vectors it reads the
//! `x-ratelimit-*` response headers, which is what lets the scheduler adapt
//! its batching to the capacity the service has left.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::{Embedding, EmbeddingClient, EmbeddingError, VectorizeResponse};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::ratelimit::{RateLimitFeedback, UNBOUNDED};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Reset assumed for a 429 that carries no timing headers
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Configuration for the OpenAI client
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Bearer token
    pub api_key: String,

    /// API base, the `/embeddings` path is appended
    pub base_url: String,

    /// Embedding model name
    pub model: String,

    /// Requested vector dimensions, model default when `None`
    pub dimensions: Option<usize>,

    /// Optional `OpenAI-Organization` header
    pub organization: Option<String>,

    /// Request timeout
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: None,
            organization: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Read `OPENAI_API_KEY`, and optionally `OPENAI_BASE_URL` and `OPENAI_EMBEDDING_MODEL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable must be set".to_string()))?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("OPENAI_EMBEDDING_MODEL") {
            config.model = model;
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn embeddings_url(&self) -> Result<Url> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        Url::parse(&url).map_err(|e| Error::Config(format!("Invalid URL: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Embedding,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for an OpenAI-compatible embeddings endpoint
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: ReqwestClient,
    url: Url,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(EmbeddingError::Http)?;
        let url = config.embeddings_url()?;
        Ok(Self {
            client,
            url,
            config,
        })
    }

    /// Create a client configured from the environment
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    #[instrument(skip(self, texts), fields(texts = texts.len(), model = %self.config.model), level = "debug")]
    async fn request(&self, texts: &[String]) -> VectorizeResponse {
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            encoding_format: "float",
            dimensions: self.config.dimensions,
        };

        let mut request = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some(organization) = &self.config.organization {
            request = request.header("OpenAI-Organization", organization);
        }

        debug!("Sending embeddings request");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return VectorizeResponse::failed(EmbeddingError::Http(e), None),
        };

        let status = response.status();
        let rate_limits = parse_rate_limits(response.headers());
        let retry_after = parse_retry_after(response.headers());
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return VectorizeResponse::failed(EmbeddingError::Http(e), rate_limits),
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by embeddings endpoint: {}", error_message(&text));
            let mut feedback = rate_limits
                .unwrap_or_else(|| RateLimitFeedback::new(0, UNBOUNDED, DEFAULT_RETRY_AFTER));
            feedback.remaining_requests = 0;
            if let Some(retry_after) = retry_after {
                feedback.reset_after = retry_after;
            }
            return VectorizeResponse::failed(
                EmbeddingError::RateLimited {
                    retry_after: feedback.reset_after,
                },
                Some(feedback),
            );
        }

        if !status.is_success() {
            error!("API error: {} - {}", status, text);
            let error = if status == StatusCode::UNAUTHORIZED {
                EmbeddingError::Auth("Invalid API key or credentials".to_string())
            } else {
                EmbeddingError::Api {
                    status_code: status.as_u16(),
                    message: error_message(&text),
                }
            };
            return VectorizeResponse::failed(error, rate_limits);
        }

        match serde_json::from_str::<EmbeddingResponse>(&text) {
            Ok(parsed) => VectorizeResponse {
                outcome: Ok(align(parsed.data, texts.len())),
                rate_limits,
            },
            Err(e) => {
                error!("Failed to parse response: {}", e);
                VectorizeResponse::failed(e.into(), rate_limits)
            }
        }
    }
}

impl EmbeddingClient for OpenAiClient {
    async fn vectorize(&self, _ctx: &CallContext, texts: &[String]) -> VectorizeResponse {
        self.request(texts).await
    }
}

/// Order vectors by their `index`, marking positions the service skipped
fn align(data: Vec<EmbeddingData>, len: usize) -> Vec<std::result::Result<Embedding, EmbeddingError>> {
    let mut slots: Vec<Option<Embedding>> = vec![None; len];
    for item in data {
        if let Some(slot) = slots.get_mut(item.index) {
            *slot = Some(item.embedding);
        }
    }
    slots
        .into_iter()
        .map(|slot| slot.ok_or(EmbeddingError::MissingVector))
        .collect()
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

fn header_usize(headers: &HeaderMap, name: &str) -> Option<usize> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn header_duration(headers: &HeaderMap, name: &str) -> Option<Duration> {
    parse_duration(headers.get(name)?.to_str().ok()?)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<f64>().ok().and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Read the `x-ratelimit-*` headers, `None` when the service sent none
pub fn parse_rate_limits(headers: &HeaderMap) -> Option<RateLimitFeedback> {
    let remaining_requests = header_usize(headers, "x-ratelimit-remaining-requests");
    let remaining_tokens = header_usize(headers, "x-ratelimit-remaining-tokens");
    if remaining_requests.is_none() && remaining_tokens.is_none() {
        return None;
    }
    let remaining_requests = remaining_requests.unwrap_or(UNBOUNDED);
    let remaining_tokens = remaining_tokens.unwrap_or(UNBOUNDED);

    let reset_requests = header_duration(headers, "x-ratelimit-reset-requests").unwrap_or_default();
    let reset_tokens = header_duration(headers, "x-ratelimit-reset-tokens").unwrap_or_default();
    // The counter that ran out decides when capacity comes back
    let reset_after = match (remaining_requests == 0, remaining_tokens == 0) {
        (true, false) => reset_requests,
        (false, true) => reset_tokens,
        _ => reset_requests.max(reset_tokens),
    };

    Some(RateLimitFeedback {
        remaining_requests,
        remaining_tokens,
        reset_after,
        limit_requests: header_usize(headers, "x-ratelimit-limit-requests"),
        limit_tokens: header_usize(headers, "x-ratelimit-limit-tokens"),
    })
}

/// Parse Go-style durations as sent in reset headers: `1s`, `6m0s`, `20ms`, `1.5s`
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let mut nanos = 0.0f64;
    let mut rest = value;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number: f64 = rest[..number_end].parse().ok()?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "h" => 3.6e12,
            "m" => 6e10,
            "s" => 1e9,
            "ms" => 1e6,
            "us" | "µs" => 1e3,
            "ns" => 1.0,
            _ => return None,
        };
        rest = &rest[unit_end..];
        nanos += number * scale;
    }
    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> OpenAiClient {
        OpenAiClient::new(OpenAiConfig::new("test-key").base_url(server.url())).unwrap()
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_duration("6m0s"), Some(Duration::from_secs(360)));
        assert_eq!(parse_duration("20ms"), Some(Duration::from_millis(20)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("1h2m3s"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_duration("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn test_parse_rate_limits() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_rate_limits(&headers), None);

        headers.insert("x-ratelimit-limit-requests", "3000".parse().unwrap());
        headers.insert("x-ratelimit-limit-tokens", "1000000".parse().unwrap());
        headers.insert("x-ratelimit-remaining-requests", "0".parse().unwrap());
        headers.insert("x-ratelimit-remaining-tokens", "999990".parse().unwrap());
        headers.insert("x-ratelimit-reset-requests", "20ms".parse().unwrap());
        headers.insert("x-ratelimit-reset-tokens", "6m0s".parse().unwrap());

        let feedback = parse_rate_limits(&headers).unwrap();
        assert_eq!(feedback.remaining_requests, 0);
        assert_eq!(feedback.remaining_tokens, 999_990);
        assert_eq!(feedback.limit_requests, Some(3000));
        assert_eq!(feedback.limit_tokens, Some(1_000_000));
        // Requests ran out, so their reset applies
        assert_eq!(feedback.reset_after, Duration::from_millis(20));
    }

    #[test]
    fn test_embeddings_url() {
        let config = OpenAiConfig::new("k").base_url("http://localhost:8080/v1/");
        assert_eq!(
            config.embeddings_url().unwrap().as_str(),
            "http://localhost:8080/v1/embeddings"
        );
        assert!(OpenAiConfig::new("k").base_url("not a url").embeddings_url().is_err());
    }

    #[tokio::test]
    async fn test_vectorize_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-remaining-requests", "99")
            .with_header("x-ratelimit-remaining-tokens", "5000")
            .with_header("x-ratelimit-reset-requests", "1s")
            .with_header("x-ratelimit-reset-tokens", "2s")
            .with_body(
                json!({
                    "object": "list",
                    "data": [
                        {"object": "embedding", "index": 1, "embedding": [0.3, 0.4]},
                        {"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}
                    ],
                    "model": "text-embedding-3-small"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let response = client
            .vectorize(&CallContext::background(), &texts(&["first", "second"]))
            .await;

        mock.assert_async().await;
        let outcomes = response.outcome.unwrap();
        assert_eq!(outcomes[0].as_ref().unwrap(), &vec![0.1, 0.2]);
        assert_eq!(outcomes[1].as_ref().unwrap(), &vec![0.3, 0.4]);

        let feedback = response.rate_limits.unwrap();
        assert_eq!(feedback.remaining_requests, 99);
        assert_eq!(feedback.remaining_tokens, 5000);
        assert_eq!(feedback.reset_after, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_vectorize_missing_index() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(json!({"data": [{"index": 0, "embedding": [1.0]}]}).to_string())
            .create_async()
            .await;

        let response = client_for(&server)
            .vectorize(&CallContext::background(), &texts(&["a", "b"]))
            .await;
        let outcomes = response.outcome.unwrap();
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(EmbeddingError::MissingVector)));
        assert!(response.rate_limits.is_none());
    }

    #[tokio::test]
    async fn test_vectorize_rate_limited() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/embeddings")
            .with_status(429)
            .with_header("retry-after", "3")
            .with_body(json!({"error": {"message": "Rate limit reached"}}).to_string())
            .create_async()
            .await;

        let response = client_for(&server)
            .vectorize(&CallContext::background(), &texts(&["a"]))
            .await;

        assert!(matches!(
            response.outcome,
            Err(EmbeddingError::RateLimited { retry_after }) if retry_after == Duration::from_secs(3)
        ));
        let feedback = response.rate_limits.unwrap();
        assert_eq!(feedback.remaining_requests, 0);
        assert_eq!(feedback.reset_after, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_vectorize_api_errors() {
        let mut server = Server::new_async().await;
        let _unauthorized = server
            .mock("POST", "/embeddings")
            .with_status(401)
            .with_body("{}")
            .create_async()
            .await;

        let response = client_for(&server)
            .vectorize(&CallContext::background(), &texts(&["a"]))
            .await;
        assert!(matches!(response.outcome, Err(EmbeddingError::Auth(_))));

        let mut server = Server::new_async().await;
        let _bad_request = server
            .mock("POST", "/embeddings")
            .with_status(400)
            .with_body(json!({"error": {"message": "input too long"}}).to_string())
            .create_async()
            .await;

        let response = client_for(&server)
            .vectorize(&CallContext::background(), &texts(&["a"]))
            .await;
        match response.outcome {
            Err(EmbeddingError::Api {
                status_code,
                message,
            }) => {
                assert_eq!(status_code, 400);
                assert_eq!(message, "input too long");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_vectorize_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let response = client_for(&server)
            .vectorize(&CallContext::background(), &texts(&["a"]))
            .await;
        assert!(matches!(
            response.outcome,
            Err(EmbeddingError::UnexpectedResponse(_))
        ));
    }
}
