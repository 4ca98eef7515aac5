//! Rate-limited, retrying HTTP client for the upstream API
//!
//! Every attempt passes through the concurrency semaphore and the token
//! bucket before it is sent, and every response is classified into an
//! `HttpError` kind that the retry manager understands.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::ratelimit::RateLimiter;
use super::retry::{RetryManager, RetryPolicy};
use super::TimeoutClass;
use crate::config::{HttpConfig, RateLimitMode, TimeoutConfig, UpstreamConfig};
use crate::error::HttpError;
use crate::otel::{RequestRecord, RequestRecorder};

/// Successful (2xx) upstream response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub body: Bytes,
}

impl HttpResponse {
    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Timeout class of each attempt
    pub timeout: TimeoutClass,
    /// Query string parameters
    pub query: Vec<(String, String)>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    /// Options with the given timeout class
    pub fn with_timeout(timeout: TimeoutClass) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Add a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// HTTP client with rate limiting, retry and response classification
///
/// Features:
/// - Global token bucket shared by all callers
/// - Concurrent request limiting via semaphore
/// - Bounded exponential-backoff retry of transient failures
/// - HTTP 429 handling with Retry-After support
/// - One `RequestRecord` per attempt for metrics
pub struct ResilientClient {
    client: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    semaphore: Arc<Semaphore>,
    retry: RetryManager,
    timeouts: TimeoutConfig,
    mode: RateLimitMode,
    recorder: Option<Arc<dyn RequestRecorder>>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("base_url", &self.base_url)
            .field("mode", &self.mode)
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}

impl ResilientClient {
    /// Create a client from configuration, with its own token bucket
    pub fn new(upstream: &UpstreamConfig, http: &HttpConfig) -> Result<Self, HttpError> {
        let limiter = Arc::new(RateLimiter::new(&http.rate_limit));
        Self::with_limiter(upstream, http, limiter)
    }

    /// Create a client sharing an existing token bucket
    pub fn with_limiter(
        upstream: &UpstreamConfig,
        http: &HttpConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(upstream.user_agent.clone())
            .build()
            .map_err(|e| HttpError::Validation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: upstream.base_url.trim_end_matches('/').to_string(),
            limiter,
            semaphore: Arc::new(Semaphore::new(http.max_concurrent.max(1))),
            retry: RetryManager::new(RetryPolicy::from_config(&http.retry)),
            timeouts: http.timeouts.clone(),
            mode: http.rate_limit.mode,
            recorder: None,
        })
    }

    /// Report every attempt to the given recorder
    pub fn with_recorder(mut self, recorder: Arc<dyn RequestRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryManager::new(policy);
        self
    }

    /// GET a JSON resource
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.request_raw(Method::GET, path, None, options).await?.json()
    }

    /// POST a JSON body and decode the JSON response
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.request(Method::POST, path, Some(body), options).await
    }

    /// PUT a JSON body and decode the JSON response
    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.request(Method::PUT, path, Some(body), options).await
    }

    /// PATCH a JSON body and decode the JSON response
    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.request(Method::PATCH, path, Some(body), options).await
    }

    /// DELETE a resource, ignoring the response body
    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<(), HttpError> {
        self.request_raw(Method::DELETE, path, None, options).await?;
        Ok(())
    }

    /// Send a request with an optional JSON body and decode the JSON response
    pub async fn request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| HttpError::Validation(format!("Unserializable request body: {}", e)))?;
        self.request_raw(method, path, body, options).await?.json()
    }

    /// Send a request through rate limiting and retry, returning the raw 2xx response
    pub async fn request_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        let url = self.build_url(path)?;
        let headers = build_headers(&options.headers)?;

        self.retry
            .execute(|attempt| {
                self.attempt(&method, path, &url, body.as_ref(), &headers, &options, attempt)
            })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        method: &Method,
        path: &str,
        url: &str,
        body: Option<&serde_json::Value>,
        headers: &HeaderMap,
        options: &RequestOptions,
        attempt: u32,
    ) -> Result<HttpResponse, HttpError> {
        // Acquire semaphore permit to limit concurrent requests
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| HttpError::Network("client is shut down".to_string()))?;

        self.acquire_token().await?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(self.timeouts.duration(options.timeout))
            .headers(headers.clone());
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, path = path, attempt, "Sending upstream request");

        let started = Instant::now();
        let result = match request.send().await {
            Ok(response) => classify(response).await,
            Err(e) => Err(map_transport_error(&e)),
        };
        let duration = started.elapsed();

        match &result {
            Ok(response) => debug!(
                method = %method,
                path = path,
                status = response.status,
                body_size = response.body.len(),
                duration_ms = duration.as_millis() as u64,
                "Received response"
            ),
            Err(e) => warn!(
                method = %method,
                path = path,
                attempt,
                kind = %e.kind(),
                error = %e,
                duration_ms = duration.as_millis() as u64,
                "Upstream request failed"
            ),
        }

        if let Some(recorder) = &self.recorder {
            recorder.record_request(&RequestRecord {
                path: path.to_string(),
                method: method.to_string(),
                attempt,
                duration,
                status: match &result {
                    Ok(response) => Some(response.status),
                    Err(e) => e.status(),
                },
                error: result.as_ref().err().map(HttpError::kind),
            });
        }

        result
    }

    /// Take one token, waiting for refills or failing fast per configuration
    async fn acquire_token(&self) -> Result<(), HttpError> {
        loop {
            match self.limiter.consume(1) {
                Ok(()) => return Ok(()),
                Err(exceeded) => match self.mode {
                    RateLimitMode::FailFast => {
                        debug!(
                            next_refill_in_ms = exceeded.next_refill_in_ms,
                            "Local rate limit exceeded"
                        );
                        return Err(exceeded.into());
                    }
                    RateLimitMode::Wait => {
                        let wait = Duration::from_millis(exceeded.next_refill_in_ms.max(1));
                        debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
                        tokio::time::sleep(wait).await;
                    }
                },
            }
        }
    }

    fn build_url(&self, path: &str) -> Result<String, HttpError> {
        if path.is_empty() {
            return Err(HttpError::Validation("empty request path".to_string()));
        }
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        if path.starts_with('/') {
            Ok(format!("{}{}", self.base_url, path))
        } else {
            Ok(format!("{}/{}", self.base_url, path))
        }
    }

    /// Shared token bucket
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Get number of available permits (concurrent request slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HttpError::Validation(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HttpError::Validation(format!("Invalid header value: {}", e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn map_transport_error(e: &reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Network(e.to_string())
    }
}

/// Map a response to success or a classified failure
async fn classify(response: reqwest::Response) -> Result<HttpResponse, HttpError> {
    let status = response.status();

    if status.is_success() {
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| map_transport_error(&e))?;
        return Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        });
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            Err(HttpError::RateLimited { retry_after_secs })
        }
        status if status.is_server_error() => Err(HttpError::ServerError {
            status: status.as_u16(),
        }),
        status => Err(HttpError::ClientError {
            status: status.as_u16(),
        }),
    }
}

/// Parse a Retry-After value: delta-seconds or an HTTP date
fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let secs = (date.with_timezone(&chrono::Utc) - chrono::Utc::now()).num_seconds();
    Some(secs.max(0) as u64)
}
