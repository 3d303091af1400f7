//! Streaming chat-completions client.
//!
//! Every call is one `stream: true` POST whose body is consumed
//! incrementally through [`SseParser`]. A single deadline covers the whole
//! exchange; transient failures are retried with exponential backoff
//! (`retry_base * 2^attempt`), everything else is returned at once.

use crate::endpoint::Endpoint;
use crate::error::{PregenError, Result};
use crate::request::{ChatMessage, ChatRequest, Completion, RequestOptions};
use crate::sse::SseParser;
use futures::StreamExt;
use reqwest::{Client, header};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

const MAX_ERROR_BODY_CHARS: usize = 500;

/// HTTP client for a streaming chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct StreamingClient {
    client: Client,
    endpoint: Arc<Endpoint>,
    retry_base: Duration,
}

impl StreamingClient {
    /// Create a new client.
    pub fn new(endpoint: Endpoint, retry_base: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/event-stream"),
        );

        let client = Client::builder()
            .user_agent(concat!("vocab-pregen/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| PregenError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: Arc::new(endpoint),
            retry_base,
        })
    }

    /// Send a request, retrying transient failures up to
    /// `options.max_retries` times.
    ///
    /// Rate-limit, authentication, validation and stream-integrity errors
    /// are returned on the first occurrence.
    pub async fn request(
        &self,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<Completion> {
        if options.timeout.is_zero() {
            return Err(PregenError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }

        let mut attempt = 0;
        loop {
            match self.request_once(messages, options).await {
                Ok(completion) => {
                    debug!(
                        chunks = completion.chunk_count,
                        chars = completion.content.chars().count(),
                        finish_reason = ?completion.finish_reason,
                        "Stream complete"
                    );
                    return Ok(completion);
                }
                Err(e) if e.is_transient() && attempt < options.max_retries => {
                    attempt += 1;
                    let backoff = self.calculate_backoff(attempt);
                    warn!(
                        attempt,
                        max_retries = options.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a single request under the configured deadline.
    ///
    /// The deadline future owns the in-flight request; when it fires the
    /// request is dropped, which aborts the connection.
    pub async fn request_once(
        &self,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<Completion> {
        match timeout(options.timeout, self.stream(messages, options)).await {
            Ok(result) => result,
            Err(_) => Err(PregenError::Timeout(options.timeout)),
        }
    }

    async fn stream(&self, messages: &[ChatMessage], options: &RequestOptions) -> Result<Completion> {
        let body = ChatRequest::streaming(self.endpoint.model(), messages, options);

        trace!(
            url = self.endpoint.url(),
            messages = messages.len(),
            "Sending request"
        );

        let response = self
            .client
            .post(self.endpoint.url())
            .bearer_auth(self.endpoint.api_key())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(PregenError::from_status(
                status.as_u16(),
                error_message(&text),
                retry_after,
            ));
        }

        let mut parser = SseParser::new();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            parser.feed(&chunk.map_err(transport_error)?);
        }

        if parser.malformed_count() > 0 {
            warn!(
                malformed = parser.malformed_count(),
                "Stream contained malformed chunks"
            );
        }
        parser.finish()
    }

    /// Backoff before retry number `attempt` (1-based).
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

fn transport_error(e: reqwest::Error) -> PregenError {
    PregenError::Network(e.to_string())
}

/// Seconds form of `Retry-After`. HTTP-date values are ignored.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Prefer the API's `error.message`, falling back to the raw body.
fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    if message.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = message.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{truncated}...")
    } else {
        message
    }
}
