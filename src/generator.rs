//! Content generation for one unit of work.
//!
//! Wraps [`StreamingClient`] in an outer retry loop driven by the
//! [`RateLimiter`]: the limiter is consulted before every call and told
//! about every outcome, so a 429 slows the whole job down rather than just
//! the unit that hit it.

use crate::client::StreamingClient;
use crate::config::{Config, RetryConfig};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::item::{Language, QueryType, WorkItem};
use crate::prompt::PromptTemplates;
use crate::rate_limiter::RateLimiter;
use crate::request::RequestOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Output of one successful unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    /// Normalized answer text.
    pub content: String,
    /// Heuristic token count of `content`.
    pub estimated_tokens: u64,
    /// Finish reason reported by the stream, `"stop"` when absent.
    pub finish_reason: String,
    /// Requests spent, retries included.
    pub attempts: u32,
}

/// Generates content for `(item, query type)` units.
#[derive(Debug, Clone)]
pub struct ContentGenerator {
    client: StreamingClient,
    limiter: Arc<RateLimiter>,
    templates: PromptTemplates,
    options: RequestOptions,
    retry: RetryConfig,
}

impl ContentGenerator {
    /// Create a generator from its collaborators.
    pub fn new(
        client: StreamingClient,
        limiter: Arc<RateLimiter>,
        templates: PromptTemplates,
        options: RequestOptions,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            templates,
            options,
            retry,
        }
    }

    /// Build the client, limiter and templates from configuration.
    pub fn from_config(config: &Config, language: Language) -> Result<Self> {
        let endpoint = Endpoint::new(&config.endpoint)?;
        let client = StreamingClient::new(endpoint, config.request.retry_base)?;
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let options = RequestOptions {
            timeout: config.request.timeout,
            temperature: config.request.temperature,
            max_tokens: config.request.max_tokens,
            max_retries: config.request.max_retries,
        };

        Ok(Self::new(
            client,
            limiter,
            PromptTemplates::new(language),
            options,
            config.retry.clone(),
        ))
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Generate content for one unit.
    ///
    /// 429s back the limiter off and are retried after its new delay;
    /// 401/403 fail immediately; anything else is retried after a linear
    /// backoff. At most `max_attempts` requests are made.
    pub async fn generate_query(
        &self,
        item: &WorkItem,
        query: QueryType,
    ) -> Result<GeneratedContent> {
        let messages = self.templates.messages(query, item);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.wait().await;

            debug!(
                key = %item.key,
                %query,
                attempt,
                max_attempts,
                "Generating"
            );

            let error = match self.client.request(&messages, &self.options).await {
                Ok(completion) => {
                    self.limiter.record_success();
                    let content = normalize(&completion.content);
                    return Ok(GeneratedContent {
                        estimated_tokens: estimate_tokens(&content),
                        content,
                        finish_reason: completion
                            .finish_reason
                            .unwrap_or_else(|| "stop".to_string()),
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            if error.is_auth() {
                return Err(error);
            }

            let backoff = if error.is_rate_limited() {
                self.limiter.record_failure(error.retry_after());
                self.limiter.current_delay()
            } else {
                self.limiter.record_error();
                self.linear_backoff(attempt)
            };

            if attempt >= max_attempts {
                return Err(error);
            }

            warn!(
                key = %item.key,
                %query,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Query failed, retrying"
            );
            sleep(backoff).await;
        }
    }

    fn linear_backoff(&self, attempt: u32) -> Duration {
        self.retry
            .initial_backoff
            .saturating_mul(attempt)
            .min(self.retry.max_backoff)
    }
}

/// Trim surrounding whitespace and unify line endings.
fn normalize(content: &str) -> String {
    content.replace("\r\n", "\n").trim().to_string()
}

const CJK_WEIGHT: f64 = 1.5;
const WORD_WEIGHT: f64 = 1.3;
const OTHER_WEIGHT: f64 = 0.5;

/// Han ideographs and Japanese kana.
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{F900}'..='\u{FAFF}')
}

/// Heuristic token count: CJK characters × 1.5, ASCII words × 1.3, every
/// other character × 0.5, rounded up.
///
/// The streaming API reports no usage, so this only feeds progress and cost
/// display.
pub fn estimate_tokens(text: &str) -> u64 {
    let mut cjk = 0u64;
    let mut words = 0u64;
    let mut word_chars = 0u64;
    let mut total = 0u64;
    let mut in_word = false;

    for c in text.chars() {
        total += 1;
        if c.is_ascii_alphabetic() {
            word_chars += 1;
            if !in_word {
                words += 1;
                in_word = true;
            }
            continue;
        }
        in_word = false;
        if is_cjk(c) {
            cjk += 1;
        }
    }

    let other = total - cjk - word_chars;
    #[allow(clippy::cast_precision_loss)]
    let estimate =
        cjk as f64 * CJK_WEIGHT + words as f64 * WORD_WEIGHT + other as f64 * OTHER_WEIGHT;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = estimate.ceil() as u64;
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, RateLimitConfig};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(content: &str) -> String {
        format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]}),
            serde_json::json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})
        )
    }

    fn generator_for(server: &MockServer) -> ContentGenerator {
        let config = Config {
            endpoint: EndpointConfig {
                url: Some(server.uri()),
                api_key: Some("sk-test".to_string()),
                model: "m".to_string(),
            },
            rate_limit: RateLimitConfig {
                rpm: 1_000,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(200),
            },
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
            ..Config::default()
        };
        ContentGenerator::from_config(&config, Language::English).unwrap()
    }

    fn item() -> WorkItem {
        WorkItem::new("apple", "ˈæpl", "n. 苹果")
    }

    #[tokio::test]
    async fn test_success_records_and_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse("\r\n  ## Synonyms\r\nfruit  \n"), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let generator = generator_for(&server);
        let result = generator
            .generate_query(&item(), QueryType::Synonyms)
            .await
            .unwrap();

        assert_eq!(result.content, "## Synonyms\nfruit");
        assert_eq!(result.finish_reason, "stop");
        assert_eq!(result.attempts, 1);
        assert_eq!(result.estimated_tokens, estimate_tokens("## Synonyms\nfruit"));
        assert_eq!(generator.limiter().snapshot().consecutive_successes, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_backs_off_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse("ok"), "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let generator = generator_for(&server);
        let before = generator.limiter().current_delay();
        let result = generator
            .generate_query(&item(), QueryType::Phrases)
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(generator.limiter().current_delay(), before * 2);
        assert_eq!(generator.limiter().snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let generator = generator_for(&server);
        let err = generator
            .generate_query(&item(), QueryType::Phrases)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(generator.limiter().snapshot().consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_auth_error_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = generator_for(&server)
            .generate_query(&item(), QueryType::Synonyms)
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_other_errors_retry_without_touching_delay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let generator = generator_for(&server);
        let before = generator.limiter().current_delay();
        let err = generator
            .generate_query(&item(), QueryType::Synonyms)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(generator.limiter().current_delay(), before);
    }

    #[test]
    fn test_linear_backoff_is_capped() {
        let server_less = ContentGenerator::from_config(
            &Config {
                endpoint: EndpointConfig {
                    api_key: Some("k".to_string()),
                    ..EndpointConfig::default()
                },
                ..Config::default()
            },
            Language::English,
        )
        .unwrap();
        assert_eq!(server_less.linear_backoff(1), Duration::from_secs(2));
        assert_eq!(server_less.linear_backoff(2), Duration::from_secs(4));
        assert_eq!(server_less.linear_backoff(3), Duration::from_secs(5));
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        // 2 words -> 2.6, 1 space -> 0.5
        assert_eq!(estimate_tokens("hello world"), 4);
        // 2 CJK -> 3.0
        assert_eq!(estimate_tokens("苹果"), 3);
        // 1 word + 1 kana + "!" -> 1.3 + 1.5 + 0.5
        assert_eq!(estimate_tokens("ok\u{3042}!"), 4);
    }

    #[test]
    fn test_token_estimate_is_monotonic() {
        let mut text = String::new();
        let mut previous = 0;
        for piece in ["The ", "quick ", "狐狸 ", "jumps", "。", "over ", "たぬき"] {
            text.push_str(piece);
            let estimate = estimate_tokens(&text);
            assert!(estimate >= previous, "{text:?}");
            previous = estimate;
        }
    }
}
