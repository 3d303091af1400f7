//! Request and response types for the chat-completions API.
//!
//! Outbound bodies are always streaming requests; inbound SSE payloads are
//! decoded into [`StreamChunk`] one line at a time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// The prompt.
    User,
    /// Prior model output.
    Assistant,
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Per-call options for [`crate::client::StreamingClient::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Wall-clock deadline covering connect, headers and the whole stream.
    pub timeout: Duration,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap sent as `max_tokens`.
    pub max_tokens: Option<u32>,
    /// Additional attempts after a transient failure.
    pub max_retries: u32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            temperature: 0.7,
            max_tokens: None,
            max_retries: 2,
        }
    }
}

/// Body of a streaming chat-completions request.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    /// Model identifier.
    pub model: &'a str,
    /// Conversation so far.
    pub messages: &'a [ChatMessage],
    /// Sampling temperature.
    pub temperature: f32,
    /// Always `true`.
    pub stream: bool,
    /// Completion token cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl<'a> ChatRequest<'a> {
    /// Build a streaming request body.
    pub fn streaming(model: &'a str, messages: &'a [ChatMessage], options: &RequestOptions) -> Self {
        Self {
            model,
            messages,
            temperature: options.temperature,
            stream: true,
            max_tokens: options.max_tokens,
        }
    }
}

/// One `data:` payload of the event stream.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    /// Candidate deltas; only the first is used.
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

/// A single choice inside a [`StreamChunk`].
#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    /// Incremental text.
    #[serde(default)]
    pub delta: Option<Delta>,
    /// Set on the final chunk.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental text carried by a [`StreamChoice`].
#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    /// Answer text.
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning trace emitted by reasoning models.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// Finish reason reported when generation hit the token limit.
pub const FINISH_REASON_LENGTH: &str = "length";

/// A fully collected streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Accumulated answer text.
    pub content: String,
    /// Accumulated reasoning text.
    pub reasoning: String,
    /// Last explicit finish reason, if any.
    pub finish_reason: Option<String>,
    /// Number of data chunks that carried a choice.
    pub chunk_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_body() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hello")];
        let options = RequestOptions {
            max_tokens: Some(64),
            ..Default::default()
        };
        let body = serde_json::to_value(ChatRequest::streaming("m1", &messages, &options)).unwrap();

        assert_eq!(body["model"], "m1");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_body_omits_missing_max_tokens() {
        let messages = vec![ChatMessage::user("hi")];
        let body = serde_json::to_value(ChatRequest::streaming(
            "m1",
            &messages,
            &RequestOptions::default(),
        ))
        .unwrap();
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_chunk_tolerates_missing_fields() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(chunk.choices[0].delta.is_none());

        let empty: StreamChunk = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(empty.choices.is_empty());
    }
}
