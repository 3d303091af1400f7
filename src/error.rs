//! Error types for the generation pipeline.
//!
//! Every failure the pipeline can observe is a variant of [`PregenError`].
//! The retry layers never inspect messages; they classify errors through
//! [`PregenError::is_rate_limited`], [`PregenError::is_auth`] and
//! [`PregenError::is_transient`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while generating content.
#[derive(Error, Debug)]
pub enum PregenError {
    /// Failed to read the vocabulary or configuration file.
    #[error("failed to read input file '{path}': {source}")]
    InputFileRead {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a state file (progress or output).
    #[error("failed to persist '{path}': {source}")]
    Persist {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An existing state file is not valid JSON of the expected shape.
    #[error("state file '{path}' is corrupt: {source}")]
    StateFileParse {
        /// Path to the offending file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse config file '{path}': {source}")]
    ConfigParse {
        /// Path to the config file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize JSON.
    #[error("failed to serialize JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// No API key was supplied.
    #[error("missing API credentials - set LLM_API_KEY or pass --api-key")]
    MissingCredentials,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The request did not finish before its deadline.
    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The upstream could not be reached or the connection broke mid-stream.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 429.
    #[error("rate limited by upstream (HTTP 429): {body}")]
    RateLimited {
        /// Value of the `Retry-After` header, if present.
        retry_after: Option<Duration>,
        /// Response body (truncated).
        body: String,
    },

    /// HTTP 401 or 403.
    #[error("authentication failed (HTTP {status}): {body}")]
    Auth {
        /// HTTP status code returned.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {body}")]
    Server {
        /// HTTP status code returned.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// Any other non-success HTTP status.
    #[error("endpoint returned error status {status}: {body}")]
    Api {
        /// HTTP status code returned.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The stream ended without a single data chunk.
    #[error("stream ended without any data chunks")]
    EmptyStream,

    /// Chunks arrived but carried neither content nor reasoning.
    #[error("stream produced no content ({chunks} chunks)")]
    EmptyContent {
        /// Number of chunks observed.
        chunks: usize,
    },

    /// The model stopped because it hit the token limit.
    #[error("response truncated by length limit after {chars} characters; raise max_tokens")]
    Truncated {
        /// Characters of content received before truncation.
        chars: usize,
    },

    /// A vocabulary file could not be used at all.
    #[error("vocabulary file '{path}' contains no usable entries")]
    EmptyVocabulary {
        /// Path to the vocabulary file.
        path: PathBuf,
    },
}

impl PregenError {
    /// HTTP 429.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// HTTP 401/403. Never retried.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Timeouts, connection failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::Server { .. }
        )
    }

    /// Server-provided wait hint attached to a 429.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Build the error for a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after, body },
            401 | 403 => Self::Auth { status, body },
            500..=599 => Self::Server { status, body },
            _ => Self::Api { status, body },
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PregenError>;
