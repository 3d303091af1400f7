//! # Vocab Pregen
//!
//! Resumable, rate-adaptive batch content generation for vocabulary books.
//!
//! For every word in a vocabulary file, a streaming chat-completions API is
//! asked for a synonym analysis and a phrase/collocation guide. Results are
//! written to a JSON output file; a sibling progress file records what has
//! been done so an interrupted or partially failed job picks up exactly where
//! it stopped.
//!
//! ## Features
//!
//! - **Adaptive Rate Limiting**: sliding 60-second window plus an inter-request
//!   delay that doubles on HTTP 429 and relaxes after sustained success
//! - **Streaming Responses**: incremental SSE parsing with truncation detection
//! - **Two Retry Layers**: bounded transport retries in the client, rate-limit
//!   aware retries in the generator
//! - **Crash-Safe State**: atomic temp-file-and-rename writes, flushed in batches
//! - **Cooperative Interruption**: a cancellation token checked between units
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use vocab_pregen::{Config, EndpointConfig, JobConfig, Language, Orchestrator, vocabulary};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config {
//!         endpoint: EndpointConfig {
//!             api_key: Some("your-api-key".to_string()),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!     let job = JobConfig {
//!         input: "cet4.txt".into(),
//!         output: "cet4.json".into(),
//!         progress: "cet4.json.progress.json".into(),
//!         book_id: "cet4".to_string(),
//!         language: Language::English,
//!         batch_size: 10,
//!         force: false,
//!         show_progress: true,
//!     };
//!
//!     let words = vocabulary::parse_file(&job.input).await?;
//!     let mut orchestrator = Orchestrator::from_config(&config, job, CancellationToken::new())?;
//!     let report = orchestrator.run(&words.items).await?;
//!
//!     report.print_summary();
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Settings come from, in increasing precedence:
//! - Built-in defaults
//! - A JSON configuration file (`--config`)
//! - Command-line arguments and environment variables (`LLM_API_KEY`, `LLM_API_URL`,
//!   `LLM_MODEL`, `PREGEN_*`)
//!
//! See [`Config`] for all available options.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod generator;
pub mod item;
pub mod orchestrator;
pub mod output;
pub mod persist;
pub mod progress;
pub mod prompt;
pub mod rate_limiter;
pub mod request;
pub mod sse;
pub mod tracker;
pub mod vocabulary;

// Re-exports for convenience
pub use client::StreamingClient;
pub use config::{
    Args, Config, EndpointConfig, JobConfig, RateLimitConfig, RequestConfig, RetryConfig,
};
pub use endpoint::Endpoint;
pub use error::{PregenError, Result};
pub use generator::{ContentGenerator, GeneratedContent};
pub use item::{Language, QueryType, WorkItem};
pub use orchestrator::{CostEstimate, Orchestrator, Phase, RunOutcome, RunReport};
pub use output::{OutputEntry, OutputStore};
pub use progress::{ProgressRecord, ProgressStatistics, ProgressStore};
pub use rate_limiter::{LimiterSnapshot, RateLimiter};
pub use request::{ChatMessage, Completion, RequestOptions};
pub use tracker::{SessionSnapshot, SessionTracker};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
