//! Configuration management.
//!
//! Settings come from three layers, later layers winning: built-in
//! defaults, an optional JSON config file, then CLI flags and environment
//! variables.

use crate::error::{PregenError, Result};
use crate::item::Language;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vocab-pregen",
    version,
    about = "Pre-generate LLM study content for every word of a vocabulary list",
    long_about = "Walks a vocabulary list and asks a chat-completions API for synonym analysis and\n\
                  phrase usage of every word. Progress is saved in batches, so an interrupted run\n\
                  (Ctrl+C) resumes where it stopped without repeating finished work.",
    after_help = "EXAMPLES:\n    \
        vocab-pregen -i cet4.txt -o cet4.json -b cet4\n    \
        vocab-pregen -i cet4.txt -o cet4.json -b cet4 --limit 10 --rpm 30\n    \
        vocab-pregen -i n5.txt -o n5.json -b jlpt-n5 --language japanese --config llm.json\n    \
        vocab-pregen -i cet4.txt --validate"
)]
pub struct Args {
    /// Vocabulary file, one `word [phonetic] definition` per line
    #[arg(short, long, env = "PREGEN_INPUT")]
    pub input: PathBuf,

    /// Output JSON file; progress is kept next to it as `<output>.progress.json`
    #[arg(short, long, env = "PREGEN_OUTPUT", required_unless_present = "validate")]
    pub output: Option<PathBuf>,

    /// Identifier of the vocabulary book (e.g. cet4)
    #[arg(short, long, env = "PREGEN_BOOK_ID", required_unless_present = "validate")]
    pub book_id: Option<String>,

    /// Language of the vocabulary list
    #[arg(short, long, value_enum, default_value_t = Language::English, env = "PREGEN_LANGUAGE")]
    pub language: Language,

    /// Path to a JSON configuration file
    #[arg(short, long, env = "PREGEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target requests per minute
    #[arg(short, long, env = "PREGEN_RPM")]
    pub rpm: Option<u32>,

    /// Save progress after this many successful queries
    #[arg(long, default_value = "10", env = "PREGEN_BATCH_SIZE")]
    pub batch_size: usize,

    /// Only process the first N words
    #[arg(long, alias = "test-mode", env = "PREGEN_LIMIT")]
    pub limit: Option<usize>,

    /// Request timeout in seconds
    #[arg(short, long, env = "PREGEN_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Attempts per query (rate-limit aware)
    #[arg(short = 'a', long, env = "PREGEN_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Extra transport-level retries inside a single attempt
    #[arg(long, env = "PREGEN_CLIENT_RETRIES")]
    pub client_retries: Option<u32>,

    /// Sampling temperature
    #[arg(long, env = "PREGEN_TEMPERATURE")]
    pub temperature: Option<f32>,

    /// Maximum completion tokens per query
    #[arg(long, env = "PREGEN_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    /// Chat-completions base URL
    #[arg(long, env = "LLM_API_URL")]
    pub api_url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model identifier
    #[arg(long, env = "LLM_MODEL")]
    pub model: Option<String>,

    /// Discard existing progress and output and start over
    #[arg(long)]
    pub force: bool,

    /// Only parse and validate the vocabulary file
    #[arg(long)]
    pub validate: bool,

    /// Print a cost and time estimate without calling the API
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "PREGEN_VERBOSE")]
    pub verbose: bool,

    /// Output logs as JSON
    #[arg(long, env = "PREGEN_JSON_LOGS")]
    pub json_logs: bool,

    /// Disable progress bar
    #[arg(long, env = "PREGEN_NO_PROGRESS")]
    pub no_progress: bool,
}

impl Args {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The `--limit` value; zero would select nothing and is rejected.
    pub fn item_limit(&self) -> Result<Option<usize>> {
        match self.limit {
            Some(0) => Err(PregenError::InvalidConfig(
                "--limit must be greater than 0".to_string(),
            )),
            limit => Ok(limit),
        }
    }
}

/// Upstream chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base or full chat-completions URL.
    #[serde(default)]
    pub url: Option<String>,

    /// API key for authentication.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            model: default_model(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

/// Per-request settings for the streaming client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Deadline for a whole streamed response.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,

    /// Transport retries inside one generator attempt.
    #[serde(default)]
    pub max_retries: u32,

    /// Base of the client's exponential backoff (`base * 2^attempt`).
    #[serde(with = "humantime_serde", default = "default_retry_base")]
    pub retry_base: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: 0,
            retry_base: default_retry_base(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_temperature() -> f32 {
    0.7
}

#[allow(clippy::unnecessary_wraps)]
fn default_max_tokens() -> Option<u32> {
    Some(2000)
}

fn default_retry_base() -> Duration {
    Duration::from_secs(1)
}

/// Adaptive rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed in any 60-second window.
    #[serde(default = "default_rpm")]
    pub rpm: u32,

    /// Floor of the adaptive inter-request delay.
    #[serde(with = "humantime_serde", default = "default_min_delay")]
    pub min_delay: Duration,

    /// Ceiling of the adaptive inter-request delay.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rpm: default_rpm(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
        }
    }
}

fn default_rpm() -> u32 {
    60
}

fn default_min_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

/// Generator retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per query, first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff after the first failed attempt; grows linearly.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    /// Upper bound of the linear backoff.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

/// Full API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream endpoint.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Request settings.
    #[serde(default)]
    pub request: RequestConfig,

    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PregenError::InputFileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| PregenError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Create configuration from CLI arguments, layered over the config file.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(url) = &args.api_url {
            config.endpoint.url = Some(url.clone());
        }
        if let Some(key) = &args.api_key {
            config.endpoint.api_key = Some(key.clone());
        }
        if let Some(model) = &args.model {
            config.endpoint.model = model.clone();
        }
        if let Some(rpm) = args.rpm {
            config.rate_limit.rpm = rpm;
        }
        if let Some(timeout) = args.timeout {
            config.request.timeout = Duration::from_secs(timeout);
        }
        if let Some(temperature) = args.temperature {
            config.request.temperature = temperature;
        }
        if let Some(max_tokens) = args.max_tokens {
            config.request.max_tokens = Some(max_tokens);
        }
        if let Some(retries) = args.client_retries {
            config.request.max_retries = retries;
        }
        if let Some(attempts) = args.max_attempts {
            config.retry.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self
            .endpoint
            .api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            return Err(PregenError::MissingCredentials);
        }
        if self
            .endpoint
            .url
            .as_deref()
            .is_some_and(|url| url.trim().is_empty())
        {
            return Err(PregenError::InvalidConfig(
                "endpoint url cannot be empty".to_string(),
            ));
        }
        if self.endpoint.model.trim().is_empty() {
            return Err(PregenError::InvalidConfig(
                "model cannot be empty".to_string(),
            ));
        }
        if self.request.timeout.is_zero() {
            return Err(PregenError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.request.temperature) {
            return Err(PregenError::InvalidConfig(
                "temperature must be between 0 and 2".to_string(),
            ));
        }
        if self.rate_limit.rpm == 0 {
            return Err(PregenError::InvalidConfig(
                "rpm must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.min_delay > self.rate_limit.max_delay {
            return Err(PregenError::InvalidConfig(
                "min_delay cannot exceed max_delay".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PregenError::InvalidConfig(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Settings of one generation job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Vocabulary file.
    pub input: PathBuf,
    /// Output JSON file.
    pub output: PathBuf,
    /// Progress JSON file.
    pub progress: PathBuf,
    /// Vocabulary book identifier.
    pub book_id: String,
    /// Vocabulary language.
    pub language: Language,
    /// Successful queries between flushes.
    pub batch_size: usize,
    /// Delete existing state before loading.
    pub force: bool,
    /// Draw an interactive progress bar.
    pub show_progress: bool,
}

impl JobConfig {
    /// Build the job settings for a generating run.
    pub fn from_args(args: &Args) -> Result<Self> {
        let output = args
            .output
            .clone()
            .ok_or_else(|| PregenError::InvalidConfig("--output is required".to_string()))?;
        let book_id = args
            .book_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PregenError::InvalidConfig("--book-id is required".to_string()))?;

        args.item_limit()?;
        if args.batch_size == 0 {
            return Err(PregenError::InvalidConfig(
                "batch size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            input: args.input.clone(),
            progress: progress_path(&output),
            output,
            book_id,
            language: args.language,
            batch_size: args.batch_size,
            force: args.force,
            show_progress: !args.no_progress && !args.json_logs,
        })
    }
}

/// `<output>.progress.json` next to the output file.
pub fn progress_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".progress.json");
    PathBuf::from(name)
}

/// Serde adapter for durations written as `"30s"`, `"250ms"` or bare seconds.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();
        // "ms" must be checked before "s".
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
