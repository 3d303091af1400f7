//! Upstream endpoint resolution.
//!
//! Operators usually paste a provider's base URL (`https://host/v1`); the
//! chat-completions path is appended when it is missing.

use crate::config::EndpointConfig;
use crate::error::{PregenError, Result};

/// Used when no URL is configured.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

const COMPLETIONS_PATH: &str = "/chat/completions";

/// A resolved chat-completions endpoint with its credential.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: String,
    api_key: String,
    model: String,
}

impl Endpoint {
    /// Resolve an endpoint from configuration.
    ///
    /// Fails when no API key is configured.
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(PregenError::MissingCredentials)?;

        if config.model.trim().is_empty() {
            return Err(PregenError::InvalidConfig(
                "model cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            url: completions_url(config.url.as_deref()),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }

    /// Full chat-completions URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bearer credential.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Complete a base URL to the chat-completions endpoint.
pub fn completions_url(base: Option<&str>) -> String {
    let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) else {
        return DEFAULT_API_URL.to_string();
    };

    if base.contains(COMPLETIONS_PATH) {
        return base.to_string();
    }

    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}{COMPLETIONS_PATH}")
    } else {
        format!("{base}/v1{COMPLETIONS_PATH}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: Option<&str>, api_key: Option<&str>) -> EndpointConfig {
        EndpointConfig {
            url: url.map(str::to_string),
            api_key: api_key.map(str::to_string),
            model: "test-model".to_string(),
        }
    }

    #[test]
    fn test_url_completion() {
        assert_eq!(completions_url(None), DEFAULT_API_URL);
        assert_eq!(completions_url(Some("  ")), DEFAULT_API_URL);
        assert_eq!(
            completions_url(Some("https://api.example.com/v1/")),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url(Some("https://api.example.com")),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url(Some("http://localhost:9000/proxy/chat/completions")),
            "http://localhost:9000/proxy/chat/completions"
        );
    }

    #[test]
    fn test_missing_key_is_fatal() {
        assert!(matches!(
            Endpoint::new(&config(None, None)),
            Err(PregenError::MissingCredentials)
        ));
        assert!(matches!(
            Endpoint::new(&config(None, Some(" "))),
            Err(PregenError::MissingCredentials)
        ));
    }

    #[test]
    fn test_endpoint_accessors() {
        let endpoint = Endpoint::new(&config(Some("https://x.test/v1"), Some("sk-1"))).unwrap();
        assert_eq!(endpoint.url(), "https://x.test/v1/chat/completions");
        assert_eq!(endpoint.api_key(), "sk-1");
        assert_eq!(endpoint.model(), "test-model");
    }
}
