/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Messaging core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the managed data service
    pub service_url: String,

    /// API key sent as `apikey` + bearer token (anon key for the hosted backend)
    pub api_key: Option<String>,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Extra attempts after a failed transport call (idempotent calls only)
    pub retry_attempts: u32,

    /// Base delay for exponential backoff between retries
    pub retry_base_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:54321".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(250),
        }
    }
}

impl Config {
    /// Create config from the environment (nice for scripts)
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("STREETLINK_SERVICE_URL") {
            if url.is_empty() {
                return Err(ChatError::Config(
                    "STREETLINK_SERVICE_URL must not be empty".to_string(),
                ));
            }
            config.service_url = url;
        }
        if let Ok(key) = std::env::var("STREETLINK_API_KEY") {
            config.api_key = Some(key);
        }
        if let Some(ms) = std::env::var("STREETLINK_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = std::env::var("STREETLINK_RETRY_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            config.retry_attempts = n;
        }

        Ok(config)
    }
}
