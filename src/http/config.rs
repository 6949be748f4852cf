//! Client configuration, fixed once at startup.

use std::time::Duration;

use serde::Deserialize;

use super::retry::{INITIAL_BACKOFF_MS, MAX_RETRIES, RetryPolicy};

/// Default `User-Agent` sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("llmwire/", env!("LLMWIRE_VERSION"));

/// Settings for building an [`HttpClient`](super::HttpClient).
///
/// Durations are given in milliseconds when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_agent: String,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Total attempts per logical call, including the first.
    pub max_retries: usize,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            pool_max_idle_per_host: 10,
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl ClientConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
