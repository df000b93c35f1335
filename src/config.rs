//! Environment-driven configuration, loaded with `envy` and falling back
//! to sane defaults for anything unset.

use serde::Deserialize;

use crate::error::{DsqError, DsqResult};

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_unknown_queue() -> String {
    "unknown".to_string()
}

fn default_queue() -> String {
    "dsq".to_string()
}

fn default_retry_delay() -> u64 {
    60
}

fn default_http_addr() -> String {
    "127.0.0.1:9042".to_string()
}

/// Process-wide settings. Every field has an env var of the same name,
/// prefixed `DSQ_` (e.g. `DSQ_REDIS_URL`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Result store connection; defaults to `redis_url` when unset.
    pub result_redis_url: Option<String>,
    #[serde(default = "default_unknown_queue")]
    pub unknown_queue: String,
    #[serde(default = "default_queue")]
    pub default_queue: String,
    #[serde(default = "default_retry_delay")]
    pub default_retry_delay: u64,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            result_redis_url: None,
            unknown_queue: default_unknown_queue(),
            default_queue: default_queue(),
            default_retry_delay: default_retry_delay(),
            http_addr: default_http_addr(),
        }
    }
}

impl Config {
    /// Load from `DSQ_*` environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> DsqResult<Self> {
        envy::prefixed("DSQ_")
            .from_env::<Config>()
            .map_err(|e| DsqError::Config(e.to_string()))
    }

    pub fn result_redis_url(&self) -> &str {
        self.result_redis_url.as_deref().unwrap_or(&self.redis_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_local_redis() {
        let config = Config::default();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.result_redis_url(), "redis://127.0.0.1:6379");
        assert_eq!(config.http_addr, "127.0.0.1:9042");
    }
}
