use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::upload::{Result, UploadConfig, UploadError};
use crate::upload::types::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT};
use crate::utils::retry::{RetryPolicy, RetryStrategy};

pub const DEFAULT_CONFIG_FILE: &str = "upqueue.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<String>,
    pub chunk_size: usize,
    pub max_concurrent: usize,
    /// Attempts per chunk before the item fails
    pub max_retries: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Per-chunk request timeout
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: 3,
            retry_initial_ms: 1000,
            retry_max_ms: 30_000,
            timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let config_str = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if !self.endpoint.starts_with("http") {
            return Err(UploadError::ParamError(format!("endpoint must be an http(s) url, got {:?}", self.endpoint)));
        }
        if self.chunk_size == 0 {
            return Err(UploadError::ParamError("chunk_size must be positive".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(UploadError::ParamError("max_concurrent must be positive".to_string()));
        }

        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            max_concurrent: self.max_concurrent,
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                strategy: RetryStrategy::Exponential {
                    initial: Duration::from_millis(self.retry_initial_ms),
                    multiplier: 2.0,
                    max_delay: Duration::from_millis(self.retry_max_ms),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = Config::from_toml(r#"endpoint = "http://localhost:8000/api""#).unwrap();
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.max_concurrent, 3);
        assert!(config.token.is_none());

        let upload = config.upload_config();
        assert_eq!(upload.retry.max_attempts, 3);
        assert_eq!(upload.retry.next_delay(1), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(r#"
            endpoint = "https://files.example.com/api"
            token = "secret"
            chunk_size = 1048576
            max_concurrent = 5
            max_retries = 6
            retry_initial_ms = 200
            retry_max_ms = 5000
            timeout_secs = 10
        "#).unwrap();

        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.upload_config().chunk_size, 1048576);
    }

    #[test]
    fn test_invalid_config() {
        assert!(Config::from_toml("").is_err());
        assert!(Config::from_toml(r#"endpoint = "ftp://x""#).is_err());
        assert!(Config::from_toml("endpoint = \"http://x\"\nchunk_size = 0").is_err());
        assert!(Config::from_toml("endpoint = \"http://x\"\nmax_concurrent = 0").is_err());
        assert!(matches!(
            Config::from_toml("endpoint = 5").unwrap_err(),
            UploadError::ConfigError(_)
        ));
    }
}
