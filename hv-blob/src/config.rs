use std::time::Duration;

use hv_core::{ConfigSnapshot, HvError, HvResult, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Configuration for blob transfer streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Timeout for each ranged read
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Timeout for each chunk upload
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Retry policy for chunk uploads and ranged reads
    pub retry: RetryPolicy,

    /// Content type for blobs opened without one
    pub default_content_type: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            default_content_type: "application/octet-stream".to_string(),
        }
    }
}

impl TransferConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    /// Keys: `blob.read_timeout`, `blob.write_timeout`, `blob.content_type`,
    /// `retry.max_retries`, `retry.sleep`.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> HvResult<Self> {
        let defaults = Self::default();
        let config = Self {
            read_timeout: snapshot
                .get_duration("blob.read_timeout")?
                .unwrap_or(defaults.read_timeout),
            write_timeout: snapshot
                .get_duration("blob.write_timeout")?
                .unwrap_or(defaults.write_timeout),
            retry: RetryPolicy {
                max_retries: snapshot
                    .get_u32("retry.max_retries")?
                    .unwrap_or(defaults.retry.max_retries),
                retry_sleep: snapshot
                    .get_duration("retry.sleep")?
                    .unwrap_or(defaults.retry.retry_sleep),
            },
            default_content_type: snapshot
                .get_string("blob.content_type")
                .unwrap_or(defaults.default_content_type),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HvResult<()> {
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(HvError::config("blob timeouts must be greater than zero"));
        }
        if self.default_content_type.trim().is_empty() {
            return Err(HvError::config("default content type must not be empty"));
        }
        Ok(())
    }
}
