//! # Configuration
//!
//! hv-rs reads configuration from a flat string key/value snapshot.
//! Keys are dotted (`service.url`, `retry.max_retries`), and the usual
//! source is the process environment with a prefix:
//!
//! ```rust
//! use hv_core::ConfigSnapshot;
//!
//! let snapshot = ConfigSnapshot::from_pairs(
//!     "HV__",
//!     [("HV__SERVICE__URL", "https://platform.example.org"), ("OTHER", "x")],
//! );
//! assert_eq!(snapshot.get("service.url"), Some("https://platform.example.org"));
//! assert_eq!(snapshot.get("other"), None);
//! ```
//!
//! Typed sections (`ConnectionConfig` here, `TransferConfig` and
//! `SessionOptions` in the blob and auth crates) are built from a snapshot
//! and fall back to their defaults for missing keys.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{HvError, HvResult};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    map: HashMap<String, String>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `prefix`-ed environment variable.
    ///
    /// `HV__RETRY__MAX_RETRIES=5` becomes `retry.max_retries`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_pairs(prefix, std::env::vars())
    }

    pub fn from_pairs<I, K, V>(prefix: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = HashMap::new();
        for (key, value) in pairs {
            if let Some(stripped) = key.as_ref().strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                map.insert(normalized, value.into());
            }
        }
        Self { map }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.map.insert(key.into(), value.into());
    }

    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> HvResult<Option<u64>> {
        self.parse_with(key, |v| v.parse::<u64>().map_err(|e| e.to_string()))
    }

    pub fn get_u32(&self, key: &str) -> HvResult<Option<u32>> {
        self.parse_with(key, |v| v.parse::<u32>().map_err(|e| e.to_string()))
    }

    pub fn get_bool(&self, key: &str) -> HvResult<Option<bool>> {
        self.parse_with(key, |v| v.parse::<bool>().map_err(|e| e.to_string()))
    }

    /// Durations use humantime syntax (`30s`, `2m 30s`, `500ms`).
    pub fn get_duration(&self, key: &str) -> HvResult<Option<Duration>> {
        self.parse_with(key, |v| humantime::parse_duration(v).map_err(|e| e.to_string()))
    }

    fn parse_with<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> HvResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse(raw.trim())
                .map(Some)
                .map_err(|e| HvError::config(format!("invalid value for `{key}`: {e}"))),
        }
    }
}

/// Where and how to reach the health-record service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the platform web service
    pub service_url: String,

    /// Default timeout applied to every request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Retry policy for transient transport failures
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            service_url: "https://platform.healthvault.com/platform".to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build from a snapshot; recognised keys are `service.url`,
    /// `request.timeout`, `retry.max_retries` and `retry.sleep`.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> HvResult<Self> {
        let defaults = Self::default();
        let config = Self {
            service_url: snapshot
                .get_string("service.url")
                .unwrap_or(defaults.service_url),
            request_timeout: snapshot
                .get_duration("request.timeout")?
                .unwrap_or(defaults.request_timeout),
            retry: RetryPolicy {
                max_retries: snapshot
                    .get_u32("retry.max_retries")?
                    .unwrap_or(defaults.retry.max_retries),
                retry_sleep: snapshot
                    .get_duration("retry.sleep")?
                    .unwrap_or(defaults.retry.retry_sleep),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env(prefix: &str) -> HvResult<Self> {
        Self::from_snapshot(&ConfigSnapshot::from_env(prefix))
    }

    pub fn validate(&self) -> HvResult<()> {
        let url = self.service_url.trim();
        if url.is_empty() {
            return Err(HvError::config("service url must not be empty"));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(HvError::config(format!(
                "service url `{url}` must use http or https"
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(HvError::config("request timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Join a service path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.service_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_normalizes_prefixed_keys() {
        let snapshot = ConfigSnapshot::from_pairs(
            "HV__",
            [
                ("HV__RETRY__MAX_RETRIES", "5"),
                ("HV__REQUEST__TIMEOUT", "10s"),
                ("PATH", "/usr/bin"),
            ],
        );

        assert_eq!(snapshot.get_u32("retry.max_retries").unwrap(), Some(5));
        assert_eq!(
            snapshot.get_duration("request.timeout").unwrap(),
            Some(Duration::from_secs(10))
        );
        assert!(!snapshot.has("path"));
    }

    #[test]
    fn connection_config_falls_back_to_defaults() {
        let snapshot = ConfigSnapshot::new().with("service.url", "http://localhost:8080/");
        let config = ConnectionConfig::from_snapshot(&snapshot).unwrap();

        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.endpoint("/auth/session"), "http://localhost:8080/auth/session");
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let snapshot = ConfigSnapshot::new().with("retry.sleep", "soon");
        let err = ConnectionConfig::from_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, HvError::Config(_)));

        let err = ConnectionConfig::new("ftp://files").validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn durations_round_trip_through_serde() {
        let config = ConnectionConfig::new("https://svc").with_request_timeout(Duration::from_secs(90));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["request_timeout"], "1m 30s");

        let back: ConnectionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
