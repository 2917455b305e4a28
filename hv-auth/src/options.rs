// Session options and configuration.

use std::time::Duration;

use hv_core::{ConfigSnapshot, HvError, HvResult};
use serde::{Deserialize, Serialize};

/// Tuning for the credential session cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// A token this close to expiry is refreshed before use
    #[serde(with = "humantime_serde")]
    pub refresh_window: Duration,

    /// Token lifetime assumed when the mint response carries none
    #[serde(with = "humantime_serde")]
    pub default_token_lifetime: Duration,

    /// Bytes of freshly generated shared-secret key material
    pub shared_secret_len: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_window: Duration::from_secs(60),
            default_token_lifetime: Duration::from_secs(20 * 60),
            shared_secret_len: 32,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    pub fn with_default_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_token_lifetime = lifetime;
        self
    }

    pub fn with_shared_secret_len(mut self, len: usize) -> Self {
        self.shared_secret_len = len;
        self
    }

    /// Keys: `auth.refresh_window`, `auth.token_lifetime`, `auth.shared_secret_len`.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> HvResult<Self> {
        let defaults = Self::default();
        let shared_secret_len = match snapshot.get_u64("auth.shared_secret_len")? {
            Some(len) => usize::try_from(len)
                .map_err(|_| HvError::config("auth.shared_secret_len is too large"))?,
            None => defaults.shared_secret_len,
        };

        let options = Self {
            refresh_window: snapshot
                .get_duration("auth.refresh_window")?
                .unwrap_or(defaults.refresh_window),
            default_token_lifetime: snapshot
                .get_duration("auth.token_lifetime")?
                .unwrap_or(defaults.default_token_lifetime),
            shared_secret_len,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> HvResult<()> {
        if self.shared_secret_len < 16 {
            return Err(HvError::config("shared secret must be at least 16 bytes"));
        }
        if self.default_token_lifetime.is_zero() {
            return Err(HvError::config("token lifetime must be greater than zero"));
        }
        if self.refresh_window >= self.default_token_lifetime {
            return Err(HvError::config(
                "refresh window must be shorter than the token lifetime",
            ));
        }
        Ok(())
    }
}
