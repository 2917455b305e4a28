use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::keyset::HmacKeyset;

/// Outcome the service reports for a token mint.
///
/// Unrecognized values degrade to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TokenStatus {
    Success,
    Failure,
    CredentialNotFound,
    Unknown,
}

impl TokenStatus {
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "failure" => Self::Failure,
            "credential-not-found" | "credentialnotfound" => Self::CredentialNotFound,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::CredentialNotFound => "credential-not-found",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<String> for TokenStatus {
    fn from(value: String) -> Self {
        Self::from_wire(&value)
    }
}

impl From<TokenStatus> for String {
    fn from(status: TokenStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A minted session token together with the keyset that signs requests made
/// under it. Callers always receive their own clone.
#[derive(Debug, Clone)]
pub struct AuthenticationToken {
    pub application_id: String,
    pub token: String,
    pub shared_secret: HmacKeyset,
    pub status: TokenStatus,
    /// Increments on every successful mint for the application
    pub issuance: u64,
    pub expires_at: Instant,
}

impl AuthenticationToken {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_degrades() {
        let status: TokenStatus = serde_json::from_str(r#""pending-consent""#).unwrap();
        assert_eq!(status, TokenStatus::Unknown);

        let status: TokenStatus = serde_json::from_str(r#""Success""#).unwrap();
        assert!(status.is_success());
        assert_eq!(serde_json::to_string(&status).unwrap(), r#""success""#);
    }
}
