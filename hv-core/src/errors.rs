//! # Errors
//!
//! hv-rs carries a single structured error type through every crate.
//! The variants follow the client's failure taxonomy:
//! - argument and usage errors are local and never retried
//! - service errors carry the remote failure code
//! - transport errors know whether a retry may help
//! - a 401 on an authenticated call is its own variant so the session
//!   layer can re-authenticate exactly once

use thiserror::Error;

/// A convenience result type for hv-rs APIs.
pub type HvResult<T> = std::result::Result<T, HvError>;

/// Errors that can occur while talking to the health-record service.
#[derive(Error, Debug)]
pub enum HvError {
    #[error("Invalid argument `{name}`: {message}")]
    Argument { name: &'static str, message: String },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Cannot access a disposed object: {0}")]
    Disposed(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Blob size {size} exceeds maximum {max}")]
    BlobTooLarge { size: u64, max: u64 },

    #[error("Service error {code}: {message}")]
    Service { code: i32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error for {url} (status {status:?}): {message}")]
    Transport {
        url: String,
        status: Option<u16>,
        message: String,
        retryable: bool,
    },

    #[error("Not authenticated: {message}")]
    Unauthorized { message: String },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HvError {
    pub fn argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::Argument {
            name,
            message: message.into(),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn disposed(what: impl Into<String>) -> Self {
        Self::Disposed(what.into())
    }

    pub fn service(code: i32, message: impl Into<String>) -> Self {
        Self::Service {
            code,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Transport failure that a retry may resolve (5xx, 429, timeouts, connect errors).
    pub fn transient(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            status,
            message: message.into(),
            retryable: true,
        }
    }

    /// Transport failure that will not improve on retry.
    pub fn transport(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            status,
            message: message.into(),
            retryable: false,
        }
    }

    /// Seek outside the bounds of a stream.
    pub fn seek_out_of_range(target: i128, length: Option<u64>) -> Self {
        let message = match length {
            Some(len) => format!("seek target {target} is outside the stream bounds [0, {len}]"),
            None => format!("seek target {target} is before the start of the stream"),
        };
        Self::Io {
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, message),
        }
    }

    /// Check if a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            Self::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}
