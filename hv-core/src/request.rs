use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::errors::{HvError, HvResult};

/// One call to the platform service, independent of how it gets signed.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    /// Path relative to the service URL, including any query string
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ServiceRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            content_type: None,
            body: Bytes::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_json<T: serde::Serialize>(mut self, value: &T) -> HvResult<Self> {
        self.body = Bytes::from(serde_json::to_vec(value)?);
        self.content_type = Some("application/json".to_string());
        Ok(self)
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body.into();
        self
    }
}

/// Status and body of a completed service call.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ServiceResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> HvResult<T> {
        serde_json::from_slice(&self.body).map_err(HvError::from)
    }
}

/// Sends requests that need an authenticated, signed session.
///
/// Implementations own credential handling (minting, signing, the single
/// re-authentication on 401). Callers only see the final outcome.
#[async_trait]
pub trait AuthorizedSender: Send + Sync {
    async fn send(&self, request: ServiceRequest) -> HvResult<ServiceResponse>;
}
