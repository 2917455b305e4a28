use std::future::Future;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::errors::{HvError, HvResult};
use crate::request::ServiceResponse;
use crate::retry::RetryPolicy;

/// Thin wrapper over `reqwest::Client` that applies timeouts and a user agent,
/// and turns HTTP outcomes into [`HvError`]s.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &ConnectionConfig) -> HvResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("hv-rs/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HvError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::from_client(client, config.request_timeout, config.retry.clone()))
    }

    pub fn from_client(client: reqwest::Client, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request builder with the default timeout applied.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).timeout(self.timeout)
    }

    /// Send once and return the raw status and body, without classifying the status.
    pub async fn execute(&self, builder: RequestBuilder) -> HvResult<ServiceResponse> {
        self.execute_with_url(builder).await.map(|(_, response)| response)
    }

    /// Send once and fail on any non-2xx status.
    pub async fn send(&self, builder: RequestBuilder) -> HvResult<ServiceResponse> {
        let (url, response) = self.execute_with_url(builder).await?;
        check_status(&url, response)
    }

    async fn execute_with_url(&self, builder: RequestBuilder) -> HvResult<(String, ServiceResponse)> {
        let (client, request) = builder.build_split();
        let request = request.map_err(|e| {
            HvError::transport(
                e.url().map(|u| u.to_string()).unwrap_or_else(|| "<unknown>".to_string()),
                None,
                format!("request build failed: {e}"),
            )
        })?;
        let url = request.url().to_string();
        debug!(method = %request.method(), %url, "sending request");

        let response = client
            .execute(request)
            .await
            .map_err(|e| from_reqwest(&url, e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| from_reqwest(&url, e))?;

        Ok((url, ServiceResponse::new(status, body)))
    }

    /// Build and send a request through the retry policy; `make` is called once
    /// per attempt.
    pub async fn send_with_retry<F, Fut>(&self, operation: &str, make: F) -> HvResult<ServiceResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HvResult<ServiceResponse>>,
    {
        self.retry.run(operation, make).await
    }
}

#[derive(Debug, Deserialize)]
struct ServiceFailure {
    code: i32,
    #[serde(default)]
    message: String,
}

/// Map a response status onto the error taxonomy.
///
/// 401 is `Unauthorized`, 429 and 5xx are retryable transport failures and any
/// other non-2xx is a `Service` error carrying the body's failure code when the
/// service supplied one.
pub fn check_status(url: &str, response: ServiceResponse) -> HvResult<ServiceResponse> {
    let status = response.status;
    if response.is_success() {
        return Ok(response);
    }

    let text = String::from_utf8_lossy(&response.body).into_owned();
    match status {
        401 => Err(HvError::unauthorized(format!("{url} rejected the session: {text}"))),
        429 | 500..=599 => Err(HvError::transient(
            url,
            Some(status),
            format!("request failed with status {status}"),
        )),
        _ => match serde_json::from_slice::<ServiceFailure>(&response.body) {
            Ok(failure) => Err(HvError::service(failure.code, failure.message)),
            Err(_) => Err(HvError::service(i32::from(status), text)),
        },
    }
}

pub fn from_reqwest(url: &str, err: reqwest::Error) -> HvError {
    if err.is_timeout() || err.is_connect() {
        HvError::transient(url, None, format!("request timeout/connect error: {err}"))
    } else {
        HvError::transport(url, err.status().map(|s| s.as_u16()), format!("request failed: {err}"))
    }
}
