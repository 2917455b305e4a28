use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hv_core::{ConnectionConfig, HttpClient, HvError, HvResult};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::credential::{ApplicationCredential, CredentialProof};
use crate::keyset::{HmacAlgorithm, HmacKeyset};
use crate::token::TokenStatus;

pub const MINT_PATH: &str = "/auth/session";

/// Result of one token-minting round-trip.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub status: TokenStatus,
    pub token: Option<String>,
    /// Key material the service chose instead of the proposed keyset
    pub shared_secret: Option<HmacKeyset>,
    pub lifetime: Option<Duration>,
}

/// Performs the network round-trip that creates a session token.
#[async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(
        &self,
        application_id: &str,
        proposed: &HmacKeyset,
        credential: &dyn ApplicationCredential,
    ) -> HvResult<MintedToken>;
}

/// The block the credential proof is computed over.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct MintContent<'a> {
    app_id: &'a str,
    hmac_alg: HmacAlgorithm,
    shared_secret: String,
    msg_id: Uuid,
    created: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct MintRequest<'a> {
    app_id: &'a str,
    /// Serialized [`MintContent`]; kept as text so the proof covers exact bytes
    content: String,
    proof: CredentialProof,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MintResponse {
    status: TokenStatus,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    shared_secret: Option<String>,
    /// Seconds
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct HttpTokenMinter {
    http: HttpClient,
    config: ConnectionConfig,
}

impl HttpTokenMinter {
    pub fn new(config: ConnectionConfig) -> HvResult<Self> {
        config.validate()?;
        let http = HttpClient::new(&config)?;
        Ok(Self { http, config })
    }

    pub fn with_client(http: HttpClient, config: ConnectionConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl TokenMinter for HttpTokenMinter {
    #[instrument(skip(self, proposed, credential))]
    async fn mint(
        &self,
        application_id: &str,
        proposed: &HmacKeyset,
        credential: &dyn ApplicationCredential,
    ) -> HvResult<MintedToken> {
        let content = serde_json::to_string(&MintContent {
            app_id: application_id,
            hmac_alg: proposed.algorithm(),
            shared_secret: proposed.key_base64(),
            msg_id: Uuid::new_v4(),
            created: Utc::now().to_rfc3339(),
        })?;
        let proof = credential.prove(content.as_bytes())?;
        let body = serde_json::to_vec(&MintRequest {
            app_id: application_id,
            content,
            proof,
        })?;

        let url = self.config.endpoint(MINT_PATH);
        let response = self
            .http
            .send_with_retry("mint_token", || {
                self.http.send(
                    self.http
                        .request(Method::POST, &url)
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(body.clone()),
                )
            })
            .await?;

        let parsed: MintResponse = response
            .json()
            .map_err(|e| HvError::protocol(format!("malformed mint response: {e}")))?;
        debug!(status = %parsed.status, "token mint response");

        if !parsed.status.is_success() {
            return Err(HvError::service(
                401,
                format!(
                    "token mint returned `{}`: {}",
                    parsed.status,
                    parsed.reason.unwrap_or_default()
                ),
            ));
        }

        let shared_secret = parsed
            .shared_secret
            .as_deref()
            .map(|encoded| HmacKeyset::from_base64(proposed.algorithm(), encoded))
            .transpose()?;

        Ok(MintedToken {
            status: parsed.status,
            token: parsed.token,
            shared_secret,
            lifetime: parsed.expires_in.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::SigningKeyCredential;
    use hv_core::RetryPolicy;

    fn minter(server: &mockito::Server) -> HttpTokenMinter {
        let config = ConnectionConfig::new(server.url())
            .with_retry(RetryPolicy::new(1, Duration::from_millis(1)));
        HttpTokenMinter::new(config).unwrap()
    }

    #[tokio::test]
    async fn mints_and_parses_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", MINT_PATH)
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "app-id": "app-1" })))
            .with_status(200)
            .with_body(r#"{"status":"success","token":"tok-1","expires-in":600}"#)
            .create_async()
            .await;

        let minted = minter(&server)
            .mint("app-1", &HmacKeyset::generate(32), &SigningKeyCredential::generate())
            .await
            .unwrap();

        assert_eq!(minted.token.as_deref(), Some("tok-1"));
        assert_eq!(minted.lifetime, Some(Duration::from_secs(600)));
        assert!(minted.shared_secret.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failure_status_is_a_service_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", MINT_PATH)
            .with_status(200)
            .with_body(r#"{"status":"credential-not-found","reason":"unknown app"}"#)
            .create_async()
            .await;

        let err = minter(&server)
            .mint("app-1", &HmacKeyset::generate(32), &SigningKeyCredential::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, HvError::Service { .. }));
        assert!(err.to_string().contains("unknown app"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", MINT_PATH)
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let err = minter(&server)
            .mint("app-1", &HmacKeyset::generate(32), &SigningKeyCredential::generate())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        failing.assert_async().await;
    }
}
