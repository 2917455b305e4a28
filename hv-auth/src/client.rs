use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hv_core::{AuthorizedSender, ConnectionConfig, HttpClient, HvResult, ServiceRequest, ServiceResponse};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::credential::ApplicationCredential;
use crate::session::CredentialSessionManager;
use crate::signing::{RequestSigner, CONTENT_SHA256_HEADER, DATE_HEADER};
use crate::token::AuthenticationToken;

/// Sends signed requests on behalf of one application.
///
/// Tokens come from the shared [`CredentialSessionManager`]; a 401 triggers
/// exactly one re-authentication and one retry.
pub struct SessionClient {
    application_id: String,
    credential: Arc<dyn ApplicationCredential>,
    sessions: Arc<CredentialSessionManager>,
    http: HttpClient,
    config: ConnectionConfig,
}

impl SessionClient {
    pub fn new(
        application_id: impl Into<String>,
        credential: Arc<dyn ApplicationCredential>,
        sessions: Arc<CredentialSessionManager>,
        config: ConnectionConfig,
    ) -> HvResult<Self> {
        config.validate()?;
        let http = HttpClient::new(&config)?;
        Ok(Self {
            application_id: application_id.into(),
            credential,
            sessions,
            http,
            config,
        })
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn sessions(&self) -> &Arc<CredentialSessionManager> {
        &self.sessions
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    async fn send_signed(&self, token: &AuthenticationToken, request: &ServiceRequest) -> HvResult<ServiceResponse> {
        let url = self.config.endpoint(&request.path);
        let signed = RequestSigner::sign(token, request, Utc::now())?;

        self.http
            .send_with_retry("service_call", || {
                let mut builder = self
                    .http
                    .request(request.method.clone(), &url)
                    .header(AUTHORIZATION, &signed.authorization)
                    .header(DATE_HEADER, &signed.date)
                    .header(CONTENT_SHA256_HEADER, &signed.content_sha256);
                if let Some(content_type) = &request.content_type {
                    builder = builder.header(CONTENT_TYPE, content_type);
                }
                self.http.send(builder.body(request.body.clone()))
            })
            .await
    }
}

#[async_trait]
impl AuthorizedSender for SessionClient {
    async fn send(&self, request: ServiceRequest) -> HvResult<ServiceResponse> {
        let request = &request;
        self.sessions
            .execute_authorized(&self.application_id, self.credential.as_ref(), |token| async move {
                self.send_signed(&token, request).await
            })
            .await
    }
}
