use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use hv_core::{HvResult, ServiceRequest};
use sha2::{Digest, Sha256};

use crate::token::AuthenticationToken;

pub const DATE_HEADER: &str = "x-hv-date";
pub const CONTENT_SHA256_HEADER: &str = "x-hv-content-sha256";
pub const AUTH_SCHEME: &str = "HV-HMAC";

/// Headers attached to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub date: String,
    pub content_sha256: String,
}

/// Signs outbound service requests with a session's HMAC keyset.
///
/// The MAC covers, newline separated: method, path, the token part of the
/// authorization header, the base64 SHA-256 of the body, the content type and
/// the request date.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSigner;

impl RequestSigner {
    pub fn canonical_string(
        method: &str,
        path: &str,
        prior_authorization: &str,
        content_sha256: &str,
        content_type: &str,
        date: &str,
    ) -> String {
        format!("{method}\n{path}\n{prior_authorization}\n{content_sha256}\n{content_type}\n{date}")
    }

    pub fn sign(
        token: &AuthenticationToken,
        request: &ServiceRequest,
        now: DateTime<Utc>,
    ) -> HvResult<SignedHeaders> {
        let date = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let content_sha256 = BASE64.encode(Sha256::digest(&request.body));
        let prior = format!("app-id={},token={}", token.application_id, token.token);

        let canonical = Self::canonical_string(
            request.method.as_str(),
            &request.path,
            &prior,
            &content_sha256,
            request.content_type.as_deref().unwrap_or(""),
            &date,
        );
        let hmac = token.shared_secret.sign_base64(canonical.as_bytes())?;

        Ok(SignedHeaders {
            authorization: format!("{AUTH_SCHEME} {prior},hmac={hmac}"),
            date,
            content_sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::{HmacAlgorithm, HmacKeyset};
    use crate::token::TokenStatus;
    use chrono::TimeZone;
    use tokio::time::Instant;

    fn token() -> AuthenticationToken {
        AuthenticationToken {
            application_id: "app-1".into(),
            token: "tok".into(),
            shared_secret: HmacKeyset::new(HmacAlgorithm::HmacSha256, b"k".to_vec()).unwrap(),
            status: TokenStatus::Success,
            issuance: 1,
            expires_at: Instant::now(),
        }
    }

    #[test]
    fn signature_covers_canonical_request() {
        let request = ServiceRequest::post("/items").with_body("application/json", "{}");
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let headers = RequestSigner::sign(&token(), &request, now).unwrap();

        assert_eq!(headers.date, "2024-01-02T03:04:05Z");
        assert_eq!(headers.content_sha256, BASE64.encode(Sha256::digest(b"{}")));

        let canonical = RequestSigner::canonical_string(
            "POST",
            "/items",
            "app-id=app-1,token=tok",
            &headers.content_sha256,
            "application/json",
            "2024-01-02T03:04:05Z",
        );
        let expected = token().shared_secret.sign_base64(canonical.as_bytes()).unwrap();
        assert_eq!(
            headers.authorization,
            format!("HV-HMAC app-id=app-1,token=tok,hmac={expected}")
        );
    }

    #[test]
    fn different_bodies_sign_differently() {
        let now = Utc::now();
        let a = RequestSigner::sign(&token(), &ServiceRequest::post("/x").with_body("text/plain", "a"), now).unwrap();
        let b = RequestSigner::sign(&token(), &ServiceRequest::post("/x").with_body("text/plain", "b"), now).unwrap();
        assert_ne!(a.authorization, b.authorization);
    }
}
