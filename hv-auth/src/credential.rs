//! Application credentials used to prove identity when minting a session.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hv_core::{HvError, HvResult};
use serde::{Deserialize, Serialize};

use crate::keyset::HmacKeyset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    SharedSecret,
    SigningKey,
}

/// Proof over a mint request's content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialProof {
    pub kind: CredentialKind,
    pub algorithm: String,
    /// Base64 HMAC or signature
    pub value: String,
    /// Base64 verifying key, for signature proofs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

pub trait ApplicationCredential: Send + Sync {
    fn kind(&self) -> CredentialKind;

    fn prove(&self, content: &[u8]) -> HvResult<CredentialProof>;
}

/// Application secret shared with the service; proofs are HMACs.
#[derive(Debug, Clone)]
pub struct SharedSecretCredential {
    keyset: HmacKeyset,
}

impl SharedSecretCredential {
    pub fn new(keyset: HmacKeyset) -> Self {
        Self { keyset }
    }
}

impl ApplicationCredential for SharedSecretCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::SharedSecret
    }

    fn prove(&self, content: &[u8]) -> HvResult<CredentialProof> {
        Ok(CredentialProof {
            kind: CredentialKind::SharedSecret,
            algorithm: self.keyset.algorithm().as_str().to_string(),
            value: self.keyset.sign_base64(content)?,
            public_key: None,
        })
    }
}

/// Application key pair registered with the service; proofs are Ed25519
/// signatures.
pub struct SigningKeyCredential {
    key: SigningKey,
}

impl SigningKeyCredential {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_bytes(secret: &[u8]) -> HvResult<Self> {
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| HvError::crypto(format!("expected a 32 byte signing key, got {}", secret.len())))?;
        Ok(Self {
            key: SigningKey::from_bytes(&secret),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl ApplicationCredential for SigningKeyCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::SigningKey
    }

    fn prove(&self, content: &[u8]) -> HvResult<CredentialProof> {
        let signature = self.key.sign(content);
        Ok(CredentialProof {
            kind: CredentialKind::SigningKey,
            algorithm: "Ed25519".to_string(),
            value: BASE64.encode(signature.to_bytes()),
            public_key: Some(BASE64.encode(self.key.verifying_key().as_bytes())),
        })
    }
}

impl std::fmt::Debug for SigningKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyCredential")
            .field("verifying_key", &BASE64.encode(self.key.verifying_key().as_bytes()))
            .finish()
    }
}
