use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use hv_core::{HvError, HvResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HmacAlgorithm {
    #[serde(rename = "HMACSHA256")]
    HmacSha256,
}

impl HmacAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacSha256 => "HMACSHA256",
        }
    }
}

/// HMAC key material used to sign requests for one application session.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct HmacKeyset {
    #[zeroize(skip)]
    algorithm: HmacAlgorithm,
    key: Vec<u8>,
}

impl HmacKeyset {
    pub fn new(algorithm: HmacAlgorithm, key: Vec<u8>) -> HvResult<Self> {
        if key.is_empty() {
            return Err(HvError::argument("key", "HMAC key must not be empty"));
        }
        Ok(Self { algorithm, key })
    }

    /// Fresh random key material of `len` bytes.
    pub fn generate(len: usize) -> Self {
        let mut key = vec![0u8; len.max(1)];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            algorithm: HmacAlgorithm::HmacSha256,
            key,
        }
    }

    pub fn from_base64(algorithm: HmacAlgorithm, encoded: &str) -> HvResult<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| HvError::protocol(format!("invalid base64 shared secret: {e}")))?;
        Self::new(algorithm, key)
    }

    pub fn algorithm(&self) -> HmacAlgorithm {
        self.algorithm
    }

    pub fn key_base64(&self) -> String {
        BASE64.encode(&self.key)
    }

    pub fn sign(&self, data: &[u8]) -> HvResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| HvError::crypto(format!("invalid HMAC key: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    pub fn sign_base64(&self, data: &[u8]) -> HvResult<String> {
        self.sign(data).map(|mac| BASE64.encode(mac))
    }
}

impl std::fmt::Debug for HmacKeyset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKeyset")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
