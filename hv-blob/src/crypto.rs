//! Per-chunk encryption for connect-package blobs.
//!
//! Each plaintext chunk is sealed independently with AES-256-GCM. The nonce is
//! a random 4-byte prefix chosen per package followed by the big-endian chunk
//! index, so no nonce repeats within a package.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hv_core::{HvError, HvResult};
use rand::RngCore;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Transformation applied to each plaintext chunk before upload.
pub trait ChunkTransform: Send + Sync {
    fn transform(&self, chunk_index: u64, plaintext: &[u8]) -> HvResult<Vec<u8>>;

    /// Bytes added per chunk.
    fn overhead(&self) -> usize;
}

pub struct AesGcmPackageTransform {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; 4],
}

impl AesGcmPackageTransform {
    pub fn new(key: &[u8]) -> HvResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(HvError::crypto(format!(
                "package key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        let mut nonce_prefix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut nonce_prefix);

        Ok(Self {
            cipher,
            nonce_prefix,
        })
    }

    /// Fresh random package key.
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    pub fn with_nonce_prefix(mut self, prefix: [u8; 4]) -> Self {
        self.nonce_prefix = prefix;
        self
    }

    pub fn nonce_prefix(&self) -> [u8; 4] {
        self.nonce_prefix
    }

    fn nonce(&self, chunk_index: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..4].copy_from_slice(&self.nonce_prefix);
        nonce[4..].copy_from_slice(&chunk_index.to_be_bytes());
        nonce
    }

    /// Reverse of [`ChunkTransform::transform`], for the package recipient.
    pub fn decrypt(&self, chunk_index: u64, ciphertext: &[u8]) -> HvResult<Vec<u8>> {
        let nonce = self.nonce(chunk_index);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| HvError::crypto(format!("chunk {chunk_index} failed authentication")))
    }
}

impl ChunkTransform for AesGcmPackageTransform {
    fn transform(&self, chunk_index: u64, plaintext: &[u8]) -> HvResult<Vec<u8>> {
        let nonce = self.nonce(chunk_index);
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| HvError::crypto(format!("failed to encrypt chunk {chunk_index}")))
    }

    fn overhead(&self) -> usize {
        TAG_SIZE
    }
}

impl std::fmt::Debug for AesGcmPackageTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmPackageTransform")
            .field("nonce_prefix", &self.nonce_prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_round_trip_with_their_own_index() {
        let key = AesGcmPackageTransform::generate_key();
        let transform = AesGcmPackageTransform::new(&key).unwrap();

        let sealed = transform.transform(7, b"chunk seven").unwrap();
        assert_eq!(sealed.len(), b"chunk seven".len() + transform.overhead());
        assert_eq!(transform.decrypt(7, &sealed).unwrap(), b"chunk seven");

        let err = transform.decrypt(8, &sealed).unwrap_err();
        assert!(matches!(err, HvError::Crypto(_)));
    }

    #[test]
    fn nonce_is_prefix_then_big_endian_index() {
        let transform = AesGcmPackageTransform::new(&[1u8; KEY_SIZE])
            .unwrap()
            .with_nonce_prefix([9, 9, 9, 9]);
        assert_eq!(transform.nonce(258), [9, 9, 9, 9, 0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn rejects_short_keys() {
        assert!(AesGcmPackageTransform::new(&[0u8; 16]).is_err());
    }
}
