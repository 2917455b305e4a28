use hv_core::{HvError, HvResult};
use serde::{Deserialize, Serialize};

use crate::types::BlobHashAlgorithm;

/// Block size used when the service omits hash parameters.
pub const DEFAULT_HASH_BLOCK_SIZE: u64 = 2 * 1024 * 1024;

/// Default hash block size for `chunk_size`: 2 MiB when that divides the
/// chunk, otherwise the whole chunk.
pub fn default_hash_block_size(chunk_size: u64) -> u64 {
    if chunk_size == 0 || chunk_size % DEFAULT_HASH_BLOCK_SIZE == 0 {
        DEFAULT_HASH_BLOCK_SIZE
    } else {
        chunk_size
    }
}

/// Parameters the service hands back when a chunked upload is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUploadSession {
    /// Where chunks are PUT
    pub upload_url: String,

    /// Plaintext bytes per chunk; every chunk but the last is exactly this size
    pub chunk_size: u64,

    /// Upper bound on a chunk after the package transform, if any
    pub post_encryption_chunk_size: Option<u64>,

    pub max_blob_size: u64,

    pub hash_algorithm: BlobHashAlgorithm,

    pub hash_block_size: u64,
}

impl ChunkUploadSession {
    pub fn new(upload_url: impl Into<String>, chunk_size: u64, max_blob_size: u64) -> Self {
        Self {
            upload_url: upload_url.into(),
            chunk_size,
            post_encryption_chunk_size: None,
            max_blob_size,
            hash_algorithm: BlobHashAlgorithm::Sha256Block,
            hash_block_size: default_hash_block_size(chunk_size),
        }
    }

    pub fn with_hash(mut self, algorithm: BlobHashAlgorithm, block_size: u64) -> Self {
        self.hash_algorithm = algorithm;
        self.hash_block_size = block_size;
        self
    }

    pub fn with_post_encryption_chunk_size(mut self, size: u64) -> Self {
        self.post_encryption_chunk_size = Some(size);
        self
    }

    pub fn validate(&self) -> HvResult<()> {
        if self.upload_url.trim().is_empty() {
            return Err(HvError::protocol("upload session has no upload url"));
        }
        if self.chunk_size == 0 {
            return Err(HvError::protocol("chunk size must be greater than zero"));
        }
        if let Some(post) = self.post_encryption_chunk_size {
            if post < self.chunk_size {
                return Err(HvError::protocol(format!(
                    "post-encryption chunk size {post} is smaller than chunk size {}",
                    self.chunk_size
                )));
            }
        }
        if self.hash_block_size == 0 {
            return Err(HvError::protocol("hash block size must be greater than zero"));
        }
        if self.chunk_size % self.hash_block_size != 0 {
            return Err(HvError::protocol(format!(
                "chunk size {} is not a multiple of hash block size {}",
                self.chunk_size, self.hash_block_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HashParameters {
    pub block_size: Option<u64>,
}

/// Body of the upload-session negotiation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NegotiationResponse {
    pub blob_ref_url: String,
    pub blob_chunk_size: u64,
    #[serde(default)]
    pub blob_pre_encryption_chunk_size: Option<u64>,
    #[serde(default)]
    pub blob_post_encryption_chunk_size: Option<u64>,
    pub max_blob_size: u64,
    pub blob_hash_algorithm: BlobHashAlgorithm,
    #[serde(default)]
    pub blob_hash_parameters: HashParameters,
}

impl NegotiationResponse {
    /// Turn the wire response into a validated session.
    ///
    /// For connect packages the pre-encryption size, when present, is the
    /// plaintext chunk size.
    pub fn into_session(self, package: bool) -> HvResult<ChunkUploadSession> {
        let chunk_size = match (package, self.blob_pre_encryption_chunk_size) {
            (true, Some(pre)) => pre,
            _ => self.blob_chunk_size,
        };

        let session = ChunkUploadSession {
            upload_url: self.blob_ref_url,
            chunk_size,
            post_encryption_chunk_size: if package {
                self.blob_post_encryption_chunk_size
            } else {
                None
            },
            max_blob_size: self.max_blob_size,
            hash_algorithm: self.blob_hash_algorithm,
            hash_block_size: self
                .blob_hash_parameters
                .block_size
                .unwrap_or_else(|| default_hash_block_size(chunk_size)),
        };
        session.validate()?;
        Ok(session)
    }
}
