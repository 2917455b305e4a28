//! Block hashing for blob uploads.
//!
//! Content is cut into fixed-size blocks (the last one may be short), each
//! block is hashed on its own, and the blob digest is the hash of the
//! concatenated block hashes. The result does not depend on how the content
//! was split across writes.

use hv_core::{HvError, HvResult};
use sha2::{Digest, Sha256};

use crate::types::{BlobDigest, BlobHashAlgorithm, BlobHashInfo};

pub type BlockHash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHasher {
    algorithm: BlobHashAlgorithm,
    block_size: usize,
}

impl BlockHasher {
    pub fn new(algorithm: BlobHashAlgorithm, block_size: u64) -> HvResult<Self> {
        if algorithm != BlobHashAlgorithm::Sha256Block {
            return Err(HvError::not_supported(format!(
                "blob hash algorithm `{algorithm}`"
            )));
        }
        if block_size == 0 {
            return Err(HvError::argument("block_size", "must be greater than zero"));
        }
        let block_size = usize::try_from(block_size)
            .map_err(|_| HvError::argument("block_size", "does not fit in memory"))?;

        Ok(Self {
            algorithm,
            block_size,
        })
    }

    pub fn algorithm(&self) -> BlobHashAlgorithm {
        self.algorithm
    }

    pub fn block_size(&self) -> u64 {
        self.block_size as u64
    }

    /// Hash `buffer[offset..offset + count]` block by block.
    pub fn calculate_block_hashes(
        &self,
        buffer: &[u8],
        offset: usize,
        count: usize,
    ) -> HvResult<Vec<BlockHash>> {
        let data = checked_slice(buffer, offset, count)?;
        Ok(data.chunks(self.block_size).map(hash_block).collect())
    }

    /// Digest of the ordered block hashes.
    pub fn calculate_blob_hash(&self, block_hashes: &[BlockHash]) -> BlobDigest {
        let mut hasher = Sha256::new();
        for hash in block_hashes {
            hasher.update(hash);
        }
        BlobDigest(hasher.finalize().to_vec())
    }

    /// Start an incremental accumulator using this hasher's block size.
    pub fn start(&self) -> BlockHashSet {
        BlockHashSet::new(*self)
    }
}

/// Incremental block hashing across many writes.
///
/// Bytes that do not yet fill a block are carried until the next `update`,
/// so block boundaries are always measured from the start of the blob.
#[derive(Debug, Clone)]
pub struct BlockHashSet {
    hasher: BlockHasher,
    hashes: Vec<BlockHash>,
    partial: Vec<u8>,
    total: u64,
}

impl BlockHashSet {
    pub fn new(hasher: BlockHasher) -> Self {
        Self {
            hasher,
            hashes: Vec::new(),
            partial: Vec::with_capacity(hasher.block_size),
            total: 0,
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        let block_size = self.hasher.block_size;
        self.total += data.len() as u64;

        if !self.partial.is_empty() {
            let take = (block_size - self.partial.len()).min(data.len());
            self.partial.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.partial.len() == block_size {
                self.hashes.push(hash_block(&self.partial));
                self.partial.clear();
            }
        }

        let mut blocks = data.chunks_exact(block_size);
        for block in &mut blocks {
            self.hashes.push(hash_block(block));
        }
        self.partial.extend_from_slice(blocks.remainder());
    }

    /// Bytes fed so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Hash the trailing partial block, if any, and return the blob digest.
    pub fn finish(mut self) -> BlobDigest {
        if !self.partial.is_empty() {
            self.hashes.push(hash_block(&self.partial));
        }
        self.hasher.calculate_blob_hash(&self.hashes)
    }

    pub fn finish_info(self) -> BlobHashInfo {
        let algorithm = self.hasher.algorithm;
        let block_size = self.hasher.block_size();
        BlobHashInfo {
            algorithm,
            block_size,
            digest: self.finish(),
        }
    }
}

fn hash_block(block: &[u8]) -> BlockHash {
    Sha256::digest(block).into()
}

fn checked_slice(buffer: &[u8], offset: usize, count: usize) -> HvResult<&[u8]> {
    check_bounds(buffer.len(), offset, count)?;
    Ok(&buffer[offset..offset + count])
}

/// `offset` and `count` must describe a window inside a buffer of `len` bytes.
pub(crate) fn check_bounds(len: usize, offset: usize, count: usize) -> HvResult<()> {
    if offset > len {
        return Err(HvError::argument("offset", "is past the end of the buffer"));
    }
    if count > len - offset {
        return Err(HvError::argument(
            "count",
            "offset + count is past the end of the buffer",
        ));
    }
    Ok(())
}
