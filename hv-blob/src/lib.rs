//! # hv-blob: chunked blob transfer for health-record items
//!
//! `hv-blob` moves the binary payloads (scans, documents, images) attached to
//! health-record items. Uploads are chunked, block-hashed as they go and
//! sealed with an explicit `complete()` that returns the blob digest; reads
//! come from inline bytes or ranged GETs against a reference URL.
//!
//! ## Quick Start
//!
//! ```rust
//! use hv_blob::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> HvResult<()> {
//! let transport = MemoryBlobTransport::new(4 * 1024 * 1024, 2 * 1024 * 1024);
//! let client = BlobTransferClient::new(transport, TransferConfig::default());
//!
//! let mut stream = client.open_write(
//!     BlobContext::record("person-1", "record-1"),
//!     client.new_blob("scan.png"),
//! )?;
//! stream.write_all(b"not really a png").await?;
//!
//! let info = stream.complete().await?;
//! assert_eq!(info.algorithm, BlobHashAlgorithm::Sha256Block);
//! assert_eq!(stream.blob().content_length(), Some(16));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  BlobTransferClient  │  ← opens streams
//! ├──────────────────────┤
//! │  BlobTransferStream  │  ← chunking, hashing, cursor
//! ├──────────────────────┤
//! │  BlobTransport       │  ← HTTP or in-memory
//! └──────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod hasher;
pub mod http;
pub mod memory;
pub mod stream;
pub mod transport;
pub mod types;
pub mod upload;

pub use client::BlobTransferClient;
pub use config::TransferConfig;
pub use crypto::{AesGcmPackageTransform, ChunkTransform};
pub use hasher::{BlockHash, BlockHashSet, BlockHasher};
pub use http::HttpBlobTransport;
pub use memory::{ChunkRecord, MemoryBlobTransport};
pub use stream::BlobTransferStream;
pub use transport::{BlobTransport, ChunkPut, RangeResponse};
pub use types::{BlobContext, BlobDigest, BlobHandle, BlobHashAlgorithm, BlobHashInfo, ByteRange};
pub use upload::{ChunkUploadSession, NegotiationResponse};

pub use hv_core::{HvError, HvResult};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobContext, BlobHandle, BlobHashAlgorithm, BlobHashInfo, BlobTransferClient,
        BlobTransferStream, BlobTransport, HttpBlobTransport, HvError, HvResult,
        MemoryBlobTransport, TransferConfig,
    };
}
