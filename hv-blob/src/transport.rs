use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hv_core::HvResult;

use crate::types::{BlobContext, ByteRange};
use crate::upload::ChunkUploadSession;

/// Header marking the final chunk of an upload.
pub const COMPLETE_HEADER: &str = "x-hv-blob-complete";

/// Wire operations a blob stream needs - implemented by the HTTP transport and
/// by the in-memory double used in tests.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Negotiate a chunked upload session for a new blob.
    async fn begin_upload(&self, context: &BlobContext) -> HvResult<ChunkUploadSession>;

    /// Upload one chunk to the session URL.
    async fn put_chunk(&self, upload_url: &str, chunk: ChunkPut) -> HvResult<()>;

    /// Fetch `range` of the blob at `url`.
    async fn get_range(&self, url: &str, range: ByteRange, timeout: Duration) -> HvResult<RangeResponse>;
}

/// One chunk PUT.
#[derive(Debug, Clone)]
pub struct ChunkPut {
    /// Offset of this chunk in the uploaded (wire) byte sequence
    pub start: u64,
    pub body: Bytes,
    /// Last chunk of the blob
    pub complete: bool,
    pub timeout: Duration,
}

impl ChunkPut {
    /// `Content-Range` header value; an empty chunk has none.
    pub fn content_range(&self) -> Option<String> {
        if self.body.is_empty() {
            return None;
        }
        let end = self.start + self.body.len() as u64 - 1;
        Some(format!("bytes {}-{}/*", self.start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeResponse {
    Data(Bytes),
    /// The range starts at or past the end of the blob (HTTP 416)
    NotSatisfiable,
}
