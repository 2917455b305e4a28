use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hv_core::{HvError, HvResult};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::transport::{BlobTransport, ChunkPut, RangeResponse};
use crate::types::{BlobContext, ByteRange};
use crate::upload::ChunkUploadSession;

/// A chunk as the transport saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub start: u64,
    pub len: u64,
    pub complete: bool,
}

#[derive(Debug, Default)]
struct StoredBlob {
    content: Vec<u8>,
    chunks: Vec<ChunkRecord>,
    complete: bool,
}

#[derive(Debug, Default)]
struct FailurePlan {
    remaining: usize,
    retryable: bool,
}

/// In-memory transport for testing and development.
///
/// Negotiation hands out sessions from a template, chunk PUTs are checked for
/// contiguous framing and appended, and completed uploads become readable by
/// their upload URL.
pub struct MemoryBlobTransport {
    template: ChunkUploadSession,
    uploads: Arc<RwLock<HashMap<String, StoredBlob>>>,
    range_requests: Arc<RwLock<Vec<(String, ByteRange)>>>,
    put_failures: Mutex<FailurePlan>,
    negotiations: AtomicUsize,
}

impl MemoryBlobTransport {
    /// Sessions use `chunk_size` and `block_size` with SHA256Block hashing and
    /// no size limit.
    pub fn new(chunk_size: u64, block_size: u64) -> Self {
        let template = ChunkUploadSession::new("memory://blobs", chunk_size, u64::MAX)
            .with_hash(crate::types::BlobHashAlgorithm::Sha256Block, block_size);
        Self::with_session(template)
    }

    /// Hand out sessions copied from `template`; each gets its own upload URL.
    pub fn with_session(template: ChunkUploadSession) -> Self {
        Self {
            template,
            uploads: Arc::new(RwLock::new(HashMap::new())),
            range_requests: Arc::new(RwLock::new(Vec::new())),
            put_failures: Mutex::new(FailurePlan::default()),
            negotiations: AtomicUsize::new(0),
        }
    }

    pub fn with_max_blob_size(mut self, max: u64) -> Self {
        self.template.max_blob_size = max;
        self
    }

    /// Make a readable blob available at `url`.
    pub fn insert_blob(&self, url: impl Into<String>, content: impl Into<Bytes>) {
        let stored = StoredBlob {
            content: content.into().to_vec(),
            chunks: Vec::new(),
            complete: true,
        };
        self.uploads.write().insert(url.into(), stored);
    }

    /// Fail the next `count` chunk PUTs.
    pub fn fail_next_puts(&self, count: usize, retryable: bool) {
        *self.put_failures.lock() = FailurePlan {
            remaining: count,
            retryable,
        };
    }

    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst)
    }

    pub fn content(&self, url: &str) -> Option<Bytes> {
        self.uploads
            .read()
            .get(url)
            .map(|blob| Bytes::copy_from_slice(&blob.content))
    }

    pub fn chunks(&self, url: &str) -> Vec<ChunkRecord> {
        self.uploads
            .read()
            .get(url)
            .map(|blob| blob.chunks.clone())
            .unwrap_or_default()
    }

    pub fn is_complete(&self, url: &str) -> bool {
        self.uploads.read().get(url).is_some_and(|blob| blob.complete)
    }

    pub fn range_requests(&self) -> Vec<(String, ByteRange)> {
        self.range_requests.read().clone()
    }

    fn take_injected_failure(&self, url: &str) -> Option<HvError> {
        let mut plan = self.put_failures.lock();
        if plan.remaining == 0 {
            return None;
        }
        plan.remaining -= 1;
        Some(if plan.retryable {
            HvError::transient(url, Some(503), "injected failure")
        } else {
            HvError::service(400, "injected failure")
        })
    }
}

#[async_trait]
impl BlobTransport for MemoryBlobTransport {
    async fn begin_upload(&self, context: &BlobContext) -> HvResult<ChunkUploadSession> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);

        let mut session = self.template.clone();
        session.upload_url = format!("memory://blobs/{}?{}", Uuid::new_v4(), context.query());
        session.validate()?;

        self.uploads
            .write()
            .insert(session.upload_url.clone(), StoredBlob::default());
        Ok(session)
    }

    async fn put_chunk(&self, upload_url: &str, chunk: ChunkPut) -> HvResult<()> {
        if let Some(err) = self.take_injected_failure(upload_url) {
            return Err(err);
        }

        let mut uploads = self.uploads.write();
        let blob = uploads
            .get_mut(upload_url)
            .ok_or_else(|| HvError::service(404, format!("no upload at {upload_url}")))?;

        if blob.complete {
            return Err(HvError::service(409, "upload is already complete"));
        }
        if chunk.body.is_empty() && !chunk.complete {
            return Err(HvError::protocol("empty chunk without completion marker"));
        }
        if !chunk.body.is_empty() && chunk.start != blob.content.len() as u64 {
            return Err(HvError::service(
                416,
                format!(
                    "chunk starts at {} but {} bytes were received",
                    chunk.start,
                    blob.content.len()
                ),
            ));
        }

        blob.content.extend_from_slice(&chunk.body);
        blob.chunks.push(ChunkRecord {
            start: chunk.start,
            len: chunk.body.len() as u64,
            complete: chunk.complete,
        });
        blob.complete = chunk.complete;
        Ok(())
    }

    async fn get_range(&self, url: &str, range: ByteRange, _timeout: Duration) -> HvResult<RangeResponse> {
        self.range_requests.write().push((url.to_string(), range));

        let uploads = self.uploads.read();
        let blob = uploads
            .get(url)
            .filter(|blob| blob.complete)
            .ok_or_else(|| HvError::service(404, format!("no blob at {url}")))?;

        let len = blob.content.len() as u64;
        if range.start >= len {
            return Ok(RangeResponse::NotSatisfiable);
        }
        let end = range.end.min(len);
        Ok(RangeResponse::Data(Bytes::copy_from_slice(
            &blob.content[range.start as usize..end as usize],
        )))
    }
}
