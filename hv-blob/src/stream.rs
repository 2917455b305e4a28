//! # BlobTransferStream
//!
//! A single-owner stream over one remote blob. A stream is either write-only
//! (chunked upload with block hashing) or read-only (inline bytes or ranged
//! reads from a reference URL), never both.
//!
//! Writes are buffered until a full negotiated chunk is available, then
//! uploaded in byte order. [`BlobTransferStream::complete`] flushes the final
//! chunk, computes the blob digest and records it on the handle; it is the
//! only way an upload produces hash information.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use hv_core::{HvError, HvResult, RetryPolicy};
use tracing::{debug, instrument, warn};

use crate::config::TransferConfig;
use crate::crypto::ChunkTransform;
use crate::hasher::{check_bounds, BlockHashSet, BlockHasher};
use crate::transport::{BlobTransport, ChunkPut, RangeResponse};
use crate::types::{BlobContext, BlobHandle, BlobHashInfo, ByteRange};
use crate::upload::ChunkUploadSession;

pub struct BlobTransferStream {
    blob: BlobHandle,
    transport: Arc<dyn BlobTransport>,
    retry: RetryPolicy,
    read_timeout: Duration,
    write_timeout: Duration,
    mode: Mode,
    position: u64,
    disposed: bool,
}

enum Mode {
    Write(Box<WriteState>),
    ReadInline(Bytes),
    ReadUrl { url: String, length: Option<u64> },
}

struct WriteState {
    context: BlobContext,
    transform: Option<Arc<dyn ChunkTransform>>,
    session: Option<ChunkUploadSession>,
    hashes: Option<BlockHashSet>,
    pending: VecDeque<Bytes>,
    pending_len: u64,
    /// Plaintext bytes accepted so far
    written: u64,
    /// Bytes sent on the wire so far (differs from `written` under a transform)
    wire_offset: u64,
    chunk_index: u64,
    attempted_write: bool,
    failed: bool,
}

impl BlobTransferStream {
    pub(crate) fn writer(
        transport: Arc<dyn BlobTransport>,
        config: &TransferConfig,
        context: BlobContext,
        blob: BlobHandle,
        transform: Option<Arc<dyn ChunkTransform>>,
    ) -> Self {
        let state = WriteState {
            context,
            transform,
            session: None,
            hashes: None,
            pending: VecDeque::new(),
            pending_len: 0,
            written: 0,
            wire_offset: 0,
            chunk_index: 0,
            attempted_write: false,
            failed: false,
        };
        Self::with_mode(transport, config, blob, Mode::Write(Box::new(state)))
    }

    pub(crate) fn inline(transport: Arc<dyn BlobTransport>, config: &TransferConfig, blob: BlobHandle, data: Bytes) -> Self {
        Self::with_mode(transport, config, blob, Mode::ReadInline(data))
    }

    pub(crate) fn url(
        transport: Arc<dyn BlobTransport>,
        config: &TransferConfig,
        blob: BlobHandle,
        url: String,
        length: Option<u64>,
    ) -> Self {
        Self::with_mode(transport, config, blob, Mode::ReadUrl { url, length })
    }

    fn with_mode(transport: Arc<dyn BlobTransport>, config: &TransferConfig, blob: BlobHandle, mode: Mode) -> Self {
        Self {
            blob,
            transport,
            retry: config.retry.clone(),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            mode,
            position: 0,
            disposed: false,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn can_read(&self) -> bool {
        !self.disposed && !matches!(self.mode, Mode::Write(_))
    }

    pub fn can_write(&self) -> bool {
        !self.disposed && matches!(self.mode, Mode::Write(_))
    }

    pub fn can_seek(&self) -> bool {
        self.can_read()
    }

    pub fn position(&self) -> u64 {
        match &self.mode {
            Mode::Write(state) => state.written,
            _ => self.position,
        }
    }

    /// Total length when known. For write streams, the bytes written so far.
    pub fn length(&self) -> Option<u64> {
        match &self.mode {
            Mode::Write(state) => Some(state.written),
            Mode::ReadInline(data) => Some(data.len() as u64),
            Mode::ReadUrl { length, .. } => *length,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn blob(&self) -> &BlobHandle {
        &self.blob
    }

    /// Give up the stream and keep the blob handle.
    pub fn into_blob(mut self) -> BlobHandle {
        let placeholder = BlobHandle::new(self.blob.name().to_string(), self.blob.content_type().to_string());
        std::mem::replace(&mut self.blob, placeholder)
    }

    /// Append `buffer[offset..offset + count]` to the blob.
    pub async fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> HvResult<()> {
        self.ensure_open()?;
        let Mode::Write(state) = &mut self.mode else {
            return Err(HvError::not_supported("stream is read-only"));
        };
        check_bounds(buffer.len(), offset, count)?;
        state.attempted_write = true;

        if state.failed {
            return Err(HvError::invalid_operation("an earlier chunk upload failed"));
        }

        state.ensure_session(self.transport.as_ref(), &mut self.blob).await?;
        let (chunk_size, max_blob_size) = match &state.session {
            Some(session) => (session.chunk_size, session.max_blob_size),
            None => return Err(HvError::invalid_operation("upload session is missing")),
        };

        let attempted = state.written.saturating_add(count as u64);
        if attempted > max_blob_size {
            return Err(HvError::BlobTooLarge {
                size: attempted,
                max: max_blob_size,
            });
        }

        if count > 0 {
            state
                .pending
                .push_back(Bytes::copy_from_slice(&buffer[offset..offset + count]));
            state.pending_len += count as u64;
            state.written = attempted;
        }

        while state.pending_len >= chunk_size {
            let chunk = state.take_pending(chunk_size);
            if let Err(err) = state
                .upload_chunk(self.transport.as_ref(), &self.retry, self.write_timeout, chunk, false)
                .await
            {
                state.failed = true;
                return Err(err);
            }
        }
        Ok(())
    }

    pub async fn write_all(&mut self, data: &[u8]) -> HvResult<()> {
        self.write(data, 0, data.len()).await
    }

    pub async fn write_byte(&mut self, value: u8) -> HvResult<()> {
        self.write(&[value], 0, 1).await
    }

    /// Flush the final chunk, seal the upload and record the digest on the blob.
    ///
    /// Fails when nothing was ever written or when an earlier chunk upload
    /// failed; a failed upload never yields hash information.
    #[instrument(skip_all, fields(blob = %self.blob.name()))]
    pub async fn complete(&mut self) -> HvResult<BlobHashInfo> {
        self.ensure_open()?;
        let Mode::Write(state) = &mut self.mode else {
            return Err(HvError::not_supported("read streams have nothing to complete"));
        };
        if !state.attempted_write {
            return Err(HvError::invalid_operation(
                "a write stream must be written to before it is completed",
            ));
        }
        if state.failed {
            self.disposed = true;
            return Err(HvError::invalid_operation(
                "the upload failed and cannot produce a valid blob",
            ));
        }

        if let Err(err) = state.ensure_session(self.transport.as_ref(), &mut self.blob).await {
            self.disposed = true;
            return Err(err);
        }

        let remaining = state.pending_len;
        let last = state.take_pending(remaining);
        if let Err(err) = state
            .upload_chunk(self.transport.as_ref(), &self.retry, self.write_timeout, last, true)
            .await
        {
            state.failed = true;
            self.disposed = true;
            return Err(err);
        }
        self.disposed = true;

        let hashes = state
            .hashes
            .take()
            .ok_or_else(|| HvError::invalid_operation("block hashes are missing"))?;
        let info = hashes.finish_info();

        self.blob.set_content_length(state.written)?;
        self.blob.set_hash_info(info.clone())?;

        debug!(
            length = state.written,
            chunks = state.chunk_index,
            digest = %info.digest.to_base64(),
            "blob upload completed"
        );
        Ok(info)
    }

    /// Release the stream. Write streams are completed and the hash info discarded.
    pub async fn close(&mut self) -> HvResult<()> {
        if self.disposed {
            return Ok(());
        }
        if matches!(self.mode, Mode::Write(_)) {
            self.complete().await.map(|_| ())
        } else {
            self.disposed = true;
            Ok(())
        }
    }

    /// Read into `buffer[offset..offset + count]`; `Ok(0)` is end of stream.
    pub async fn read(&mut self, buffer: &mut [u8], offset: usize, count: usize) -> HvResult<usize> {
        self.ensure_open()?;
        check_bounds(buffer.len(), offset, count)?;

        match &self.mode {
            Mode::Write(_) => Err(HvError::not_supported("stream is write-only")),
            Mode::ReadInline(data) => {
                let start = (self.position as usize).min(data.len());
                let n = count.min(data.len() - start);
                buffer[offset..offset + n].copy_from_slice(&data[start..start + n]);
                self.position += n as u64;
                Ok(n)
            }
            Mode::ReadUrl { url, length } => {
                if count == 0 {
                    return Ok(0);
                }
                let mut end = self.position.saturating_add(count as u64);
                if let Some(len) = *length {
                    if self.position >= len {
                        return Ok(0);
                    }
                    end = end.min(len);
                }

                let range = ByteRange::new(self.position, end);
                let transport = self.transport.as_ref();
                let timeout = self.read_timeout;
                let response = self
                    .retry
                    .run("get_range", move || transport.get_range(url, range, timeout))
                    .await?;

                match response {
                    RangeResponse::NotSatisfiable => {
                        debug!(range_start = range.start, "range not satisfiable, end of blob");
                        Ok(0)
                    }
                    RangeResponse::Data(bytes) => {
                        let n = bytes.len().min(count);
                        buffer[offset..offset + n].copy_from_slice(&bytes[..n]);
                        self.position += n as u64;
                        Ok(n)
                    }
                }
            }
        }
    }

    /// Read until end of stream.
    pub async fn read_to_end(&mut self) -> HvResult<Bytes> {
        let mut out = BytesMut::new();
        let mut buffer = vec![0u8; 64 * 1024];
        let len = buffer.len();
        loop {
            let n = self.read(&mut buffer, 0, len).await?;
            if n == 0 {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&buffer[..n]);
        }
    }

    pub fn seek(&mut self, pos: SeekFrom) -> HvResult<u64> {
        self.ensure_open()?;
        if matches!(self.mode, Mode::Write(_)) {
            return Err(HvError::not_supported("write streams cannot seek"));
        }
        let length = self.length();

        let target: i128 = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => match length {
                Some(len) => i128::from(len) + i128::from(delta),
                None => {
                    return Err(HvError::not_supported(
                        "cannot seek from the end of a stream with unknown length",
                    ))
                }
            },
        };

        if target < 0 || length.is_some_and(|len| target > i128::from(len)) {
            return Err(HvError::seek_out_of_range(target, length));
        }
        self.position = target as u64;
        Ok(self.position)
    }

    fn ensure_open(&self) -> HvResult<()> {
        if self.disposed {
            return Err(HvError::disposed(format!("blob stream `{}`", self.blob.name())));
        }
        Ok(())
    }
}

impl WriteState {
    async fn ensure_session(&mut self, transport: &dyn BlobTransport, blob: &mut BlobHandle) -> HvResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let session = transport.begin_upload(&self.context).await?;
        session.validate()?;
        let hasher = BlockHasher::new(session.hash_algorithm, session.hash_block_size)?;
        blob.set_upload_url(session.upload_url.clone())?;

        debug!(
            upload_url = %session.upload_url,
            chunk_size = session.chunk_size,
            block_size = session.hash_block_size,
            "negotiated blob upload session"
        );
        self.hashes = Some(hasher.start());
        self.session = Some(session);
        Ok(())
    }

    /// Remove up to `n` bytes from the front of the pending segments.
    fn take_pending(&mut self, n: u64) -> Bytes {
        let n = n.min(self.pending_len) as usize;
        if self.pending.front().is_some_and(|front| front.len() == n) {
            self.pending_len -= n as u64;
            return self.pending.pop_front().unwrap_or_default();
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(mut front) = self.pending.pop_front() else {
                break;
            };
            let need = n - out.len();
            if front.len() > need {
                let head = front.split_to(need);
                out.extend_from_slice(&head);
                self.pending.push_front(front);
            } else {
                out.extend_from_slice(&front);
            }
        }
        self.pending_len -= out.len() as u64;
        out.freeze()
    }

    async fn upload_chunk(
        &mut self,
        transport: &dyn BlobTransport,
        retry: &RetryPolicy,
        timeout: Duration,
        plaintext: Bytes,
        complete: bool,
    ) -> HvResult<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| HvError::invalid_operation("upload session is missing"))?;
        let hashes = self
            .hashes
            .as_mut()
            .ok_or_else(|| HvError::invalid_operation("block hashes are missing"))?;

        hashes.update(&plaintext);

        let body = match &self.transform {
            Some(transform) if !plaintext.is_empty() => {
                let sealed = Bytes::from(transform.transform(self.chunk_index, &plaintext)?);
                if let Some(max) = session.post_encryption_chunk_size {
                    if sealed.len() as u64 > max {
                        return Err(HvError::protocol(format!(
                            "encrypted chunk of {} bytes exceeds {max}",
                            sealed.len()
                        )));
                    }
                }
                sealed
            }
            _ => plaintext,
        };

        let put = ChunkPut {
            start: self.wire_offset,
            body,
            complete,
            timeout,
        };
        debug!(
            chunk_index = self.chunk_index,
            range_start = put.start,
            len = put.body.len(),
            complete,
            "uploading blob chunk"
        );

        let sent = put.body.len() as u64;
        let url = session.upload_url.as_str();
        retry
            .run("put_chunk", move || transport.put_chunk(url, put.clone()))
            .await?;

        self.wire_offset += sent;
        self.chunk_index += 1;
        Ok(())
    }
}

impl Drop for BlobTransferStream {
    fn drop(&mut self) {
        if let Mode::Write(state) = &self.mode {
            if state.attempted_write && !self.disposed {
                warn!(
                    blob = %self.blob.name(),
                    written = state.written,
                    "blob stream dropped without complete(); upload has no digest"
                );
            }
        }
    }
}

impl std::fmt::Debug for BlobTransferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.mode {
            Mode::Write(_) => "write",
            Mode::ReadInline(_) => "inline",
            Mode::ReadUrl { .. } => "url",
        };
        f.debug_struct("BlobTransferStream")
            .field("blob", &self.blob.name())
            .field("mode", &mode)
            .field("position", &self.position())
            .field("disposed", &self.disposed)
            .finish()
    }
}
