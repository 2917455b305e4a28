use std::sync::Arc;

use bytes::Bytes;
use hv_core::{HvError, HvResult};

use crate::config::TransferConfig;
use crate::crypto::ChunkTransform;
use crate::stream::BlobTransferStream;
use crate::transport::BlobTransport;
use crate::types::{BlobContext, BlobHandle};

/// Entry point for opening blob streams - this is what callers hold on to
#[derive(Clone)]
pub struct BlobTransferClient {
    transport: Arc<dyn BlobTransport>,
    config: TransferConfig,
}

impl BlobTransferClient {
    pub fn new<T: BlobTransport + 'static>(transport: T, config: TransferConfig) -> Self {
        Self::from_arc(Arc::new(transport), config)
    }

    pub fn from_arc(transport: Arc<dyn BlobTransport>, config: TransferConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Empty blob handle using the configured default content type.
    pub fn new_blob(&self, name: impl Into<String>) -> BlobHandle {
        BlobHandle::new(name, self.config.default_content_type.clone())
    }

    /// Write-only stream uploading `blob` into a record.
    pub fn open_write(&self, context: BlobContext, blob: BlobHandle) -> HvResult<BlobTransferStream> {
        ensure_writable(&blob)?;
        Ok(BlobTransferStream::writer(
            self.transport.clone(),
            &self.config,
            context,
            blob,
            None,
        ))
    }

    /// Write-only stream uploading `blob` into a connect package, optionally
    /// transforming each chunk before it is sent.
    pub fn open_package_write(
        &self,
        package_id: impl Into<String>,
        blob: BlobHandle,
        transform: Option<Arc<dyn ChunkTransform>>,
    ) -> HvResult<BlobTransferStream> {
        ensure_writable(&blob)?;
        Ok(BlobTransferStream::writer(
            self.transport.clone(),
            &self.config,
            BlobContext::connect_package(package_id),
            blob,
            transform,
        ))
    }

    /// Read-only stream over bytes already in memory.
    pub fn open_inline(&self, data: impl Into<Bytes>) -> BlobTransferStream {
        let data = data.into();
        let blob = self.new_blob("inline").with_inline_data(data.clone());
        BlobTransferStream::inline(self.transport.clone(), &self.config, blob, data)
    }

    /// Read-only stream over `url`. Without a length, seeking from the end is
    /// not supported.
    pub fn open_url(&self, url: impl Into<String>, length: Option<u64>) -> BlobTransferStream {
        let url = url.into();
        let blob = self.new_blob("remote").with_reference_url(url.clone(), length);
        BlobTransferStream::url(self.transport.clone(), &self.config, blob, url, length)
    }

    /// Read-only stream over an existing blob, inline or by reference.
    pub fn open_read(&self, blob: BlobHandle) -> HvResult<BlobTransferStream> {
        if let Some(data) = blob.inline_data().cloned() {
            return Ok(BlobTransferStream::inline(self.transport.clone(), &self.config, blob, data));
        }
        if let Some(url) = blob.reference_url().map(str::to_string) {
            let length = blob.content_length();
            return Ok(BlobTransferStream::url(self.transport.clone(), &self.config, blob, url, length));
        }
        Err(HvError::invalid_operation(format!(
            "blob `{}` has no content to read",
            blob.name()
        )))
    }
}

fn ensure_writable(blob: &BlobHandle) -> HvResult<()> {
    if blob.is_sealed() {
        return Err(HvError::invalid_operation(format!("blob `{}` is sealed", blob.name())));
    }
    if blob.inline_data().is_some() || blob.reference_url().is_some() || blob.hash_info().is_some() {
        return Err(HvError::invalid_operation(format!(
            "blob `{}` already has content",
            blob.name()
        )));
    }
    Ok(())
}
