#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use dog_upload::store::{
    CompletedPart, GetResult, MultipartHandle, ObjectHead, PartETag, PutResult,
};
use dog_upload::{
    BlobStore, ByteRange, ByteStream, MemoryBlobStore, MultipartBlobStore, OwnerId,
    StoreCapabilities, StoreError, StoreResult, UploadConfig, UploadCtx,
};

pub fn ctx() -> UploadCtx {
    UploadCtx::new(OwnerId::new("owner-1"))
}

pub fn other_ctx() -> UploadCtx {
    UploadCtx::new(OwnerId::new("owner-2"))
}

/// Small chunks so tests move bytes, not mebibytes
pub fn small_config(chunk_size: u64) -> UploadConfig {
    UploadConfig::default()
        .with_chunk_size(chunk_size)
        .with_cleanup_concurrency(2)
}

/// Deterministic, position-dependent bytes
pub fn patterned(len: usize, seed: u8) -> Bytes {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}

pub fn split(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}

fn injected(what: &str) -> StoreError {
    StoreError::backend(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        format!("injected {what} failure"),
    ))
}

/// `MemoryBlobStore` with switchable failures
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryBlobStore,
    fail_puts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    /// Part number whose upload fails; 0 disables
    fail_part: Arc<AtomicU32>,
    /// Advertised minimum part size; 0 means none
    min_part_size: Arc<AtomicU64>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, on: bool) {
        self.fail_puts.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn fail_part(&self, part_number: u32) {
        self.fail_part.store(part_number, Ordering::SeqCst);
    }

    pub fn min_part_size(&self, bytes: u64) {
        self.min_part_size.store(bytes, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> StoreResult<PutResult> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        self.inner.put(key, content_type, stream).await
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> StoreResult<GetResult> {
        self.inner.get(key, range).await
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectHead> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("delete"));
        }
        self.inner.delete(key).await
    }

    fn capabilities(&self) -> StoreCapabilities {
        let mut caps = self.inner.capabilities();
        match self.min_part_size.load(Ordering::SeqCst) {
            0 => {}
            min => caps.min_part_size = Some(min),
        }
        caps
    }
}

#[async_trait]
impl MultipartBlobStore for FlakyStore {
    async fn init_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<MultipartHandle> {
        self.inner.init_multipart(key, content_type).await
    }

    async fn put_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        stream: ByteStream,
        size_bytes: u64,
    ) -> StoreResult<PartETag> {
        if self.fail_part.load(Ordering::SeqCst) == part_number {
            return Err(injected("part"));
        }
        self.inner.put_part(handle, part_number, stream, size_bytes).await
    }

    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<PutResult> {
        self.inner.complete_multipart(handle, parts).await
    }

    async fn abort_multipart(&self, handle: &MultipartHandle) -> StoreResult<()> {
        self.inner.abort_multipart(handle).await
    }
}

pub async fn read_all(stream: ByteStream) -> Bytes {
    use futures_util::StreamExt;

    let mut stream = stream;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.expect("stream chunk"));
    }
    out.into()
}
