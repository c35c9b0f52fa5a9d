use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{info, instrument, warn};

use crate::ledger::UploadLedger;
use crate::range::RangeReader;
use crate::{
    BlobStore, ByteStream, ChunkReceipt, CleanupQueue, DefaultKeyStrategy,
    DefaultUploadCoordinator, FileId, InitReceipt, MultipartBlobStore, OpenedFile, StoredFile,
    UploadConfig, UploadCoordinator, UploadCtx, UploadError, UploadId, UploadKeyStrategy,
    UploadProgress, UploadResult,
};

/// The upload surface a service embeds: chunked uploads, single-shot
/// uploads and range reads over one object store and one ledger.
pub struct UploadAdapter {
    store: Arc<dyn BlobStore>,
    ledger: Arc<dyn UploadLedger>,
    keys: Arc<dyn UploadKeyStrategy>,
    uploads: Arc<dyn UploadCoordinator>,
    cleanup: CleanupQueue,
    reader: RangeReader,
    config: UploadConfig,
}

impl UploadAdapter {
    /// Create an adapter with the default coordinator and key layout
    pub fn new<S, L>(store: S, ledger: L, config: UploadConfig) -> UploadResult<Self>
    where
        S: MultipartBlobStore + 'static,
        L: UploadLedger + 'static,
    {
        let store = Arc::new(store);
        let ledger = Arc::new(ledger);
        let coordinator =
            DefaultUploadCoordinator::from_shared(store.clone(), ledger.clone(), config.clone())?;

        let blobs: Arc<dyn BlobStore> = store;
        let ledger: Arc<dyn UploadLedger> = ledger;

        Ok(Self {
            cleanup: coordinator.cleanup().clone(),
            uploads: Arc::new(coordinator),
            reader: RangeReader::new(blobs.clone(), ledger.clone()),
            keys: Arc::new(DefaultKeyStrategy::from_config(&config)),
            store: blobs,
            ledger,
            config,
        })
    }

    /// Swap in another coordinator implementation
    pub fn with_coordinator<U: UploadCoordinator + 'static>(mut self, coordinator: U) -> Self {
        self.uploads = Arc::new(coordinator);
        self
    }

    /// Start a chunked upload
    pub async fn initialize(
        &self,
        ctx: &UploadCtx,
        file_name: &str,
        total_size: u64,
    ) -> UploadResult<InitReceipt> {
        self.uploads.init_session(ctx, file_name, total_size).await
    }

    /// Upload one chunk
    pub async fn upload_chunk(
        &self,
        ctx: &UploadCtx,
        upload_id: &UploadId,
        chunk_index: u64,
        data: Bytes,
        content_type: Option<&str>,
    ) -> UploadResult<ChunkReceipt> {
        self.uploads
            .ingest_chunk(ctx, upload_id, chunk_index, data, content_type)
            .await
    }

    pub async fn progress(
        &self,
        ctx: &UploadCtx,
        upload_id: &UploadId,
    ) -> UploadResult<UploadProgress> {
        self.uploads.progress(ctx, upload_id).await
    }

    /// Finish a chunked upload
    pub async fn complete(&self, ctx: &UploadCtx, upload_id: &UploadId) -> UploadResult<StoredFile> {
        self.uploads.complete(ctx, upload_id).await
    }

    pub async fn abort(&self, ctx: &UploadCtx, upload_id: &UploadId) -> UploadResult<()> {
        self.uploads.abort(ctx, upload_id).await
    }

    /// Store a file in a single put and record it for the caller
    #[instrument(skip(self, ctx, body), fields(owner_id = %ctx.owner_id))]
    pub async fn put_file(
        &self,
        ctx: &UploadCtx,
        file_name: &str,
        body: ByteStream,
    ) -> UploadResult<StoredFile> {
        if file_name.trim().is_empty() {
            return Err(UploadError::validation("file name must not be empty"));
        }

        let file_id = FileId::new();
        let key = self.keys.file_key(&file_id, file_name);
        let content_type = crate::mime::content_type_for(file_name);

        let limit = self.config.max_file_bytes;
        let exceeded = Arc::new(AtomicBool::new(false));
        let body = limit_body(body, limit, exceeded.clone());

        let put = match self.store.put(&key, Some(content_type), body).await {
            Ok(put) => put,
            Err(error) if exceeded.load(Ordering::SeqCst) => {
                warn!(%key, %error, limit, "Single-shot upload exceeded maximum size");
                return Err(UploadError::validation(format!(
                    "file exceeds maximum size {limit}"
                )));
            }
            Err(error) => return Err(UploadError::storage_write(&key, error)),
        };

        let mut file = StoredFile::new(ctx.owner_id.clone(), file_name, key, put.size_bytes);
        file.file_id = file_id;
        self.ledger.insert_file(&file).await?;

        info!(file_id = %file.file_id, size_bytes = file.size_bytes, "File stored");
        Ok(file)
    }

    /// Open a stored file; `range` is a raw `Range` header value
    pub async fn open(&self, file_id: &FileId, range: Option<&str>) -> UploadResult<OpenedFile> {
        self.reader.open(file_id, range).await
    }

    /// Stored file metadata
    pub async fn file(&self, file_id: &FileId) -> UploadResult<StoredFile> {
        self.ledger
            .get_file(file_id)
            .await?
            .ok_or_else(|| UploadError::FileNotFound {
                file_id: file_id.to_string(),
            })
    }

    /// Wait for queued chunk-object deletions, e.g. before shutdown
    pub async fn wait_for_cleanup(&self) {
        self.cleanup.wait_idle().await;
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }
}

/// Fails the body as soon as more than `limit` bytes have passed through,
/// so an oversized upload is never buffered in full.
fn limit_body(body: ByteStream, limit: u64, exceeded: Arc<AtomicBool>) -> ByteStream {
    let mut seen = 0u64;
    Box::pin(body.map(move |item| {
        let chunk = item?;
        seen += chunk.len() as u64;
        if seen > limit {
            exceeded.store(true, Ordering::SeqCst);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("body exceeds {limit} bytes"),
            ));
        }
        Ok(chunk)
    }))
}
