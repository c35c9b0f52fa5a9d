use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    ChunkReceipt, InitReceipt, StoredFile, UploadCtx, UploadId, UploadProgress, UploadResult,
};

/// Coordinates resumable chunked uploads
#[async_trait]
pub trait UploadCoordinator: Send + Sync {
    /// Plan and persist a new upload session for a file of `total_size` bytes
    async fn init_session(
        &self,
        ctx: &UploadCtx,
        file_name: &str,
        total_size: u64,
    ) -> UploadResult<InitReceipt>;

    /// Store one chunk and record it in the ledger.
    ///
    /// Re-sending a completed chunk is accepted and overwrites its bytes, but
    /// progress is only counted the first time.
    async fn ingest_chunk(
        &self,
        ctx: &UploadCtx,
        upload_id: &UploadId,
        chunk_index: u64,
        data: Bytes,
        content_type: Option<&str>,
    ) -> UploadResult<ChunkReceipt>;

    /// Read-only snapshot of a session
    async fn progress(&self, ctx: &UploadCtx, upload_id: &UploadId)
        -> UploadResult<UploadProgress>;

    /// Assemble all chunks into the final object and record the stored file
    async fn complete(&self, ctx: &UploadCtx, upload_id: &UploadId) -> UploadResult<StoredFile>;

    /// Give up on an upload: `uploading -> failed`, chunk objects are cleaned up
    async fn abort(&self, ctx: &UploadCtx, upload_id: &UploadId) -> UploadResult<()>;
}
