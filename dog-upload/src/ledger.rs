//! Durable session, chunk and file records.
//!
//! Every method that touches more than one row runs as a single transaction
//! in the backing store: either all of its writes land or none do.

use async_trait::async_trait;

use crate::{ChunkRecord, FileId, LedgerResult, StoredFile, UploadId, UploadSession};

/// A chunk whose bytes are already in the object store
#[derive(Debug, Clone)]
pub struct ChunkCompletion {
    pub upload_id: UploadId,
    pub chunk_index: u64,
    pub storage_key: String,
    /// Bytes actually received
    pub size: u64,
    pub checksum: Option<String>,
    pub completed_at: i64,
}

/// Outcome of recording a chunk completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// The chunk was not `completed` before this call, so progress was counted
    pub first_time: bool,
    /// Session's `uploaded_size` after the transaction
    pub uploaded_size: u64,
}

/// Upload session records
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Persist a session together with its whole chunk plan.
    ///
    /// Either the session row and every chunk row are written, or nothing is.
    async fn create_session(
        &self,
        session: &UploadSession,
        chunks: &[ChunkRecord],
    ) -> LedgerResult<()>;

    /// Get a session by upload ID
    async fn get_session(&self, upload_id: &UploadId) -> LedgerResult<Option<UploadSession>>;

    /// Transition `uploading -> failed`. Returns false if the session was in another state.
    async fn mark_failed(&self, upload_id: &UploadId, failed_at: i64) -> LedgerResult<bool>;
}

/// Per-chunk ledger
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Get one chunk record
    async fn get_chunk(
        &self,
        upload_id: &UploadId,
        chunk_index: u64,
    ) -> LedgerResult<Option<ChunkRecord>>;

    /// Record a chunk as completed, in one transaction:
    ///
    /// 1. read the chunk's prior status (under a lock that excludes concurrent
    ///    writers of the same chunk),
    /// 2. overwrite status, storage key, size and checksum,
    /// 3. if it was not already completed, add `size` to the session's
    ///    `uploaded_size` with a relative increment.
    ///
    /// Fails with `NotFound` if the chunk row does not exist and with `Conflict`
    /// if the session is no longer `uploading`.
    async fn complete_chunk(&self, completion: &ChunkCompletion) -> LedgerResult<ChunkOutcome>;

    /// Number of chunks of the session whose status is not `completed`
    async fn count_incomplete_chunks(&self, upload_id: &UploadId) -> LedgerResult<u64>;

    /// Completed chunks ordered by ascending index
    async fn completed_chunks(&self, upload_id: &UploadId) -> LedgerResult<Vec<ChunkRecord>>;
}

/// Stored file metadata
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a file record for a single-shot upload
    async fn insert_file(&self, file: &StoredFile) -> LedgerResult<()>;

    /// Insert the assembled file's record and flip the session to `completed`,
    /// in one transaction. If the session is already completed, nothing is
    /// written and the record stored by the earlier completion is returned.
    async fn finalize_session(
        &self,
        upload_id: &UploadId,
        file: &StoredFile,
        completed_at: i64,
    ) -> LedgerResult<StoredFile>;

    async fn get_file(&self, file_id: &FileId) -> LedgerResult<Option<StoredFile>>;

    /// The file assembled from an upload session, if completion already happened
    async fn file_for_upload(&self, upload_id: &UploadId) -> LedgerResult<Option<StoredFile>>;
}

/// Combined record store used by the coordinator
pub trait UploadLedger: SessionRepo + ChunkRepo + FileRepo + Send + Sync {}

impl<T> UploadLedger for T where T: SessionRepo + ChunkRepo + FileRepo + Send + Sync {}
