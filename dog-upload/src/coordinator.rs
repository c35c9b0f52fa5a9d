use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::ledger::{ChunkCompletion, UploadLedger};
use crate::merge::MergeEngine;
use crate::types::{bytes_stream, now_secs};
use crate::{
    plan, BlobStore, ChunkReceipt, ChunkRecord, ChunkStatus, CleanupQueue, DefaultKeyStrategy,
    InitReceipt, LedgerError, MultipartBlobStore, SessionStatus, StoredFile, UploadConfig,
    UploadCoordinator, UploadCtx, UploadError, UploadId, UploadKeyStrategy, UploadProgress,
    UploadResult, UploadSession,
};

/// Upload coordinator over a multipart-capable object store and a
/// transactional ledger
pub struct DefaultUploadCoordinator {
    store: Arc<dyn MultipartBlobStore>,
    ledger: Arc<dyn UploadLedger>,
    keys: Arc<dyn UploadKeyStrategy>,
    merger: MergeEngine,
    cleanup: CleanupQueue,
    config: UploadConfig,
}

impl DefaultUploadCoordinator {
    pub fn new<S, L>(store: S, ledger: L, config: UploadConfig) -> UploadResult<Self>
    where
        S: MultipartBlobStore + 'static,
        L: UploadLedger + 'static,
    {
        Self::from_shared(Arc::new(store), Arc::new(ledger), config)
    }

    /// Build from handles the caller keeps sharing with other components
    pub fn from_shared<S, L>(
        store: Arc<S>,
        ledger: Arc<L>,
        config: UploadConfig,
    ) -> UploadResult<Self>
    where
        S: MultipartBlobStore + 'static,
        L: UploadLedger + 'static,
    {
        config.validate()?;

        let blobs: Arc<dyn BlobStore> = store.clone();
        let multipart: Arc<dyn MultipartBlobStore> = store;

        Ok(Self {
            merger: MergeEngine::new(multipart.clone()),
            cleanup: CleanupQueue::new(blobs, config.cleanup_concurrency),
            keys: Arc::new(DefaultKeyStrategy::from_config(&config)),
            store: multipart,
            ledger,
            config,
        })
    }

    /// Replace the default key strategy
    pub fn with_key_strategy<K: UploadKeyStrategy + 'static>(mut self, keys: K) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    /// Background deletion queue for transient chunk objects
    pub fn cleanup(&self) -> &CleanupQueue {
        &self.cleanup
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Load a session owned by the caller. Sessions of other callers are
    /// reported as missing.
    async fn owned_session(
        &self,
        ctx: &UploadCtx,
        upload_id: &UploadId,
    ) -> UploadResult<UploadSession> {
        match self.ledger.get_session(upload_id).await? {
            Some(session) if session.owner_id == ctx.owner_id => Ok(session),
            Some(_) => {
                warn!(%upload_id, caller = %ctx.owner_id, "Session accessed by non-owner");
                Err(UploadError::session_not_found(upload_id.as_str()))
            }
            None => Err(UploadError::session_not_found(upload_id.as_str())),
        }
    }

    /// Size the plan assigns to `chunk_index`
    fn planned_size(session: &UploadSession, chunk_index: u64) -> u64 {
        let start = chunk_index * session.chunk_size;
        session.chunk_size.min(session.total_size - start)
    }

    fn check_chunk_size(
        &self,
        session: &UploadSession,
        chunk_index: u64,
        received: u64,
    ) -> UploadResult<()> {
        if received == 0 {
            return Err(UploadError::validation(format!("chunk {chunk_index} is empty")));
        }

        let planned = Self::planned_size(session, chunk_index);
        if self.config.require_exact_chunk_size && received != planned {
            return Err(UploadError::validation(format!(
                "chunk {chunk_index} has {received} bytes, expected {planned}"
            )));
        }
        if received > planned {
            return Err(UploadError::validation(format!(
                "chunk {chunk_index} has {received} bytes, its span holds {planned}"
            )));
        }
        Ok(())
    }

    /// Storage keys of every chunk that reached the object store
    async fn chunk_keys(&self, upload_id: &UploadId) -> UploadResult<Vec<String>> {
        Ok(self
            .ledger
            .completed_chunks(upload_id)
            .await?
            .into_iter()
            .filter_map(|chunk| chunk.storage_key)
            .collect())
    }
}

#[async_trait]
impl UploadCoordinator for DefaultUploadCoordinator {
    #[instrument(skip(self, ctx), fields(owner_id = %ctx.owner_id, request_id = %ctx.request_id))]
    async fn init_session(
        &self,
        ctx: &UploadCtx,
        file_name: &str,
        total_size: u64,
    ) -> UploadResult<InitReceipt> {
        if file_name.trim().is_empty() {
            return Err(UploadError::validation("file name must not be empty"));
        }
        if total_size > self.config.max_file_bytes {
            return Err(UploadError::validation(format!(
                "file size {} exceeds maximum {}",
                total_size, self.config.max_file_bytes
            )));
        }

        let chunk_size = self.config.chunk_size;
        let spans = plan::plan(total_size, chunk_size)?;
        let total_chunks = spans.len() as u64;

        if total_chunks > 1 {
            if let Some(min_part) = self.store.capabilities().min_part_size {
                if chunk_size < min_part {
                    return Err(UploadError::validation(format!(
                        "chunk size {chunk_size} is below the store's minimum part size {min_part}"
                    )));
                }
            }
        }

        let upload_id = UploadId::new();
        let now = now_secs();
        let session = UploadSession {
            upload_id: upload_id.clone(),
            owner_id: ctx.owner_id.clone(),
            file_name: file_name.to_string(),
            total_size,
            chunk_size,
            total_chunks,
            uploaded_size: 0,
            status: SessionStatus::Uploading,
            created_at: now,
            updated_at: now,
        };
        let chunks: Vec<ChunkRecord> = spans
            .into_iter()
            .map(|span| ChunkRecord {
                upload_id: upload_id.clone(),
                chunk_index: span.index,
                start_byte: span.start_byte,
                end_byte: span.end_byte,
                size: span.size,
                status: ChunkStatus::Pending,
                storage_key: None,
                checksum: None,
            })
            .collect();

        self.ledger.create_session(&session, &chunks).await?;

        info!(%upload_id, total_size, chunk_size, total_chunks, "Upload session created");

        Ok(InitReceipt {
            upload_id,
            chunk_size,
            total_chunks,
        })
    }

    #[instrument(skip(self, ctx, data), fields(size = data.len()))]
    async fn ingest_chunk(
        &self,
        ctx: &UploadCtx,
        upload_id: &UploadId,
        chunk_index: u64,
        data: Bytes,
        content_type: Option<&str>,
    ) -> UploadResult<ChunkReceipt> {
        let session = self.owned_session(ctx, upload_id).await?;

        if session.status != SessionStatus::Uploading {
            return Err(UploadError::validation(format!(
                "upload {} is {} and no longer accepts chunks",
                upload_id,
                session.status.as_str()
            )));
        }
        if chunk_index >= session.total_chunks {
            return Err(UploadError::UnknownChunk {
                upload_id: upload_id.to_string(),
                index: chunk_index,
                total_chunks: session.total_chunks,
            });
        }

        let size = data.len() as u64;
        self.check_chunk_size(&session, chunk_index, size)?;

        // The object write happens before the transaction; the key is fixed per
        // (upload, index) so a retry overwrites the same object.
        let key = self.keys.chunk_key(upload_id, chunk_index);
        let put = self
            .store
            .put(&key, content_type, bytes_stream(data))
            .await
            .map_err(|e| UploadError::storage_write(&key, e))?;

        let completion = ChunkCompletion {
            upload_id: upload_id.clone(),
            chunk_index,
            storage_key: key,
            size,
            checksum: put.checksum,
            completed_at: now_secs(),
        };

        let outcome = self
            .ledger
            .complete_chunk(&completion)
            .await
            .map_err(|e| match e {
                LedgerError::NotFound(_) => UploadError::UnknownChunk {
                    upload_id: upload_id.to_string(),
                    index: chunk_index,
                    total_chunks: session.total_chunks,
                },
                LedgerError::Conflict(message) => UploadError::validation(message),
                other => other.into(),
            })?;

        if outcome.first_time {
            debug!(%upload_id, chunk_index, uploaded_size = outcome.uploaded_size, "Chunk completed");
        } else {
            debug!(%upload_id, chunk_index, "Chunk re-sent, progress unchanged");
        }

        Ok(ChunkReceipt {
            upload_id: upload_id.clone(),
            chunk_index,
            size_bytes: size,
            accepted: true,
            is_retry: !outcome.first_time,
        })
    }

    #[instrument(skip(self, ctx))]
    async fn progress(
        &self,
        ctx: &UploadCtx,
        upload_id: &UploadId,
    ) -> UploadResult<UploadProgress> {
        let session = self.owned_session(ctx, upload_id).await?;

        let completed: BTreeSet<u64> = self
            .ledger
            .completed_chunks(upload_id)
            .await?
            .into_iter()
            .map(|chunk| chunk.chunk_index)
            .collect();

        let missing_chunk_indices = (0..session.total_chunks)
            .filter(|index| !completed.contains(index))
            .collect();

        Ok(UploadProgress {
            upload_id: session.upload_id,
            status: session.status,
            uploaded_size: session.uploaded_size,
            total_size: session.total_size,
            total_chunks: session.total_chunks,
            completed_chunks: completed.len() as u64,
            missing_chunk_indices,
        })
    }

    #[instrument(skip(self, ctx), fields(owner_id = %ctx.owner_id))]
    async fn complete(&self, ctx: &UploadCtx, upload_id: &UploadId) -> UploadResult<StoredFile> {
        let session = self.owned_session(ctx, upload_id).await?;

        match session.status {
            SessionStatus::Completed => {
                debug!(%upload_id, "Upload already completed, returning stored file");
                return self.ledger.file_for_upload(upload_id).await?.ok_or_else(|| {
                    LedgerError::Corrupt(format!("completed session {upload_id} has no file")).into()
                });
            }
            SessionStatus::Failed => {
                return Err(UploadError::validation(format!(
                    "upload {upload_id} was aborted"
                )));
            }
            SessionStatus::Uploading => {}
        }

        let pending = self.ledger.count_incomplete_chunks(upload_id).await?;
        if pending > 0 {
            return Err(UploadError::IncompleteUpload {
                upload_id: upload_id.to_string(),
                pending,
            });
        }

        let chunks = self.ledger.completed_chunks(upload_id).await?;
        let final_key = self.keys.final_key(upload_id, &session.file_name);
        let content_type = crate::mime::content_type_for(&session.file_name);

        let merged = self
            .merger
            .merge(upload_id, &final_key, content_type, &chunks)
            .await?;

        let file = StoredFile::new(
            ctx.owner_id.clone(),
            session.file_name.clone(),
            final_key,
            merged.size_bytes,
        )
        .with_upload(upload_id.clone());

        let stored = match self.ledger.finalize_session(upload_id, &file, now_secs()).await {
            Ok(stored) => stored,
            Err(LedgerError::Conflict(message)) => {
                // The session was aborted while merging; nothing will ever
                // reference the assembled object.
                warn!(
                    %upload_id,
                    key = %file.storage_key,
                    "Session aborted during merge, discarding assembled object"
                );
                self.cleanup.schedule(vec![file.storage_key.clone()]);
                return Err(UploadError::validation(message));
            }
            // The session stays uploading and a retry merges over the same key.
            Err(other) => return Err(other.into()),
        };

        // A concurrent completion that committed first owns the cleanup.
        if stored.file_id == file.file_id {
            let keys = chunks.into_iter().filter_map(|c| c.storage_key).collect();
            self.cleanup.schedule(keys);
        }

        info!(
            %upload_id,
            file_id = %stored.file_id,
            key = %stored.storage_key,
            size_bytes = stored.size_bytes,
            "Upload completed"
        );
        Ok(stored)
    }

    #[instrument(skip(self, ctx))]
    async fn abort(&self, ctx: &UploadCtx, upload_id: &UploadId) -> UploadResult<()> {
        let session = self.owned_session(ctx, upload_id).await?;

        if session.status == SessionStatus::Completed {
            return Err(UploadError::validation(format!(
                "upload {upload_id} is already completed"
            )));
        }

        if self.ledger.mark_failed(upload_id, now_secs()).await? {
            let keys = self.chunk_keys(upload_id).await?;
            info!(%upload_id, chunks = keys.len(), "Upload aborted");
            self.cleanup.schedule(keys);
        }
        Ok(())
    }
}
