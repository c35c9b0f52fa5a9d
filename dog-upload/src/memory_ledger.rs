use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ledger::{ChunkCompletion, ChunkOutcome, ChunkRepo, FileRepo, SessionRepo};
use crate::{
    ChunkRecord, ChunkStatus, FileId, LedgerError, LedgerResult, SessionStatus, StoredFile,
    UploadId, UploadSession,
};

#[derive(Default)]
struct LedgerState {
    sessions: HashMap<UploadId, UploadSession>,
    chunks: HashMap<UploadId, BTreeMap<u64, ChunkRecord>>,
    files: HashMap<FileId, StoredFile>,
}

/// In-memory record store. One lock guards all tables, so every method is
/// a serializable transaction.
#[derive(Clone, Default)]
pub struct MemoryUploadLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryUploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All chunk records of a session, ascending
    pub fn chunks(&self, upload_id: &UploadId) -> Vec<ChunkRecord> {
        self.state
            .lock()
            .chunks
            .get(upload_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionRepo for MemoryUploadLedger {
    async fn create_session(
        &self,
        session: &UploadSession,
        chunks: &[ChunkRecord],
    ) -> LedgerResult<()> {
        let mut state = self.state.lock();
        if state.sessions.contains_key(&session.upload_id) {
            return Err(LedgerError::AlreadyExists(session.upload_id.to_string()));
        }

        let mut rows = BTreeMap::new();
        for chunk in chunks {
            if chunk.upload_id != session.upload_id {
                return Err(LedgerError::Conflict(format!(
                    "chunk {} belongs to {}",
                    chunk.chunk_index, chunk.upload_id
                )));
            }
            if rows.insert(chunk.chunk_index, chunk.clone()).is_some() {
                return Err(LedgerError::AlreadyExists(format!(
                    "chunk {} of {}",
                    chunk.chunk_index, session.upload_id
                )));
            }
        }

        state.sessions.insert(session.upload_id.clone(), session.clone());
        state.chunks.insert(session.upload_id.clone(), rows);
        Ok(())
    }

    async fn get_session(&self, upload_id: &UploadId) -> LedgerResult<Option<UploadSession>> {
        Ok(self.state.lock().sessions.get(upload_id).cloned())
    }

    async fn mark_failed(&self, upload_id: &UploadId, failed_at: i64) -> LedgerResult<bool> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(upload_id)
            .ok_or_else(|| LedgerError::NotFound(upload_id.to_string()))?;
        if session.status != SessionStatus::Uploading {
            return Ok(false);
        }
        session.status = SessionStatus::Failed;
        session.updated_at = failed_at;
        Ok(true)
    }
}

#[async_trait]
impl ChunkRepo for MemoryUploadLedger {
    async fn get_chunk(
        &self,
        upload_id: &UploadId,
        chunk_index: u64,
    ) -> LedgerResult<Option<ChunkRecord>> {
        Ok(self
            .state
            .lock()
            .chunks
            .get(upload_id)
            .and_then(|c| c.get(&chunk_index))
            .cloned())
    }

    async fn complete_chunk(&self, completion: &ChunkCompletion) -> LedgerResult<ChunkOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let session = state
            .sessions
            .get_mut(&completion.upload_id)
            .ok_or_else(|| LedgerError::NotFound(completion.upload_id.to_string()))?;
        if session.status != SessionStatus::Uploading {
            return Err(LedgerError::Conflict(format!(
                "session {} is {}",
                completion.upload_id,
                session.status.as_str()
            )));
        }

        let chunk = state
            .chunks
            .get_mut(&completion.upload_id)
            .and_then(|c| c.get_mut(&completion.chunk_index))
            .ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "chunk {} of {}",
                    completion.chunk_index, completion.upload_id
                ))
            })?;

        let first_time = chunk.status != ChunkStatus::Completed;
        chunk.status = ChunkStatus::Completed;
        chunk.storage_key = Some(completion.storage_key.clone());
        chunk.size = completion.size;
        chunk.checksum = completion.checksum.clone();

        if first_time {
            session.uploaded_size += completion.size;
        }
        session.updated_at = completion.completed_at;

        Ok(ChunkOutcome {
            first_time,
            uploaded_size: session.uploaded_size,
        })
    }

    async fn count_incomplete_chunks(&self, upload_id: &UploadId) -> LedgerResult<u64> {
        Ok(self
            .state
            .lock()
            .chunks
            .get(upload_id)
            .map(|c| {
                c.values()
                    .filter(|chunk| chunk.status != ChunkStatus::Completed)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn completed_chunks(&self, upload_id: &UploadId) -> LedgerResult<Vec<ChunkRecord>> {
        Ok(self
            .state
            .lock()
            .chunks
            .get(upload_id)
            .map(|c| {
                c.values()
                    .filter(|chunk| chunk.status == ChunkStatus::Completed)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl FileRepo for MemoryUploadLedger {
    async fn insert_file(&self, file: &StoredFile) -> LedgerResult<()> {
        let mut state = self.state.lock();
        if state.files.contains_key(&file.file_id) {
            return Err(LedgerError::AlreadyExists(file.file_id.to_string()));
        }
        state.files.insert(file.file_id.clone(), file.clone());
        Ok(())
    }

    async fn finalize_session(
        &self,
        upload_id: &UploadId,
        file: &StoredFile,
        completed_at: i64,
    ) -> LedgerResult<StoredFile> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let session = state
            .sessions
            .get_mut(upload_id)
            .ok_or_else(|| LedgerError::NotFound(upload_id.to_string()))?;

        match session.status {
            SessionStatus::Completed => {
                return state
                    .files
                    .values()
                    .find(|f| f.upload_id.as_ref() == Some(upload_id))
                    .cloned()
                    .ok_or_else(|| {
                        LedgerError::Corrupt(format!("completed session {} has no file", upload_id))
                    });
            }
            SessionStatus::Failed => {
                return Err(LedgerError::Conflict(format!("session {} is failed", upload_id)));
            }
            SessionStatus::Uploading => {}
        }

        if state.files.contains_key(&file.file_id) {
            return Err(LedgerError::AlreadyExists(file.file_id.to_string()));
        }
        session.status = SessionStatus::Completed;
        session.updated_at = completed_at;
        state.files.insert(file.file_id.clone(), file.clone());
        Ok(file.clone())
    }

    async fn get_file(&self, file_id: &FileId) -> LedgerResult<Option<StoredFile>> {
        Ok(self.state.lock().files.get(file_id).cloned())
    }

    async fn file_for_upload(&self, upload_id: &UploadId) -> LedgerResult<Option<StoredFile>> {
        Ok(self
            .state
            .lock()
            .files
            .values()
            .find(|f| f.upload_id.as_ref() == Some(upload_id))
            .cloned())
    }
}
