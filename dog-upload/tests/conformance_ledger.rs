#![cfg(feature = "sqlite")]
//! Every ledger backend must pass the same scenarios.

use dog_upload::ledger::ChunkCompletion;
use dog_upload::{
    plan, ChunkRecord, ChunkStatus, LedgerError, MemoryUploadLedger, OwnerId, SessionStatus,
    SqliteUploadLedger, StoredFile, UploadId, UploadLedger, UploadSession,
};

/// Test factory functions
fn session_with_plan(total_size: u64, chunk_size: u64) -> (UploadSession, Vec<ChunkRecord>) {
    let upload_id = UploadId::new();
    let spans = plan::plan(total_size, chunk_size).unwrap();
    let session = UploadSession {
        upload_id: upload_id.clone(),
        owner_id: OwnerId::new("owner-1"),
        file_name: "clip.mp4".to_string(),
        total_size,
        chunk_size,
        total_chunks: spans.len() as u64,
        uploaded_size: 0,
        status: SessionStatus::Uploading,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
    };
    let chunks = spans
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
    (session, chunks)
}

fn completion(upload_id: &UploadId, chunk_index: u64, size: u64) -> ChunkCompletion {
    ChunkCompletion {
        upload_id: upload_id.clone(),
        chunk_index,
        storage_key: format!("uploads/{upload_id}/chunk_{chunk_index}"),
        size,
        checksum: None,
        completed_at: 1_700_000_100,
    }
}

fn file_for(session: &UploadSession) -> StoredFile {
    StoredFile::new(
        session.owner_id.clone(),
        session.file_name.clone(),
        format!("files/{}/{}", session.upload_id, session.file_name),
        session.total_size,
    )
    .with_upload(session.upload_id.clone())
}

/// L1. Session and plan are written together
async fn session_and_plan_persist<L: UploadLedger>(ledger: L) {
    let (session, chunks) = session_with_plan(25, 10);
    ledger.create_session(&session, &chunks).await.unwrap();

    let stored = ledger.get_session(&session.upload_id).await.unwrap().unwrap();
    assert_eq!(stored, session);

    let last = ledger.get_chunk(&session.upload_id, 2).await.unwrap().unwrap();
    assert_eq!((last.start_byte, last.end_byte, last.size), (20, 24, 5));
    assert_eq!(last.status, ChunkStatus::Pending);
    assert_eq!(ledger.count_incomplete_chunks(&session.upload_id).await.unwrap(), 3);
}

/// L2. Creating the same session twice is rejected and leaves the first intact
async fn duplicate_session_rejected<L: UploadLedger>(ledger: L) {
    let (session, chunks) = session_with_plan(25, 10);
    ledger.create_session(&session, &chunks).await.unwrap();

    let err = ledger.create_session(&session, &chunks).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyExists(_)));
    assert_eq!(ledger.count_incomplete_chunks(&session.upload_id).await.unwrap(), 3);
}

/// L3. Progress is counted on first completion only
async fn first_completion_counts_once<L: UploadLedger>(ledger: L) {
    let (session, chunks) = session_with_plan(25, 10);
    ledger.create_session(&session, &chunks).await.unwrap();

    let first = ledger.complete_chunk(&completion(&session.upload_id, 1, 10)).await.unwrap();
    assert!(first.first_time);
    assert_eq!(first.uploaded_size, 10);

    let again = ledger.complete_chunk(&completion(&session.upload_id, 1, 10)).await.unwrap();
    assert!(!again.first_time);
    assert_eq!(again.uploaded_size, 10);

    let chunk = ledger.get_chunk(&session.upload_id, 1).await.unwrap().unwrap();
    assert_eq!(chunk.status, ChunkStatus::Completed);
    assert_eq!(
        chunk.storage_key.as_deref(),
        Some(format!("uploads/{}/chunk_1", session.upload_id).as_str())
    );
}

/// L4. Unknown chunk index changes nothing
async fn unknown_chunk_is_not_found<L: UploadLedger>(ledger: L) {
    let (session, chunks) = session_with_plan(25, 10);
    ledger.create_session(&session, &chunks).await.unwrap();

    let err = ledger
        .complete_chunk(&completion(&session.upload_id, 7, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    let stored = ledger.get_session(&session.upload_id).await.unwrap().unwrap();
    assert_eq!(stored.uploaded_size, 0);
    assert!(ledger.get_chunk(&session.upload_id, 7).await.unwrap().is_none());
}

/// L5. Completed chunks come back in index order
async fn completed_chunks_are_ordered<L: UploadLedger>(ledger: L) {
    let (session, chunks) = session_with_plan(40, 10);
    ledger.create_session(&session, &chunks).await.unwrap();

    for index in [3, 0, 2] {
        ledger
            .complete_chunk(&completion(&session.upload_id, index, 10))
            .await
            .unwrap();
    }

    let indices: Vec<u64> = ledger
        .completed_chunks(&session.upload_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.chunk_index)
        .collect();
    assert_eq!(indices, vec![0, 2, 3]);
    assert_eq!(ledger.count_incomplete_chunks(&session.upload_id).await.unwrap(), 1);
}

/// L6. Finalizing twice returns the first file record
async fn finalize_is_idempotent<L: UploadLedger>(ledger: L) {
    let (session, chunks) = session_with_plan(10, 10);
    ledger.create_session(&session, &chunks).await.unwrap();
    ledger.complete_chunk(&completion(&session.upload_id, 0, 10)).await.unwrap();

    let first = file_for(&session);
    let stored = ledger
        .finalize_session(&session.upload_id, &first, 1_700_000_200)
        .await
        .unwrap();
    assert_eq!(stored.file_id, first.file_id);

    let second = file_for(&session);
    let again = ledger
        .finalize_session(&session.upload_id, &second, 1_700_000_300)
        .await
        .unwrap();
    assert_eq!(again.file_id, first.file_id);
    assert!(ledger.get_file(&second.file_id).await.unwrap().is_none());

    let status = ledger.get_session(&session.upload_id).await.unwrap().unwrap().status;
    assert_eq!(status, SessionStatus::Completed);
    let by_upload = ledger.file_for_upload(&session.upload_id).await.unwrap().unwrap();
    assert_eq!(by_upload, first);
}

/// L7. A failed session refuses chunks and finalization
async fn failed_session_is_frozen<L: UploadLedger>(ledger: L) {
    let (session, chunks) = session_with_plan(20, 10);
    ledger.create_session(&session, &chunks).await.unwrap();

    assert!(ledger.mark_failed(&session.upload_id, 1_700_000_050).await.unwrap());
    assert!(!ledger.mark_failed(&session.upload_id, 1_700_000_060).await.unwrap());

    let err = ledger
        .complete_chunk(&completion(&session.upload_id, 0, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));

    let err = ledger
        .finalize_session(&session.upload_id, &file_for(&session), 1_700_000_070)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));
}

/// L8. Single-shot files are stored without a session
async fn standalone_file_round_trip<L: UploadLedger>(ledger: L) {
    let file = StoredFile::new(OwnerId::new("owner-1"), "notes.txt", "files/x/notes.txt", 42);
    ledger.insert_file(&file).await.unwrap();

    assert_eq!(ledger.get_file(&file.file_id).await.unwrap(), Some(file.clone()));
    assert!(matches!(
        ledger.insert_file(&file).await,
        Err(LedgerError::AlreadyExists(_))
    ));
}

macro_rules! conformance {
    ($($scenario:ident),* $(,)?) => {
        mod memory {
            use super::*;
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(MemoryUploadLedger::new()).await;
                }
            )*
        }

        mod sqlite {
            use super::*;
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(SqliteUploadLedger::in_memory().await.unwrap()).await;
                }
            )*
        }
    };
}

conformance!(
    session_and_plan_persist,
    duplicate_session_rejected,
    first_completion_counts_once,
    unknown_chunk_is_not_found,
    completed_chunks_are_ordered,
    finalize_is_idempotent,
    failed_session_is_frozen,
    standalone_file_round_trip,
);
