mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{stream, StreamExt};

use common::{ctx, other_ctx, patterned, read_all, small_config};
use dog_upload::range::unsatisfied_content_range;
use dog_upload::{
    bytes_stream, ByteStream, FileId, MemoryBlobStore, MemoryUploadLedger, StoredFile, UploadAdapter,
    UploadError,
};

async fn adapter_with_file(len: usize) -> (UploadAdapter, MemoryBlobStore, StoredFile, Bytes) {
    let store = MemoryBlobStore::new();
    let adapter =
        UploadAdapter::new(store.clone(), MemoryUploadLedger::new(), small_config(256)).unwrap();
    let content = patterned(len, 11);
    let file = adapter
        .put_file(&ctx(), "lecture.mp4", bytes_stream(content.clone()))
        .await
        .unwrap();
    (adapter, store, file, content)
}

/// R1. Open-ended range from zero covers the whole object
#[tokio::test]
async fn test_open_ended_range_from_zero() {
    let (adapter, _, file, content) = adapter_with_file(1000).await;

    let opened = adapter.open(&file.file_id, Some("bytes=0-")).await.unwrap();

    assert_eq!(opened.content_range().as_deref(), Some("bytes 0-999/1000"));
    assert_eq!(opened.content_length(), 1000);
    assert!(!opened.is_partial());
    assert!(opened.accepts_ranges);
    assert_eq!(read_all(opened.stream).await, content);
}

/// R2. Bounded range returns exactly the requested bytes
#[tokio::test]
async fn test_bounded_range() {
    let (adapter, _, file, content) = adapter_with_file(1000).await;

    let opened = adapter.open(&file.file_id, Some("bytes=100-199")).await.unwrap();

    assert!(opened.is_partial());
    assert_eq!(opened.content_range().as_deref(), Some("bytes 100-199/1000"));
    assert_eq!(opened.content_length(), 100);
    assert_eq!(opened.total_size, 1000);
    assert_eq!(read_all(opened.stream).await, content.slice(100..200));
}

/// R3. An end past the object is clamped to the last byte
#[tokio::test]
async fn test_end_is_clamped() {
    let (adapter, _, file, content) = adapter_with_file(1000).await;

    let opened = adapter.open(&file.file_id, Some("bytes=900-5000")).await.unwrap();

    assert_eq!(opened.content_range().as_deref(), Some("bytes 900-999/1000"));
    assert_eq!(read_all(opened.stream).await, content.slice(900..));
}

/// R4. A start beyond the object is not satisfiable
#[tokio::test]
async fn test_start_past_end_is_unsatisfiable() {
    let (adapter, _, file, _) = adapter_with_file(1000).await;

    for header in ["bytes=2000-", "bytes=1000-1001"] {
        let err = adapter.open(&file.file_id, Some(header)).await.err().unwrap();
        assert!(
            matches!(err, UploadError::RangeNotSatisfiable { total_size: 1000 }),
            "{header}"
        );
    }
    assert_eq!(unsatisfied_content_range(1000), "bytes */1000");
}

/// R5. Malformed headers are invalid input, not unsatisfiable ranges
#[tokio::test]
async fn test_malformed_range_is_validation_error() {
    let (adapter, _, file, _) = adapter_with_file(10).await;

    for header in ["items=0-1", "bytes=a-", "bytes=5-2", "bytes=0-1,3-4"] {
        let err = adapter.open(&file.file_id, Some(header)).await.err().unwrap();
        assert!(matches!(err, UploadError::Validation { .. }), "{header}");
    }
}

/// R6. No range streams the full object with its content type
#[tokio::test]
async fn test_full_read_without_range() {
    let (adapter, _, file, content) = adapter_with_file(300).await;

    let opened = adapter.open(&file.file_id, None).await.unwrap();

    assert!(opened.resolved_range.is_none());
    assert!(!opened.is_partial());
    assert_eq!(opened.content_length(), 300);
    assert_eq!(opened.content_type(), "video/mp4");
    assert_eq!(read_all(opened.stream).await, content);
}

/// R7. Unknown files are reported as such
#[tokio::test]
async fn test_unknown_file() {
    let (adapter, _, _, _) = adapter_with_file(10).await;
    let missing = FileId::new();

    assert!(matches!(
        adapter.open(&missing, None).await,
        Err(UploadError::FileNotFound { .. })
    ));
    assert!(matches!(
        adapter.file(&missing).await,
        Err(UploadError::FileNotFound { .. })
    ));
}

/// R8. Single-shot upload writes one object and one record
#[tokio::test]
async fn test_put_file_records_metadata() {
    let (adapter, store, file, content) = adapter_with_file(64).await;

    assert_eq!(file.size_bytes, 64);
    assert_eq!(file.content_type, "video/mp4");
    assert_eq!(file.title, "lecture.mp4");
    assert!(file.upload_id.is_none());
    assert_eq!(file.storage_key, format!("files/{}/lecture.mp4", file.file_id));
    assert_eq!(store.object(&file.storage_key).unwrap(), content);
    assert_eq!(adapter.file(&file.file_id).await.unwrap(), file);
}

/// R9. Unknown extensions fall back to a generic content type
#[tokio::test]
async fn test_put_file_default_content_type() {
    let adapter = UploadAdapter::new(
        MemoryBlobStore::new(),
        MemoryUploadLedger::new(),
        small_config(16),
    )
    .unwrap();

    let file = adapter
        .put_file(&other_ctx(), "blob.zzqx", bytes_stream(patterned(5, 0)))
        .await
        .unwrap();
    assert_eq!(file.content_type, "application/octet-stream");
}

/// R10. Oversized single-shot uploads are refused and leave no object
#[tokio::test]
async fn test_put_file_enforces_max_size() {
    let store = MemoryBlobStore::new();
    let adapter = UploadAdapter::new(
        store.clone(),
        MemoryUploadLedger::new(),
        small_config(16).with_max_file_bytes(8),
    )
    .unwrap();

    let err = adapter
        .put_file(&ctx(), "big.bin", bytes_stream(patterned(9, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation { .. }));
    assert!(store.keys_with_prefix("files/").is_empty());
}

/// R10b. An oversized body is cut off mid-stream instead of buffered whole
#[tokio::test]
async fn test_put_file_stops_reading_oversized_body() {
    let store = MemoryBlobStore::new();
    let adapter = UploadAdapter::new(
        store.clone(),
        MemoryUploadLedger::new(),
        small_config(16).with_max_file_bytes(8),
    )
    .unwrap();

    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let chunks = (0..10u8).map(|seed| Ok::<_, std::io::Error>(patterned(4, seed)));
    let body: ByteStream = Box::pin(stream::iter(chunks).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let err = adapter.put_file(&ctx(), "big.bin", body).await.unwrap_err();
    assert!(matches!(err, UploadError::Validation { .. }));
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
    assert!(store.keys_with_prefix("files/").is_empty());

    // Exactly at the limit is fine
    let file = adapter
        .put_file(&ctx(), "fits.bin", bytes_stream(patterned(8, 0)))
        .await
        .unwrap();
    assert_eq!(file.size_bytes, 8);
}

/// R11. A chunked upload can be read back by range once completed
#[tokio::test]
async fn test_chunked_upload_then_range_read() {
    let store = MemoryBlobStore::new();
    let adapter =
        UploadAdapter::new(store.clone(), MemoryUploadLedger::new(), small_config(4)).unwrap();
    let ctx = ctx();

    let init = adapter.initialize(&ctx, "song.mp3", 10).await.unwrap();
    let content = Bytes::from_static(b"0123456789");
    for (index, range) in [(2u64, 8..10), (0, 0..4), (1, 4..8)] {
        adapter
            .upload_chunk(&ctx, &init.upload_id, index, content.slice(range), None)
            .await
            .unwrap();
    }
    let file = adapter.complete(&ctx, &init.upload_id).await.unwrap();
    adapter.wait_for_cleanup().await;

    assert_eq!(file.content_type, "audio/mpeg");
    assert!(store.keys_with_prefix("uploads/").is_empty());

    let opened = adapter.open(&file.file_id, Some("bytes=3-6")).await.unwrap();
    assert_eq!(opened.content_range().as_deref(), Some("bytes 3-6/10"));
    assert_eq!(read_all(opened.stream).await, Bytes::from_static(b"3456"));
}
