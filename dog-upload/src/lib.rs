//! # dog-upload: resumable chunked uploads
//!
//! `dog-upload` lets a client send a large file in independently retriable
//! chunks, tracks every chunk in a durable ledger, and on completion assembles
//! the chunks server-side into one object with a multipart upload.
//!
//! ## Key Features
//!
//! - **Resumable**: chunks arrive in any order, any number of times; progress
//!   is only counted the first time a chunk completes
//! - **Transactional ledger**: chunk and session records change together or not
//!   at all (SQLite via `sqlx`, or in memory)
//! - **Server-side assembly**: chunks become parts of an S3 multipart upload,
//!   ordered by chunk index
//! - **Range reads**: `bytes=<start>-<end>` and `bytes=<start>-` with clamping
//!   and not-satisfiable signalling
//! - **Background cleanup**: transient chunk objects are deleted off the
//!   request path with bounded concurrency
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_upload::prelude::*;
//! use bytes::Bytes;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let adapter = UploadAdapter::new(
//!     MemoryBlobStore::new(),
//!     MemoryUploadLedger::new(),
//!     UploadConfig::default().with_chunk_size(4),
//! )?;
//! let ctx = UploadCtx::new(OwnerId::new("user-123"));
//!
//! let init = adapter.initialize(&ctx, "hello.txt", 6).await?;
//! adapter.upload_chunk(&ctx, &init.upload_id, 1, Bytes::from_static(b"o!"), None).await?;
//! adapter.upload_chunk(&ctx, &init.upload_id, 0, Bytes::from_static(b"hell"), None).await?;
//!
//! let file = adapter.complete(&ctx, &init.upload_id).await?;
//! let opened = adapter.open(&file.file_id, Some("bytes=4-")).await?;
//! assert_eq!(opened.content_range().as_deref(), Some("bytes 4-5/6"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │      UploadAdapter       │  ← what a service embeds
//! ├──────────────────────────┤
//! │ UploadCoordinator        │  ← init / ingest / progress / complete / abort
//! │   MergeEngine            │  ← multipart assembly
//! │   CleanupQueue           │  ← detached chunk deletion
//! │ RangeReader              │  ← whole or partial reads
//! ├────────────┬─────────────┤
//! │ BlobStore  │ UploadLedger│  ← object bytes / durable records
//! └────────────┴─────────────┘
//! ```

pub mod adapter;
mod cleanup;
mod config;
mod coordinator;
mod error;
pub mod ledger;
mod memory_ledger;
mod memory_store;
mod merge;
mod mime;
pub mod plan;
pub mod range;
mod receipt;
mod s3_store;
#[cfg(feature = "sqlite")]
mod sqlite_ledger;
pub mod store;
mod types;
mod upload;

pub use adapter::UploadAdapter;
pub use cleanup::CleanupQueue;
pub use config::{UploadConfig, DEFAULT_CHUNK_SIZE};
pub use coordinator::DefaultUploadCoordinator;
pub use error::{LedgerError, LedgerResult, StoreError, StoreResult, UploadError, UploadResult};
pub use ledger::{ChunkRepo, FileRepo, SessionRepo, UploadLedger};
pub use memory_ledger::MemoryUploadLedger;
pub use memory_store::MemoryBlobStore;
pub use merge::MergeEngine;
pub use mime::{content_type_for, DEFAULT_CONTENT_TYPE};
pub use plan::ChunkSpan;
pub use range::RangeReader;
pub use receipt::{OpenedFile, StoredFile};
pub use s3_store::{S3CompatibleStore, S3Config, S3_MIN_PART_SIZE};
#[cfg(feature = "sqlite")]
pub use sqlite_ledger::SqliteUploadLedger;
pub use store::{
    BlobStore, DefaultKeyStrategy, MultipartBlobStore, ResolvedRange, StoreCapabilities,
    UploadKeyStrategy,
};
pub use types::{
    bytes_stream, ByteRange, ByteStream, CallerIdentity, ChunkReceipt, ChunkRecord, ChunkStatus,
    FileId, InitReceipt, OwnerId, SessionStatus, UploadCtx, UploadId, UploadProgress,
    UploadSession,
};
pub use upload::UploadCoordinator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CallerIdentity, FileId, MemoryBlobStore, MemoryUploadLedger, OwnerId, UploadAdapter,
        UploadConfig, UploadCoordinator, UploadCtx, UploadError, UploadId, UploadResult,
    };
}
