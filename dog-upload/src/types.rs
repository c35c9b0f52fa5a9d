use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use crate::{UploadError, UploadResult};

/// Stream of bytes for object content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Wrap an in-memory buffer as a single-item [`ByteStream`].
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

/// Current unix time in seconds
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Client-facing handle of an upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    /// Generate a new random upload ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored (assembled) file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of an authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves the caller of a request. Implemented by whatever authenticates
/// requests in the host application (JWT middleware, session cookie, ...).
pub trait CallerIdentity {
    /// The authenticated caller, or [`UploadError::Unauthenticated`]
    fn caller_id(&self) -> UploadResult<OwnerId>;
}

impl CallerIdentity for OwnerId {
    fn caller_id(&self) -> UploadResult<OwnerId> {
        Ok(self.clone())
    }
}

impl CallerIdentity for Option<OwnerId> {
    fn caller_id(&self) -> UploadResult<OwnerId> {
        self.clone().ok_or(UploadError::Unauthenticated)
    }
}

/// Context for upload operations (caller, request info)
#[derive(Debug, Clone)]
pub struct UploadCtx {
    pub owner_id: OwnerId,
    pub request_id: String,
}

impl UploadCtx {
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Resolve the caller once, up front, into a typed context.
    pub fn from_identity<I: CallerIdentity + ?Sized>(identity: &I) -> UploadResult<Self> {
        Ok(Self::new(identity.caller_id()?))
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Status of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Uploading,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploading" => Some(Self::Uploading),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Status of a single chunk in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable record of one upload attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: UploadId,
    pub owner_id: OwnerId,
    pub file_name: String,

    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Only grows, and only on a chunk's first completion
    pub uploaded_size: u64,

    pub status: SessionStatus,

    pub created_at: i64,
    pub updated_at: i64,
}

/// Durable record of one planned chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub upload_id: UploadId,
    pub chunk_index: u64,
    pub start_byte: u64,
    /// Inclusive
    pub end_byte: u64,
    pub size: u64,
    pub status: ChunkStatus,
    pub storage_key: Option<String>,
    pub checksum: Option<String>,
}

/// Byte range for partial content requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>, // None means "to end of object"
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }
}

/// Returned by session initialisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReceipt {
    pub upload_id: UploadId,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

/// Returned after ingesting one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub upload_id: UploadId,
    pub chunk_index: u64,
    pub size_bytes: u64,
    pub accepted: bool,
    /// The chunk had already been completed before this call
    pub is_retry: bool,
}

/// Snapshot of a session's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub upload_id: UploadId,
    pub status: SessionStatus,
    pub uploaded_size: u64,
    pub total_size: u64,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    /// Ascending
    pub missing_chunk_indices: Vec<u64>,
}

impl UploadProgress {
    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.uploaded_size as f64 / self.total_size as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.missing_chunk_indices.is_empty()
    }
}
