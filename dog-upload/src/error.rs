use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Result type for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for ledger (record store) operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors surfaced by the upload coordinator, merge engine and range reader
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Upload session not found: {upload_id}")]
    SessionNotFound { upload_id: String },

    #[error("Chunk {index} is not part of upload {upload_id} ({total_chunks} chunks planned)")]
    UnknownChunk {
        upload_id: String,
        index: u64,
        total_chunks: u64,
    },

    #[error("File not found: {file_id}")]
    FileNotFound { file_id: String },

    #[error("Failed to write object {key}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to read object {key}: {source}")]
    StorageRead {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Persistence error: {source}")]
    Persistence {
        #[from]
        source: LedgerError,
    },

    #[error("Upload {upload_id} is incomplete: {pending} chunk(s) not yet uploaded")]
    IncompleteUpload { upload_id: String, pending: u64 },

    #[error("Merge failed for upload {upload_id}: {reason}")]
    Merge { upload_id: String, reason: String },

    #[error("Range not satisfiable (object is {total_size} bytes)")]
    RangeNotSatisfiable { total_size: u64 },
}

impl UploadError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a session not found error
    pub fn session_not_found<S: Into<String>>(upload_id: S) -> Self {
        Self::SessionNotFound {
            upload_id: upload_id.into(),
        }
    }

    /// Create a storage write error
    pub fn storage_write<S: Into<String>>(key: S, source: StoreError) -> Self {
        Self::StorageWrite {
            key: key.into(),
            source,
        }
    }

    /// Create a storage read error
    pub fn storage_read<S: Into<String>>(key: S, source: StoreError) -> Self {
        Self::StorageRead {
            key: key.into(),
            source,
        }
    }

    /// Create a merge error
    pub fn merge<U: Into<String>, S: Into<String>>(upload_id: U, reason: S) -> Self {
        Self::Merge {
            upload_id: upload_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later can succeed without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageWrite { .. }
                | Self::StorageRead { .. }
                | Self::Persistence { .. }
                | Self::Merge { .. }
        )
    }
}

/// Errors from an object store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid range: {message}")]
    InvalidRange { message: String },

    #[error("Store configuration error: {message}")]
    Config { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn invalid_range<S: Into<String>>(message: S) -> Self {
        Self::InvalidRange {
            message: message.into(),
        }
    }
}

/// Errors from the session / chunk / file record store
#[derive(Error, Debug)]
pub enum LedgerError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflicting state: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
