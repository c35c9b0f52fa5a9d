use async_trait::async_trait;

use crate::{ByteRange, ByteStream, FileId, StoreResult, UploadConfig, UploadId};

/// Core object storage operations - must be implemented by all storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object from a stream, overwriting any existing object at `key`
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> StoreResult<PutResult>;

    /// Get an object as a stream, optionally restricted to a byte range
    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> StoreResult<GetResult>;

    /// Get object metadata without content
    async fn head(&self, key: &str) -> StoreResult<ObjectHead>;

    /// Delete an object
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Get store capabilities
    fn capabilities(&self) -> StoreCapabilities;
}

/// Multipart upload support: the final object is assembled server-side from
/// numbered parts, ordered by part number regardless of upload order.
#[async_trait]
pub trait MultipartBlobStore: BlobStore {
    /// Initialize a multipart upload
    async fn init_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<MultipartHandle>;

    /// Upload a part (1-based part numbers)
    async fn put_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        stream: ByteStream,
        size_bytes: u64,
    ) -> StoreResult<PartETag>;

    /// Complete multipart upload
    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<PutResult>;

    /// Abort multipart upload, releasing uploaded parts
    async fn abort_multipart(&self, handle: &MultipartHandle) -> StoreResult<()>;
}

/// Result of a successful put operation
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: Option<String>,
    pub size_bytes: u64,
    pub checksum: Option<String>,
}

/// Result of a get operation
pub struct GetResult {
    pub stream: ByteStream,
    /// Length of `stream`
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub resolved_range: Option<ResolvedRange>,
}

/// Metadata about an object
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<i64>,
}

/// Server-side handle of an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartHandle {
    pub key: String,
    pub upload_id: String,
}

/// ETag for a multipart part
#[derive(Debug, Clone)]
pub struct PartETag {
    pub part_number: u32,
    pub etag: String,
}

/// Completed part for multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

impl From<PartETag> for CompletedPart {
    fn from(part: PartETag) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag,
        }
    }
}

/// Resolved range information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
}

/// Store capabilities
#[derive(Debug, Clone, Default)]
pub struct StoreCapabilities {
    pub supports_range: bool,
    pub supports_multipart: bool,
    pub max_part_size: Option<u64>,
    pub min_part_size: Option<u64>,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self {
            supports_range: false,
            supports_multipart: false,
            max_part_size: None,
            min_part_size: None,
        }
    }

    pub fn with_range(mut self) -> Self {
        self.supports_range = true;
        self
    }

    pub fn with_multipart(mut self, min_size: Option<u64>, max_size: Option<u64>) -> Self {
        self.supports_multipart = true;
        self.min_part_size = min_size;
        self.max_part_size = max_size;
        self
    }
}

/// Strategy for generating object keys
pub trait UploadKeyStrategy: Send + Sync {
    /// Key of the transient object holding one chunk
    fn chunk_key(&self, upload_id: &UploadId, chunk_index: u64) -> String;

    /// Key of the assembled object
    fn final_key(&self, upload_id: &UploadId, file_name: &str) -> String;

    /// Key of a file stored in a single put
    fn file_key(&self, file_id: &FileId, file_name: &str) -> String;
}

/// Default key strategy: `{chunk_prefix}/{upload_id}/chunk_{index}` for chunks,
/// `{final_prefix}/{upload_id}/{file_name}` for assembled files and
/// `{final_prefix}/{file_id}/{file_name}` for single-shot files
#[derive(Debug, Clone)]
pub struct DefaultKeyStrategy {
    chunk_prefix: String,
    final_prefix: String,
}

impl DefaultKeyStrategy {
    pub fn new<C: Into<String>, F: Into<String>>(chunk_prefix: C, final_prefix: F) -> Self {
        Self {
            chunk_prefix: chunk_prefix.into(),
            final_prefix: final_prefix.into(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.chunk_prefix.clone(), config.final_prefix.clone())
    }
}

impl Default for DefaultKeyStrategy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl UploadKeyStrategy for DefaultKeyStrategy {
    fn chunk_key(&self, upload_id: &UploadId, chunk_index: u64) -> String {
        format!("{}/{}/chunk_{}", self.chunk_prefix, upload_id, chunk_index)
    }

    fn final_key(&self, upload_id: &UploadId, file_name: &str) -> String {
        format!("{}/{}/{}", self.final_prefix, upload_id, object_file_name(file_name))
    }

    fn file_key(&self, file_id: &FileId, file_name: &str) -> String {
        format!("{}/{}/{}", self.final_prefix, file_id, object_file_name(file_name))
    }
}

/// Last path component of a client-supplied file name, never empty
pub(crate) fn object_file_name(file_name: &str) -> &str {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    match base {
        "" | "." | ".." => "file",
        name => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keys() {
        let keys = DefaultKeyStrategy::default();
        let id = UploadId::from_string("upl_abc".to_string());
        assert_eq!(keys.chunk_key(&id, 7), "uploads/upl_abc/chunk_7");
        assert_eq!(keys.final_key(&id, "movie.mp4"), "files/upl_abc/movie.mp4");
        let file_id = FileId::from_string("f1".to_string());
        assert_eq!(keys.file_key(&file_id, "a/b.txt"), "files/f1/b.txt");
    }

    #[test]
    fn final_key_drops_client_directories() {
        let keys = DefaultKeyStrategy::new("stage", "out");
        let id = UploadId::from_string("upl_1".to_string());
        assert_eq!(keys.final_key(&id, "../../etc/passwd"), "out/upl_1/passwd");
        assert_eq!(keys.final_key(&id, "C:\\videos\\clip.mov"), "out/upl_1/clip.mov");
        assert_eq!(keys.final_key(&id, "dir/"), "out/upl_1/file");
    }
}
