use serde::{Deserialize, Serialize};

use crate::store::ResolvedRange;
use crate::types::now_secs;
use crate::{ByteStream, FileId, OwnerId, UploadId};

/// Metadata record of a stored file, written once its object exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_id: FileId,
    /// Session the file was assembled from; `None` for single-shot uploads
    pub upload_id: Option<UploadId>,
    pub owner_id: OwnerId,
    pub file_name: String,
    /// Display name
    pub title: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub created_at: i64,
}

impl StoredFile {
    /// Create a new file record
    pub fn new<N: Into<String>, K: Into<String>>(
        owner_id: OwnerId,
        file_name: N,
        storage_key: K,
        size_bytes: u64,
    ) -> Self {
        let file_name = file_name.into();
        Self {
            file_id: FileId::new(),
            upload_id: None,
            owner_id,
            title: file_name.clone(),
            content_type: crate::mime::content_type_for(&file_name).to_string(),
            file_name,
            storage_key: storage_key.into(),
            size_bytes,
            created_at: now_secs(),
        }
    }

    /// Set the originating upload session
    pub fn with_upload(mut self, upload_id: UploadId) -> Self {
        self.upload_id = Some(upload_id);
        self
    }
}

/// Result of opening a stored file for reading
pub struct OpenedFile {
    pub file: StoredFile,
    pub stream: ByteStream,
    /// Set when a range was requested
    pub resolved_range: Option<ResolvedRange>,
    /// Size of the whole object
    pub total_size: u64,
    /// The backing store can serve byte ranges of this object
    pub accepts_ranges: bool,
}

impl OpenedFile {
    /// Check if this is a partial content response
    pub fn is_partial(&self) -> bool {
        self.resolved_range
            .as_ref()
            .map_or(false, |r| !(r.start == 0 && r.end + 1 == r.total_size))
    }

    /// Number of bytes in `stream`
    pub fn content_length(&self) -> u64 {
        self.resolved_range
            .as_ref()
            .map_or(self.total_size, |r| r.end - r.start + 1)
    }

    /// `Content-Range` value, e.g. `bytes 0-999/1000`
    pub fn content_range(&self) -> Option<String> {
        self.resolved_range
            .as_ref()
            .map(|r| format!("bytes {}-{}/{}", r.start, r.end, r.total_size))
    }

    pub fn content_type(&self) -> &str {
        &self.file.content_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_infers_content_type_and_title() {
        let file = StoredFile::new(OwnerId::new("7"), "trip.mp4", "files/u/trip.mp4", 10);
        assert_eq!(file.content_type, "video/mp4");
        assert_eq!(file.title, "trip.mp4");
        assert!(file.upload_id.is_none());
    }

    #[test]
    fn full_range_is_not_partial() {
        let file = StoredFile::new(OwnerId::new("7"), "a.bin", "k", 1000);
        let opened = OpenedFile {
            file,
            stream: crate::types::bytes_stream(bytes::Bytes::new()),
            resolved_range: Some(ResolvedRange {
                start: 0,
                end: 999,
                total_size: 1000,
            }),
            total_size: 1000,
            accepts_ranges: true,
        };
        assert!(!opened.is_partial());
        assert_eq!(opened.content_length(), 1000);
        assert_eq!(opened.content_range().as_deref(), Some("bytes 0-999/1000"));
    }
}
