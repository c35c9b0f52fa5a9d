//! Range-aware reads of stored files.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::ledger::UploadLedger;
use crate::{BlobStore, ByteRange, FileId, OpenedFile, UploadError, UploadResult};

/// Parse a `Range` header of the form `bytes=<start>-<end>` or `bytes=<start>-`.
///
/// Suffix ranges (`bytes=-500`) and multi-range requests are rejected.
pub fn parse_range_header(header: &str) -> UploadResult<ByteRange> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| UploadError::validation(format!("unsupported range unit in '{header}'")))?;

    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| UploadError::validation(format!("malformed range '{header}'")))?;
    if end.contains('-') || end.contains(',') {
        return Err(UploadError::validation(format!("malformed range '{header}'")));
    }

    let start: u64 = start
        .trim()
        .parse()
        .map_err(|_| UploadError::validation(format!("invalid range start in '{header}'")))?;

    let end = match end.trim() {
        "" => None,
        value => {
            let end: u64 = value
                .parse()
                .map_err(|_| UploadError::validation(format!("invalid range end in '{header}'")))?;
            if end < start {
                return Err(UploadError::validation(format!(
                    "range end {end} precedes start {start}"
                )));
            }
            Some(end)
        }
    };

    Ok(ByteRange::new(start, end))
}

/// Clamp a requested range to an object of `total_size` bytes.
///
/// An omitted end means the last byte; an end past the object is cut back to
/// it. A start at or beyond the end of the object is not satisfiable.
pub fn resolve_range(range: &ByteRange, total_size: u64) -> UploadResult<ByteRange> {
    if range.start >= total_size {
        return Err(UploadError::RangeNotSatisfiable { total_size });
    }
    let last = total_size - 1;
    let end = range.end.map_or(last, |end| end.min(last));
    Ok(ByteRange::new(range.start, Some(end)))
}

/// `Content-Range` value accompanying a not-satisfiable response
pub fn unsatisfied_content_range(total_size: u64) -> String {
    format!("bytes */{total_size}")
}

/// Serves stored files, whole or by byte range
#[derive(Clone)]
pub struct RangeReader {
    store: Arc<dyn BlobStore>,
    files: Arc<dyn UploadLedger>,
}

impl RangeReader {
    pub fn new(store: Arc<dyn BlobStore>, files: Arc<dyn UploadLedger>) -> Self {
        Self { store, files }
    }

    /// Open a stored file, optionally restricted by a raw `Range` header value.
    #[instrument(skip(self, file_id), fields(file_id = %file_id))]
    pub async fn open(&self, file_id: &FileId, range: Option<&str>) -> UploadResult<OpenedFile> {
        let file = self
            .files
            .get_file(file_id)
            .await?
            .ok_or_else(|| UploadError::FileNotFound {
                file_id: file_id.to_string(),
            })?;

        let head = self
            .store
            .head(&file.storage_key)
            .await
            .map_err(|e| UploadError::storage_read(&file.storage_key, e))?;
        let total_size = head.size_bytes;
        let accepts_ranges = self.store.capabilities().supports_range;

        let requested = match range {
            Some(header) if accepts_ranges => {
                let parsed = parse_range_header(header)?;
                Some(resolve_range(&parsed, total_size)?)
            }
            _ => None,
        };

        let got = self
            .store
            .get(&file.storage_key, requested.clone())
            .await
            .map_err(|e| UploadError::storage_read(&file.storage_key, e))?;

        debug!(
            key = %file.storage_key,
            total_size,
            partial = requested.is_some(),
            "Opened stored file"
        );

        Ok(OpenedFile {
            file,
            stream: got.stream,
            resolved_range: got.resolved_range,
            total_size,
            accepts_ranges,
        })
    }
}
