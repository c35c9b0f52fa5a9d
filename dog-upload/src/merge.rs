use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use crate::store::{CompletedPart, MultipartHandle, PutResult};
use crate::{ChunkRecord, MultipartBlobStore, StoreError, UploadError, UploadId, UploadResult};

/// Assembles an upload's chunk objects into one object with a server-side
/// multipart upload. Part `i + 1` carries chunk `i`, so the result is ordered
/// by chunk index whatever order the chunks arrived in.
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn MultipartBlobStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn MultipartBlobStore>) -> Self {
        Self { store }
    }

    /// Merge `chunks` (completed, ascending by index) into `final_key`.
    ///
    /// On any failure the multipart upload is aborted and `UploadError::Merge`
    /// is returned; chunk objects and records are left untouched.
    #[instrument(skip(self, chunks), fields(parts = chunks.len()))]
    pub async fn merge(
        &self,
        upload_id: &UploadId,
        final_key: &str,
        content_type: &str,
        chunks: &[ChunkRecord],
    ) -> UploadResult<PutResult> {
        if chunks.is_empty() {
            return Err(UploadError::merge(upload_id.as_str(), "no chunks to merge"));
        }

        let handle = self
            .store
            .init_multipart(final_key, Some(content_type))
            .await
            .map_err(|e| UploadError::merge(upload_id.as_str(), format!("init failed: {e}")))?;

        match self.upload_parts(&handle, chunks).await {
            Ok(result) => {
                info!(%upload_id, key = final_key, size_bytes = result.size_bytes, "Chunks merged");
                Ok(result)
            }
            Err(reason) => {
                error!(%upload_id, key = final_key, %reason, "Merge failed, aborting multipart upload");
                if let Err(abort_error) = self.store.abort_multipart(&handle).await {
                    error!(%upload_id, key = final_key, error = %abort_error, "Multipart abort failed");
                }
                Err(UploadError::merge(upload_id.as_str(), reason))
            }
        }
    }

    async fn upload_parts(
        &self,
        handle: &MultipartHandle,
        chunks: &[ChunkRecord],
    ) -> Result<PutResult, String> {
        let mut parts = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let key = chunk
                .storage_key
                .as_deref()
                .ok_or_else(|| format!("chunk {} has no stored object", chunk.chunk_index))?;
            let part_number = chunk
                .chunk_index
                .checked_add(1)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| format!("chunk index {} exceeds part numbering", chunk.chunk_index))?;

            let object = self
                .store
                .get(key, None)
                .await
                .map_err(|e| describe("read", key, e))?;

            let etag = self
                .store
                .put_part(handle, part_number, object.stream, object.size_bytes)
                .await
                .map_err(|e| describe("upload part from", key, e))?;

            debug!(part_number, key, "Part uploaded");
            parts.push(CompletedPart::from(etag));
        }

        self.store
            .complete_multipart(handle, parts)
            .await
            .map_err(|e| format!("complete failed: {e}"))
    }
}

fn describe(action: &str, key: &str, error: StoreError) -> String {
    format!("{action} {key}: {error}")
}
