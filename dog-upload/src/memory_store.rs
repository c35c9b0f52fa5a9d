use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::store::{
    CompletedPart, GetResult, MultipartHandle, ObjectHead, PartETag, PutResult, ResolvedRange,
};
use crate::types::{bytes_stream, now_secs};
use crate::{
    BlobStore, ByteRange, ByteStream, MultipartBlobStore, StoreCapabilities, StoreError,
    StoreResult,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
    last_modified: i64,
}

#[derive(Debug)]
struct PendingMultipart {
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, (Bytes, String)>,
}

/// In-memory object store with multipart support, for tests and development
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    multipart: Arc<RwLock<HashMap<String, PendingMultipart>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full content of an object, if present
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Keys currently stored under `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Multipart uploads begun but neither completed nor aborted
    pub fn pending_multipart_count(&self) -> usize {
        self.multipart.read().len()
    }

    fn etag_for(data: &[u8]) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        data.hash(&mut hasher);
        format!("\"{:016x}\"", hasher.finish())
    }

    async fn collect_stream(mut stream: ByteStream) -> StoreResult<Bytes> {
        let mut data = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data.freeze())
    }

    fn invalid_multipart(message: String) -> StoreError {
        StoreError::backend(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
    }

    fn insert(&self, key: &str, data: Bytes, content_type: Option<String>) -> PutResult {
        let etag = Self::etag_for(&data);
        let size_bytes = data.len() as u64;
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type,
                etag: etag.clone(),
                last_modified: now_secs(),
            },
        );
        PutResult {
            etag: Some(etag.clone()),
            size_bytes,
            checksum: Some(etag),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> StoreResult<PutResult> {
        let data = Self::collect_stream(stream).await?;
        Ok(self.insert(key, data, content_type.map(str::to_string)))
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> StoreResult<GetResult> {
        let object = self
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))?;

        let total_size = object.data.len() as u64;
        let (data, resolved_range) = match range {
            None => (object.data.clone(), None),
            Some(range) => {
                if range.start >= total_size {
                    return Err(StoreError::invalid_range(format!(
                        "start {} beyond object size {}",
                        range.start, total_size
                    )));
                }
                let end = range.end.unwrap_or(total_size - 1).min(total_size - 1);
                if end < range.start {
                    return Err(StoreError::invalid_range(format!(
                        "end {} before start {}",
                        end, range.start
                    )));
                }
                (
                    object.data.slice(range.start as usize..=end as usize),
                    Some(ResolvedRange {
                        start: range.start,
                        end,
                        total_size,
                    }),
                )
            }
        };

        Ok(GetResult {
            size_bytes: data.len() as u64,
            stream: bytes_stream(data),
            content_type: object.content_type,
            etag: Some(object.etag),
            resolved_range,
        })
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectHead> {
        let objects = self.objects.read();
        let object = objects.get(key).ok_or_else(|| StoreError::not_found(key))?;
        Ok(ObjectHead {
            size_bytes: object.data.len() as u64,
            content_type: object.content_type.clone(),
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic()
            .with_range()
            .with_multipart(None, None)
    }
}

#[async_trait]
impl MultipartBlobStore for MemoryBlobStore {
    async fn init_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<MultipartHandle> {
        let upload_id = Uuid::new_v4().simple().to_string();
        self.multipart.write().insert(
            upload_id.clone(),
            PendingMultipart {
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(MultipartHandle {
            key: key.to_string(),
            upload_id,
        })
    }

    async fn put_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        stream: ByteStream,
        size_bytes: u64,
    ) -> StoreResult<PartETag> {
        if part_number == 0 {
            return Err(Self::invalid_multipart("part numbers start at 1".to_string()));
        }
        let data = Self::collect_stream(stream).await?;
        if data.len() as u64 != size_bytes {
            return Err(Self::invalid_multipart(format!(
                "part {} declared {} bytes but carried {}",
                part_number,
                size_bytes,
                data.len()
            )));
        }

        let etag = Self::etag_for(&data);
        let mut multipart = self.multipart.write();
        let pending = multipart
            .get_mut(&handle.upload_id)
            .ok_or_else(|| StoreError::not_found(&handle.upload_id))?;
        pending.parts.insert(part_number, (data, etag.clone()));

        Ok(PartETag { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<PutResult> {
        let pending = self
            .multipart
            .write()
            .remove(&handle.upload_id)
            .ok_or_else(|| StoreError::not_found(&handle.upload_id))?;

        if parts.is_empty() {
            return Err(Self::invalid_multipart("no parts to complete".to_string()));
        }

        let mut assembled = BytesMut::new();
        let mut previous = 0u32;
        for part in &parts {
            if part.part_number <= previous {
                return Err(Self::invalid_multipart(format!(
                    "part {} listed out of order",
                    part.part_number
                )));
            }
            previous = part.part_number;

            let (data, etag) = pending.parts.get(&part.part_number).ok_or_else(|| {
                Self::invalid_multipart(format!("part {} was never uploaded", part.part_number))
            })?;
            if *etag != part.etag {
                return Err(Self::invalid_multipart(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            assembled.extend_from_slice(data);
        }

        Ok(self.insert(&pending.key, assembled.freeze(), pending.content_type))
    }

    async fn abort_multipart(&self, handle: &MultipartHandle) -> StoreResult<()> {
        self.multipart.write().remove(&handle.upload_id);
        Ok(())
    }
}
