use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::instrument;

use crate::store::{
    CompletedPart, GetResult, MultipartHandle, ObjectHead, PartETag, PutResult, ResolvedRange,
    StoreCapabilities,
};
use crate::{BlobStore, ByteRange, ByteStream, MultipartBlobStore, StoreError, StoreResult};

/// S3 rejects non-final multipart parts smaller than this.
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3 maximum part size (5 GiB)
pub const S3_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible endpoint
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Path-style addressing (`endpoint/bucket/key`), needed by MinIO-style servers
    pub force_path_style: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

impl S3Config {
    /// Read `DOG_UPLOAD_S3_BUCKET`, `DOG_UPLOAD_S3_ENDPOINT_URL`,
    /// `DOG_UPLOAD_S3_ACCESS_KEY_ID`, `DOG_UPLOAD_S3_SECRET_ACCESS_KEY` and the
    /// optional `DOG_UPLOAD_S3_REGION` / `DOG_UPLOAD_S3_FORCE_PATH_STYLE`.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| StoreError::Config {
                    message: format!("{} environment variable required", key),
                })
        };

        let force_path_style = match lookup("DOG_UPLOAD_S3_FORCE_PATH_STYLE") {
            None => true,
            Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"),
        };

        Ok(Self {
            bucket: required("DOG_UPLOAD_S3_BUCKET")?,
            region: lookup("DOG_UPLOAD_S3_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint_url: required("DOG_UPLOAD_S3_ENDPOINT_URL")?,
            access_key_id: required("DOG_UPLOAD_S3_ACCESS_KEY_ID")?,
            secret_access_key: required("DOG_UPLOAD_S3_SECRET_ACCESS_KEY")?,
            force_path_style,
        })
    }
}

/// Object store on any S3-compatible service (AWS, MinIO, RustFS, ...)
#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
    bucket: String,
}

impl S3CompatibleStore {
    pub async fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "dog-upload",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url)
            .load()
            .await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        );

        Self {
            client,
            bucket: config.bucket,
        }
    }

    /// Wrap an already configured client
    pub fn from_client<S: Into<String>>(client: Client, bucket: S) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn collect_stream(mut stream: ByteStream) -> StoreResult<Bytes> {
        let mut data = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data.freeze())
    }

    fn format_range(range: &ByteRange) -> String {
        match range.end {
            Some(end) => format!("bytes={}-{}", range.start, end),
            None => format!("bytes={}-", range.start),
        }
    }

    /// `bytes 0-99/1000` -> total size
    fn total_from_content_range(content_range: Option<&str>) -> Option<u64> {
        content_range?.rsplit('/').next()?.trim().parse().ok()
    }

    fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StoreError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let SdkError::ServiceError(ref service_err) = err {
            match service_err.raw().status().as_u16() {
                404 => return StoreError::not_found(key),
                416 => return StoreError::invalid_range(format!("range not satisfiable for {key}")),
                _ => {}
            }
        }
        StoreError::backend(err)
    }
}

#[async_trait]
impl BlobStore for S3CompatibleStore {
    #[instrument(skip(self, stream), fields(backend = "s3"))]
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> StoreResult<PutResult> {
        let data = Self::collect_stream(stream).await?;
        let size_bytes = data.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(AwsByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let result = request
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        Ok(PutResult {
            etag: result.e_tag,
            size_bytes,
            checksum: None,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str, range: Option<ByteRange>) -> StoreResult<GetResult> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);

        if let Some(ref range) = range {
            request = request.range(Self::format_range(range));
        }

        let result = request
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;
        let content_length = result.content_length.unwrap_or(0).max(0) as u64;
        let total_size = Self::total_from_content_range(result.content_range.as_deref())
            .unwrap_or(content_length);

        let resolved_range = range.as_ref().map(|r| ResolvedRange {
            start: r.start,
            end: (r.start + content_length).saturating_sub(1),
            total_size,
        });

        let body = result
            .body
            .collect()
            .await
            .map_err(StoreError::backend)?;
        let stream = futures::stream::once(async move { Ok(body.into_bytes()) });

        Ok(GetResult {
            stream: Box::pin(stream),
            size_bytes: content_length,
            content_type: result.content_type,
            etag: result.e_tag,
            resolved_range,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StoreResult<ObjectHead> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        Ok(ObjectHead {
            size_bytes: result.content_length.unwrap_or(0).max(0) as u64,
            content_type: result.content_type,
            etag: result.e_tag,
            last_modified: result.last_modified.map(|dt| dt.secs()),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic()
            .with_range()
            .with_multipart(Some(S3_MIN_PART_SIZE), Some(S3_MAX_PART_SIZE))
    }
}

#[async_trait]
impl MultipartBlobStore for S3CompatibleStore {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn init_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<MultipartHandle> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key);

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let result = request
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let upload_id = result.upload_id.ok_or_else(|| StoreError::Backend {
            source: format!("no multipart upload id returned for {key}").into(),
        })?;

        Ok(MultipartHandle {
            key: key.to_string(),
            upload_id,
        })
    }

    #[instrument(skip(self, stream), fields(backend = "s3", key = %handle.key))]
    async fn put_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        stream: ByteStream,
        size_bytes: u64,
    ) -> StoreResult<PartETag> {
        let data = Self::collect_stream(stream).await?;
        if data.len() as u64 != size_bytes {
            return Err(StoreError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "part {} declared {} bytes, stream carried {}",
                        part_number,
                        size_bytes,
                        data.len()
                    ),
                ),
            });
        }

        let part_number_i32 = i32::try_from(part_number)
            .map_err(|_| StoreError::invalid_range(format!("part number {part_number}")))?;

        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .part_number(part_number_i32)
            .content_length(data.len() as i64)
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, &handle.key))?;

        Ok(PartETag {
            part_number,
            etag: result.e_tag.unwrap_or_default(),
        })
    }

    #[instrument(skip(self, parts), fields(backend = "s3", key = %handle.key, parts = parts.len()))]
    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<PutResult> {
        let s3_parts = parts
            .iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .e_tag(&p.etag)
                    .part_number(p.part_number as i32)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(s3_parts))
            .build();

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, &handle.key))?;

        let size_bytes = self.head(&handle.key).await?.size_bytes;

        Ok(PutResult {
            etag: result.e_tag,
            size_bytes,
            checksum: None,
        })
    }

    #[instrument(skip(self), fields(backend = "s3", key = %handle.key))]
    async fn abort_multipart(&self, handle: &MultipartHandle) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, &handle.key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn config_requires_bucket_and_credentials() {
        let err = S3Config::from_lookup(lookup(&[("DOG_UPLOAD_S3_ENDPOINT_URL", "http://x")]))
            .unwrap_err();
        assert!(err.to_string().contains("DOG_UPLOAD_S3_BUCKET"));
    }

    #[test]
    fn config_defaults_region_and_path_style() {
        let config = S3Config::from_lookup(lookup(&[
            ("DOG_UPLOAD_S3_BUCKET", "videos"),
            ("DOG_UPLOAD_S3_ENDPOINT_URL", "http://127.0.0.1:9000"),
            ("DOG_UPLOAD_S3_ACCESS_KEY_ID", "minio"),
            ("DOG_UPLOAD_S3_SECRET_ACCESS_KEY", "minio123"),
        ]))
        .unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(config.force_path_style);
        assert!(!format!("{config:?}").contains("minio123"));
    }

    #[test]
    fn path_style_can_be_disabled() {
        let config = S3Config::from_lookup(lookup(&[
            ("DOG_UPLOAD_S3_BUCKET", "videos"),
            ("DOG_UPLOAD_S3_ENDPOINT_URL", "https://s3.amazonaws.com"),
            ("DOG_UPLOAD_S3_ACCESS_KEY_ID", "a"),
            ("DOG_UPLOAD_S3_SECRET_ACCESS_KEY", "b"),
            ("DOG_UPLOAD_S3_FORCE_PATH_STYLE", "false"),
        ]))
        .unwrap();
        assert!(!config.force_path_style);
    }

    #[test]
    fn range_header_formatting() {
        assert_eq!(
            S3CompatibleStore::format_range(&ByteRange::new(0, Some(99))),
            "bytes=0-99"
        );
        assert_eq!(
            S3CompatibleStore::format_range(&ByteRange::from_start(500)),
            "bytes=500-"
        );
        assert_eq!(
            S3CompatibleStore::total_from_content_range(Some("bytes 0-99/1000")),
            Some(1000)
        );
        assert_eq!(S3CompatibleStore::total_from_content_range(None), None);
    }
}
