use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{ObjectStore, StorageError, StorageResult};
use crate::config::settings::StorageSettings;

// Minimum part size for S3 is 5MB. We use 8MB to be safe.
const PART_SIZE: usize = 8 * 1024 * 1024;
// Files at least this large go through the multipart API.
const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

fn request_error<E>(key: &str, e: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::request(key, DisplayErrorContext(e))
}

#[derive(Clone)]
pub struct StorageService {
    client: Client,
    bucket: String,
}

impl StorageService {
    pub fn new(settings: &StorageSettings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "static",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(&settings.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    /// Create the bucket if it does not exist yet.
    pub async fn ensure_bucket(&self) -> anyhow::Result<()> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            info!("✅ Connected to bucket {}", self.bucket);
            return Ok(());
        }

        warn!("Bucket {} does not exist, creating it", self.bucket);
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create bucket {}: {}", self.bucket, DisplayErrorContext(e)))?;
        info!("✅ Created bucket {}", self.bucket);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, content_type: Option<&str>) -> StorageResult<String> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| request_error(key, e))?;

        result
            .upload_id
            .ok_or_else(|| StorageError::request(key, "multipart upload returned no upload id"))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<CompletedPart> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error(key, e))?;

        Ok(CompletedPart::builder()
            .set_e_tag(result.e_tag)
            .part_number(part_number)
            .build())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        let completed = CompletedMultipartUpload::builder().set_parts(Some(parts)).build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| request_error(key, e))?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!("Failed to abort multipart upload of {}: {}", key, DisplayErrorContext(e));
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, path: &Path) -> StorageResult<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            let mut buffer = Vec::with_capacity(PART_SIZE);
            while buffer.len() < PART_SIZE {
                let read = (&mut file)
                    .take((PART_SIZE - buffer.len()) as u64)
                    .read_to_end(&mut buffer)
                    .await?;
                if read == 0 {
                    break;
                }
            }
            if buffer.is_empty() {
                break;
            }

            let last = buffer.len() < PART_SIZE;
            parts.push(
                self.upload_part(key, upload_id, part_number, Bytes::from(buffer))
                    .await?,
            );
            part_number += 1;
            if last {
                break;
            }
        }

        Ok(parts)
    }

    async fn upload_multipart(&self, key: &str, path: &Path, content_type: Option<&str>) -> StorageResult<String> {
        let upload_id = self.create_multipart_upload(key, content_type).await?;

        let parts = match self.upload_parts(key, &upload_id, path).await {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart_upload(key, &upload_id).await;
                return Err(e);
            }
        };
        debug!("Uploaded {} parts for {}", parts.len(), key);

        if let Err(e) = self.complete_multipart_upload(key, &upload_id, parts).await {
            self.abort_multipart_upload(key, &upload_id).await;
            return Err(e);
        }
        Ok(key.to_string())
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> StorageResult<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| request_error(key, e))?;

        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_no_such_key() => StorageError::NotFound(key.to_string()),
                _ => request_error(key, e),
            })?;

        let data = resp.body.collect().await.map_err(|e| request_error(key, e))?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error(key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => match e.as_service_error() {
                Some(service) if service.is_not_found() => Ok(false),
                _ => Err(request_error(key, e)),
            },
        }
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| request_error(key, e))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| request_error(key, e))?;

        Ok(request.uri().to_string())
    }

    async fn save_locally(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_no_such_key() => StorageError::NotFound(key.to_string()),
                _ => request_error(key, e),
            })?;

        let mut reader = resp.body.into_async_read();
        let mut file = tokio::fs::File::create(path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        Ok(written)
    }

    async fn upload_local_file(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let size = tokio::fs::metadata(path).await?.len();
        if size >= MULTIPART_THRESHOLD {
            return self.upload_multipart(key, path, content_type).await;
        }

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| request_error(key, e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| request_error(key, e))?;

        Ok(key.to_string())
    }
}
