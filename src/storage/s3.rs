//! AWS S3 storage backend, adapted from the teacher's implementation to
//! the narrower capability set spec.md names (no multipart upload or
//! object copy — artifacts are uploaded whole).

use async_trait::async_trait;
use aws_sdk_s3::{config::Region, primitives::ByteStream, Client};
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{LifecyclePolicy, ListFilter, StorageBackend};
use crate::error::{StorageError, StorageResult};

pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Backend {
    pub async fn new(
        bucket: String,
        region: String,
        prefix: Option<String>,
        endpoint: Option<String>,
    ) -> StorageResult<Self> {
        let mut config_builder = aws_config::from_env().region(Region::new(region));
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let aws_config = config_builder.load().await;
        let client = Client::new(&aws_config);

        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    fn key_for(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), name),
            None => name.to_string(),
        }
    }

    fn map_err<E: std::fmt::Display>(err: E) -> StorageError {
        StorageError::ConnectionFailed(err.to_string())
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn upload(&self, local: &std::path::Path, name: &str) -> StorageResult<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        Ok(())
    }

    async fn download(&self, name: &str, local: &std::path::Path) -> StorageResult<()> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes();

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, data).await?;
        Ok(())
    }

    async fn list(&self, filter: ListFilter) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(self.prefix.clone());
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(Self::map_err)?;

            for obj in output.contents() {
                let Some(key) = obj.key() else { continue };
                let name = match &self.prefix {
                    Some(prefix) => key
                        .strip_prefix(&format!("{}/", prefix.trim_end_matches('/')))
                        .unwrap_or(key)
                        .to_string(),
                    None => key.to_string(),
                };
                match &filter.pattern {
                    Some(pattern) if !super::glob_match(pattern, &name) => continue,
                    _ => {}
                }
                names.push(name);
            }

            if output.is_truncated().unwrap_or(false) {
                continuation = output.next_continuation_token().map(|s| s.to_string());
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        if filter.sort_by_name {
            names.sort();
        }
        Ok(names)
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn size(&self, name: &str) -> StorageResult<u64> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .send()
            .await
            .map_err(|_| StorageError::NotFound(name.to_string()))?;
        Ok(output.content_length().unwrap_or(0) as u64)
    }

    async fn mtime(&self, name: &str) -> StorageResult<DateTime<Utc>> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .send()
            .await
            .map_err(|_| StorageError::NotFound(name.to_string()))?;

        output
            .last_modified()
            .and_then(|dt| {
                chrono::DateTime::parse_from_rfc3339(&dt.to_string())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            })
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn total_bytes(&self) -> StorageResult<u64> {
        let names = self.list(ListFilter::default()).await?;
        let mut total = 0u64;
        for name in names {
            total += self.size(&name).await?;
        }
        Ok(total)
    }

    async fn presigned_url(&self, name: &str, ttl_secs: u64) -> StorageResult<Option<String>> {
        let presigning_config = aws_sdk_s3::presigning::PresigningConfig::builder()
            .expires_in(Duration::from_secs(ttl_secs))
            .build()
            .map_err(Self::map_err)?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .presigned(presigning_config)
            .await
            .map_err(Self::map_err)?;

        Ok(Some(presigned.uri().to_string()))
    }

    async fn lifecycle_policy(&self, policy: LifecyclePolicy) -> StorageResult<()> {
        use aws_sdk_s3::types::{
            BucketLifecycleConfiguration, ExpirationStatus, LifecycleExpiration, LifecycleRule,
            LifecycleRuleFilter,
        };

        let rule = LifecycleRule::builder()
            .id(format!("expire-{}", policy.prefix))
            .status(ExpirationStatus::Enabled)
            .filter(LifecycleRuleFilter::Prefix(policy.prefix.clone()))
            .expiration(
                LifecycleExpiration::builder()
                    .days(policy.expire_after_days as i32)
                    .build(),
            )
            .build()
            .map_err(Self::map_err)?;

        let config = BucketLifecycleConfiguration::builder()
            .rules(rule)
            .build()
            .map_err(Self::map_err)?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .lifecycle_configuration(config)
            .send()
            .await
            .map_err(Self::map_err)?;

        Ok(())
    }
}
