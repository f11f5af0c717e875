//! Filesystem-backed storage, the default for on-prem installs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use super::{glob_match, LifecyclePolicy, ListFilter, StorageBackend};
use crate::error::{StorageError, StorageResult};

/// Stores every object as a file directly under `root`, named by its
/// object key (keys are expected to be flat filenames, as produced by
/// the backup engine's naming convention).
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn ensure_root(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn upload(&self, local: &std::path::Path, name: &str) -> StorageResult<()> {
        self.ensure_root().await?;
        let dest = self.path_for(name);
        tokio::fs::copy(local, &dest)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        Ok(())
    }

    async fn download(&self, name: &str, local: &std::path::Path) -> StorageResult<()> {
        let src = self.path_for(name);
        if !src.exists() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, local)
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, filter: ListFilter) -> StorageResult<Vec<String>> {
        self.ensure_root().await?;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                continue;
            };
            match &filter.pattern {
                Some(pattern) if !glob_match(pattern, &name) => continue,
                _ => {}
            }
            names.push(name);
        }
        if filter.sort_by_name {
            names.sort();
        }
        Ok(names)
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
        }
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.path_for(name).exists())
    }

    async fn size(&self, name: &str) -> StorageResult<u64> {
        let meta = tokio::fs::metadata(self.path_for(name))
            .await
            .map_err(|_| StorageError::NotFound(name.to_string()))?;
        Ok(meta.len())
    }

    async fn mtime(&self, name: &str) -> StorageResult<DateTime<Utc>> {
        let meta = tokio::fs::metadata(self.path_for(name))
            .await
            .map_err(|_| StorageError::NotFound(name.to_string()))?;
        let modified = meta.modified().map_err(StorageError::Io)?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn total_bytes(&self) -> StorageResult<u64> {
        self.ensure_root().await?;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut total = 0u64;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                total += entry.metadata().await?.len();
            }
        }
        Ok(total)
    }

    async fn presigned_url(&self, _name: &str, _ttl_secs: u64) -> StorageResult<Option<String>> {
        Ok(None)
    }

    async fn lifecycle_policy(&self, _policy: LifecyclePolicy) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let root = tempdir().unwrap();
        let backend = LocalBackend::new(root.path().to_path_buf());

        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("dump.sql");
        std::fs::write(&src, b"payload").unwrap();

        backend.upload(&src, "20260101_000000_mysql_prod.sql").await.unwrap();
        assert!(backend.exists("20260101_000000_mysql_prod.sql").await.unwrap());
        assert_eq!(backend.size("20260101_000000_mysql_prod.sql").await.unwrap(), 7);

        let out = src_dir.path().join("out.sql");
        backend.download("20260101_000000_mysql_prod.sql", &out).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn download_missing_errors() {
        let root = tempdir().unwrap();
        let backend = LocalBackend::new(root.path().to_path_buf());
        let out = root.path().join("nope");
        assert!(backend.download("missing", &out).await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_is_not_an_error() {
        let root = tempdir().unwrap();
        let backend = LocalBackend::new(root.path().to_path_buf());
        assert!(backend.delete("missing").await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_pattern_and_sorts() {
        let root = tempdir().unwrap();
        let backend = LocalBackend::new(root.path().to_path_buf());
        for name in ["b.sql.gz", "a.sql.gz", "c.zip"] {
            std::fs::write(root.path().join(name), b"x").unwrap();
        }

        let names = backend
            .list(ListFilter {
                pattern: Some("*.sql.gz".to_string()),
                sort_by_name: true,
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["a.sql.gz", "b.sql.gz"]);
    }

    #[tokio::test]
    async fn total_bytes_sums_all_objects() {
        let root = tempdir().unwrap();
        let backend = LocalBackend::new(root.path().to_path_buf());
        std::fs::write(root.path().join("x"), b"1234").unwrap();
        std::fs::write(root.path().join("y"), b"123").unwrap();
        assert_eq!(backend.total_bytes().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn delete_many_reports_failures_without_aborting() {
        let root = tempdir().unwrap();
        let backend = LocalBackend::new(root.path().to_path_buf());
        std::fs::write(root.path().join("present"), b"x").unwrap();

        let failed = backend
            .delete_many(&["present".to_string(), "also-missing-but-ok".to_string()])
            .await
            .unwrap();
        // local deletes are idempotent on missing files, so nothing fails
        assert!(failed.is_empty());
        assert!(!backend.exists("present").await.unwrap());
    }
}
