//! Files adapter: treats a set of configured glob patterns as "the
//! database" for hosts that need to back up plain files (config trees,
//! uploaded assets) alongside or instead of a real database.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::DatabaseAdapter;
use crate::compression;
use crate::error::{AdapterError, AdapterResult};

pub struct FilesAdapter {
    patterns: Vec<String>,
}

impl FilesAdapter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Expand every configured pattern into the set of regular files it
    /// names, recursing into subdirectories when the pattern contains
    /// `**`.
    fn expand(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for pattern in &self.patterns {
            expand_pattern(pattern, &mut files);
        }
        files.sort();
        files.dedup();
        files
    }
}

fn expand_pattern(pattern: &str, out: &mut Vec<PathBuf>) {
    let recursive = pattern.contains("**");
    let root = static_prefix(pattern);
    let suffix_glob = &pattern[root.to_string_lossy().len()..];

    if !root.exists() {
        return;
    }
    if root.is_file() {
        out.push(root);
        return;
    }

    walk(&root, suffix_glob, recursive, out);
}

/// The longest literal directory prefix of a glob pattern, stopping at
/// the first path component containing a wildcard.
fn static_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in Path::new(pattern).components() {
        let piece = component.as_os_str().to_string_lossy();
        if piece.contains('*') {
            break;
        }
        prefix.push(component);
    }
    prefix
}

fn walk(dir: &Path, suffix_glob: &str, recursive: bool, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                walk(&path, suffix_glob, recursive, out);
            }
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let leaf_glob = suffix_glob.rsplit('/').next().unwrap_or(suffix_glob);
        if leaf_glob.is_empty() || crate::storage::glob_match(leaf_glob, name) {
            out.push(path);
        }
    }
}

#[async_trait]
impl DatabaseAdapter for FilesAdapter {
    async fn databases(&self) -> AdapterResult<Vec<String>> {
        Ok(self.patterns.clone())
    }

    async fn test_connection(&self) -> AdapterResult<bool> {
        Ok(self.patterns.iter().any(|p| static_prefix(p).exists()))
    }

    async fn backup_database(
        &self,
        _name: &str,
        out_path: &std::path::Path,
    ) -> AdapterResult<bool> {
        let files = self.expand();
        compression::tar_gz_archive(files, out_path)
            .await
            .map_err(|e| AdapterError::DumpFailed(e.to_string()))?;
        Ok(true)
    }

    async fn restore_database(
        &self,
        _name: &str,
        in_path: &std::path::Path,
    ) -> AdapterResult<bool> {
        compression::tar_gz_extract(in_path, None)
            .await
            .map_err(|e| AdapterError::RestoreFailed(e.to_string()))?;
        Ok(true)
    }

    fn backup_command(&self, _name: &str, out_path: &std::path::Path) -> String {
        format!(
            "tar -czf {} {}",
            out_path.display(),
            self.patterns.join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn expands_recursive_pattern_and_archives() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/one.csv"), b"1").unwrap();
        std::fs::write(dir.path().join("a/b/two.csv"), b"2").unwrap();
        std::fs::write(dir.path().join("a/ignore.txt"), b"x").unwrap();

        let pattern = format!("{}/a/**/*.csv", dir.path().display());
        let adapter = FilesAdapter::new(vec![pattern]);
        let files = adapter.expand();
        assert_eq!(files.len(), 2);

        let archive_dir = tempdir().unwrap();
        let archive = archive_dir.path().join("files.tar.gz");
        let ok = adapter
            .backup_database("files", &archive)
            .await
            .unwrap();
        assert!(ok);
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn missing_pattern_root_yields_no_files() {
        let adapter = FilesAdapter::new(vec!["/definitely/missing/**/*.csv".to_string()]);
        assert!(adapter.expand().is_empty());
        assert!(!adapter.test_connection().await.unwrap());
    }
}
