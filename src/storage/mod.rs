//! Storage backend abstraction: where finished backup artifacts land.
//!
//! A uniform capability set across local filesystem and object-store
//! backends, so the backup/restore executors never know which one they
//! are talking to. Listing pages through large remote buckets lazily;
//! continuation tokens are driven internally by each backend and never
//! exposed to callers.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::StorageTarget;
use crate::error::StorageResult;

/// Object listing filters. `pattern` is matched against the key with
/// simple glob-style `*` wildcards; backends may page internally but
/// always return the full matching set to the caller.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub pattern: Option<String>,
    pub sort_by_name: bool,
}

/// Lifecycle/expiration policy pushed down to an object store; local
/// storage ignores this (retention handles local expiry directly).
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub prefix: String,
    pub expire_after_days: u32,
}

/// Uniform storage capability set (spec.md §4.3). All operations are
/// idempotent with respect to repeated calls observing the same state.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upload a local file under `name`.
    async fn upload(&self, local: &std::path::Path, name: &str) -> StorageResult<()>;

    /// Download `name` to a local file.
    async fn download(&self, name: &str, local: &std::path::Path) -> StorageResult<()>;

    /// Names matching `filter`.
    async fn list(&self, filter: ListFilter) -> StorageResult<Vec<String>>;

    /// Delete `name`. Missing objects are not an error.
    async fn delete(&self, name: &str) -> StorageResult<()>;

    /// Delete every name in `names`, continuing past individual
    /// failures and returning the ones that failed.
    async fn delete_many(&self, names: &[String]) -> StorageResult<Vec<String>> {
        let mut failed = Vec::new();
        for name in names {
            if self.delete(name).await.is_err() {
                failed.push(name.clone());
            }
        }
        Ok(failed)
    }

    async fn exists(&self, name: &str) -> StorageResult<bool>;

    async fn size(&self, name: &str) -> StorageResult<u64>;

    async fn mtime(&self, name: &str) -> StorageResult<DateTime<Utc>>;

    /// Sum of `size` across every stored object (used for capacity
    /// metrics and retention reporting).
    async fn total_bytes(&self) -> StorageResult<u64>;

    /// Time-limited read URL, where the backend supports one.
    async fn presigned_url(&self, name: &str, ttl_secs: u64) -> StorageResult<Option<String>>;

    /// Apply a lifecycle/expiration policy, where the backend supports
    /// one (no-op for local storage).
    async fn lifecycle_policy(&self, policy: LifecyclePolicy) -> StorageResult<()>;
}

/// Build a [`StorageBackend`] from a configured [`StorageTarget`].
pub async fn build(target: &StorageTarget) -> StorageResult<Box<dyn StorageBackend>> {
    match target {
        StorageTarget::Local { path } => Ok(Box::new(local::LocalBackend::new(path.clone()))),
        StorageTarget::S3 {
            bucket,
            region,
            prefix,
            endpoint,
        } => Ok(Box::new(
            s3::S3Backend::new(
                bucket.clone(),
                region.clone(),
                prefix.clone(),
                endpoint.clone(),
            )
            .await?,
        )),
    }
}

/// Glob-lite matcher used by both backends for [`ListFilter::pattern`]:
/// `*` matches any run of characters, everything else is literal.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn match_parts(parts: &[&str], mut candidate: &str, anchored_start: bool) -> bool {
        if parts.is_empty() {
            return candidate.is_empty();
        }
        let (first, rest) = (parts[0], &parts[1..]);
        if anchored_start {
            if !candidate.starts_with(first) {
                return false;
            }
            candidate = &candidate[first.len()..];
            return match_parts(rest, candidate, false);
        }
        if rest.is_empty() {
            return candidate.ends_with(first);
        }
        let mut search_from = 0;
        while let Some(pos) = candidate[search_from..].find(first) {
            let abs = search_from + pos;
            if match_parts(rest, &candidate[abs + first.len()..], false) {
                return true;
            }
            search_from = abs + 1;
            if search_from > candidate.len() {
                break;
            }
        }
        false
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    match_parts(&parts, candidate, !pattern.starts_with('*'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_basics() {
        assert!(glob_match("*.sql.gz", "20260101_mysql_prod.sql.gz"));
        assert!(!glob_match("*.sql.gz", "20260101_mysql_prod.zip"));
        assert!(glob_match("20260101_*", "20260101_000000_mysql_prod.sql"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
