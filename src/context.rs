//! Shared mutable state record driven by the backup and restore executors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{BackupSystemPaths, DatabaseInstance, StorageTarget};

/// Cooperative cancellation flag checked by executors at each
/// suspension point (adapter call, storage call, compression I/O).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle status of a [`BackupContext`] or [`RestoreContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-database outcome recorded by the backup strategy, kept even on
/// partial failure so the CLI-facing summary can name which databases
/// failed and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseOutcome {
    pub database: String,
    pub success: bool,
    pub raw_size: u64,
    pub compressed_size: u64,
    pub storage_location: Option<String>,
    pub error_message: Option<String>,
}

/// Mutable state for a single backup invocation, owned exclusively by the
/// executor driving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupContext {
    pub instance: DatabaseInstance,
    pub storage: StorageTarget,
    pub paths: BackupSystemPaths,
    pub compression: String,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub outcomes: Vec<DatabaseOutcome>,
}

impl BackupContext {
    /// Create a new, pending context for `instance`.
    pub fn new(
        instance: DatabaseInstance,
        storage: StorageTarget,
        paths: BackupSystemPaths,
        compression: String,
    ) -> Self {
        Self {
            instance,
            storage,
            paths,
            compression,
            status: Status::Pending,
            start_time: None,
            end_time: None,
            error_message: None,
            outcomes: Vec::new(),
        }
    }

    /// Transition pending -> running and stamp `start_time`. Idempotent
    /// across retries: per-attempt fields are cleared but identity and
    /// the original start time are preserved once set.
    pub fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        self.status = Status::Running;
    }

    /// Reset the per-attempt fields ahead of a retry, preserving identity
    /// and the original start time.
    pub fn reset_for_retry(&mut self) {
        self.outcomes.clear();
        self.error_message = None;
        self.status = Status::Pending;
    }

    /// Terminal success transition; stamps `end_time`.
    pub fn complete(&mut self) {
        self.status = Status::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Terminal failure transition; stamps `end_time` and records the
    /// message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = Status::Failed;
        self.error_message = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    /// Duration since start, or since start until `end_time` if
    /// terminated.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// Mutable state for a single restore invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreContext {
    pub instance: DatabaseInstance,
    pub storage: StorageTarget,
    pub backup_file: String,
    pub target_database: Option<String>,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub download_path: Option<PathBuf>,
    pub decompressed_path: Option<PathBuf>,
    pub restored_size: Option<u64>,
}

impl RestoreContext {
    pub fn new(instance: DatabaseInstance, storage: StorageTarget, backup_file: String) -> Self {
        Self {
            instance,
            storage,
            backup_file,
            target_database: None,
            status: Status::Pending,
            start_time: None,
            end_time: None,
            error_message: None,
            download_path: None,
            decompressed_path: None,
            restored_size: None,
        }
    }

    /// Whether `backup_file` names a compressed artifact.
    pub fn needs_decompression(&self) -> bool {
        self.compression_type().is_some()
    }

    /// The compression method implied by `backup_file`'s suffix, if any.
    pub fn compression_type(&self) -> Option<&'static str> {
        if self.backup_file.ends_with(".gz") {
            Some("gzip")
        } else if self.backup_file.ends_with(".bz2") {
            Some("bzip2")
        } else {
            None
        }
    }

    pub fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        self.status = Status::Running;
    }

    pub fn reset_for_retry(&mut self) {
        self.error_message = None;
        self.download_path = None;
        self.decompressed_path = None;
        self.restored_size = None;
        self.status = Status::Pending;
    }

    pub fn complete(&mut self) {
        self.status = Status::Completed;
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = Status::Failed;
        self.error_message = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}
