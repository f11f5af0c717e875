//! Database adapters: the common capability set the backup/restore
//! engine drives regardless of what kind of instance it's talking to.

pub mod files;
pub mod mysql;
pub mod postgres;

use async_trait::async_trait;

use crate::error::AdapterResult;

/// Capability set every database (or file-tree) adapter implements
/// (spec.md §4.4).
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// User-visible databases only; system databases/schemas are
    /// filtered per-kind.
    async fn databases(&self) -> AdapterResult<Vec<String>>;

    /// Cheap connectivity probe, used by schedulers and health checks.
    async fn test_connection(&self) -> AdapterResult<bool>;

    /// Dump `name` into `out_path`. Returns `true` on success.
    async fn backup_database(&self, name: &str, out_path: &std::path::Path) -> AdapterResult<bool>;

    /// Restore `name` from `in_path`. Returns `true` on success.
    async fn restore_database(&self, name: &str, in_path: &std::path::Path) -> AdapterResult<bool>;

    /// The command this adapter would run for `backup_database`, as
    /// plain text for logging — never executed.
    fn backup_command(&self, name: &str, out_path: &std::path::Path) -> String;
}
