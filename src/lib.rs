//! # Backup Engine
//!
//! Enterprise database backup and restore engine for MySQL, PostgreSQL,
//! and file-tree targets.
//!
//! ## Features
//!
//! - **Scheduled Full Backups**: cron-driven, with bounded retry and a
//!   best-effort aggregation policy across multiple databases per instance
//! - **Point-in-Time Restore of a Named Artifact**: download, decompress,
//!   and hand off to the owning database adapter
//! - **Encrypted Credential Vault**: two-layer, host-bound authenticated
//!   encryption over database and SMTP credentials
//! - **Retention Sweeps**: age-based or bucketed (hourly/daily/weekly/
//!   monthly) artifact expiry
//! - **Storage Backends**: local filesystem and S3-compatible object
//!   storage behind one capability set
//! - **Metrics & Alerting**: in-memory Prometheus-format metrics plus
//!   threshold-based alert rules with per-rule cooldowns
//! - **Notifications**: email, webhook, and chat fan-out, where one
//!   channel's failure never blocks the others
//!
//! ## Architecture
//!
//! - `config`: the structured shape an external loader is expected to
//!   produce (`EngineConfig`) — TOML/YAML/env parsing is out of scope
//! - `crypto`: host-bound Fernet-style authenticated encryption
//! - `vault`: the encrypted credential store built on `crypto`
//! - `context`: mutable per-invocation state for backups and restores
//! - `adapters`: per-database-kind capability set (MySQL, PostgreSQL, files)
//! - `compression`: gzip/bzip2/zip and tar.gz archival
//! - `storage`: uniform local/S3 artifact storage
//! - `backup`: the full-backup strategy and its retry/lifecycle executor
//! - `restore`: the restore strategy and its retry/lifecycle executor
//! - `retention`: artifact expiry sweeps
//! - `scheduler`: cron-validated, file-persisted schedules and their
//!   sequential job executor
//! - `metrics`: accumulation and Prometheus text-exposition rendering
//! - `alerts`: threshold rule evaluation over accumulated metrics
//! - `notifications`: email/webhook/chat fan-out
//! - `error`: the engine's layered error taxonomy
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use backup_engine::backup::{scheduled_backup_config, BackupExecutor, FullBackupStrategy};
//! use backup_engine::context::{BackupContext, CancelToken};
//! use backup_engine::metrics::MetricsCollector;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     mut ctx: BackupContext,
//! #     env: &dyn backup_engine::backup::BackupEnvironment,
//! # ) -> backup_engine::error::Result<()> {
//! let metrics = Arc::new(MetricsCollector::new());
//! let executor = BackupExecutor::new(
//!     scheduled_backup_config(),
//!     Arc::new(FullBackupStrategy),
//!     metrics.clone(),
//! );
//! let cancel = CancelToken::new();
//! executor.execute(&mut ctx, env, &cancel, None).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod adapters;
pub mod alerts;
pub mod backup;
pub mod compression;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod notifications;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod storage;
pub mod vault;

// Re-export main types for convenience
pub use adapters::DatabaseAdapter;
pub use alerts::{AlertManager, AlertRule, AlertTrigger, Condition, Operator};
pub use backup::{
    AggregationPolicy, BackupConfig, BackupEnvironment, BackupExecutor, BackupStrategy,
    FullBackupStrategy,
};
pub use compression::CompressionMethod;
pub use config::{DatabaseInstance, DatabaseKind, EngineConfig, StorageTarget};
pub use context::{BackupContext, CancelToken, RestoreContext, Status};
pub use crypto::HostCipher;
pub use error::{BackupError, Result};
pub use metrics::{MetricRecord, MetricsCollector};
pub use notifications::{Channel, NotificationEvent, NotificationManager, Severity};
pub use restore::{RestoreEnvironment, RestoreExecutor, RestoreStrategy};
pub use retention::{RetentionEngine, RetentionFilter, RetentionStats};
pub use scheduler::{JobExecutor, Schedule, ScheduleManager};
pub use storage::StorageBackend;
pub use vault::{Credential, CredentialVault};

/// Version information for the backup engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::backup::{BackupConfig, BackupExecutor, FullBackupStrategy};
    pub use crate::context::{BackupContext, CancelToken, RestoreContext};
    pub use crate::error::{BackupError, Result};
    pub use crate::restore::{FullRestoreStrategy, RestoreExecutor};
    pub use crate::scheduler::{JobExecutor, Schedule, ScheduleManager};
    pub use crate::storage::StorageBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
