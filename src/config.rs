//! Configuration shapes consumed by the engine.
//!
//! Loading these from TOML/YAML/env is an external collaborator's job
//! (out of scope for this crate); the crate only defines — and consumes —
//! the structured shape the loader is expected to produce, plus the
//! vault-before-config credential resolution order described below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a configured database instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Mysql,
    Postgresql,
    Files,
}

/// TLS settings for a database connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    pub enabled: bool,
    pub ca_cert: Option<PathBuf>,
    pub verify: bool,
}

/// A configured database (or file-tree) backup target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInstance {
    pub id: String,
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Indirection into the vault: `db_<id>` by convention.
    pub credential_id: String,
    /// Empty ⇒ all user databases (or, for `Files`, nothing to do).
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub enabled: bool,
    pub tls: TlsSettings,
}

impl DatabaseInstance {
    /// `kind=files` ignores port/credentials and interprets `include` as
    /// glob patterns over the filesystem, per the data-model invariant.
    pub fn is_files(&self) -> bool {
        matches!(self.kind, DatabaseKind::Files)
    }
}

/// Where a backup artifact is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageTarget {
    Local { path: PathBuf },
    S3 {
        bucket: String,
        region: String,
        prefix: Option<String>,
        endpoint: Option<String>,
    },
}

/// The `bkp_system` block: default local artifact paths and file
/// retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSystemPaths {
    pub path_sql: PathBuf,
    pub path_zip: PathBuf,
    pub path_files: PathBuf,
    pub retention_days: u32,
}

impl Default for BackupSystemPaths {
    fn default() -> Self {
        Self {
            path_sql: PathBuf::from("/var/backups/sql"),
            path_zip: PathBuf::from("/var/backups/zip"),
            path_files: PathBuf::from("/var/backups/files"),
            retention_days: 30,
        }
    }
}

/// SMTP email settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub starttls: bool,
    pub from_address: String,
    pub credential_id: String,
}

/// Scheduler settings: the config directory under which one JSON file
/// per schedule is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub config_dir: PathBuf,
    pub enabled: bool,
}

/// Log settings passthrough placeholder — log formatting/rotation is an
/// external collaborator's job; the engine only needs to know where logs
/// live so it can attach them to failure notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    pub directory: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
        }
    }
}

fn default_log_directory() -> PathBuf {
    let primary = PathBuf::from("/var/log/enterprise");
    if std::fs::metadata(&primary)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
    {
        return primary;
    }
    dirs_home().join(".local").join("log").join("enterprise")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Aggregate engine configuration: the shape consumed from the loader
/// collaborator named in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub log: LogSettings,
    pub email: EmailSettings,
    pub scheduler: SchedulerSettings,
    pub metrics_endpoint_enabled: bool,
    pub databases: Vec<DatabaseInstance>,
    pub backup_system: BackupSystemPaths,
    /// Overrides the credential source; when present, the loader must
    /// consult the vault before the config file for `(username,
    /// password)` pairs, falling back to config only when the vault
    /// lacks an entry.
    pub vault_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Parse an `EngineConfig` from an already-loaded JSON string. TOML/
    /// YAML/env loading is explicitly out of scope; this exists so an
    /// embedder's loader has a trivial target shape to deserialize into.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Credential id convention for a database instance: `db_<id>`.
    pub fn db_credential_id(instance_id: &str) -> String {
        format!("db_{instance_id}")
    }

    /// Credential id convention for SMTP: always `smtp`.
    pub fn smtp_credential_id() -> &'static str {
        "smtp"
    }
}
