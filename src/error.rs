//! Error types for the backup engine.
//!
//! Errors are layered the way the engine's subsystems are layered: each
//! component (storage, encryption, adapters, ...) owns a narrow error enum,
//! and [`BackupError`] wraps them into the six-kind taxonomy the engine
//! reports to callers (config, credential, connectivity, operation,
//! invariant violation, cancelled).

use thiserror::Error;

/// Top-level error type for backup and restore operations.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid cron, missing required field, unknown database kind,
    /// negative retention. Fatal to the caller; never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Vault decrypt failure, missing credential id. Fatal to the
    /// affected operation.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// DB connect, SMTP send, object-store network. Retryable at the
    /// executor level (bounded); surfaced on exhaustion.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Non-zero exit from a dump/restore, compression failure, checksum
    /// mismatch. Retryable when transient, fatal otherwise.
    #[error("operation error during {step}: {message}")]
    Operation {
        /// Name of the step that failed (e.g. "download", "decompress", "restore").
        step: String,
        /// Human-readable detail.
        message: String,
    },

    /// Filename that doesn't parse, vault file missing required
    /// top-level keys. Logged and skipped, or reset to empty.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Cooperative cancellation observed at a suspension point. Never
    /// retried.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encryption/decryption error.
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    /// Database adapter error.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// True if a retry at the executor level may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackupError::Connectivity(_) | BackupError::Storage(_) | BackupError::Adapter(_)
        )
    }
}

/// Storage backend specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential vault specific errors.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("vault file not found")]
    VaultNotFound,

    #[error("vault decrypt failure: {0}")]
    DecryptFailed(String),

    #[error("vault document missing required key: {0}")]
    MalformedDocument(String),
}

/// Encryption/decryption specific errors.
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    Expired,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("authentication tag mismatch")]
    AuthenticationFailed,
}

/// Database adapter specific errors.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("dump command failed: {0}")]
    DumpFailed(String),

    #[error("restore command failed: {0}")]
    RestoreFailed(String),

    #[error("database enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("unsupported adapter operation: {0}")]
    Unsupported(String),
}

/// Result type alias for backup/restore operations.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for credential/vault operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Result type alias for encryption operations.
pub type EncryptionResult<T> = std::result::Result<T, EncryptionError>;

/// Result type alias for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
