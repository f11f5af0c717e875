//! Encrypted credential vault.
//!
//! The vault is a single on-disk file: an authenticated-encryption
//! envelope (see [`crate::crypto`]) over a serialized [`VaultDocument`].
//! Username and password are additionally encrypted *per field* before
//! the document is serialized, so a leak of the serialized JSON (before
//! the outer envelope is applied, or of an old unencrypted copy) still
//! leaves the sensitive fields opaque. Writers are serialized by an
//! in-process [`tokio::sync::Mutex`] plus a 0600 file mode; the vault does
//! not support concurrent writers across processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::crypto::HostCipher;
use crate::error::{CredentialError, CredentialResult};

/// Metadata recorded alongside a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub description: String,
}

/// A decrypted `(username, password)` pair plus metadata, as returned to
/// callers of [`CredentialVault::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// The on-disk representation of a single vault entry: field-level
/// ciphertexts, not plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    username: String,
    password: String,
    metadata: CredentialMetadata,
}

/// The document serialized (then encrypted as a whole) as the vault
/// payload. Matches the on-disk layout in the external interfaces spec:
/// `{version, credentials{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultDocument {
    version: String,
    credentials: HashMap<String, StoredCredential>,
}

impl Default for VaultDocument {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            credentials: HashMap::new(),
        }
    }
}

/// Summary information about the vault, returned by [`CredentialVault::info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultInfo {
    pub version: String,
    pub path: PathBuf,
    pub count: usize,
    pub bytes: u64,
    pub cache_size: usize,
}

/// Encrypted key/value store of `(username, password)` credentials.
pub struct CredentialVault {
    path: PathBuf,
    document: RwLock<VaultDocument>,
    /// Decrypted entries, populated lazily on `get`/`metadata` and
    /// invalidated on `set`/`remove`/`load`.
    cache: RwLock<HashMap<String, Credential>>,
    /// Serializes writers; file mode 0600 plus this guard is the entire
    /// concurrency story (cross-process concurrency is not supported).
    write_guard: Arc<Mutex<()>>,
}

impl CredentialVault {
    /// Default vault path, `.secrets/vault.json.enc`, relative to the
    /// given base directory.
    pub fn default_path(base_dir: impl AsRef<Path>) -> PathBuf {
        base_dir.as_ref().join(".secrets").join("vault.json.enc")
    }

    /// Open a vault at `path` without touching disk. Call [`load`](Self::load)
    /// to populate it from an existing file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: RwLock::new(VaultDocument::default()),
            cache: RwLock::new(HashMap::new()),
            write_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Load the vault file from disk, decrypting the outer envelope and
    /// replacing the in-memory document. A missing file is not an error:
    /// the vault is reset to empty and `Ok(false)` is returned. Any other
    /// failure (malformed envelope, missing top-level keys) also falls
    /// back to an empty vault rather than leaving partial state, per the
    /// invariant-violation recovery policy.
    pub async fn load(&self) -> CredentialResult<bool> {
        let _write = self.write_guard.lock().await;

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.document.write().await = VaultDocument::default();
                self.cache.write().await.clear();
                return Ok(false);
            }
            Err(e) => return Err(CredentialError::DecryptFailed(e.to_string())),
        };

        let token = String::from_utf8(bytes)
            .map_err(|e| CredentialError::DecryptFailed(e.to_string()))?;

        let doc = match HostCipher::from_host().decrypt(&token) {
            Ok(plaintext) => match serde_json::from_slice::<VaultDocument>(&plaintext) {
                Ok(doc) if !doc.version.is_empty() => doc,
                _ => {
                    tracing::warn!("vault document malformed, resetting to empty");
                    VaultDocument::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "vault decrypt failed, resetting to empty");
                VaultDocument::default()
            }
        };

        *self.document.write().await = doc;
        self.cache.write().await.clear();
        Ok(true)
    }

    /// Serialize the document, encrypt it as the outer envelope, and
    /// write it to disk with mode 0600, creating parent directories as
    /// needed. The only writer path; concurrent callers are serialized
    /// by `write_guard`.
    pub async fn save(&self) -> CredentialResult<()> {
        let _write = self.write_guard.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CredentialError::DecryptFailed(e.to_string()))?;
        }

        let doc = self.document.read().await;
        let plaintext = serde_json::to_vec(&*doc)
            .map_err(|e| CredentialError::MalformedDocument(e.to_string()))?;
        drop(doc);

        let token = HostCipher::from_host().encrypt(&plaintext);

        tokio::fs::write(&self.path, token.as_bytes())
            .await
            .map_err(|e| CredentialError::DecryptFailed(e.to_string()))?;

        set_owner_only_permissions(&self.path)
            .await
            .map_err(|e| CredentialError::DecryptFailed(e.to_string()))?;

        Ok(())
    }

    /// Insert or update a credential. Preserves `created_at` on update;
    /// always refreshes `updated_at`. Invalidates the cached decrypted
    /// entry for `id`.
    pub async fn set(&self, id: &str, username: &str, password: &str, description: &str) {
        let now = Utc::now();
        let mut doc = self.document.write().await;

        let created_at = doc
            .credentials
            .get(id)
            .map(|existing| existing.metadata.created_at)
            .unwrap_or(now);

        doc.credentials.insert(
            id.to_string(),
            StoredCredential {
                username: crate::crypto::encrypt_str(username),
                password: crate::crypto::encrypt_str(password),
                metadata: CredentialMetadata {
                    created_at,
                    updated_at: now,
                    description: description.to_string(),
                },
            },
        );
        drop(doc);

        self.cache.write().await.remove(id);
    }

    /// Fetch and decrypt a credential by id, populating the cache.
    pub async fn get(&self, id: &str) -> Option<Credential> {
        if let Some(cached) = self.cache.read().await.get(id) {
            return Some(cached.clone());
        }

        let doc = self.document.read().await;
        let stored = doc.credentials.get(id)?;

        let username = crate::crypto::decrypt_str(&stored.username).ok()?;
        let password = crate::crypto::decrypt_str(&stored.password).ok()?;
        drop(doc);

        let credential = Credential { username, password };
        self.cache
            .write()
            .await
            .insert(id.to_string(), credential.clone());
        Some(credential)
    }

    /// Remove a credential. Invalidates its cache entry.
    pub async fn remove(&self, id: &str) -> CredentialResult<()> {
        let mut doc = self.document.write().await;
        doc.credentials
            .remove(id)
            .ok_or_else(|| CredentialError::NotFound(id.to_string()))?;
        drop(doc);

        self.cache.write().await.remove(id);
        Ok(())
    }

    /// List all credential ids in lexicographic order.
    pub async fn list(&self) -> Vec<String> {
        let doc = self.document.read().await;
        let mut ids: Vec<String> = doc.credentials.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a credential id exists.
    pub async fn exists(&self, id: &str) -> bool {
        self.document.read().await.credentials.contains_key(id)
    }

    /// Fetch the metadata for a credential without decrypting it.
    pub async fn metadata(&self, id: &str) -> Option<CredentialMetadata> {
        self.document
            .read()
            .await
            .credentials
            .get(id)
            .map(|c| c.metadata.clone())
    }

    /// Summary information about the vault file and in-memory state.
    pub async fn info(&self) -> VaultInfo {
        let doc = self.document.read().await;
        let bytes = tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        VaultInfo {
            version: doc.version.clone(),
            path: self.path.clone(),
            count: doc.credentials.len(),
            bytes,
            cache_size: self.cache.read().await.len(),
        }
    }
}

#[cfg(unix)]
async fn set_owner_only_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = tokio::fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(not(unix))]
async fn set_owner_only_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn vault_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json.enc");

        let vault = CredentialVault::new(&path);
        vault
            .set("mysql-prod", "root", "hunter2", "Prod MySQL")
            .await;
        vault.save().await.unwrap();

        let reopened = CredentialVault::new(&path);
        reopened.load().await.unwrap();

        assert_eq!(reopened.list().await, vec!["mysql-prod".to_string()]);
        let credential = reopened.get("mysql-prod").await.unwrap();
        assert_eq!(credential.username, "root");
        assert_eq!(credential.password, "hunter2");
        assert_eq!(
            reopened.metadata("mysql-prod").await.unwrap().description,
            "Prod MySQL"
        );
    }

    #[tokio::test]
    async fn load_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json.enc");
        let vault = CredentialVault::new(&path);
        let existed = vault.load().await.unwrap();
        assert!(!existed);
        assert!(vault.list().await.is_empty());
    }

    #[tokio::test]
    async fn set_preserves_created_at_on_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json.enc");
        let vault = CredentialVault::new(&path);

        vault.set("id1", "u", "p1", "first").await;
        let first_created = vault.metadata("id1").await.unwrap().created_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        vault.set("id1", "u", "p2", "second").await;
        let second_meta = vault.metadata("id1").await.unwrap();

        assert_eq!(second_meta.created_at, first_created);
        assert!(second_meta.updated_at >= first_created);
        assert_eq!(vault.get("id1").await.unwrap().password, "p2");
    }

    #[tokio::test]
    async fn remove_unknown_id_errors() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::new(dir.path().join("vault.json.enc"));
        assert!(vault.remove("nope").await.is_err());
    }

    #[tokio::test]
    async fn save_creates_parent_dirs_and_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.json.enc");
        let vault = CredentialVault::new(&path);
        vault.set("a", "u", "p", "d").await;
        vault.save().await.unwrap();

        assert!(path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[tokio::test]
    async fn list_is_lexicographically_sorted() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::new(dir.path().join("vault.json.enc"));
        vault.set("zeta", "u", "p", "").await;
        vault.set("alpha", "u", "p", "").await;
        vault.set("mid", "u", "p", "").await;
        assert_eq!(vault.list().await, vec!["alpha", "mid", "zeta"]);
    }
}
