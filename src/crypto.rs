//! Host-bound authenticated encryption primitives.
//!
//! The key is derived once from the machine hostname and never reused
//! across a hostname change: [`host_key`] caches the derived key behind a
//! `OnceLock`, keyed by the hostname it was derived from, so a changed
//! hostname forces a fresh derivation instead of silently reusing a stale
//! key. Tokens follow the well-known Fernet layout (version byte,
//! big-endian millisecond timestamp, random IV, AES-128-CBC ciphertext,
//! HMAC-SHA256 tag over everything before it) so that two encryptions of
//! the same plaintext always differ and a vault file carried off the
//! originating host cannot be decrypted.

use aes::Aes128;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use zeroize::Zeroize;

use crate::error::{EncryptionError, EncryptionResult};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: u8 = 0x80;
const IV_LEN: usize = 16;
const TIMESTAMP_LEN: usize = 8;
const HMAC_LEN: usize = 32;

struct CachedKey {
    hostname: String,
    key: [u8; 32],
}

static HOST_KEY: OnceLock<std::sync::Mutex<Option<CachedKey>>> = OnceLock::new();

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Derive the 32-byte host-bound key: SHA-256 of the hostname.
///
/// Re-derived (never cached across a hostname change) if the hostname
/// observably changes between calls, per the module-level-state design
/// note.
pub fn host_key() -> [u8; 32] {
    let hostname = current_hostname();
    let lock = HOST_KEY.get_or_init(|| std::sync::Mutex::new(None));
    let mut guard = lock.lock().expect("host key mutex poisoned");

    if let Some(cached) = guard.as_ref() {
        if cached.hostname == hostname {
            return cached.key;
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);

    *guard = Some(CachedKey { hostname, key });
    key
}

/// A host-bound authenticated cipher.
///
/// Holds a 32-byte key, split into a 16-byte AES-128-CBC signing key and
/// a 16-byte HMAC-SHA256 key (Fernet's key-splitting convention).
pub struct HostCipher {
    enc_key: [u8; 16],
    sig_key: [u8; 32],
}

impl Drop for HostCipher {
    fn drop(&mut self) {
        self.enc_key.zeroize();
        self.sig_key.zeroize();
    }
}

impl HostCipher {
    /// Build a cipher from the current host key.
    pub fn from_host() -> Self {
        Self::from_key(host_key())
    }

    /// Build a cipher from an explicit 32-byte key (used by tests and by
    /// callers who derive per-field subkeys).
    pub fn from_key(key: [u8; 32]) -> Self {
        let mut enc_key = [0u8; 16];
        enc_key.copy_from_slice(&key[..16]);

        let mut hasher = Sha256::new();
        hasher.update(b"backup-engine/hmac");
        hasher.update(&key);
        let sig_key: [u8; 32] = hasher.finalize().into();

        Self { enc_key, sig_key }
    }

    /// Encrypt `plaintext` into a URL-safe base64 token embedding the
    /// current timestamp. Two calls on the same plaintext always produce
    /// different tokens (random IV, plus a timestamp that advances at
    /// millisecond resolution).
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let timestamp_ms = chrono::Utc::now().timestamp_millis() as u64;

        let ciphertext =
            Aes128CbcEnc::new(&self.enc_key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut payload = Vec::with_capacity(1 + TIMESTAMP_LEN + IV_LEN + ciphertext.len());
        payload.push(TOKEN_VERSION);
        payload.extend_from_slice(&timestamp_ms.to_be_bytes());
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(&ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.sig_key).expect("hmac key length is fixed");
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();
        payload.extend_from_slice(&tag);

        URL_SAFE.encode(payload)
    }

    /// Decrypt a token produced by [`encrypt`](Self::encrypt). Rejects the
    /// token if the HMAC tag does not match or the framing is malformed.
    pub fn decrypt(&self, token: &str) -> EncryptionResult<Vec<u8>> {
        let payload = URL_SAFE
            .decode(token)
            .map_err(|_| EncryptionError::InvalidToken)?;

        let min_len = 1 + TIMESTAMP_LEN + IV_LEN + HMAC_LEN;
        if payload.len() < min_len {
            return Err(EncryptionError::InvalidToken);
        }

        let (body, tag) = payload.split_at(payload.len() - HMAC_LEN);

        let mut mac = HmacSha256::new_from_slice(&self.sig_key).expect("hmac key length is fixed");
        mac.update(body);
        mac.verify_slice(tag)
            .map_err(|_| EncryptionError::AuthenticationFailed)?;

        if body[0] != TOKEN_VERSION {
            return Err(EncryptionError::InvalidToken);
        }

        let iv = &body[1 + TIMESTAMP_LEN..1 + TIMESTAMP_LEN + IV_LEN];
        let ciphertext = &body[1 + TIMESTAMP_LEN + IV_LEN..];

        let mut iv_arr = [0u8; IV_LEN];
        iv_arr.copy_from_slice(iv);

        Aes128CbcDec::new(&self.enc_key.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| EncryptionError::InvalidToken)
    }
}

/// Encrypt a UTF-8 string under the host key. Convenience wrapper used by
/// the vault for field-level encryption.
pub fn encrypt_str(plaintext: &str) -> String {
    HostCipher::from_host().encrypt(plaintext.as_bytes())
}

/// Decrypt a token produced by [`encrypt_str`] back into a UTF-8 string.
pub fn decrypt_str(token: &str) -> EncryptionResult<String> {
    let bytes = HostCipher::from_host().decrypt(token)?;
    String::from_utf8(bytes).map_err(|_| EncryptionError::InvalidToken)
}
