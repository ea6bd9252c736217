//! Credential encryption
//!
//! AES-256-GCM encryption for stored mailbox passwords, with file-based
//! keys that rotate on a fixed schedule. The current key lives in
//! `current_key.json` under the configured directory; rotated keys move
//! into an `archive/` subdirectory so old ciphertexts stay decryptable.
//! Every ciphertext is stored next to the id of the key that produced
//! it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use postwatch_common::config::KeyStoreConfig;
use postwatch_common::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const CURRENT_KEY_FILE: &str = "current_key.json";
const ARCHIVE_DIR: &str = "archive";
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    key_id: String,
    /// Base64-encoded 256-bit key
    key: String,
    created_at: DateTime<Utc>,
    rotated_from: Option<String>,
}

/// Encrypts and decrypts mailbox credentials
pub struct CredentialGuard {
    path: PathBuf,
    rotation: Duration,
}

impl CredentialGuard {
    pub fn new(config: &KeyStoreConfig) -> Result<Self> {
        let guard = Self {
            path: config.path.clone(),
            rotation: Duration::days(config.rotation_days),
        };
        fs::create_dir_all(&guard.path)
            .map_err(|e| Error::Crypto(format!("cannot create key directory: {}", e)))?;
        fs::create_dir_all(guard.path.join(ARCHIVE_DIR))
            .map_err(|e| Error::Crypto(format!("cannot create key archive: {}", e)))?;
        restrict_permissions(&guard.path, 0o700);
        restrict_permissions(&guard.path.join(ARCHIVE_DIR), 0o700);
        Ok(guard)
    }

    /// Encrypt a credential under the current key. Returns the base64
    /// ciphertext (nonce-prefixed) and the id of the key used.
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        let record = self.current_key()?;
        let cipher = cipher_for(&record)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| Error::Crypto("encryption failed".into()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok((BASE64.encode(payload), record.key_id))
    }

    /// Decrypt a credential that was encrypted under `key_id`
    pub fn decrypt(&self, ciphertext_b64: &str, key_id: &str) -> Result<String> {
        let record = self
            .key_by_id(key_id)?
            .ok_or_else(|| Error::Crypto(format!("no key with id {}", key_id)))?;
        let cipher = cipher_for(&record)?;

        let payload = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| Error::Crypto(format!("invalid ciphertext encoding: {}", e)))?;
        if payload.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("decryption failed, wrong key or tampered data".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("decrypted credential is not valid UTF-8".into()))
    }

    /// The current key, created on first use and rotated once it is
    /// older than the rotation window
    fn current_key(&self) -> Result<KeyRecord> {
        let current_file = self.path.join(CURRENT_KEY_FILE);
        if !current_file.exists() {
            return self.create_key(None);
        }

        let record = read_key_file(&current_file)?;
        if Utc::now() - record.created_at > self.rotation {
            info!(key_id = %record.key_id, "encryption key is due for rotation");
            return self.rotate(record);
        }
        Ok(record)
    }

    fn create_key(&self, rotated_from: Option<String>) -> Result<KeyRecord> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let mut id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);

        let record = KeyRecord {
            key_id: hex::encode(id),
            key: BASE64.encode(key),
            created_at: Utc::now(),
            rotated_from,
        };

        self.write_current(&record)?;
        info!(key_id = %record.key_id, "created new encryption key");
        Ok(record)
    }

    /// Archive the old key first, so a crash between the two writes
    /// cannot orphan existing ciphertexts
    fn rotate(&self, old: KeyRecord) -> Result<KeyRecord> {
        let archive_name = format!(
            "key_{}_{}.json",
            old.key_id,
            old.created_at.format("%Y-%m-%d")
        );
        let archive_path = self.path.join(ARCHIVE_DIR).join(archive_name);
        match write_key_file(&archive_path, &old) {
            Ok(()) => {}
            Err(e) => {
                // keep using the old key rather than risk losing it
                warn!(error = %e, "key rotation failed, keeping current key");
                return Ok(old);
            }
        }

        let new = self.create_key(Some(old.key_id.clone()))?;
        info!(from = %old.key_id, to = %new.key_id, "rotated encryption key");
        Ok(new)
    }

    /// Replace the current key file atomically
    fn write_current(&self, record: &KeyRecord) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.path)
            .map_err(|e| Error::Crypto(format!("cannot stage key file: {}", e)))?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Error::Crypto(format!("cannot serialize key: {}", e)))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| Error::Crypto(format!("cannot write key file: {}", e)))?;
        tmp.persist(self.path.join(CURRENT_KEY_FILE))
            .map_err(|e| Error::Crypto(format!("cannot install key file: {}", e)))?;
        restrict_permissions(&self.path.join(CURRENT_KEY_FILE), 0o600);
        Ok(())
    }

    fn key_by_id(&self, key_id: &str) -> Result<Option<KeyRecord>> {
        let current_file = self.path.join(CURRENT_KEY_FILE);
        if current_file.exists() {
            let record = read_key_file(&current_file)?;
            if record.key_id == key_id {
                return Ok(Some(record));
            }
        }

        let prefix = format!("key_{}", key_id);
        let archive = self.path.join(ARCHIVE_DIR);
        let entries = fs::read_dir(&archive)
            .map_err(|e| Error::Crypto(format!("cannot read key archive: {}", e)))?;
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(Some(read_key_file(&entry.path())?));
            }
        }
        Ok(None)
    }
}

fn cipher_for(record: &KeyRecord) -> Result<Aes256Gcm> {
    let key = BASE64
        .decode(&record.key)
        .map_err(|e| Error::Crypto(format!("stored key is not valid base64: {}", e)))?;
    Aes256Gcm::new_from_slice(&key)
        .map_err(|_| Error::Crypto("stored key has the wrong length".into()))
}

fn read_key_file(path: &Path) -> Result<KeyRecord> {
    let data = fs::read_to_string(path)
        .map_err(|e| Error::Crypto(format!("cannot read key file: {}", e)))?;
    serde_json::from_str(&data).map_err(|e| Error::Crypto(format!("key file is corrupt: {}", e)))
}

fn write_key_file(path: &Path, record: &KeyRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::Crypto(format!("cannot serialize key: {}", e)))?;
    fs::write(path, json).map_err(|e| Error::Crypto(format!("cannot write key file: {}", e)))?;
    restrict_permissions(path, 0o600);
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), error = %e, "cannot restrict key permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) {}
