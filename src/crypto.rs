//! Encryption at rest of the secrets of the store (API keys, passwords, webhook URLs...)
//!
//! Values are sealed with XChaCha20-Poly1305. The key is kept next to the data, in a file only the owner can read.

use std::io::Write;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::error::SyncError;

/// Marks values that have been encrypted by this module
const PREFIX: &str = "enc:v1:";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Settings keys whose values are encrypted
pub const SENSITIVE_SETTINGS: &[&str] = &["grocy_api_key", "caldav_password"];

/// Channel configuration keys whose values are encrypted
pub const SENSITIVE_CHANNEL_KEYS: &[&str] = &["password", "api_token", "user_key", "bot_token", "webhook_url", "app_token"];


pub struct SecretBox {
    cipher: XChaCha20Poly1305,
}

impl SecretBox {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self { cipher: XChaCha20Poly1305::new(Key::from_slice(key)) }
    }

    /// Load the key stored at `path`, or generate (and store) a new one if there is none yet
    pub fn load_or_create(path: &Path) -> Result<Self, SyncError> {
        if path.exists() {
            let encoded = std::fs::read_to_string(path)?;
            let raw = BASE64_STANDARD.decode(encoded.trim())
                .map_err(|err| SyncError::storage(format!("Invalid encryption key in {:?}: {}", path, err)))?;
            if raw.len() != KEY_LEN {
                return Err(SyncError::storage(format!("Invalid encryption key in {:?}: wrong length", path)));
            }
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&raw);
            return Ok(Self::new(&key));
        }

        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        write_private_file(path, BASE64_STANDARD.encode(key).as_bytes())?;
        log::info!("Generated a new encryption key in {:?}", path);
        Ok(Self::new(&key))
    }

    /// Whether this value looks like something [`SecretBox::encrypt`] produced
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(PREFIX)
    }

    /// Empty values are left as-is
    pub fn encrypt(&self, plaintext: &str) -> Result<String, SyncError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self.cipher.encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SyncError::storage("Unable to encrypt a value"))?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&sealed);
        Ok(format!("{}{}", PREFIX, BASE64_STANDARD.encode(blob)))
    }

    /// Returns `None` if this value cannot be decrypted with this key.
    /// Values that have never been encrypted are returned unchanged.
    pub fn try_decrypt(&self, value: &str) -> Option<String> {
        let encoded = match value.strip_prefix(PREFIX) {
            None => return Some(value.to_string()),
            Some(encoded) => encoded,
        };
        let blob = BASE64_STANDARD.decode(encoded).ok()?;
        if blob.len() < NONCE_LEN {
            return None;
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let plain = self.cipher.decrypt(XNonce::from_slice(nonce), sealed).ok()?;
        String::from_utf8(plain).ok()
    }

    /// Decrypt a value.
    ///
    /// When this fails (typically because the key file has been regenerated), the stored value is returned unchanged.
    /// It will be useless as a credential, and the connection using it will fail, but nothing crashes.
    pub fn decrypt(&self, value: &str) -> String {
        match self.try_decrypt(value) {
            Some(plain) => plain,
            None => {
                log::warn!("Decryption failed: the encryption key does not match the stored value. \
                            The key file may have been regenerated; the affected settings must be entered again.");
                value.to_string()
            }
        }
    }
}

#[cfg(unix)]
fn write_private_file(path: &Path, content: &[u8]) -> Result<(), SyncError> {
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, content: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(content)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt() {
        let sbox = SecretBox::new(&[7u8; KEY_LEN]);
        let sealed = sbox.encrypt("s3cr3t").unwrap();
        assert!(SecretBox::is_encrypted(&sealed));
        assert!(sealed.contains("s3cr3t") == false);
        assert_eq!(sbox.decrypt(&sealed), "s3cr3t");

        assert_eq!(sbox.encrypt("").unwrap(), "");
        assert_eq!(sbox.decrypt("plain value"), "plain value");
    }

    #[test]
    fn wrong_key_keeps_the_stored_value() {
        let sealed = SecretBox::new(&[1u8; KEY_LEN]).encrypt("s3cr3t").unwrap();
        let other = SecretBox::new(&[2u8; KEY_LEN]);
        assert!(other.try_decrypt(&sealed).is_none());
        assert_eq!(other.decrypt(&sealed), sealed);
    }

    #[test]
    fn key_file_is_reused() {
        let path = std::env::temp_dir().join(format!("grocylink-key-{}", uuid::Uuid::new_v4()));
        let first = SecretBox::load_or_create(&path).unwrap();
        let sealed = first.encrypt("api-key").unwrap();

        let second = SecretBox::load_or_create(&path).unwrap();
        assert_eq!(second.decrypt(&sealed), "api-key");
        let _ = std::fs::remove_file(&path);
    }
}
