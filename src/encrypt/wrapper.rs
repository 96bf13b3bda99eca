//! Encryption wrapper capability
//!
//! The encrypt filter never touches key material directly. It goes through
//! a `Wrapper`, which a KMS client or the bundled [`AeadWrapper`] provides.

use crate::context::Context;
use crate::error::{EventError, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, AeadCore, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;

/// Ciphertext plus what is needed to decrypt it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    /// Identifies which key was used for encryption
    pub key_id: String,

    /// Base64-encoded nonce
    pub nonce: String,

    /// Base64-encoded ciphertext
    pub ciphertext: String,
}

/// Authenticated encryption and key derivation
///
/// Implementations must be safe for concurrent use; one wrapper is
/// typically shared by every encrypt filter in the process. Remote
/// implementations should race their calls against [`Context::done`].
#[async_trait]
pub trait Wrapper: Send + Sync {
    /// Encrypt `plaintext`, binding optional associated data
    async fn encrypt(
        &self,
        ctx: &Context,
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<EncryptedBlob>;

    /// Decrypt a blob produced by `encrypt`
    async fn decrypt(
        &self,
        ctx: &Context,
        blob: &EncryptedBlob,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>>;

    /// Deterministically derive `len` bytes of key material from the root key
    async fn derive_key(
        &self,
        ctx: &Context,
        salt: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Vec<u8>>;

    /// The key currently used for encryption
    fn key_id(&self) -> &str;
}

struct KeyEntry {
    cipher: Aes256Gcm,
    root: [u8; 32],
}

impl KeyEntry {
    fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            root: *key,
        }
    }
}

/// AES-256-GCM wrapper with HKDF-SHA256 derivation and key rotation
///
/// Encrypts and derives with the active key, decrypts with any
/// registered key.
pub struct AeadWrapper {
    /// Active key ID for encryption and derivation
    active_key_id: String,

    /// All registered keys (key_id → key)
    keys: RwLock<HashMap<String, KeyEntry>>,
}

impl AeadWrapper {
    /// Create a wrapper with a single 256-bit key
    pub fn new(key_id: impl Into<String>, key: &[u8; 32]) -> Self {
        let key_id = key_id.into();
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), KeyEntry::new(key));

        Self {
            active_key_id: key_id,
            keys: RwLock::new(keys),
        }
    }

    /// Add a key for decryption
    ///
    /// Old keys remain available for decrypting fields written before rotation.
    pub fn add_key(&self, key_id: impl Into<String>, key: &[u8; 32]) -> Result<()> {
        let mut keys = self
            .keys
            .write()
            .map_err(|e| EventError::Wrapper(format!("Failed to acquire key lock: {}", e)))?;
        keys.insert(key_id.into(), KeyEntry::new(key));
        Ok(())
    }

    /// Rotate to a new active key
    ///
    /// The new key must already be registered via `add_key()`. HMAC keys
    /// derived after rotation differ from the ones derived before it.
    pub fn rotate_to(&mut self, key_id: &str) -> Result<()> {
        let keys = self
            .keys
            .read()
            .map_err(|e| EventError::Wrapper(format!("Failed to acquire key lock: {}", e)))?;
        if !keys.contains_key(key_id) {
            return Err(EventError::Wrapper(format!(
                "Key '{}' not registered, add it first",
                key_id
            )));
        }
        drop(keys);
        self.active_key_id = key_id.to_string();
        Ok(())
    }

    /// List all registered key IDs
    pub fn key_ids(&self) -> Vec<String> {
        self.keys
            .read()
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Wrapper for AeadWrapper {
    async fn encrypt(
        &self,
        ctx: &Context,
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<EncryptedBlob> {
        ctx.check()?;
        let keys = self
            .keys
            .read()
            .map_err(|e| EventError::Wrapper(format!("Failed to acquire key lock: {}", e)))?;
        let entry = keys.get(&self.active_key_id).ok_or_else(|| {
            EventError::Wrapper(format!("Active key '{}' not found", self.active_key_id))
        })?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = entry
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: aad.unwrap_or_default(),
                },
            )
            .map_err(|e| EventError::Wrapper(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedBlob {
            key_id: self.active_key_id.clone(),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    async fn decrypt(
        &self,
        ctx: &Context,
        blob: &EncryptedBlob,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        ctx.check()?;
        let keys = self
            .keys
            .read()
            .map_err(|e| EventError::Wrapper(format!("Failed to acquire key lock: {}", e)))?;
        let entry = keys.get(&blob.key_id).ok_or_else(|| {
            EventError::Wrapper(format!("Decryption key '{}' not registered", blob.key_id))
        })?;

        let nonce_bytes = BASE64
            .decode(&blob.nonce)
            .map_err(|e| EventError::Wrapper(format!("Invalid nonce encoding: {}", e)))?;
        if nonce_bytes.len() != 12 {
            return Err(EventError::Wrapper(format!(
                "Invalid nonce length: {}",
                nonce_bytes.len()
            )));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|e| EventError::Wrapper(format!("Invalid ciphertext encoding: {}", e)))?;

        entry
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ciphertext,
                    aad: aad.unwrap_or_default(),
                },
            )
            .map_err(|e| EventError::Wrapper(format!("Decryption failed: {}", e)))
    }

    async fn derive_key(
        &self,
        ctx: &Context,
        salt: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Vec<u8>> {
        ctx.check()?;
        let keys = self
            .keys
            .read()
            .map_err(|e| EventError::Wrapper(format!("Failed to acquire key lock: {}", e)))?;
        let entry = keys.get(&self.active_key_id).ok_or_else(|| {
            EventError::Wrapper(format!("Active key '{}' not found", self.active_key_id))
        })?;

        let hk = Hkdf::<Sha256>::new(Some(salt), &entry.root);
        let mut okm = vec![0u8; len];
        hk.expand(info, &mut okm)
            .map_err(|e| EventError::Wrapper(format!("HKDF expand failed: {}", e)))?;
        Ok(okm)
    }

    fn key_id(&self) -> &str {
        &self.active_key_id
    }
}
