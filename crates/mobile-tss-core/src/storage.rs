//! Local state storage
//!
//! The host persists each party's [`crate::types::LocalState`] through a
//! [`LocalStateAccessor`], keyed by the hex public key. The service only
//! reads state at keysign/reshare start and only writes it when a keygen or
//! reshare completes.
//!
//! Backends shipped here:
//!
//! - **MemoryStateStore**: process-local map (tests, simulation)
//! - **FileStateStore**: one `0600` file per key under a directory
//! - **EncryptedStateStore**: ChaCha20-Poly1305 wrapper around any backend
//!
//! ## Example
//!
//! ```rust,ignore
//! use mobile_tss_core::storage::{EncryptedStateStore, FileStateStore, generate_encryption_key};
//!
//! let store = EncryptedStateStore::new(FileStateStore::new("/data/vaults")?, generate_encryption_key());
//! let service = TssService::new(messenger, Arc::new(store), false)?;
//! ```

use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Durable store for serialized local state
#[async_trait]
pub trait LocalStateAccessor: Send + Sync {
    /// Load the state stored for `pub_key`, or [`Error::StateNotFound`]
    async fn get_local_state(&self, pub_key: &str) -> Result<String>;

    /// Persist `state` for `pub_key`, replacing any previous value
    async fn save_local_state(&self, pub_key: &str, state: &str) -> Result<()>;
}

#[async_trait]
impl<T: LocalStateAccessor + ?Sized> LocalStateAccessor for Arc<T> {
    async fn get_local_state(&self, pub_key: &str) -> Result<String> {
        (**self).get_local_state(pub_key).await
    }

    async fn save_local_state(&self, pub_key: &str, state: &str) -> Result<()> {
        (**self).save_local_state(pub_key, state).await
    }
}

// ============ Memory ============

/// In-memory store for tests and simulation
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with stored state
    pub async fn keys(&self) -> Vec<String> {
        self.states.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl LocalStateAccessor for MemoryStateStore {
    async fn get_local_state(&self, pub_key: &str) -> Result<String> {
        self.states
            .read()
            .await
            .get(pub_key)
            .cloned()
            .ok_or_else(|| Error::StateNotFound(pub_key.to_string()))
    }

    async fn save_local_state(&self, pub_key: &str, state: &str) -> Result<()> {
        self.states
            .write()
            .await
            .insert(pub_key.to_string(), state.to_string());
        Ok(())
    }
}

// ============ File System ============

/// One file per public key under a base directory
#[derive(Debug)]
pub struct FileStateStore {
    base_path: PathBuf,
}

impl FileStateStore {
    /// Create the store, creating the directory if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        Ok(Self { base_path })
    }

    fn state_path(&self, pub_key: &str) -> PathBuf {
        // Keys are hex, but never let one escape the directory
        let safe_key = pub_key.replace(['/', '\\', '.', '~'], "_");
        self.base_path.join(format!("{}.json", safe_key))
    }
}

#[async_trait]
impl LocalStateAccessor for FileStateStore {
    async fn get_local_state(&self, pub_key: &str) -> Result<String> {
        let path = self.state_path(pub_key);
        match tokio::fs::read_to_string(&path).await {
            Ok(state) => Ok(state),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::StateNotFound(pub_key.to_string()))
            }
            Err(e) => Err(Error::Storage(format!("{}: {}", path.display(), e))),
        }
    }

    async fn save_local_state(&self, pub_key: &str, state: &str) -> Result<()> {
        let path = self.state_path(pub_key);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, state.as_bytes()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms).await?;
        }

        // Rename so a crash never leaves a half-written state file
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Saved local state");
        Ok(())
    }
}

// ============ Encryption ============

/// Encrypted envelope written to the inner store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedState {
    /// Base64 ciphertext of the state JSON
    pub ciphertext: String,
    /// Hex nonce (12 bytes)
    pub nonce: String,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
    /// Envelope format version
    pub version: u32,
}

impl EncryptedState {
    pub const CURRENT_VERSION: u32 = 1;

    /// Encrypt `state`, binding it to `pub_key` as associated data
    pub fn seal(state: &str, pub_key: &str, key: &[u8; 32]) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new(key.into());
        let nonce_bytes: [u8; 12] = rand::random();

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: state.as_bytes(),
                    aad: pub_key.as_bytes(),
                },
            )
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(Self {
            ciphertext: STANDARD.encode(ciphertext),
            nonce: hex::encode(nonce_bytes),
            created_at: chrono::Utc::now().timestamp(),
            version: Self::CURRENT_VERSION,
        })
    }

    /// Decrypt, failing as corrupt state on a wrong key or tampered data
    pub fn open(&self, pub_key: &str, key: &[u8; 32]) -> Result<String> {
        if self.version != Self::CURRENT_VERSION {
            return Err(Error::StateCorrupt(format!(
                "unsupported envelope version {}",
                self.version
            )));
        }
        let nonce_bytes = hex::decode(&self.nonce)
            .map_err(|e| Error::StateCorrupt(format!("invalid nonce: {}", e)))?;
        if nonce_bytes.len() != 12 {
            return Err(Error::StateCorrupt("invalid nonce length".into()));
        }
        let ciphertext = STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| Error::StateCorrupt(format!("invalid ciphertext: {}", e)))?;

        let cipher = ChaCha20Poly1305::new(key.into());
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: pub_key.as_bytes(),
                },
            )
            .map_err(|_| {
                Error::Encryption("Decryption failed - invalid key or corrupted data".into())
            })?;

        String::from_utf8(plaintext).map_err(|e| Error::StateCorrupt(e.to_string()))
    }
}

/// Encrypts state before handing it to the inner store
pub struct EncryptedStateStore<S> {
    inner: S,
    key: [u8; 32],
}

impl<S: LocalStateAccessor> EncryptedStateStore<S> {
    pub fn new(inner: S, key: [u8; 32]) -> Self {
        Self { inner, key }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> Drop for EncryptedStateStore<S> {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.key.zeroize();
    }
}

#[async_trait]
impl<S: LocalStateAccessor> LocalStateAccessor for EncryptedStateStore<S> {
    async fn get_local_state(&self, pub_key: &str) -> Result<String> {
        let envelope = self.inner.get_local_state(pub_key).await?;
        let envelope: EncryptedState = serde_json::from_str(&envelope)
            .map_err(|e| Error::StateCorrupt(format!("invalid envelope: {}", e)))?;
        envelope.open(pub_key, &self.key)
    }

    async fn save_local_state(&self, pub_key: &str, state: &str) -> Result<()> {
        let envelope = EncryptedState::seal(state, pub_key, &self.key)?;
        self.inner
            .save_local_state(pub_key, &serde_json::to_string(&envelope)?)
            .await
    }
}

/// Generate a random state encryption key
pub fn generate_encryption_key() -> [u8; 32] {
    rand::random()
}
