//! Zone-aware encrypting storage.
//!
//! [`ZonedStorage`] sits between the table layer and a raw
//! [`StorageBackend`]. It is also the [`EncryptionProvider`] the
//! [`ZoneManager`](crate::zone::ZoneManager) drives: once a zone is created
//! over a directory, every file written beneath it is encrypted before it
//! reaches the inner backend and decrypted on the way back. Files outside
//! any zone pass through untouched.
//!
//! # Security model
//!
//! - Each file is encrypted under its own key, derived with HKDF-SHA256 from
//!   the zone key and the file path.
//! - AES-128-GCM or AES-256-GCM is used according to the zone key length,
//!   with a fresh nonce per write.
//! - Paths are stored in plaintext so listing works without a separate index.
//! - Key material is fetched from the [`KeyRegistry`] on each access; once a
//!   key is deleted, files in its zones can no longer be read.

use std::collections::BTreeMap;
use std::sync::Arc;

use cryptzone_storage::{StorageBackend, StorageError};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::crypto::{self, EncryptionKey};
use crate::error::ProviderError;
use crate::keys::KeyRegistry;
use crate::zone::{EncryptionProvider, within};

/// HKDF `info` prefix for per-file keys.
const FILE_KEY_CONTEXT: &str = "cryptzone-file-v1:";

/// A storage decorator that encrypts files inside zones.
pub struct ZonedStorage {
    inner: Arc<dyn StorageBackend>,
    keys: Arc<KeyRegistry>,
    /// Zone path (ending in `/`) → key name.
    zones: RwLock<BTreeMap<String, String>>,
}

impl ZonedStorage {
    /// Wrap `inner`, resolving zone keys through `keys`.
    #[must_use]
    pub fn new(inner: Arc<dyn StorageBackend>, keys: Arc<KeyRegistry>) -> Self {
        Self {
            inner,
            keys,
            zones: RwLock::new(BTreeMap::new()),
        }
    }

    /// The wrapped backend. Reading through it returns ciphertext for zoned files.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    /// Key name of the innermost zone containing `key`.
    async fn zone_key_name(&self, key: &str) -> Option<String> {
        let zones = self.zones.read().await;
        zones
            .iter()
            .filter(|(path, _)| within(key, path))
            .max_by_key(|(path, _)| path.len())
            .map(|(_, name)| name.clone())
    }

    /// Per-file key for `key`, or `None` if the file is outside every zone.
    async fn file_key(&self, key: &str) -> Result<Option<EncryptionKey>, String> {
        let Some(key_name) = self.zone_key_name(key).await else {
            return Ok(None);
        };
        let zone_key = self
            .keys
            .material(&key_name)
            .await
            .ok_or_else(|| format!("zone key '{key_name}' is unavailable"))?;

        let info = format!("{FILE_KEY_CONTEXT}{key}");
        crypto::derive_key(&zone_key, None, info.as_bytes())
            .map(Some)
            .map_err(|e| e.to_string())
    }
}

#[async_trait::async_trait]
impl StorageBackend for ZonedStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let read_err = |reason: String| StorageError::Read {
            key: key.to_owned(),
            reason,
        };

        let Some(stored) = self.inner.get(key).await? else {
            return Ok(None);
        };
        match self.file_key(key).await.map_err(read_err)? {
            None => Ok(Some(stored)),
            Some(file_key) => crypto::decrypt(&file_key, &stored)
                .map(Some)
                .map_err(|e| read_err(e.to_string())),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            key: key.to_owned(),
            reason,
        };

        match self.file_key(key).await.map_err(write_err)? {
            None => self.inner.put(key, value).await,
            Some(file_key) => {
                let ciphertext =
                    crypto::encrypt(&file_key, value).map_err(|e| write_err(e.to_string()))?;
                debug!(key = %key, plaintext = value.len(), "encrypted write");
                self.inner.put(key, &ciphertext).await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }
}

#[async_trait::async_trait]
impl EncryptionProvider for ZonedStorage {
    async fn create_zone(&self, path: &str, key_uri: &str) -> Result<(), ProviderError> {
        let key_name = KeyRegistry::name_from_uri(key_uri).ok_or_else(|| {
            ProviderError::UnknownKeyUri {
                uri: key_uri.to_owned(),
            }
        })?;
        if !self.keys.exists(key_name).await {
            return Err(ProviderError::UnknownKeyUri {
                uri: key_uri.to_owned(),
            });
        }

        let mut zones = self.zones.write().await;
        if zones.contains_key(path) {
            return Err(ProviderError::ZoneExists {
                path: path.to_owned(),
            });
        }

        // Existing plaintext files would become unreadable inside the zone.
        let existing = self.inner.list(path).await?;
        if !existing.is_empty() {
            return Err(ProviderError::NotEmpty {
                path: path.to_owned(),
                files: existing.len(),
            });
        }

        zones.insert(path.to_owned(), key_name.to_owned());
        info!(path = %path, key_uri = %key_uri, "encryption zone installed");
        Ok(())
    }

    async fn remove_zone(&self, path: &str) -> Result<(), ProviderError> {
        // Files encrypted under the zone cannot be read as plaintext.
        let removed = self.inner.delete_prefix(path).await?;
        self.zones.write().await.remove(path);
        info!(path = %path, files = removed, "encryption zone removed");
        Ok(())
    }

    async fn delete_key(&self, key_name: &str) -> Result<(), ProviderError> {
        let mut zones = self.zones.write().await;
        let before = zones.len();
        zones.retain(|_, name| name != key_name);
        let dropped = before.saturating_sub(zones.len());
        if dropped > 0 {
            info!(key = %key_name, zones = dropped, "dropped zones bound to deleted key");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ZonedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZonedStorage").finish_non_exhaustive()
    }
}
