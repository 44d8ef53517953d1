//! Encryption zones.
//!
//! A zone binds a directory (a storage path prefix) to a named key. Every
//! file written beneath a zone is encrypted at rest by the
//! [`EncryptionProvider`]; readers and writers above the storage layer see
//! plaintext and behave identically whether or not a path is zoned.
//!
//! Zone paths are normalized to end in `/`, so `warehouse/enc` and
//! `warehouse/enc/` name the same zone and `warehouse/encrypted/` is not
//! inside it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{KeyError, ProviderError, ZoneError};
use crate::keys::KeyRegistry;

/// Capability interface of the component that actually enforces encryption
/// on a path, selected when the [`ZoneManager`] is built.
#[async_trait::async_trait]
pub trait EncryptionProvider: Send + Sync {
    /// Wrap `path` (normalized, ending in `/`) in a zone encrypted with the
    /// key at `key_uri`.
    async fn create_zone(&self, path: &str, key_uri: &str) -> Result<(), ProviderError>;

    /// Forget the zone at `path`.
    async fn remove_zone(&self, path: &str) -> Result<(), ProviderError>;

    /// Forget any state held for the key `key_name`.
    async fn delete_key(&self, key_name: &str) -> Result<(), ProviderError>;
}

/// Provider that accepts every request and encrypts nothing. Used where the
/// storage layer has no encryption support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl EncryptionProvider for NoopProvider {
    async fn create_zone(&self, _path: &str, _key_uri: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn remove_zone(&self, _path: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete_key(&self, _key_name: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// A registered zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    /// Normalized zone path, ending in `/`.
    pub path: String,
    /// Name of the key protecting the zone.
    pub key_name: String,
    pub created_at: DateTime<Utc>,
}

impl Zone {
    /// Whether `path` lies inside this zone.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        within(path, &self.path)
    }
}

/// Manages zone membership on top of a [`KeyRegistry`].
pub struct ZoneManager {
    keys: Arc<KeyRegistry>,
    provider: Arc<dyn EncryptionProvider>,
    zones: RwLock<BTreeMap<String, Zone>>,
}

impl ZoneManager {
    /// Create a manager with no zones.
    #[must_use]
    pub fn new(keys: Arc<KeyRegistry>, provider: Arc<dyn EncryptionProvider>) -> Self {
        Self {
            keys,
            provider,
            zones: RwLock::new(BTreeMap::new()),
        }
    }

    /// The key registry zones are checked against.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyRegistry> {
        &self.keys
    }

    /// Create a zone at `path` protected by `key_name`.
    ///
    /// A second zone at the same path fails regardless of the key named.
    ///
    /// # Errors
    ///
    /// - [`ZoneError::InvalidPath`] if the path is empty or not relative.
    /// - [`ZoneError::AlreadyZoned`] if the path already has a zone.
    /// - [`ZoneError::UnknownKey`] if `key_name` is not registered.
    /// - [`ZoneError::Provider`] if the provider rejects the zone.
    pub async fn create_zone(&self, path: &str, key_name: &str) -> Result<Zone, ZoneError> {
        let path = normalize_dir(path)?;
        let mut zones = self.zones.write().await;

        if let Some(existing) = zones.get(&path) {
            return Err(ZoneError::AlreadyZoned {
                path,
                key_name: existing.key_name.clone(),
            });
        }

        self.keys
            .attach_zone(key_name)
            .await
            .map_err(|_| ZoneError::UnknownKey {
                path: path.clone(),
                key_name: key_name.to_owned(),
            })?;

        if let Err(e) = self
            .provider
            .create_zone(&path, &KeyRegistry::key_uri(key_name))
            .await
        {
            self.keys.detach_zone(key_name).await;
            return Err(ZoneError::Provider(e));
        }

        let zone = Zone {
            path: path.clone(),
            key_name: key_name.to_owned(),
            created_at: Utc::now(),
        };
        zones.insert(path.clone(), zone.clone());

        info!(path = %path, key = %key_name, "zone created");
        Ok(zone)
    }

    /// Whether `path` is inside any zone.
    pub async fn is_protected(&self, path: &str) -> bool {
        self.zone_for(path).await.is_some()
    }

    /// The innermost zone containing `path`, if any.
    pub async fn zone_for(&self, path: &str) -> Option<Zone> {
        let zones = self.zones.read().await;
        zones
            .values()
            .filter(|z| z.contains(path))
            .max_by_key(|z| z.path.len())
            .cloned()
    }

    /// Remove the zone at `path`, releasing its key reference.
    ///
    /// # Errors
    ///
    /// - [`ZoneError::NotFound`] if no zone is registered at the path.
    /// - [`ZoneError::Provider`] if the provider fails; the zone is kept.
    pub async fn remove_zone(&self, path: &str) -> Result<Zone, ZoneError> {
        let path = normalize_dir(path)?;
        let mut zones = self.zones.write().await;

        if !zones.contains_key(&path) {
            return Err(ZoneError::NotFound { path });
        }
        self.provider.remove_zone(&path).await?;

        let zone = zones
            .remove(&path)
            .ok_or_else(|| ZoneError::NotFound { path: path.clone() })?;
        self.keys.detach_zone(&zone.key_name).await;

        info!(path = %path, key = %zone.key_name, "zone removed");
        Ok(zone)
    }

    /// All zones, ordered by path.
    pub async fn list_zones(&self) -> Vec<Zone> {
        self.zones.read().await.values().cloned().collect()
    }

    /// Delete a key from the registry and tell the provider to forget it.
    ///
    /// # Errors
    ///
    /// - [`KeyError::NotFound`] / [`KeyError::InUse`] from the registry.
    /// - [`KeyError::Provider`] if the provider fails after the key is gone.
    pub async fn delete_key(&self, key_name: &str) -> Result<(), KeyError> {
        self.keys.delete_key(key_name).await?;
        if let Err(e) = self.provider.delete_key(key_name).await {
            warn!(key = %key_name, error = %e, "provider failed to forget deleted key");
            return Err(KeyError::Provider(e));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ZoneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneManager").finish_non_exhaustive()
    }
}

/// Normalize a directory path: strip leading `/`, ensure a trailing `/`.
///
/// # Errors
///
/// Returns [`ZoneError::InvalidPath`] for empty paths or `.`/`..` segments.
pub fn normalize_dir(path: &str) -> Result<String, ZoneError> {
    let trimmed = path.trim().trim_start_matches('/');
    let invalid = |reason: &str| ZoneError::InvalidPath {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };

    if trimmed.trim_end_matches('/').is_empty() {
        return Err(invalid("path cannot be empty"));
    }
    if trimmed
        .split('/')
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(invalid("'.' and '..' segments are not allowed"));
    }

    if trimmed.ends_with('/') {
        Ok(trimmed.to_owned())
    } else {
        Ok(format!("{trimmed}/"))
    }
}

/// Whether `path` is `dir` itself or lies beneath it. `dir` ends in `/`.
pub(crate) fn within(path: &str, dir: &str) -> bool {
    let path = path.trim_start_matches('/');
    path.starts_with(dir) || dir.strip_suffix('/') == Some(path)
}
