//! Named encryption key registry.
//!
//! Keys are created once with a fixed bit length, referenced by zones, and
//! deleted at teardown. Key material never leaves this module except as an
//! [`EncryptionKey`] handed to the zone-aware storage layer; callers outside
//! the crate only ever see [`KeyInfo`].
//!
//! Keys are addressed by URI (`cryptzone://keys/<name>`) when handed to an
//! encryption provider, the same way a filesystem would be pointed at a key
//! provider rather than given raw key bytes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::crypto::EncryptionKey;
use crate::error::KeyError;

/// Bit lengths accepted by [`KeyRegistry::create_key`].
pub const SUPPORTED_BIT_LENGTHS: &[u32] = &[128, 256];

/// URI prefix under which registered keys are addressed.
pub const KEY_URI_PREFIX: &str = "cryptzone://keys/";

struct KeyEntry {
    bit_length: u32,
    material: EncryptionKey,
    created_at: DateTime<Utc>,
    /// Number of live zones bound to this key.
    zones: usize,
}

/// Public metadata about a key (no key material).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub name: String,
    pub bit_length: u32,
    pub created_at: DateTime<Utc>,
    pub zones: usize,
    pub fingerprint: String,
}

/// In-memory registry of named encryption keys.
#[derive(Default)]
pub struct KeyRegistry {
    keys: RwLock<HashMap<String, KeyEntry>>,
}

impl KeyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a named key with fresh random material.
    ///
    /// # Errors
    ///
    /// - [`KeyError::InvalidName`] if the name is empty or not URI-safe.
    /// - [`KeyError::InvalidBitLength`] unless `bit_length` is in [`SUPPORTED_BIT_LENGTHS`].
    /// - [`KeyError::AlreadyExists`] if the name is taken.
    pub async fn create_key(&self, name: &str, bit_length: u32) -> Result<KeyInfo, KeyError> {
        validate_name(name)?;
        if !SUPPORTED_BIT_LENGTHS.contains(&bit_length) {
            return Err(KeyError::InvalidBitLength {
                name: name.to_owned(),
                bit_length,
                supported: SUPPORTED_BIT_LENGTHS,
            });
        }

        let mut keys = self.keys.write().await;
        if keys.contains_key(name) {
            return Err(KeyError::AlreadyExists {
                name: name.to_owned(),
            });
        }

        let material =
            EncryptionKey::generate(bit_length).map_err(|_| KeyError::InvalidBitLength {
                name: name.to_owned(),
                bit_length,
                supported: SUPPORTED_BIT_LENGTHS,
            })?;
        let entry = KeyEntry {
            bit_length,
            material,
            created_at: Utc::now(),
            zones: 0,
        };
        let info = entry.info(name);
        keys.insert(name.to_owned(), entry);

        info!(key = %name, bits = bit_length, fingerprint = %info.fingerprint, "key created");
        Ok(info)
    }

    /// Delete a key.
    ///
    /// # Errors
    ///
    /// - [`KeyError::NotFound`] if the key does not exist.
    /// - [`KeyError::InUse`] if a zone still references it.
    pub async fn delete_key(&self, name: &str) -> Result<(), KeyError> {
        let mut keys = self.keys.write().await;
        let entry = keys.get(name).ok_or_else(|| KeyError::NotFound {
            name: name.to_owned(),
        })?;
        if entry.zones > 0 {
            return Err(KeyError::InUse {
                name: name.to_owned(),
                zones: entry.zones,
            });
        }
        keys.remove(name);

        info!(key = %name, "key deleted");
        Ok(())
    }

    /// Whether a key with this name exists.
    pub async fn exists(&self, name: &str) -> bool {
        self.keys.read().await.contains_key(name)
    }

    /// Metadata for a key, if it exists.
    pub async fn key_info(&self, name: &str) -> Option<KeyInfo> {
        self.keys.read().await.get(name).map(|e| e.info(name))
    }

    /// All key names, sorted.
    pub async fn list_keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// The URI under which a key is handed to an encryption provider.
    #[must_use]
    pub fn key_uri(name: &str) -> String {
        format!("{KEY_URI_PREFIX}{name}")
    }

    /// Extract the key name from a URI produced by [`key_uri`](Self::key_uri).
    #[must_use]
    pub fn name_from_uri(uri: &str) -> Option<&str> {
        uri.strip_prefix(KEY_URI_PREFIX).filter(|n| !n.is_empty())
    }

    /// Record that a zone now references `name`.
    pub(crate) async fn attach_zone(&self, name: &str) -> Result<(), KeyError> {
        let mut keys = self.keys.write().await;
        let entry = keys.get_mut(name).ok_or_else(|| KeyError::NotFound {
            name: name.to_owned(),
        })?;
        entry.zones = entry.zones.saturating_add(1);
        Ok(())
    }

    /// Record that a zone referencing `name` is gone.
    pub(crate) async fn detach_zone(&self, name: &str) {
        if let Some(entry) = self.keys.write().await.get_mut(name) {
            entry.zones = entry.zones.saturating_sub(1);
        }
    }

    /// Clone the key material for `name`.
    pub(crate) async fn material(&self, name: &str) -> Option<EncryptionKey> {
        self.keys.read().await.get(name).map(|e| e.material.clone())
    }
}

impl KeyEntry {
    fn info(&self, name: &str) -> KeyInfo {
        KeyInfo {
            name: name.to_owned(),
            bit_length: self.bit_length,
            created_at: self.created_at,
            zones: self.zones,
            fingerprint: self.material.fingerprint(),
        }
    }
}

fn validate_name(name: &str) -> Result<(), KeyError> {
    let invalid = |reason: &str| KeyError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid("only ASCII letters, digits, '_', '-' and '.' are allowed"));
    }
    Ok(())
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry").finish_non_exhaustive()
    }
}
