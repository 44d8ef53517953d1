//! In-memory storage backend for testing.
//!
//! Files live in a `BTreeMap` behind a `RwLock`; nothing is persisted. Sorted
//! keys make prefix listing a `range` scan, which also gives the same
//! ordering guarantee as [`LocalFsBackend`](crate::LocalFsBackend).

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Clones share the same underlying map.
///
/// # Examples
///
/// ```
/// # use cryptzone_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("warehouse/t/part-00000.txt", b"1\tS1S\n").await.unwrap();
/// let val = backend.get("warehouse/t/part-00000.txt").await.unwrap();
/// assert_eq!(val, Some(b"1\tS1S\n".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    files: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently stored.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    /// Whether the backend holds no files.
    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let files = self.files.read().await;
        Ok(files.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                key: String::new(),
                reason: "path cannot be empty".to_owned(),
            });
        }
        let mut files = self.files.write().await;
        files.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut files = self.files.write().await;
        files.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let files = self.files.read().await;
        let keys = files
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let files = self.files.read().await;
        Ok(files.contains_key(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_returns_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("warehouse/none").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_existing() {
        let backend = MemoryBackend::new();
        backend.put("t/part-00000.txt", b"v1").await.unwrap();
        backend.put("t/part-00000.txt", b"v2").await.unwrap();
        let val = backend.get("t/part-00000.txt").await.unwrap();
        assert_eq!(val, Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn put_empty_path_is_rejected() {
        let backend = MemoryBackend::new();
        let result = backend.put("", b"x").await;
        assert!(matches!(result, Err(StorageError::InvalidKey { .. })));
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn list_is_sorted_and_prefix_bounded() {
        let backend = MemoryBackend::new();
        backend.put("warehouse/b/part-00001", b"2").await.unwrap();
        backend.put("warehouse/b/part-00000", b"1").await.unwrap();
        backend.put("warehouse/bb/part-00000", b"3").await.unwrap();
        backend.put("other/x", b"4").await.unwrap();

        let keys = backend.list("warehouse/b/").await.unwrap();
        assert_eq!(keys, vec!["warehouse/b/part-00000", "warehouse/b/part-00001"]);
    }

    #[tokio::test]
    async fn delete_prefix_removes_subtree_only() {
        let backend = MemoryBackend::new();
        backend.put("w/t/a=1/part-00000", b"1").await.unwrap();
        backend.put("w/t/a=2/part-00000", b"2").await.unwrap();
        backend.put("w/u/part-00000", b"3").await.unwrap();

        let removed = backend.delete_prefix("w/t/").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.list("w/").await.unwrap(), vec!["w/u/part-00000"]);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.put("key", b"val").await.unwrap();
        assert!(clone.exists("key").await.unwrap());
        assert_eq!(clone.len().await, 1);
    }
}
