//! Filesystem abstraction for `cryptzone`.
//!
//! This crate defines the [`StorageBackend`] trait, a path-addressed file
//! store that knows nothing about tables, formats, or encryption zones. The
//! zone-aware layer in `cryptzone-core` wraps a backend so that files under
//! an encryption zone are encrypted before they reach this layer.
//!
//! Two implementations are provided:
//!
//! - [`LocalFsBackend`]: files on local disk beneath a root directory
//! - [`MemoryBackend`]: in-memory, for testing

mod error;
mod local;
mod memory;

pub use error::StorageError;
pub use local::LocalFsBackend;
pub use memory::MemoryBackend;

/// A pluggable path-addressed storage backend.
///
/// Keys are relative UTF-8 paths using `/` as a separator (e.g.
/// `warehouse/encrypted_table/part-00000.txt`). Values are opaque byte
/// arrays holding whole files. A `put` replaces the file atomically: readers
/// observe either the previous contents or the new contents, never a mix.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Read a whole file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Create or replace a file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a file. This is idempotent: deleting a non-existent file is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all file paths that start with the given prefix, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a file exists.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Delete every file beneath `prefix`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] raised by `list` or `delete`.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }
}
