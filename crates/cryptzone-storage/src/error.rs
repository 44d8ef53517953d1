//! Storage error types.
//!
//! Every error variant carries the path and the underlying reason so a
//! failure can be diagnosed from the log line alone.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open the storage root at the given path.
    #[error("failed to open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Failed to read a file.
    #[error("failed to read '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Failed to write a file.
    #[error("failed to write '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Failed to delete a file.
    #[error("failed to delete '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// Failed to list files under the given prefix.
    #[error("failed to list files with prefix '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    /// A storage path was empty, absolute, or escaped the storage root.
    #[error("invalid storage path '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}
