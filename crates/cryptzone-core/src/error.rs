//! Error types for `cryptzone-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material, only key names or
//! operation descriptions.

use cryptzone_storage::StorageError;

use crate::codec::StorageFormat;
use crate::types::{ColumnType, Value};

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// HKDF key derivation failed.
    #[error("key derivation failed for context '{context}': {reason}")]
    KeyDerivation { context: String, reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// Key material does not have a supported length.
    #[error("unsupported key length: {bits} bits")]
    UnsupportedKeyLength { bits: usize },
}

/// Errors from the key registry.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// A key with this name already exists.
    #[error("key already exists: {name}")]
    AlreadyExists { name: String },

    /// The requested bit length is not a supported cipher key size.
    #[error("invalid bit length {bit_length} for key '{name}', supported: {supported:?}")]
    InvalidBitLength {
        name: String,
        bit_length: u32,
        supported: &'static [u32],
    },

    /// The key does not exist.
    #[error("key not found: {name}")]
    NotFound { name: String },

    /// The key is still bound to one or more zones.
    #[error("key '{name}' is still used by {zones} zone(s)")]
    InUse { name: String, zones: usize },

    /// The key name is empty or contains characters that cannot appear in a key URI.
    #[error("invalid key name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The encryption provider refused to forget the key.
    #[error("key provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Errors reported by an [`EncryptionProvider`](crate::zone::EncryptionProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The key URI does not resolve to a registered key.
    #[error("unknown key URI: {uri}")]
    UnknownKeyUri { uri: String },

    /// The directory already holds files and cannot become a zone.
    #[error("cannot create zone at '{path}': directory is not empty ({files} file(s))")]
    NotEmpty { path: String, files: usize },

    /// The provider already tracks a zone at this path.
    #[error("provider already has a zone at '{path}'")]
    ZoneExists { path: String },

    /// The underlying storage failed while the provider inspected the path.
    #[error("provider storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from zone management.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    /// The key named for the zone does not exist.
    #[error("cannot create zone at '{path}': unknown key '{key_name}'")]
    UnknownKey { path: String, key_name: String },

    /// The path already has an associated zone.
    #[error("path '{path}' is already in zone bound to key '{key_name}'")]
    AlreadyZoned { path: String, key_name: String },

    /// No zone is registered at the path.
    #[error("zone not found: {path}")]
    NotFound { path: String },

    /// The zone path is empty or escapes the storage root.
    #[error("invalid zone path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The encryption provider rejected the zone.
    #[error("zone provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Errors from the table catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// A table with this name already exists.
    #[error("table already exists: {name}")]
    DuplicateName { name: String },

    /// No codec is registered for the storage format.
    #[error("unsupported storage format '{format}' for table '{table}'")]
    UnsupportedFormat { table: String, format: StorageFormat },

    /// The schema is empty, repeats a column name, or names a column badly.
    #[error("invalid schema for table '{table}': {reason}")]
    InvalidSchema { table: String, reason: String },

    /// The table name is not a valid identifier.
    #[error("invalid table name '{name}'")]
    InvalidName { name: String },

    /// The table location is empty or escapes the storage root.
    #[error("invalid location for table '{table}': {reason}")]
    InvalidLocation { table: String, reason: String },

    /// The catalog could not be persisted or loaded.
    #[error("catalog storage error: {0}")]
    Storage(#[from] StorageError),

    /// The persisted catalog could not be (de)serialized.
    #[error("catalog serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors from storage format codecs, table writers, and table readers.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A row disagrees with the table schema in arity or type.
    #[error("schema mismatch for table '{table}': {reason}")]
    SchemaMismatch { table: String, reason: String },

    /// The filesystem collaborator failed.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] StorageError),

    /// Stored bytes could not be decoded.
    #[error("corrupt data: {reason}")]
    Corrupt { reason: String },

    /// No codec is registered for the format.
    #[error("no codec registered for storage format '{format}'")]
    UnsupportedFormat { format: StorageFormat },
}

impl CodecError {
    /// Shorthand for a [`CodecError::Corrupt`].
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`CodecError::SchemaMismatch`].
    pub(crate) fn mismatch(table: &str, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.to_owned(),
            reason: reason.into(),
        }
    }

    /// Attach the file a decode error came from.
    #[must_use]
    pub(crate) fn in_file(self, file: &str) -> Self {
        match self {
            Self::Corrupt { reason } => Self::Corrupt {
                reason: format!("{file}: {reason}"),
            },
            other => other,
        }
    }
}

/// Errors from round-trip verification. The first divergence wins.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The number of rows read back differs from the dataset size.
    #[error("row count mismatch: expected {expected}, read {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// A field read back differs from the dataset.
    #[error("value mismatch at row {index}, column '{field}': expected {expected}, got {actual}")]
    ValueMismatch {
        index: usize,
        field: String,
        expected: Value,
        actual: Value,
    },

    /// A row read back has the wrong number of fields.
    #[error("arity mismatch at row {index}: expected {expected} fields, got {actual}")]
    ArityMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// A field read back is null.
    #[error("null value at row {index}, column '{field}'")]
    NullField { index: usize, field: String },

    /// A field read back has a different runtime type than declared.
    #[error("type mismatch at row {index}, column '{field}': declared {expected}, got {actual}")]
    TypeMismatch {
        index: usize,
        field: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    /// Writing or reading the table failed.
    #[error("verification I/O error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors from a warehouse session.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A table that was just created is missing from the catalog.
    #[error("table '{name}' vanished from the catalog")]
    TableMissing { name: String },
}
