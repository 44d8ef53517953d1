//! Driver configuration.
//!
//! Every setting can come from a `CRYPTZONE_*` environment variable; command
//! line flags override the environment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cryptzone_core::catalog::{DEFAULT_WAREHOUSE_DIR, SkipList};
use cryptzone_core::codec::{CodecRegistry, StorageFormat};
use cryptzone_core::warehouse::WarehouseConfig;
use cryptzone_storage::{LocalFsBackend, MemoryBackend, StorageBackend};

/// Where table files are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageKind {
    /// In-memory; nothing survives the process.
    Memory,
    /// Files beneath the `--root` directory.
    Local,
}

/// Settings for one suite run.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub storage: StorageKind,
    /// Root directory for [`StorageKind::Local`].
    pub root: PathBuf,
    pub encryption_supported: bool,
    /// Bit length of the zone key. The key is named `key_<bits>`.
    pub key_bits: u32,
    pub skip_list: SkipList,
    /// Formats to exercise, in order.
    pub formats: Vec<StorageFormat>,
    /// Side length of the `(a, b)` grid; 3 gives the nine-row dataset.
    pub loop_size: i32,
}

impl SuiteConfig {
    /// Name of the key protecting the encrypted table.
    pub fn key_name(&self) -> String {
        format!("key_{}", self.key_bits)
    }

    /// Settings for each per-format warehouse session.
    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig {
            warehouse_dir: DEFAULT_WAREHOUSE_DIR.to_owned(),
            encryption_supported: self.encryption_supported,
            skip_list: self.skip_list.clone(),
        }
    }

    /// Open a fresh backend for one format's session.
    pub async fn open_backend(&self) -> Result<Arc<dyn StorageBackend>> {
        match self.storage {
            StorageKind::Memory => Ok(Arc::new(MemoryBackend::new())),
            StorageKind::Local => {
                let backend = LocalFsBackend::open(&self.root)
                    .await
                    .with_context(|| format!("opening storage root {}", self.root.display()))?;
                Ok(Arc::new(backend))
            }
        }
    }
}

/// The formats a run covers when none are named: everything with a codec,
/// plus everything the skip-list mentions so skips are reported.
pub fn default_formats(codecs: &CodecRegistry, skip_list: &SkipList) -> Vec<StorageFormat> {
    StorageFormat::ALL
        .into_iter()
        .filter(|f| codecs.supports(*f) || skip_list.entries().any(|(g, _)| g == *f))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_formats_include_skip_listed_parquet() {
        let formats = default_formats(&CodecRegistry::with_defaults(), &SkipList::encryption_suite());
        assert_eq!(
            formats,
            vec![
                StorageFormat::TextFile,
                StorageFormat::JsonFile,
                StorageFormat::RcFile,
                StorageFormat::Parquet,
            ]
        );
    }

    #[test]
    fn empty_skip_list_leaves_only_codecs() {
        let formats = default_formats(&CodecRegistry::with_defaults(), &SkipList::new());
        assert!(!formats.contains(&StorageFormat::Parquet));
        assert_eq!(formats.len(), 3);
    }

    #[test]
    fn key_name_follows_bit_length() {
        let config = SuiteConfig {
            storage: StorageKind::Memory,
            root: PathBuf::from("."),
            encryption_supported: true,
            key_bits: 256,
            skip_list: SkipList::new(),
            formats: Vec::new(),
            loop_size: 3,
        };
        assert_eq!(config.key_name(), "key_256");
        assert_eq!(config.warehouse_config().warehouse_dir, "warehouse/");
    }
}
