//! Warehouse session: the components wired together over one backend.
//!
//! ```text
//!   TableCatalog ──► ZoneManager ──► KeyRegistry
//!        │               │
//!        ▼               ▼
//!   CodecRegistry   ZonedStorage (EncryptionProvider)
//!        │               │
//!        └──► storage ◄──┘
//!                 │
//!                 ▼
//!          StorageBackend
//! ```
//!
//! When encryption is unsupported the zone manager gets a
//! [`NoopProvider`] and tables are stored in the clear; verifiers built
//! from the session then skip every scenario.

use std::sync::Arc;

use cryptzone_storage::StorageBackend;
use tracing::{info, warn};

use crate::catalog::{CatalogConfig, CreateTable, SkipList, TableCatalog, TableDescriptor};
use crate::codec::CodecRegistry;
use crate::error::WarehouseError;
use crate::keys::KeyRegistry;
use crate::verify::{RoundTripVerifier, VerifierConfig};
use crate::zone::{EncryptionProvider, NoopProvider, Zone, ZoneManager};
use crate::zoned_storage::ZonedStorage;

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    /// Directory under which managed tables live.
    pub warehouse_dir: String,
    /// Whether zones actually encrypt. When false, zones are recorded but
    /// nothing is encrypted and verification is skipped.
    pub encryption_supported: bool,
    pub skip_list: SkipList,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            warehouse_dir: CatalogConfig::default().warehouse_dir,
            encryption_supported: true,
            skip_list: SkipList::encryption_suite(),
        }
    }
}

/// What [`Warehouse::teardown`] managed to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub tables_dropped: usize,
    pub zones_removed: usize,
    pub keys_deleted: usize,
    /// One message per step that failed.
    pub errors: Vec<String>,
}

impl TeardownReport {
    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A key registry, zones, catalog and codecs sharing one storage backend.
pub struct Warehouse {
    raw: Arc<dyn StorageBackend>,
    storage: Arc<dyn StorageBackend>,
    keys: Arc<KeyRegistry>,
    zones: Arc<ZoneManager>,
    codecs: Arc<CodecRegistry>,
    catalog: TableCatalog,
    config: WarehouseConfig,
}

impl Warehouse {
    /// Open a session over `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Catalog`] if the catalog cannot be loaded.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        config: WarehouseConfig,
    ) -> Result<Self, WarehouseError> {
        let keys = Arc::new(KeyRegistry::new());

        let (storage, provider): (Arc<dyn StorageBackend>, Arc<dyn EncryptionProvider>) =
            if config.encryption_supported {
                let zoned = Arc::new(ZonedStorage::new(Arc::clone(&backend), Arc::clone(&keys)));
                (
                    Arc::clone(&zoned) as Arc<dyn StorageBackend>,
                    zoned as Arc<dyn EncryptionProvider>,
                )
            } else {
                (
                    Arc::clone(&backend),
                    Arc::new(NoopProvider) as Arc<dyn EncryptionProvider>,
                )
            };

        let zones = Arc::new(ZoneManager::new(Arc::clone(&keys), provider));
        let codecs = Arc::new(CodecRegistry::with_defaults());
        let catalog = TableCatalog::new(
            Arc::clone(&storage),
            Arc::clone(&codecs),
            Arc::clone(&zones),
            CatalogConfig {
                warehouse_dir: config.warehouse_dir.clone(),
            },
        )
        .await?;

        info!(
            warehouse = %catalog.warehouse_dir(),
            encryption = config.encryption_supported,
            "warehouse opened"
        );
        Ok(Self {
            raw: backend,
            storage,
            keys,
            zones,
            codecs,
            catalog,
            config,
        })
    }

    /// The backend as given, below any encryption.
    #[must_use]
    pub fn raw_storage(&self) -> &Arc<dyn StorageBackend> {
        &self.raw
    }

    /// The zone-aware storage tables are written through.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<KeyRegistry> {
        &self.keys
    }

    #[must_use]
    pub fn zones(&self) -> &Arc<ZoneManager> {
        &self.zones
    }

    #[must_use]
    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    #[must_use]
    pub fn catalog(&self) -> &TableCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// A verifier for `scenario` using this session's storage and skip-list.
    #[must_use]
    pub fn verifier(&self, scenario: &str) -> RoundTripVerifier {
        RoundTripVerifier::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.codecs),
            VerifierConfig {
                scenario: scenario.to_owned(),
                encryption_supported: self.config.encryption_supported,
                skip_list: self.config.skip_list.clone(),
            },
        )
    }

    /// Create `key_name` (if it does not exist yet) and a zone over `path`.
    ///
    /// Returns `None` without doing anything when encryption is unsupported.
    ///
    /// # Errors
    ///
    /// - [`WarehouseError::Key`] if the key cannot be created.
    /// - [`WarehouseError::Zone`] if the zone cannot be created.
    pub async fn protect(
        &self,
        path: &str,
        key_name: &str,
        bit_length: u32,
    ) -> Result<Option<Zone>, WarehouseError> {
        if !self.config.encryption_supported {
            return Ok(None);
        }
        if !self.keys.exists(key_name).await {
            self.keys.create_key(key_name, bit_length).await?;
        }
        let zone = self.zones.create_zone(path, key_name).await?;
        Ok(Some(zone))
    }

    /// Create a table at an explicit location, then protect that location
    /// with `key_name`. Returns the descriptor with its zone resolved.
    ///
    /// If the location cannot be protected the table is unregistered again,
    /// so a failed call leaves nothing in the catalog. Files already at the
    /// location are left alone.
    ///
    /// # Errors
    ///
    /// As for [`TableCatalog::create_table`] and [`protect`](Self::protect).
    pub async fn create_encrypted_table(
        &self,
        request: CreateTable,
        key_name: &str,
        bit_length: u32,
    ) -> Result<TableDescriptor, WarehouseError> {
        let created = self.catalog.create_table(request).await?;
        if let Err(e) = self.protect(&created.location, key_name, bit_length).await {
            if let Err(undo) = self.catalog.unregister(&created.name).await {
                warn!(
                    table = %created.name,
                    error = %undo,
                    "table stays registered after protect failed"
                );
            }
            return Err(e);
        }
        self.catalog
            .lookup(&created.name)
            .await
            .ok_or(WarehouseError::TableMissing { name: created.name })
    }

    /// Drop `tables`, remove every zone, and delete every key.
    ///
    /// Each failure is logged and recorded; later steps still run.
    pub async fn teardown(&self, tables: &[&str]) -> TeardownReport {
        let mut report = TeardownReport::default();

        for table in tables {
            match self.catalog.drop_table(table).await {
                Ok(true) => report.tables_dropped = report.tables_dropped.saturating_add(1),
                Ok(false) => {}
                Err(e) => {
                    warn!(table = %table, error = %e, "teardown: drop table failed");
                    report.errors.push(format!("drop table {table}: {e}"));
                }
            }
        }

        for zone in self.zones.list_zones().await {
            match self.zones.remove_zone(&zone.path).await {
                Ok(_) => report.zones_removed = report.zones_removed.saturating_add(1),
                Err(e) => {
                    warn!(path = %zone.path, error = %e, "teardown: remove zone failed");
                    report.errors.push(format!("remove zone {}: {e}", zone.path));
                }
            }
        }

        for key in self.keys.list_keys().await {
            match self.zones.delete_key(&key).await {
                Ok(()) => report.keys_deleted = report.keys_deleted.saturating_add(1),
                Err(e) => {
                    warn!(key = %key, error = %e, "teardown: delete key failed");
                    report.errors.push(format!("delete key {key}: {e}"));
                }
            }
        }

        info!(
            tables = report.tables_dropped,
            zones = report.zones_removed,
            keys = report.keys_deleted,
            errors = report.errors.len(),
            "warehouse torn down"
        );
        report
    }
}

impl std::fmt::Debug for Warehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warehouse")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::StorageFormat;
    use crate::error::KeyError;
    use crate::types::Dataset;
    use crate::verify::scenarios;
    use cryptzone_storage::MemoryBackend;

    async fn open(encryption_supported: bool) -> Warehouse {
        let config = WarehouseConfig {
            encryption_supported,
            ..WarehouseConfig::default()
        };
        Warehouse::open(Arc::new(MemoryBackend::new()), config)
            .await
            .unwrap()
    }

    fn encrypted_request(format: StorageFormat) -> CreateTable {
        CreateTable::new("encrypted_table", Dataset::basic_columns())
            .stored_as(format)
            .location("warehouse/encryptedTable")
    }

    #[tokio::test]
    async fn failed_protect_unregisters_the_table() {
        let warehouse = open(true).await;
        let result = warehouse
            .create_encrypted_table(encrypted_request(StorageFormat::TextFile), "key_192", 192)
            .await;
        assert!(matches!(
            result,
            Err(WarehouseError::Key(KeyError::InvalidBitLength { bit_length: 192, .. }))
        ));
        assert!(warehouse.catalog().lookup("encrypted_table").await.is_none());
        assert!(warehouse.zones().list_zones().await.is_empty());

        let table = warehouse
            .create_encrypted_table(encrypted_request(StorageFormat::TextFile), "key_128", 128)
            .await
            .unwrap();
        assert!(table.is_protected());
    }

    #[tokio::test]
    async fn refused_zone_keeps_existing_files() {
        let warehouse = open(true).await;
        warehouse
            .raw_storage()
            .put("warehouse/encryptedTable/part-00000.txt", b"1\tS1S\n")
            .await
            .unwrap();

        let result = warehouse
            .create_encrypted_table(encrypted_request(StorageFormat::TextFile), "key_128", 128)
            .await;
        assert!(matches!(result, Err(WarehouseError::Zone(_))));
        assert!(warehouse.catalog().list_tables().await.is_empty());
        assert!(
            warehouse
                .raw_storage()
                .exists("warehouse/encryptedTable/part-00000.txt")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn encrypted_table_roundtrips_and_is_ciphertext_at_rest() {
        let warehouse = open(true).await;
        let table = warehouse
            .create_encrypted_table(encrypted_request(StorageFormat::TextFile), "key_128", 128)
            .await
            .unwrap();
        assert!(table.is_protected());

        let outcome = warehouse
            .verifier(scenarios::READ_ENCRYPTED_TABLE)
            .verify(&table, &Dataset::basic(3))
            .await
            .unwrap();
        assert!(outcome.is_passed());

        let raw = warehouse
            .raw_storage()
            .get("warehouse/encryptedTable/part-00000.txt")
            .await
            .unwrap()
            .unwrap();
        assert!(!raw.windows(3).any(|w| w == b"S1S"));
    }

    #[tokio::test]
    async fn unsupported_encryption_skips_and_creates_no_zone() {
        let warehouse = open(false).await;
        let table = warehouse
            .create_encrypted_table(encrypted_request(StorageFormat::TextFile), "key_128", 128)
            .await
            .unwrap();
        assert!(!table.is_protected());
        assert!(!warehouse.keys().exists("key_128").await);

        let outcome = warehouse
            .verifier(scenarios::READ_ENCRYPTED_TABLE)
            .verify(&table, &Dataset::basic(3))
            .await
            .unwrap();
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn teardown_leaves_nothing_behind() {
        let warehouse = open(true).await;
        warehouse
            .catalog()
            .create_table(CreateTable::new("junit_unparted_basic", Dataset::basic_columns()))
            .await
            .unwrap();
        let table = warehouse
            .create_encrypted_table(encrypted_request(StorageFormat::RcFile), "key_128", 128)
            .await
            .unwrap();
        warehouse
            .verifier(scenarios::READ_ENCRYPTED_TABLE)
            .verify(&table, &Dataset::basic(3))
            .await
            .unwrap();

        let report = warehouse
            .teardown(&["junit_unparted_basic", "encrypted_table", "never_created"])
            .await;
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(report.tables_dropped, 2);
        assert_eq!(report.zones_removed, 1);
        assert_eq!(report.keys_deleted, 1);

        assert!(warehouse.catalog().list_tables().await.is_empty());
        assert!(warehouse.zones().list_zones().await.is_empty());
        assert!(warehouse.keys().list_keys().await.is_empty());
        assert!(
            warehouse
                .raw_storage()
                .list("warehouse/")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn protect_reuses_existing_key() {
        let warehouse = open(true).await;
        warehouse.protect("warehouse/a", "k", 256).await.unwrap();
        let zone = warehouse.protect("warehouse/b", "k", 256).await.unwrap().unwrap();
        assert_eq!(zone.key_name, "k");
        assert_eq!(warehouse.keys().key_info("k").await.unwrap().zones, 2);
    }
}
