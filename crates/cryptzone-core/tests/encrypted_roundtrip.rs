//! End-to-end round trips through the warehouse, on disk and in memory.
//!
//! Mirrors the encrypted-table read suite: a basic table and a table at an
//! explicit location are created, a 128-bit key protects the latter, the
//! nine-row fixture is stored and read back for every storage format, and
//! everything is torn down afterwards.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use cryptzone_core::catalog::{CreateTable, SkipList};
use cryptzone_core::codec::StorageFormat;
use cryptzone_core::error::{WarehouseError, ZoneError};
use cryptzone_core::types::{Column, ColumnType, Dataset, Row};
use cryptzone_core::verify::{SkipReason, VerificationOutcome, scenarios};
use cryptzone_core::warehouse::{Warehouse, WarehouseConfig};
use cryptzone_storage::{LocalFsBackend, MemoryBackend, StorageBackend};

const BASIC_TABLE: &str = "junit_unparted_basic";
const ENCRYPTED_TABLE: &str = "encrypted_table";
const ENCRYPTED_PATH: &str = "warehouse/encryptedTable";

async fn setup(backend: Arc<dyn StorageBackend>, format: StorageFormat) -> Warehouse {
    let warehouse = Warehouse::open(backend, WarehouseConfig::default())
        .await
        .expect("open warehouse");
    warehouse
        .catalog()
        .create_table(CreateTable::new(BASIC_TABLE, Dataset::basic_columns()).stored_as(format))
        .await
        .expect("create basic table");
    warehouse
}

async fn encrypted_table(
    warehouse: &Warehouse,
    format: StorageFormat,
) -> Result<cryptzone_core::catalog::TableDescriptor, WarehouseError> {
    warehouse
        .create_encrypted_table(
            CreateTable::new(ENCRYPTED_TABLE, Dataset::basic_columns())
                .stored_as(format)
                .location(ENCRYPTED_PATH),
            "key_128",
            128,
        )
        .await
}

#[tokio::test]
async fn every_registered_format_roundtrips_on_local_disk() {
    for format in [StorageFormat::TextFile, StorageFormat::JsonFile, StorageFormat::RcFile] {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalFsBackend::open(dir.path()).await.unwrap());
        let warehouse = setup(backend, format).await;
        let table = encrypted_table(&warehouse, format).await.unwrap();

        let outcome = warehouse
            .verifier(scenarios::READ_ENCRYPTED_TABLE)
            .verify(&table, &Dataset::basic(3))
            .await
            .unwrap();
        assert!(outcome.is_passed(), "{format}: {outcome:?}");

        // The part file on disk is ciphertext.
        let file = dir
            .path()
            .join(ENCRYPTED_PATH)
            .join(format!("part-00000.{}", format.extension()));
        let on_disk = std::fs::read(&file).unwrap();
        assert!(!on_disk.windows(3).any(|w| w == b"S1S"), "{format} leaked plaintext");

        let report = warehouse.teardown(&[BASIC_TABLE, ENCRYPTED_TABLE]).await;
        assert!(report.is_clean(), "{format}: {:?}", report.errors);
        assert!(!file.exists());
    }
}

#[tokio::test]
async fn unencrypted_table_is_plaintext_at_rest() {
    let backend = Arc::new(MemoryBackend::new());
    let warehouse = setup(
        Arc::clone(&backend) as Arc<dyn StorageBackend>,
        StorageFormat::TextFile,
    )
    .await;
    let table = warehouse.catalog().lookup(BASIC_TABLE).await.unwrap();
    assert!(!table.is_protected());

    let outcome = warehouse
        .verifier(scenarios::READ_BASIC)
        .verify(&table, &Dataset::basic(3))
        .await
        .unwrap();
    assert!(outcome.is_passed());

    let stored = backend
        .get("warehouse/junit_unparted_basic/part-00000.txt")
        .await
        .unwrap()
        .unwrap();
    assert!(stored.starts_with(b"1\tS1S\n1\tS2S\n"));
}

#[tokio::test]
async fn parquet_is_skipped_by_default_and_unsupported_otherwise() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let warehouse = Warehouse::open(Arc::clone(&backend), WarehouseConfig::default())
        .await
        .unwrap();

    // Parquet has no codec, so the catalog refuses the table outright.
    let result = encrypted_table(&warehouse, StorageFormat::Parquet).await;
    assert!(matches!(result, Err(WarehouseError::Catalog(_))));

    // A verifier asked about a parquet table short-circuits before any I/O.
    let text = encrypted_table(&warehouse, StorageFormat::TextFile).await.unwrap();
    let parquet_view = cryptzone_core::catalog::TableDescriptor {
        format: StorageFormat::Parquet,
        ..text
    };
    let outcome = warehouse
        .verifier(scenarios::READ_ENCRYPTED_TABLE)
        .verify(&parquet_view, &Dataset::basic(3))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        VerificationOutcome::Skipped(SkipReason::Disabled {
            format: StorageFormat::Parquet,
            scenario: scenarios::READ_ENCRYPTED_TABLE.to_owned(),
        })
    );
}

#[tokio::test]
async fn custom_skip_list_skips_matching_scenarios() {
    let config = WarehouseConfig {
        skip_list: "rcfile:read_*".parse::<SkipList>().unwrap(),
        ..WarehouseConfig::default()
    };
    let warehouse = Warehouse::open(Arc::new(MemoryBackend::new()), config)
        .await
        .unwrap();
    let table = encrypted_table(&warehouse, StorageFormat::RcFile).await.unwrap();

    let skipped = warehouse
        .verifier(scenarios::READ_ENCRYPTED_TABLE)
        .verify(&table, &Dataset::basic(3))
        .await
        .unwrap();
    assert!(skipped.is_skipped());

    let passed = warehouse
        .verifier(scenarios::PROJECTIONS_BASIC)
        .verify(&table, &Dataset::basic(3))
        .await
        .unwrap();
    assert!(passed.is_passed());
}

#[tokio::test]
async fn partitioned_encrypted_table_roundtrips() {
    let warehouse = Warehouse::open(Arc::new(MemoryBackend::new()), WarehouseConfig::default())
        .await
        .unwrap();
    let table = warehouse
        .create_encrypted_table(
            CreateTable::new("parted", vec![Column::new("b", ColumnType::String)])
                .partitioned_by(vec![Column::new("a", ColumnType::Int)])
                .stored_as(StorageFormat::JsonFile),
            "key_256",
            256,
        )
        .await
        .unwrap();
    assert_eq!(table.zone.as_ref().unwrap().key_name, "key_256");

    // Rows are (b, a): data columns first, then the partition column.
    let dataset: Dataset = Dataset::basic(3)
        .iter()
        .map(|r| {
            let mut values = r.values().to_vec();
            values.reverse();
            Row::new(values)
        })
        .collect();
    let outcome = warehouse
        .verifier(scenarios::READ_PARTITIONED_BASIC)
        .verify(&table, &dataset)
        .await
        .unwrap();
    assert!(outcome.is_passed());

    let files = warehouse.raw_storage().list("warehouse/parted/").await.unwrap();
    assert_eq!(
        files,
        vec![
            "warehouse/parted/a=1/part-00000.json",
            "warehouse/parted/a=2/part-00000.json",
            "warehouse/parted/a=3/part-00000.json",
        ]
    );
}

#[tokio::test]
async fn repeat_verification_replaces_previous_rows() {
    let warehouse = Warehouse::open(Arc::new(MemoryBackend::new()), WarehouseConfig::default())
        .await
        .unwrap();
    let table = encrypted_table(&warehouse, StorageFormat::TextFile).await.unwrap();
    let verifier = warehouse.verifier(scenarios::READ_ENCRYPTED_TABLE);

    verifier.verify(&table, &Dataset::basic(3)).await.unwrap();
    let outcome = verifier.verify(&table, &Dataset::basic(2)).await.unwrap();
    assert!(outcome.is_passed());
    if let VerificationOutcome::Passed(report) = outcome {
        assert_eq!(report.rows_matched, 4);
        assert!(report.protected);
    }

    let files = warehouse.raw_storage().list("warehouse/encryptedTable/").await.unwrap();
    assert_eq!(files, vec!["warehouse/encryptedTable/part-00000.txt"]);
}

#[tokio::test]
async fn zone_over_existing_data_is_refused() {
    let warehouse = Warehouse::open(Arc::new(MemoryBackend::new()), WarehouseConfig::default())
        .await
        .unwrap();
    let table = warehouse
        .catalog()
        .create_table(CreateTable::new("t", Dataset::basic_columns()))
        .await
        .unwrap();
    warehouse
        .verifier(scenarios::READ_BASIC)
        .verify(&table, &Dataset::basic(3))
        .await
        .unwrap();

    let result = warehouse.protect(&table.location, "key_128", 128).await;
    assert!(matches!(
        result,
        Err(WarehouseError::Zone(ZoneError::Provider(_)))
    ));
    assert!(!warehouse.zones().is_protected(&table.location).await);
}

#[tokio::test]
async fn catalog_persists_across_sessions_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = Arc::new(LocalFsBackend::open(dir.path()).await.unwrap());
        setup(backend, StorageFormat::RcFile).await;
    }

    let backend = Arc::new(LocalFsBackend::open(dir.path()).await.unwrap());
    let warehouse = Warehouse::open(backend, WarehouseConfig::default())
        .await
        .unwrap();
    let table = warehouse.catalog().lookup(BASIC_TABLE).await.unwrap();
    assert_eq!(table.format, StorageFormat::RcFile);
    assert!(dir.path().join("_catalog").join("tables").exists());
}
