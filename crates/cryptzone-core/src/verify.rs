//! Round-trip verification.
//!
//! [`RoundTripVerifier::verify`] writes a dataset into a table through the
//! table's codec, reads it back, and checks that every row comes back in
//! order with the declared types and the same values. The first divergence
//! is reported; nothing is retried.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cryptzone_storage::StorageBackend;
use tracing::{info, warn};

use crate::catalog::{SkipList, TableDescriptor};
use crate::codec::{CodecRegistry, StorageFormat, partition_dir, truncate_table};
use crate::error::VerificationError;
use crate::types::{Column, Dataset, Row, Value};

/// Scenario names understood by the default skip-list.
pub mod scenarios {
    /// Read an unpartitioned table.
    pub const READ_BASIC: &str = "read_basic";
    /// Read a partitioned table.
    pub const READ_PARTITIONED_BASIC: &str = "read_partitioned_basic";
    /// Read a subset of columns.
    pub const PROJECTIONS_BASIC: &str = "projections_basic";
    /// Read a table stored inside an encryption zone.
    pub const READ_ENCRYPTED_TABLE: &str = "read_encrypted_table";
}

/// Settings for a verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Scenario name checked against the skip-list.
    pub scenario: String,
    /// Whether the environment can encrypt at all. When false every
    /// verification is skipped.
    pub encryption_supported: bool,
    pub skip_list: SkipList,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            scenario: scenarios::READ_ENCRYPTED_TABLE.to_owned(),
            encryption_supported: true,
            skip_list: SkipList::encryption_suite(),
        }
    }
}

/// Why a verification did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The environment has no encryption support.
    EncryptionUnsupported,
    /// The skip-list disables the scenario for the table's format.
    Disabled {
        format: StorageFormat,
        scenario: String,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncryptionUnsupported => f.write_str("encryption is not supported"),
            Self::Disabled { format, scenario } => {
                write!(f, "scenario '{scenario}' is disabled for {format}")
            }
        }
    }
}

/// Summary of a passing verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub table: String,
    pub format: StorageFormat,
    pub rows_written: usize,
    pub rows_matched: usize,
    /// Whether the table was inside an encryption zone.
    pub protected: bool,
    pub elapsed: Duration,
}

/// Result of a verification that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Passed(VerificationReport),
    Skipped(SkipReason),
}

impl VerificationOutcome {
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed(_))
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Writes datasets into tables and checks they read back unchanged.
pub struct RoundTripVerifier {
    storage: Arc<dyn StorageBackend>,
    codecs: Arc<CodecRegistry>,
    config: VerifierConfig,
}

impl RoundTripVerifier {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        codecs: Arc<CodecRegistry>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            storage,
            codecs,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Why verifying a table stored as `format` would be skipped, if it would be.
    #[must_use]
    pub fn skip_reason(&self, format: StorageFormat) -> Option<SkipReason> {
        if !self.config.encryption_supported {
            return Some(SkipReason::EncryptionUnsupported);
        }
        if self
            .config
            .skip_list
            .is_disabled(format, &self.config.scenario)
        {
            return Some(SkipReason::Disabled {
                format,
                scenario: self.config.scenario.clone(),
            });
        }
        None
    }

    /// Replace the table's data files with `dataset`, written in index order,
    /// then read it back and compare. Verifying the same table again
    /// therefore sees only the latest dataset.
    ///
    /// # Errors
    ///
    /// - [`VerificationError::Codec`] if writing or reading fails.
    /// - [`VerificationError::ArityMismatch`], [`NullField`](VerificationError::NullField),
    ///   [`TypeMismatch`](VerificationError::TypeMismatch) or
    ///   [`ValueMismatch`](VerificationError::ValueMismatch) at the first
    ///   divergent field.
    /// - [`VerificationError::CountMismatch`] if the row counts differ.
    pub async fn verify(
        &self,
        descriptor: &TableDescriptor,
        dataset: &Dataset,
    ) -> Result<VerificationOutcome, VerificationError> {
        if let Some(reason) = self.skip_reason(descriptor.format) {
            info!(table = %descriptor.name, format = %descriptor.format, %reason, "verification skipped");
            return Ok(VerificationOutcome::Skipped(reason));
        }

        let started = Instant::now();
        let mut writer = self
            .codecs
            .open_writer(Arc::clone(&self.storage), descriptor)?;
        truncate_table(self.storage.as_ref(), descriptor).await?;
        for row in dataset {
            if let Err(e) = writer.write_row(row) {
                writer.abort();
                return Err(e.into());
            }
        }
        let written = writer.close().await?;

        let rows_matched = self.check_read_back(descriptor, dataset).await?;
        let report = VerificationReport {
            table: descriptor.name.clone(),
            format: descriptor.format,
            rows_written: written.rows,
            rows_matched,
            protected: descriptor.is_protected(),
            elapsed: started.elapsed(),
        };

        info!(
            table = %report.table,
            format = %report.format,
            rows = report.rows_matched,
            protected = report.protected,
            "round trip verified"
        );
        Ok(VerificationOutcome::Passed(report))
    }

    /// Read the table and compare it against `dataset` without writing.
    ///
    /// For a partitioned table the expected order is the dataset grouped by
    /// partition directory, preserving index order within each partition.
    ///
    /// Returns the number of rows matched.
    ///
    /// # Errors
    ///
    /// As for [`verify`](Self::verify), except that nothing is written.
    pub async fn check_read_back(
        &self,
        descriptor: &TableDescriptor,
        dataset: &Dataset,
    ) -> Result<usize, VerificationError> {
        let expected = expected_order(descriptor, dataset);
        let mut comparison = RowComparison::new(descriptor.row_columns().cloned().collect(), expected);

        let mut reader = self
            .codecs
            .open_reader(Arc::clone(&self.storage), descriptor)
            .await?;
        while let Some(row) = reader.next().await? {
            if let Err(e) = comparison.observe(&row) {
                warn!(table = %descriptor.name, error = %e, "round trip diverged");
                return Err(e);
            }
        }
        comparison.finish().inspect_err(|e| {
            warn!(table = %descriptor.name, error = %e, "round trip diverged");
        })
    }
}

impl fmt::Debug for RoundTripVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundTripVerifier")
            .field("scenario", &self.config.scenario)
            .finish_non_exhaustive()
    }
}

/// Dataset rows in the order a reader will return them.
fn expected_order<'a>(descriptor: &TableDescriptor, dataset: &'a Dataset) -> Vec<&'a Row> {
    let mut rows: Vec<&Row> = dataset.iter().collect();
    if descriptor.is_partitioned() {
        let split = descriptor.columns.len();
        rows.sort_by_cached_key(|row| {
            let partition = row.values().get(split..).unwrap_or_default();
            partition_dir(&descriptor.partition_columns, partition)
        });
    }
    rows
}

/// Compares rows read back against the expected rows, one at a time.
#[derive(Debug)]
pub struct RowComparison<'a> {
    columns: Vec<Column>,
    expected: Vec<&'a Row>,
    index: usize,
}

impl<'a> RowComparison<'a> {
    /// Compare against `expected` rows shaped like `columns`.
    #[must_use]
    pub fn new(columns: Vec<Column>, expected: Vec<&'a Row>) -> Self {
        Self {
            columns,
            expected,
            index: 0,
        }
    }

    /// Check the next row read back.
    ///
    /// Rows beyond the expected count are only counted.
    ///
    /// # Errors
    ///
    /// Returns the first divergence found in the row.
    pub fn observe(&mut self, actual: &Row) -> Result<(), VerificationError> {
        let index = self.index;
        self.index = self.index.saturating_add(1);
        let Some(expected) = self.expected.get(index) else {
            return Ok(());
        };

        if actual.len() != self.columns.len() {
            return Err(VerificationError::ArityMismatch {
                index,
                expected: self.columns.len(),
                actual: actual.len(),
            });
        }

        let fields = || self.columns.iter().zip(actual.values());

        // Every field is checked for null, then every type, then every value.
        if let Some((column, _)) = fields().find(|(_, value)| value.is_null()) {
            return Err(VerificationError::NullField {
                index,
                field: column.name.clone(),
            });
        }
        let mistyped = fields().find_map(|(column, value)| {
            value
                .column_type()
                .filter(|ty| *ty != column.column_type)
                .map(|ty| (column, ty))
        });
        if let Some((column, actual_type)) = mistyped {
            return Err(VerificationError::TypeMismatch {
                index,
                field: column.name.clone(),
                expected: column.column_type,
                actual: actual_type,
            });
        }
        for (position, (column, value)) in fields().enumerate() {
            let wanted = expected.get(position).cloned().unwrap_or(Value::Null);
            if *value != wanted {
                return Err(VerificationError::ValueMismatch {
                    index,
                    field: column.name.clone(),
                    expected: wanted,
                    actual: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Rows observed so far.
    #[must_use]
    pub fn observed(&self) -> usize {
        self.index
    }

    /// Finish after the reader is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::CountMismatch`] if fewer or more rows were
    /// observed than expected.
    pub fn finish(self) -> Result<usize, VerificationError> {
        if self.index == self.expected.len() {
            Ok(self.index)
        } else {
            Err(VerificationError::CountMismatch {
                expected: self.expected.len(),
                actual: self.index,
            })
        }
    }
}
