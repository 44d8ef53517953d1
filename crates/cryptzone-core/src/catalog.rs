//! Table catalog.
//!
//! Maps table names to descriptors: schema, partition columns, storage
//! format and physical location. Descriptors are persisted as JSON at
//! `_catalog/tables` and reloaded when a catalog is opened.
//!
//! A descriptor's zone is resolved through the [`ZoneManager`] each time it
//! is looked up, so a zone created over a table's location after the table
//! was created still applies.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cryptzone_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::codec::{CodecRegistry, StorageFormat};
use crate::error::CatalogError;
use crate::types::Column;
use crate::zone::{Zone, ZoneManager, normalize_dir};

/// Storage key for the serialized catalog.
pub const CATALOG_KEY: &str = "_catalog/tables";

/// Default warehouse directory.
pub const DEFAULT_WAREHOUSE_DIR: &str = "warehouse/";

/// Catalog settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Directory under which tables without an explicit location live.
    pub warehouse_dir: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            warehouse_dir: DEFAULT_WAREHOUSE_DIR.to_owned(),
        }
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name (lowercase).
    pub name: String,
    /// Data columns, in file order.
    pub columns: Vec<Column>,
    /// Partition columns, in directory nesting order. Empty if unpartitioned.
    #[serde(default)]
    pub partition_columns: Vec<Column>,
    /// Physical encoding of the table's files.
    pub format: StorageFormat,
    /// Directory holding the table's files, ending in `/`.
    pub location: String,
    /// Zone protecting the location, resolved at lookup.
    #[serde(skip)]
    pub zone: Option<Zone>,
}

impl TableDescriptor {
    /// Whether the table has partition columns.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }

    /// Whether the table's location lies inside an encryption zone.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.zone.is_some()
    }

    /// Data columns followed by partition columns: the shape of a row.
    pub fn row_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().chain(&self.partition_columns)
    }

    /// Number of fields in a row.
    #[must_use]
    pub fn row_arity(&self) -> usize {
        self.columns.len().saturating_add(self.partition_columns.len())
    }
}

/// Request to create a table.
///
/// ```
/// use cryptzone_core::catalog::CreateTable;
/// use cryptzone_core::codec::StorageFormat;
/// use cryptzone_core::types::Column;
///
/// let request = CreateTable::new("encrypted_table", Column::parse_list("a int, b string").unwrap())
///     .stored_as(StorageFormat::RcFile)
///     .location("warehouse/encryptedTable");
/// assert_eq!(request.name, "encrypted_table");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub partition_columns: Vec<Column>,
    pub format: StorageFormat,
    /// Explicit location; defaults to `<warehouse_dir><name>/`.
    pub location: Option<String>,
}

impl CreateTable {
    /// An unpartitioned `textfile` table in the warehouse directory.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            partition_columns: Vec::new(),
            format: StorageFormat::TextFile,
            location: None,
        }
    }

    #[must_use]
    pub fn partitioned_by(mut self, columns: Vec<Column>) -> Self {
        self.partition_columns = columns;
        self
    }

    #[must_use]
    pub fn stored_as(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn location(mut self, path: impl Into<String>) -> Self {
        self.location = Some(path.into());
        self
    }
}

/// The set of defined tables, persisted through a storage backend.
pub struct TableCatalog {
    storage: Arc<dyn StorageBackend>,
    codecs: Arc<CodecRegistry>,
    zones: Arc<ZoneManager>,
    warehouse_dir: String,
    tables: RwLock<BTreeMap<String, TableDescriptor>>,
}

impl TableCatalog {
    /// Open the catalog, loading any tables persisted in `storage`.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::InvalidLocation`] if the warehouse directory is invalid.
    /// - [`CatalogError::Storage`] if reading the persisted catalog fails.
    /// - [`CatalogError::Serialization`] if the persisted catalog is malformed.
    pub async fn new(
        storage: Arc<dyn StorageBackend>,
        codecs: Arc<CodecRegistry>,
        zones: Arc<ZoneManager>,
        config: CatalogConfig,
    ) -> Result<Self, CatalogError> {
        let warehouse_dir =
            normalize_dir(&config.warehouse_dir).map_err(|e| CatalogError::InvalidLocation {
                table: String::new(),
                reason: e.to_string(),
            })?;

        let tables: BTreeMap<String, TableDescriptor> = match storage.get(CATALOG_KEY).await? {
            Some(data) => {
                serde_json::from_slice(&data).map_err(|e| CatalogError::Serialization {
                    reason: e.to_string(),
                })?
            }
            None => BTreeMap::new(),
        };
        if !tables.is_empty() {
            info!(tables = tables.len(), "catalog loaded");
        }

        Ok(Self {
            storage,
            codecs,
            zones,
            warehouse_dir,
            tables: RwLock::new(tables),
        })
    }

    /// The directory managed tables are created under.
    #[must_use]
    pub fn warehouse_dir(&self) -> &str {
        &self.warehouse_dir
    }

    /// Create a table.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::InvalidName`] if the name is not an identifier.
    /// - [`CatalogError::InvalidSchema`] if there are no data columns, a
    ///   column name is not an identifier, or a name repeats.
    /// - [`CatalogError::UnsupportedFormat`] if the format has no codec.
    /// - [`CatalogError::InvalidLocation`] if the location is invalid.
    /// - [`CatalogError::DuplicateName`] if the table exists.
    /// - [`CatalogError::Storage`] if the catalog cannot be persisted.
    pub async fn create_table(&self, request: CreateTable) -> Result<TableDescriptor, CatalogError> {
        let name = request.name.trim().to_ascii_lowercase();
        if !is_identifier(&name) {
            return Err(CatalogError::InvalidName { name: request.name });
        }
        let (columns, partition_columns) =
            validate_schema(&name, request.columns, request.partition_columns)?;
        if !self.codecs.supports(request.format) {
            return Err(CatalogError::UnsupportedFormat {
                table: name,
                format: request.format,
            });
        }
        let location = match &request.location {
            Some(path) => normalize_dir(path),
            None => normalize_dir(&format!("{}{name}", self.warehouse_dir)),
        }
        .map_err(|e| CatalogError::InvalidLocation {
            table: name.clone(),
            reason: e.to_string(),
        })?;

        let descriptor = TableDescriptor {
            name: name.clone(),
            columns,
            partition_columns,
            format: request.format,
            location,
            zone: None,
        };

        let mut tables = self.tables.write().await;
        if tables.contains_key(&name) {
            return Err(CatalogError::DuplicateName { name });
        }
        tables.insert(name.clone(), descriptor.clone());
        if let Err(e) = self.persist(&tables).await {
            tables.remove(&name);
            return Err(e);
        }
        drop(tables);

        info!(
            table = %name,
            format = %descriptor.format,
            location = %descriptor.location,
            "table created"
        );
        Ok(self.resolve_zone(descriptor).await)
    }

    /// Drop a table and delete its files. Dropping a missing table is a no-op.
    ///
    /// Returns whether a table was dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Storage`] if the catalog cannot be persisted.
    /// The table stays dropped if only deleting its files fails.
    pub async fn drop_table(&self, name: &str) -> Result<bool, CatalogError> {
        let Some(descriptor) = self.unregister(name).await? else {
            return Ok(false);
        };
        match self.storage.delete_prefix(&descriptor.location).await {
            Ok(files) => info!(table = %descriptor.name, files, "table dropped"),
            Err(e) => {
                warn!(table = %descriptor.name, error = %e, "table dropped but its files remain");
            }
        }
        Ok(true)
    }

    /// Remove a table from the catalog, leaving its files untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Storage`] if the catalog cannot be persisted,
    /// in which case the table stays registered.
    pub(crate) async fn unregister(
        &self,
        name: &str,
    ) -> Result<Option<TableDescriptor>, CatalogError> {
        let name = name.trim().to_ascii_lowercase();
        let mut tables = self.tables.write().await;
        let Some(descriptor) = tables.remove(&name) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&tables).await {
            tables.insert(name, descriptor);
            return Err(e);
        }
        Ok(Some(descriptor))
    }

    /// The descriptor for `name`, with its zone resolved.
    pub async fn lookup(&self, name: &str) -> Option<TableDescriptor> {
        let name = name.trim().to_ascii_lowercase();
        let descriptor = self.tables.read().await.get(&name).cloned()?;
        Some(self.resolve_zone(descriptor).await)
    }

    /// All table names, sorted.
    pub async fn list_tables(&self) -> Vec<String> {
        self.tables.read().await.keys().cloned().collect()
    }

    async fn resolve_zone(&self, mut descriptor: TableDescriptor) -> TableDescriptor {
        descriptor.zone = self.zones.zone_for(&descriptor.location).await;
        descriptor
    }

    async fn persist(&self, tables: &BTreeMap<String, TableDescriptor>) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec(tables).map_err(|e| CatalogError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(CATALOG_KEY, &bytes).await?;
        Ok(())
    }
}

impl fmt::Debug for TableCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCatalog")
            .field("warehouse_dir", &self.warehouse_dir)
            .finish_non_exhaustive()
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Lowercase column names and reject empty, malformed, or repeated ones.
fn validate_schema(
    table: &str,
    columns: Vec<Column>,
    partition_columns: Vec<Column>,
) -> Result<(Vec<Column>, Vec<Column>), CatalogError> {
    let invalid = |reason: String| CatalogError::InvalidSchema {
        table: table.to_owned(),
        reason,
    };
    if columns.is_empty() {
        return Err(invalid("a table needs at least one data column".to_owned()));
    }

    let lower = |cols: Vec<Column>| -> Vec<Column> {
        cols.into_iter()
            .map(|c| Column::new(c.name.trim().to_ascii_lowercase(), c.column_type))
            .collect()
    };
    let columns = lower(columns);
    let partition_columns = lower(partition_columns);

    let mut seen = HashSet::new();
    for column in columns.iter().chain(&partition_columns) {
        if !is_identifier(&column.name) {
            return Err(invalid(format!("invalid column name '{}'", column.name)));
        }
        if !seen.insert(column.name.as_str()) {
            return Err(invalid(format!("column '{}' is declared twice", column.name)));
        }
    }
    Ok((columns, partition_columns))
}

/// Scenario names that are deliberately not run for a storage format.
///
/// Entries are glob patterns matched against the scenario name, so
/// `parquet:read_*` disables every read scenario for `parquet`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList {
    entries: BTreeMap<StorageFormat, BTreeSet<String>>,
}

impl SkipList {
    /// An empty skip-list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The skip-list of the encrypted-table read suite: `parquet` is not
    /// exercised by its basic, partitioned, projection, or encrypted-table
    /// read scenarios.
    #[must_use]
    pub fn encryption_suite() -> Self {
        let mut list = Self::new();
        for scenario in [
            "read_basic",
            "read_partitioned_basic",
            "projections_basic",
            "read_encrypted_table",
        ] {
            list.disable(StorageFormat::Parquet, scenario);
        }
        list
    }

    /// Disable scenarios matching `pattern` for `format`.
    pub fn disable(&mut self, format: StorageFormat, pattern: impl Into<String>) -> &mut Self {
        self.entries.entry(format).or_default().insert(pattern.into());
        self
    }

    /// Whether `scenario` is disabled for `format`.
    #[must_use]
    pub fn is_disabled(&self, format: StorageFormat, scenario: &str) -> bool {
        self.entries
            .get(&format)
            .is_some_and(|patterns| patterns.iter().any(|p| glob_match::glob_match(p, scenario)))
    }

    /// Number of `(format, pattern)` entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(format, pattern)` entries in order.
    pub fn entries(&self) -> impl Iterator<Item = (StorageFormat, &str)> {
        self.entries
            .iter()
            .flat_map(|(format, patterns)| patterns.iter().map(move |p| (*format, p.as_str())))
    }
}

impl fmt::Display for SkipList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (format, pattern)) in self.entries().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{format}:{pattern}")?;
        }
        Ok(())
    }
}

impl FromStr for SkipList {
    type Err = String;

    /// Parse `format:pattern` entries separated by commas, e.g.
    /// `parquet:read_basic,orc:*`. An empty string is an empty list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut list = Self::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (format, pattern) = entry
                .split_once(':')
                .ok_or_else(|| format!("expected 'format:scenario', got '{entry}'"))?;
            let pattern = pattern.trim();
            if pattern.is_empty() {
                return Err(format!("empty scenario pattern in '{entry}'"));
            }
            list.disable(format.parse()?, pattern);
        }
        Ok(list)
    }
}
