//! Storage format codecs and the table writer/reader built on them.
//!
//! A [`FormatCodec`] turns typed rows into the bytes of one file and back.
//! Codecs are synchronous and work on whole files; [`TableWriter`] and
//! [`TableReader`] handle the storage side: partition directories, part file
//! naming, and fetching files one at a time.
//!
//! Table layout beneath a table's location:
//!
//! ```text
//! <location>/part-00000.txt                      unpartitioned
//! <location>/p1=v1/p2=v2/part-00000.txt          partitioned by (p1, p2)
//! ```
//!
//! Partition values are percent-encoded in directory names; `NULL` is
//! written as `__HIVE_DEFAULT_PARTITION__`.

mod columnar;
mod json;
mod text;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cryptzone_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use columnar::ColumnarCodec;
pub use json::JsonLinesCodec;
pub use text::DelimitedTextCodec;

use crate::catalog::TableDescriptor;
use crate::error::CodecError;
use crate::types::{Column, Row, Value};

/// Directory value used for a `NULL` partition key.
pub const DEFAULT_PARTITION_NAME: &str = "__HIVE_DEFAULT_PARTITION__";

/// Physical encodings a table may declare.
///
/// Only some have a registered codec; the rest are recognized so that a
/// table declaring them fails with a precise "unsupported" error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    TextFile,
    JsonFile,
    RcFile,
    SequenceFile,
    Orc,
    Parquet,
    Avro,
}

impl StorageFormat {
    /// Every recognized format.
    pub const ALL: [Self; 7] = [
        Self::TextFile,
        Self::JsonFile,
        Self::RcFile,
        Self::SequenceFile,
        Self::Orc,
        Self::Parquet,
        Self::Avro,
    ];

    /// Name as written in `STORED AS` clauses.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TextFile => "textfile",
            Self::JsonFile => "jsonfile",
            Self::RcFile => "rcfile",
            Self::SequenceFile => "sequencefile",
            Self::Orc => "orc",
            Self::Parquet => "parquet",
            Self::Avro => "avro",
        }
    }

    /// File extension of part files in this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::TextFile => "txt",
            Self::JsonFile => "json",
            Self::RcFile => "rc",
            Self::SequenceFile => "seq",
            Self::Orc => "orc",
            Self::Parquet => "parquet",
            Self::Avro => "avro",
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StorageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| format!("unknown storage format '{}'", s.trim()))
    }
}

/// Encodes and decodes the rows of a single file.
pub trait FormatCodec: Send + Sync {
    /// The format this codec implements.
    fn format(&self) -> StorageFormat;

    /// Start encoding a file with the given data columns.
    fn encoder(&self, columns: &[Column]) -> Box<dyn RowEncoder>;

    /// Start decoding the bytes of one file.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Corrupt`] if a file header is malformed or does
    /// not describe `columns`.
    fn decoder(
        &self,
        columns: &[Column],
        bytes: Vec<u8>,
    ) -> Result<Box<dyn RowDecoder>, CodecError>;
}

/// Accumulates rows into the bytes of one file.
pub trait RowEncoder: Send {
    /// Append one row of data column values.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Corrupt`] if the row cannot be represented.
    fn encode_row(&mut self, values: &[Value]) -> Result<(), CodecError>;

    /// Finish the file and return its bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Corrupt`] if the buffered rows cannot be written.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, CodecError>;
}

/// Yields the rows of one file in order.
pub trait RowDecoder: Send {
    /// The next row's data column values, or `None` at end of file.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Corrupt`] if the bytes cannot be decoded.
    fn decode_row(&mut self) -> Result<Option<Vec<Value>>, CodecError>;
}

/// Check that `values` match `columns` in arity and type.
pub(crate) fn check_row(columns: &[Column], values: &[Value]) -> Result<(), String> {
    if values.len() != columns.len() {
        return Err(format!(
            "expected {} fields, got {}",
            columns.len(),
            values.len()
        ));
    }
    for (column, value) in columns.iter().zip(values) {
        if !value.fits(column.column_type) {
            return Err(format!(
                "column '{}' is {}, got {value}",
                column.name, column.column_type
            ));
        }
    }
    Ok(())
}

/// The set of codecs available to a catalog.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<StorageFormat, Arc<dyn FormatCodec>>,
}

impl CodecRegistry {
    /// A registry with no codecs.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// A registry with the built-in `textfile`, `jsonfile`, and `rcfile` codecs.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DelimitedTextCodec));
        registry.register(Arc::new(JsonLinesCodec));
        registry.register(Arc::new(ColumnarCodec));
        registry
    }

    /// Add or replace the codec for its format.
    pub fn register(&mut self, codec: Arc<dyn FormatCodec>) {
        self.codecs.insert(codec.format(), codec);
    }

    /// The codec for `format`, if registered.
    #[must_use]
    pub fn get(&self, format: StorageFormat) -> Option<Arc<dyn FormatCodec>> {
        self.codecs.get(&format).cloned()
    }

    /// Whether `format` has a codec.
    #[must_use]
    pub fn supports(&self, format: StorageFormat) -> bool {
        self.codecs.contains_key(&format)
    }

    /// Formats with a codec, in declaration order.
    #[must_use]
    pub fn formats(&self) -> Vec<StorageFormat> {
        let mut formats: Vec<StorageFormat> = self.codecs.keys().copied().collect();
        formats.sort();
        formats
    }

    fn codec(&self, format: StorageFormat) -> Result<Arc<dyn FormatCodec>, CodecError> {
        self.get(format)
            .ok_or(CodecError::UnsupportedFormat { format })
    }

    /// Open a writer appending to the table.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedFormat`] if the table's format has no codec.
    pub fn open_writer(
        &self,
        storage: Arc<dyn StorageBackend>,
        descriptor: &TableDescriptor,
    ) -> Result<TableWriter, CodecError> {
        let codec = self.codec(descriptor.format)?;
        Ok(TableWriter::new(storage, codec, descriptor.clone()))
    }

    /// Open a reader over the table's current files.
    ///
    /// # Errors
    ///
    /// - [`CodecError::UnsupportedFormat`] if the table's format has no codec.
    /// - [`CodecError::IoFailure`] if listing the table fails.
    pub async fn open_reader(
        &self,
        storage: Arc<dyn StorageBackend>,
        descriptor: &TableDescriptor,
    ) -> Result<TableReader, CodecError> {
        let codec = self.codec(descriptor.format)?;
        TableReader::open(storage, codec, descriptor.clone()).await
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

/// Outcome of [`TableWriter::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    /// Rows written.
    pub rows: usize,
    /// Keys of the part files created, in write order.
    pub files: Vec<String>,
}

/// Buffers rows for a table and stores them as part files on [`close`](Self::close).
///
/// Nothing reaches storage before `close`. A writer that is dropped or
/// [aborted](Self::abort) leaves the table untouched.
pub struct TableWriter {
    storage: Arc<dyn StorageBackend>,
    codec: Arc<dyn FormatCodec>,
    descriptor: TableDescriptor,
    /// Partition directory (relative, `""` when unpartitioned) → encoder.
    partitions: BTreeMap<String, Box<dyn RowEncoder>>,
    rows: usize,
    finished: bool,
}

impl TableWriter {
    fn new(
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn FormatCodec>,
        descriptor: TableDescriptor,
    ) -> Self {
        Self {
            storage,
            codec,
            descriptor,
            partitions: BTreeMap::new(),
            rows: 0,
            finished: false,
        }
    }

    /// Rows buffered so far.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Buffer one row: data columns followed by partition columns.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaMismatch`] if the row disagrees with the
    /// table in arity or type. The writer stays usable.
    pub fn write_row(&mut self, row: &Row) -> Result<(), CodecError> {
        let table = &self.descriptor.name;
        let data_len = self.descriptor.columns.len();
        let expected = data_len.saturating_add(self.descriptor.partition_columns.len());
        if row.len() != expected {
            return Err(CodecError::mismatch(
                table,
                format!("expected {expected} fields, got {}", row.len()),
            ));
        }

        let (data, partition) = row.values().split_at(data_len);
        check_row(&self.descriptor.columns, data).map_err(|r| CodecError::mismatch(table, r))?;
        check_row(&self.descriptor.partition_columns, partition)
            .map_err(|r| CodecError::mismatch(table, r))?;

        let dir = partition_dir(&self.descriptor.partition_columns, partition);
        let encoder = self
            .partitions
            .entry(dir)
            .or_insert_with(|| self.codec.encoder(&self.descriptor.columns));
        encoder.encode_row(data)?;
        self.rows = self.rows.saturating_add(1);
        Ok(())
    }

    /// Encode buffered rows and store one new part file per partition.
    ///
    /// If any file fails to store, files already stored by this call are
    /// deleted before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`CodecError::IoFailure`] if storage fails.
    /// - [`CodecError::Corrupt`] if a codec cannot finish a file.
    pub async fn close(mut self) -> Result<WriteSummary, CodecError> {
        self.finished = true;
        let partitions = std::mem::take(&mut self.partitions);
        let mut written: Vec<String> = Vec::with_capacity(partitions.len());

        for (dir, encoder) in partitions {
            let result = self.store_part(&dir, encoder).await;
            match result {
                Ok(key) => written.push(key),
                Err(e) => {
                    self.rollback(&written).await;
                    return Err(e);
                }
            }
        }

        debug!(
            table = %self.descriptor.name,
            rows = self.rows,
            files = written.len(),
            "table writer closed"
        );
        Ok(WriteSummary {
            rows: self.rows,
            files: written,
        })
    }

    /// Discard buffered rows without touching storage.
    pub fn abort(mut self) {
        self.finished = true;
        debug!(table = %self.descriptor.name, rows = self.rows, "table writer aborted");
    }

    async fn store_part(
        &self,
        dir: &str,
        encoder: Box<dyn RowEncoder>,
    ) -> Result<String, CodecError> {
        let bytes = encoder.finish()?;
        let dir = format!("{}{dir}", self.descriptor.location);
        let number = next_part_number(self.storage.as_ref(), &dir).await?;
        let key = format!(
            "{dir}part-{number:05}.{}",
            self.descriptor.format.extension()
        );
        self.storage.put(&key, &bytes).await?;
        Ok(key)
    }

    async fn rollback(&self, written: &[String]) {
        for key in written {
            if let Err(e) = self.storage.delete(key).await {
                warn!(key = %key, error = %e, "failed to roll back part file");
            }
        }
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if !self.finished && self.rows > 0 {
            warn!(
                table = %self.descriptor.name,
                rows = self.rows,
                "table writer dropped without close, buffered rows discarded"
            );
        }
    }
}

impl fmt::Debug for TableWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableWriter")
            .field("table", &self.descriptor.name)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

struct OpenFile {
    key: String,
    decoder: Box<dyn RowDecoder>,
    partition_values: Vec<Value>,
}

/// Lazily reads a table's rows, one file at a time, in key order.
pub struct TableReader {
    storage: Arc<dyn StorageBackend>,
    codec: Arc<dyn FormatCodec>,
    descriptor: TableDescriptor,
    pending: VecDeque<String>,
    current: Option<OpenFile>,
}

impl TableReader {
    async fn open(
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn FormatCodec>,
        descriptor: TableDescriptor,
    ) -> Result<Self, CodecError> {
        let pending = data_files(storage.as_ref(), &descriptor).await?.into();

        Ok(Self {
            storage,
            codec,
            descriptor,
            pending,
            current: None,
        })
    }

    /// Files not yet opened.
    #[must_use]
    pub fn remaining_files(&self) -> usize {
        self.pending.len()
    }

    /// The next row: data columns followed by partition columns.
    ///
    /// # Errors
    ///
    /// - [`CodecError::IoFailure`] if a file cannot be fetched.
    /// - [`CodecError::Corrupt`] if a file or partition directory cannot be decoded.
    pub async fn next(&mut self) -> Result<Option<Row>, CodecError> {
        loop {
            if let Some(open) = self.current.as_mut() {
                let decoded = open.decoder.decode_row().map_err(|e| e.in_file(&open.key))?;
                if let Some(mut values) = decoded {
                    values.extend(open.partition_values.iter().cloned());
                    return Ok(Some(Row::new(values)));
                }
                self.current = None;
            }

            let Some(key) = self.pending.pop_front() else {
                return Ok(None);
            };
            self.current = Some(self.open_file(key).await?);
        }
    }

    /// Read every remaining row.
    ///
    /// # Errors
    ///
    /// As for [`next`](Self::next).
    pub async fn collect_rows(mut self) -> Result<Vec<Row>, CodecError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn open_file(&self, key: String) -> Result<OpenFile, CodecError> {
        let bytes = self.storage.get(&key).await?.ok_or_else(|| {
            CodecError::corrupt(format!("{key}: file disappeared while reading"))
        })?;

        let relative = key
            .strip_prefix(&self.descriptor.location)
            .unwrap_or(key.as_str());
        let partition_values = parse_partition_dirs(&self.descriptor.partition_columns, relative)
            .map_err(|e| e.in_file(&key))?;
        let decoder = self
            .codec
            .decoder(&self.descriptor.columns, bytes)
            .map_err(|e| e.in_file(&key))?;

        debug!(key = %key, "opened part file");
        Ok(OpenFile {
            key,
            decoder,
            partition_values,
        })
    }
}

impl fmt::Debug for TableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableReader")
            .field("table", &self.descriptor.name)
            .field("remaining_files", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Delete the table's data files, leaving the table empty.
///
/// Only files a [`TableReader`] would read are removed. Returns how many.
///
/// # Errors
///
/// Returns [`CodecError::IoFailure`] if listing or deleting fails.
pub async fn truncate_table(
    storage: &dyn StorageBackend,
    descriptor: &TableDescriptor,
) -> Result<usize, CodecError> {
    let files = data_files(storage, descriptor).await?;
    for key in &files {
        storage.delete(key).await?;
    }
    if !files.is_empty() {
        debug!(table = %descriptor.name, files = files.len(), "table truncated");
    }
    Ok(files.len())
}

/// The table's data files in key order: files with the format's extension at
/// the partition depth, skipping `_` and `.` prefixed names.
async fn data_files(
    storage: &dyn StorageBackend,
    descriptor: &TableDescriptor,
) -> Result<Vec<String>, CodecError> {
    let suffix = format!(".{}", descriptor.format.extension());
    let depth = descriptor.partition_columns.len();
    let files = storage
        .list(&descriptor.location)
        .await?
        .into_iter()
        .filter(|key| {
            let Some(relative) = key.strip_prefix(&descriptor.location) else {
                return false;
            };
            let segments: Vec<&str> = relative.split('/').collect();
            let Some((file, dirs)) = segments.split_last() else {
                return false;
            };
            dirs.len() == depth
                && file.ends_with(&suffix)
                && !file.starts_with(['_', '.'])
                && dirs.iter().all(|d| !d.starts_with(['_', '.']))
        })
        .collect();
    Ok(files)
}

/// Relative partition directory for the given partition values, ending in
/// `/`, or `""` for an unpartitioned table.
#[must_use]
pub fn partition_dir(columns: &[Column], values: &[Value]) -> String {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            let literal = value.to_literal().map_or_else(
                || DEFAULT_PARTITION_NAME.to_owned(),
                |l| urlencoding::encode(&l).into_owned(),
            );
            format!("{}={literal}/", column.name)
        })
        .collect()
}

/// Parse the `col=value/` segments leading `relative` into typed values.
fn parse_partition_dirs(columns: &[Column], relative: &str) -> Result<Vec<Value>, CodecError> {
    let mut segments = relative.split('/');
    columns
        .iter()
        .map(|column| -> Result<Value, CodecError> {
            let segment = segments.next().unwrap_or_default();
            let raw = segment
                .strip_prefix(column.name.as_str())
                .and_then(|rest| rest.strip_prefix('='))
                .ok_or_else(|| {
                    CodecError::corrupt(format!(
                        "partition directory '{segment}' does not name column '{}'",
                        column.name
                    ))
                })?;
            if raw == DEFAULT_PARTITION_NAME {
                return Ok(Value::Null);
            }
            let decoded = urlencoding::decode(raw).map_err(|e| {
                CodecError::corrupt(format!("partition value '{raw}' is not valid: {e}"))
            })?;
            column.column_type.parse_literal(&decoded).ok_or_else(|| {
                CodecError::corrupt(format!(
                    "partition value '{decoded}' is not a valid {}",
                    column.column_type
                ))
            })
        })
        .collect()
}

/// One past the highest `part-NNNNN` number directly inside `dir`.
async fn next_part_number(storage: &dyn StorageBackend, dir: &str) -> Result<u32, CodecError> {
    let highest = storage
        .list(dir)
        .await?
        .iter()
        .filter_map(|key| key.strip_prefix(dir))
        .filter(|name| !name.contains('/'))
        .filter_map(|name| name.strip_prefix("part-"))
        .filter_map(|rest| rest.split('.').next())
        .filter_map(|digits| digits.parse::<u32>().ok())
        .max();
    Ok(highest.map_or(0, |n| n.saturating_add(1)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::row;
    use crate::types::{ColumnType, Dataset};
    use cryptzone_storage::{MemoryBackend, StorageError};

    /// Memory store that refuses writes beneath one directory.
    struct RefusingBackend {
        inner: MemoryBackend,
        refused: &'static str,
    }

    #[async_trait::async_trait]
    impl StorageBackend for RefusingBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            if key.contains(self.refused) {
                return Err(StorageError::Write {
                    key: key.to_owned(),
                    reason: "disk full".to_owned(),
                });
            }
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list(prefix).await
        }
    }

    fn descriptor(format: StorageFormat, partitioned: bool) -> TableDescriptor {
        let (columns, partition_columns) = if partitioned {
            (
                vec![Column::new("b", ColumnType::String)],
                vec![Column::new("a", ColumnType::Int)],
            )
        } else {
            (Dataset::basic_columns(), Vec::new())
        };
        TableDescriptor {
            name: "t".to_owned(),
            columns,
            partition_columns,
            format,
            location: "warehouse/t/".to_owned(),
            zone: None,
        }
    }

    async fn write(
        registry: &CodecRegistry,
        storage: &Arc<dyn StorageBackend>,
        table: &TableDescriptor,
        rows: &[Row],
    ) -> WriteSummary {
        let mut writer = registry.open_writer(Arc::clone(storage), table).unwrap();
        for row in rows {
            writer.write_row(row).unwrap();
        }
        writer.close().await.unwrap()
    }

    #[test]
    fn format_names_parse() {
        for format in StorageFormat::ALL {
            assert_eq!(format.name().parse::<StorageFormat>().unwrap(), format);
        }
        assert_eq!("TEXTFILE".parse::<StorageFormat>().unwrap(), StorageFormat::TextFile);
        assert!("csv".parse::<StorageFormat>().is_err());
    }

    #[test]
    fn defaults_cover_three_formats() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(
            registry.formats(),
            vec![StorageFormat::TextFile, StorageFormat::JsonFile, StorageFormat::RcFile]
        );
        assert!(!registry.supports(StorageFormat::Parquet));
    }

    #[tokio::test]
    async fn unregistered_format_is_unsupported() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::Orc, false);
        assert!(matches!(
            registry.open_writer(Arc::clone(&storage), &table),
            Err(CodecError::UnsupportedFormat { format: StorageFormat::Orc })
        ));
        assert!(matches!(
            registry.open_reader(storage, &table).await,
            Err(CodecError::UnsupportedFormat { .. })
        ));
    }

    #[tokio::test]
    async fn write_row_rejects_schema_mismatch() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::TextFile, false);
        let mut writer = registry.open_writer(storage, &table).unwrap();

        assert!(matches!(
            writer.write_row(&row![1]),
            Err(CodecError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            writer.write_row(&row!["S1S", 1]),
            Err(CodecError::SchemaMismatch { .. })
        ));
        writer.write_row(&row![1, "S1S"]).unwrap();
        assert_eq!(writer.rows(), 1);
        writer.abort();
    }

    #[tokio::test]
    async fn dropped_writer_stores_nothing() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::TextFile, false);
        {
            let mut writer = registry.open_writer(Arc::clone(&storage), &table).unwrap();
            writer.write_row(&row![1, "S1S"]).unwrap();
        }
        assert!(storage.list("warehouse/t/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn appends_get_new_part_numbers_and_keep_order() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::TextFile, false);

        let first = write(&registry, &storage, &table, &[row![1, "S1S"]]).await;
        let second = write(&registry, &storage, &table, &[row![2, "S2S"]]).await;
        assert_eq!(first.files, vec!["warehouse/t/part-00000.txt"]);
        assert_eq!(second.files, vec!["warehouse/t/part-00001.txt"]);

        let reader = registry.open_reader(storage, &table).await.unwrap();
        assert_eq!(reader.remaining_files(), 2);
        let rows = reader.collect_rows().await.unwrap();
        assert_eq!(rows, vec![row![1, "S1S"], row![2, "S2S"]]);
    }

    #[tokio::test]
    async fn partitions_become_directories() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::TextFile, true);

        let rows = [row!["S1S", 2], row!["S2S", 1], row!["S3S", 2]];
        let summary = write(&registry, &storage, &table, &rows).await;
        assert_eq!(
            summary.files,
            vec!["warehouse/t/a=1/part-00000.txt", "warehouse/t/a=2/part-00000.txt"]
        );

        let read = registry
            .open_reader(storage, &table)
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        assert_eq!(read, vec![row!["S2S", 1], row!["S1S", 2], row!["S3S", 2]]);
    }

    #[tokio::test]
    async fn failed_close_removes_parts_already_stored() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(RefusingBackend {
            inner: MemoryBackend::new(),
            refused: "a=2/",
        });
        let table = descriptor(StorageFormat::TextFile, true);

        let mut writer = registry.open_writer(Arc::clone(&storage), &table).unwrap();
        for row in [row!["S1S", 1], row!["S2S", 2], row!["S3S", 3]] {
            writer.write_row(&row).unwrap();
        }
        let result = writer.close().await;
        assert!(matches!(
            result,
            Err(CodecError::IoFailure(StorageError::Write { ref key, .. })) if key == "warehouse/t/a=2/part-00000.txt"
        ));
        assert!(storage.list("warehouse/t/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncate_removes_only_data_files() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::TextFile, true);
        write(&registry, &storage, &table, &[row!["S1S", 1], row!["S2S", 2]]).await;
        storage.put("warehouse/t/_SUCCESS", b"").await.unwrap();
        storage.put("warehouse/t/a=1/part-00000.json", b"[]").await.unwrap();

        let removed = truncate_table(storage.as_ref(), &table).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            storage.list("warehouse/t/").await.unwrap(),
            vec!["warehouse/t/_SUCCESS", "warehouse/t/a=1/part-00000.json"]
        );
    }

    #[tokio::test]
    async fn null_and_escaped_partition_values() {
        let columns = vec![Column::new("p", ColumnType::String)];
        assert_eq!(
            partition_dir(&columns, &[Value::Null]),
            format!("p={DEFAULT_PARTITION_NAME}/")
        );
        assert_eq!(partition_dir(&columns, &[Value::from("a/b c")]), "p=a%2Fb%20c/");

        let parsed = parse_partition_dirs(&columns, "p=a%2Fb%20c/part-00000.txt").unwrap();
        assert_eq!(parsed, vec![Value::from("a/b c")]);
        let parsed =
            parse_partition_dirs(&columns, &format!("p={DEFAULT_PARTITION_NAME}/x")).unwrap();
        assert_eq!(parsed, vec![Value::Null]);
        assert!(matches!(
            parse_partition_dirs(&columns, "q=1/x"),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn reader_ignores_foreign_files() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::TextFile, false);
        write(&registry, &storage, &table, &[row![1, "S1S"]]).await;
        storage.put("warehouse/t/_SUCCESS", b"").await.unwrap();
        storage.put("warehouse/t/.part-00000.txt.crc", b"x").await.unwrap();
        storage.put("warehouse/t/part-00000.json", b"[]").await.unwrap();

        let rows = registry
            .open_reader(storage, &table)
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        assert_eq!(rows, vec![row![1, "S1S"]]);
    }

    #[tokio::test]
    async fn empty_table_reads_nothing() {
        let registry = CodecRegistry::with_defaults();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = descriptor(StorageFormat::RcFile, false);
        let mut reader = registry.open_reader(storage, &table).await.unwrap();
        assert!(reader.next().await.unwrap().is_none());
        assert!(reader.next().await.unwrap().is_none());
    }
}
