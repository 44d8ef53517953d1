//! `rcfile`: a columnar binary layout with checksummed row groups.
//!
//! ```text
//! file      := magic "RCZ1" | u16 column_count | u8 type_tag * column_count | group*
//! group     := u32 row_count | column_block * column_count | u32 crc32
//! column    := u32 len | null_bitmap (ceil(rows / 8) bytes) | values
//! ```
//!
//! All integers are little-endian. A set bit in the null bitmap marks a
//! `NULL`; only non-null values are stored. Strings are a `u32` byte length
//! followed by UTF-8 bytes, doubles are stored by bit pattern. The CRC32
//! covers the whole group from `row_count` through the last column block.

use crate::error::CodecError;
use crate::types::{Column, ColumnType, Value};

use super::{FormatCodec, RowDecoder, RowEncoder, StorageFormat, check_row};

const MAGIC: &[u8; 4] = b"RCZ1";

/// Rows per row group.
pub const ROW_GROUP_SIZE: usize = 1024;

/// Codec for [`StorageFormat::RcFile`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ColumnarCodec;

impl FormatCodec for ColumnarCodec {
    fn format(&self) -> StorageFormat {
        StorageFormat::RcFile
    }

    fn encoder(&self, columns: &[Column]) -> Box<dyn RowEncoder> {
        Box::new(ColumnarEncoder {
            columns: columns.to_vec(),
            group: Vec::new(),
            groups: Vec::new(),
        })
    }

    fn decoder(
        &self,
        columns: &[Column],
        bytes: Vec<u8>,
    ) -> Result<Box<dyn RowDecoder>, CodecError> {
        let mut decoder = ColumnarDecoder {
            types: columns.iter().map(|c| c.column_type).collect(),
            bytes,
            pos: 0,
            group: Vec::new(),
            group_rows: 0,
            next_row: 0,
        };
        decoder.read_header()?;
        Ok(Box::new(decoder))
    }
}

struct ColumnarEncoder {
    columns: Vec<Column>,
    /// Rows of the row group being filled.
    group: Vec<Vec<Value>>,
    /// Encoded, checksummed row groups.
    groups: Vec<u8>,
}

impl ColumnarEncoder {
    fn flush_group(&mut self) -> Result<(), CodecError> {
        if self.group.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.group);
        let start = self.groups.len();
        put_len(&mut self.groups, rows.len())?;

        for index in 0..self.columns.len() {
            let block = encode_column(&rows, index)?;
            put_len(&mut self.groups, block.len())?;
            self.groups.extend_from_slice(&block);
        }

        let crc = crc32fast::hash(&self.groups[start..]);
        self.groups.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }
}

impl RowEncoder for ColumnarEncoder {
    fn encode_row(&mut self, values: &[Value]) -> Result<(), CodecError> {
        check_row(&self.columns, values)
            .map_err(|r| CodecError::corrupt(format!("cannot encode row: {r}")))?;
        self.group.push(values.to_vec());
        if self.group.len() >= ROW_GROUP_SIZE {
            self.flush_group()?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>, CodecError> {
        self.flush_group()?;
        let count = u16::try_from(self.columns.len())
            .map_err(|_| CodecError::corrupt("too many columns for rcfile"))?;

        let mut out = Vec::with_capacity(
            MAGIC
                .len()
                .saturating_add(2)
                .saturating_add(self.columns.len())
                .saturating_add(self.groups.len()),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&count.to_le_bytes());
        out.extend(self.columns.iter().map(|c| c.column_type.tag()));
        out.extend_from_slice(&self.groups);
        Ok(out)
    }
}

fn encode_column(rows: &[Vec<Value>], index: usize) -> Result<Vec<u8>, CodecError> {
    let mut bitmap = vec![0u8; rows.len().div_ceil(8)];
    let mut values = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        match row.get(index) {
            None | Some(Value::Null) => {
                if let Some(byte) = bitmap.get_mut(row_index / 8) {
                    *byte |= 1 << (row_index % 8);
                }
            }
            Some(Value::Int(v)) => values.extend_from_slice(&v.to_le_bytes()),
            Some(Value::BigInt(v)) => values.extend_from_slice(&v.to_le_bytes()),
            Some(Value::Boolean(v)) => values.push(u8::from(*v)),
            Some(Value::Double(v)) => values.extend_from_slice(&v.to_bits().to_le_bytes()),
            Some(Value::Text(s)) => {
                put_len(&mut values, s.len())?;
                values.extend_from_slice(s.as_bytes());
            }
        }
    }

    bitmap.extend_from_slice(&values);
    Ok(bitmap)
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len)
        .map_err(|_| CodecError::corrupt(format!("length {len} exceeds u32")))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

struct ColumnarDecoder {
    types: Vec<ColumnType>,
    bytes: Vec<u8>,
    pos: usize,
    /// Decoded values of the current row group, column-major.
    group: Vec<Vec<Value>>,
    group_rows: usize,
    next_row: usize,
}

impl ColumnarDecoder {
    fn read_header(&mut self) -> Result<(), CodecError> {
        let mut cursor = Cursor::new(&self.bytes, 0);
        if cursor.take(MAGIC.len())? != MAGIC {
            return Err(CodecError::corrupt("not an rcfile: bad magic"));
        }
        let count = usize::from(cursor.u16()?);
        if count != self.types.len() {
            return Err(CodecError::corrupt(format!(
                "file has {count} columns, table has {}",
                self.types.len()
            )));
        }
        for (index, &declared) in self.types.iter().enumerate() {
            let tag = cursor.u8()?;
            match ColumnType::from_tag(tag) {
                Some(stored) if stored == declared => {}
                Some(stored) => {
                    return Err(CodecError::corrupt(format!(
                        "column {index} stored as {stored}, declared {declared}"
                    )));
                }
                None => {
                    return Err(CodecError::corrupt(format!(
                        "column {index} has unknown type tag {tag}"
                    )));
                }
            }
        }
        self.pos = cursor.pos;
        Ok(())
    }

    fn read_group(&mut self) -> Result<(), CodecError> {
        let start = self.pos;
        let mut cursor = Cursor::new(&self.bytes, start);
        let rows = cursor.read_len()?;

        let mut group = Vec::with_capacity(self.types.len());
        for &ty in &self.types {
            let len = cursor.read_len()?;
            let block = cursor.take(len)?;
            group.push(decode_column(ty, block, rows)?);
        }

        let covered = self
            .bytes
            .get(start..cursor.pos)
            .ok_or_else(|| CodecError::corrupt("row group out of bounds"))?;
        let expected = crc32fast::hash(covered);
        let stored = cursor.u32()?;
        if stored != expected {
            return Err(CodecError::corrupt(format!(
                "row group at byte {start} failed checksum: stored {stored:#010x}, computed {expected:#010x}"
            )));
        }

        self.pos = cursor.pos;
        self.group = group;
        self.group_rows = rows;
        self.next_row = 0;
        Ok(())
    }
}

impl RowDecoder for ColumnarDecoder {
    fn decode_row(&mut self) -> Result<Option<Vec<Value>>, CodecError> {
        while self.next_row >= self.group_rows {
            if self.pos >= self.bytes.len() {
                return Ok(None);
            }
            self.read_group()?;
        }

        let row_index = self.next_row;
        self.next_row = self.next_row.saturating_add(1);
        let row = self
            .group
            .iter_mut()
            .map(|column| {
                column
                    .get_mut(row_index)
                    .map(|v| std::mem::replace(v, Value::Null))
                    .unwrap_or(Value::Null)
            })
            .collect();
        Ok(Some(row))
    }
}

fn decode_column(ty: ColumnType, block: &[u8], rows: usize) -> Result<Vec<Value>, CodecError> {
    let bitmap_len = rows.div_ceil(8);
    let mut cursor = Cursor::new(block, 0);
    let bitmap = cursor.take(bitmap_len)?;

    let mut values = Vec::with_capacity(rows.min(ROW_GROUP_SIZE));
    for row_index in 0..rows {
        let is_null = bitmap
            .get(row_index / 8)
            .is_some_and(|byte| byte & (1 << (row_index % 8)) != 0);
        if is_null {
            values.push(Value::Null);
            continue;
        }
        let value = match ty {
            ColumnType::Int => Value::Int(i32::from_le_bytes(cursor.array()?)),
            ColumnType::BigInt => Value::BigInt(i64::from_le_bytes(cursor.array()?)),
            ColumnType::Boolean => match cursor.u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(CodecError::corrupt(format!("invalid boolean byte {other}")));
                }
            },
            ColumnType::Double => Value::Double(f64::from_bits(u64::from_le_bytes(cursor.array()?))),
            ColumnType::String => {
                let len = cursor.read_len()?;
                let bytes = cursor.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| CodecError::corrupt(format!("string is not UTF-8: {e}")))?;
                Value::from(s)
            }
        };
        values.push(value);
    }

    if cursor.pos != block.len() {
        return Err(CodecError::corrupt(format!(
            "column block has {} trailing bytes",
            block.len().saturating_sub(cursor.pos)
        )));
    }
    Ok(values)
}

/// Bounds-checked little-endian reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                CodecError::corrupt(format!(
                    "unexpected end of data: need {n} bytes at offset {}",
                    self.pos
                ))
            })?;
        let bytes = self.bytes;
        let slice = bytes
            .get(self.pos..end)
            .ok_or_else(|| CodecError::corrupt("unexpected end of data"))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        <[u8; N]>::try_from(slice).map_err(|_| CodecError::corrupt("short read"))
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        usize::try_from(self.u32()?).map_err(|_| CodecError::corrupt("length exceeds usize"))
    }
}
