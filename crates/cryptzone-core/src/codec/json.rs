//! `jsonfile`: one JSON array per line.
//!
//! Non-finite doubles have no JSON number form and are written as the
//! strings `"NaN"`, `"inf"` and `"-inf"`.

use serde_json::{Number, Value as Json};

use crate::error::CodecError;
use crate::types::{Column, ColumnType, Value};

use super::{FormatCodec, RowDecoder, RowEncoder, StorageFormat, check_row};

/// Codec for [`StorageFormat::JsonFile`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesCodec;

impl FormatCodec for JsonLinesCodec {
    fn format(&self) -> StorageFormat {
        StorageFormat::JsonFile
    }

    fn encoder(&self, columns: &[Column]) -> Box<dyn RowEncoder> {
        Box::new(JsonEncoder {
            columns: columns.to_vec(),
            out: Vec::new(),
        })
    }

    fn decoder(
        &self,
        columns: &[Column],
        bytes: Vec<u8>,
    ) -> Result<Box<dyn RowDecoder>, CodecError> {
        let text = String::from_utf8(bytes)
            .map_err(|e| CodecError::corrupt(format!("json file is not UTF-8: {e}")))?;
        let lines: Vec<String> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Box::new(JsonDecoder {
            columns: columns.to_vec(),
            lines: lines.into_iter().enumerate(),
        }))
    }
}

struct JsonEncoder {
    columns: Vec<Column>,
    out: Vec<u8>,
}

impl RowEncoder for JsonEncoder {
    fn encode_row(&mut self, values: &[Value]) -> Result<(), CodecError> {
        check_row(&self.columns, values)
            .map_err(|r| CodecError::corrupt(format!("cannot encode row: {r}")))?;
        let array = Json::Array(values.iter().map(to_json).collect());
        serde_json::to_writer(&mut self.out, &array)
            .map_err(|e| CodecError::corrupt(format!("cannot encode row: {e}")))?;
        self.out.push(b'\n');
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, CodecError> {
        Ok(self.out)
    }
}

struct JsonDecoder {
    columns: Vec<Column>,
    lines: std::iter::Enumerate<std::vec::IntoIter<String>>,
}

impl RowDecoder for JsonDecoder {
    fn decode_row(&mut self) -> Result<Option<Vec<Value>>, CodecError> {
        let Some((index, line)) = self.lines.next() else {
            return Ok(None);
        };
        let line_no = index.saturating_add(1);
        let corrupt = |reason: String| CodecError::corrupt(format!("line {line_no}: {reason}"));

        let parsed: Json = serde_json::from_str(&line).map_err(|e| corrupt(e.to_string()))?;
        let Json::Array(fields) = parsed else {
            return Err(corrupt("expected a JSON array".to_owned()));
        };
        if fields.len() != self.columns.len() {
            return Err(corrupt(format!(
                "expected {} fields, got {}",
                self.columns.len(),
                fields.len()
            )));
        }

        self.columns
            .iter()
            .zip(&fields)
            .map(|(column, field)| {
                from_json(column.column_type, field).ok_or_else(|| {
                    corrupt(format!(
                        "column '{}': {field} is not a valid {}",
                        column.name, column.column_type
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int(v) => Json::from(*v),
        Value::BigInt(v) => Json::from(*v),
        Value::Boolean(v) => Json::Bool(*v),
        Value::Double(v) => Number::from_f64(*v).map_or_else(
            || Json::String(v.to_string()),
            Json::Number,
        ),
        Value::Text(v) => Json::String(v.clone()),
    }
}

fn from_json(ty: ColumnType, field: &Json) -> Option<Value> {
    if field.is_null() {
        return Some(Value::Null);
    }
    match ty {
        ColumnType::Int => field
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::Int),
        ColumnType::BigInt => field.as_i64().map(Value::BigInt),
        ColumnType::Boolean => field.as_bool().map(Value::Boolean),
        ColumnType::Double => match field {
            Json::Number(n) => n.as_f64().map(Value::Double),
            Json::String(s) => match s.as_str() {
                "NaN" | "inf" | "-inf" => s.parse().ok().map(Value::Double),
                _ => None,
            },
            _ => None,
        },
        ColumnType::String => field.as_str().map(Value::from),
    }
}
