//! `textfile`: tab-delimited lines, one row per line.
//!
//! `NULL` is written as `\N`. Text escapes `\`, tab, newline and carriage
//! return with a backslash so that every row occupies exactly one line.
//! On read, missing trailing fields are `NULL`, extra fields are ignored and a
//! `\r` before the line break is dropped.

use crate::error::CodecError;
use crate::types::{Column, ColumnType, Value};

use super::{FormatCodec, RowDecoder, RowEncoder, StorageFormat, check_row};

const FIELD_DELIMITER: char = '\t';
const NULL_MARKER: &str = "\\N";

/// Codec for [`StorageFormat::TextFile`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DelimitedTextCodec;

impl FormatCodec for DelimitedTextCodec {
    fn format(&self) -> StorageFormat {
        StorageFormat::TextFile
    }

    fn encoder(&self, columns: &[Column]) -> Box<dyn RowEncoder> {
        Box::new(TextEncoder {
            columns: columns.to_vec(),
            out: String::new(),
        })
    }

    fn decoder(
        &self,
        columns: &[Column],
        bytes: Vec<u8>,
    ) -> Result<Box<dyn RowDecoder>, CodecError> {
        let text = String::from_utf8(bytes)
            .map_err(|e| CodecError::corrupt(format!("text file is not UTF-8: {e}")))?;
        Ok(Box::new(TextDecoder {
            columns: columns.iter().map(|c| c.column_type).collect(),
            text,
            pos: 0,
            line: 0,
        }))
    }
}

struct TextEncoder {
    columns: Vec<Column>,
    out: String,
}

impl RowEncoder for TextEncoder {
    fn encode_row(&mut self, values: &[Value]) -> Result<(), CodecError> {
        check_row(&self.columns, values)
            .map_err(|r| CodecError::corrupt(format!("cannot encode row: {r}")))?;
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.out.push(FIELD_DELIMITER);
            }
            match value {
                Value::Null => self.out.push_str(NULL_MARKER),
                Value::Text(s) => escape_into(&mut self.out, s),
                other => {
                    if let Some(literal) = other.to_literal() {
                        self.out.push_str(&literal);
                    }
                }
            }
        }
        self.out.push('\n');
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, CodecError> {
        Ok(self.out.into_bytes())
    }
}

struct TextDecoder {
    columns: Vec<ColumnType>,
    text: String,
    pos: usize,
    line: usize,
}

impl RowDecoder for TextDecoder {
    fn decode_row(&mut self) -> Result<Option<Vec<Value>>, CodecError> {
        let rest = self.text.get(self.pos..).unwrap_or_default();
        if rest.is_empty() {
            return Ok(None);
        }
        let (line, consumed) = match rest.find('\n') {
            Some(end) => (&rest[..end], end.saturating_add(1)),
            None => (rest, rest.len()),
        };
        let line = line.strip_suffix('\r').unwrap_or(line);
        self.line = self.line.saturating_add(1);

        let mut fields = line.split(FIELD_DELIMITER);
        let values = self
            .columns
            .iter()
            .map(|&ty| match fields.next() {
                None | Some(NULL_MARKER) => Ok(Value::Null),
                Some(raw) => {
                    let unescaped = unescape(raw);
                    ty.parse_literal(&unescaped).ok_or_else(|| {
                        CodecError::corrupt(format!(
                            "line {}: '{unescaped}' is not a valid {ty}",
                            self.line
                        ))
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.pos = self.pos.saturating_add(consumed);
        Ok(Some(values))
    }
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

/// Reverse [`escape_into`]. Unknown escapes are kept verbatim.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Dataset;

    fn encode(columns: &[Column], rows: &[Vec<Value>]) -> Vec<u8> {
        let mut encoder = DelimitedTextCodec.encoder(columns);
        for row in rows {
            encoder.encode_row(row).unwrap();
        }
        encoder.finish().unwrap()
    }

    fn decode(columns: &[Column], bytes: Vec<u8>) -> Vec<Vec<Value>> {
        let mut decoder = DelimitedTextCodec.decoder(columns, bytes).unwrap();
        let mut rows = Vec::new();
        while let Some(row) = decoder.decode_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn basic_rows_are_tab_separated_lines() {
        let columns = Dataset::basic_columns();
        let bytes = encode(
            &columns,
            &[
                vec![Value::Int(1), Value::from("S1S")],
                vec![Value::Int(1), Value::from("S2S")],
            ],
        );
        assert_eq!(bytes, b"1\tS1S\n1\tS2S\n");
    }

    #[test]
    fn nulls_and_control_characters_survive() {
        let columns = vec![
            Column::new("s", ColumnType::String),
            Column::new("n", ColumnType::BigInt),
        ];
        let rows = vec![
            vec![Value::from("tab\there\nnew\\line\r"), Value::Null],
            vec![Value::from("\\N"), Value::BigInt(-1)],
            vec![Value::Null, Value::BigInt(i64::MIN)],
            vec![Value::from(""), Value::BigInt(0)],
        ];
        let bytes = encode(&columns, &rows);
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 4);
        assert_eq!(decode(&columns, bytes), rows);
    }

    #[test]
    fn doubles_and_booleans_roundtrip_exactly() {
        let columns = vec![
            Column::new("d", ColumnType::Double),
            Column::new("b", ColumnType::Boolean),
        ];
        let rows = vec![
            vec![Value::Double(0.1 + 0.2), Value::Boolean(true)],
            vec![Value::Double(-0.0), Value::Boolean(false)],
            vec![Value::Double(1e300), Value::Null],
        ];
        assert_eq!(decode(&columns, encode(&columns, &rows)), rows);
    }

    #[test]
    fn short_lines_pad_with_null_and_long_lines_truncate() {
        let columns = Dataset::basic_columns();
        let rows = decode(&columns, b"1\n2\tS1S\textra\n".to_vec());
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::Null],
                vec![Value::Int(2), Value::from("S1S")],
            ]
        );
    }

    #[test]
    fn missing_final_newline_is_accepted() {
        let columns = Dataset::basic_columns();
        assert_eq!(
            decode(&columns, b"3\tS3S".to_vec()),
            vec![vec![Value::Int(3), Value::from("S3S")]]
        );
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let columns = Dataset::basic_columns();
        assert_eq!(
            decode(&columns, b"1\tS1S\r\n2\t\\N\r\n3\tS3S\r".to_vec()),
            vec![
                vec![Value::Int(1), Value::from("S1S")],
                vec![Value::Int(2), Value::Null],
                vec![Value::Int(3), Value::from("S3S")],
            ]
        );
    }

    #[test]
    fn bad_literal_is_corrupt() {
        let columns = Dataset::basic_columns();
        let mut decoder = DelimitedTextCodec
            .decoder(&columns, b"x\tS1S\n".to_vec())
            .unwrap();
        assert!(matches!(decoder.decode_row(), Err(CodecError::Corrupt { .. })));
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let columns = Dataset::basic_columns();
        assert!(matches!(
            DelimitedTextCodec.decoder(&columns, vec![0xff, 0xfe]),
            Err(CodecError::Corrupt { .. })
        ));
    }
}
