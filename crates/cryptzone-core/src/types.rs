//! Typed values, rows, columns, and datasets.
//!
//! The value model is a small closed set of primitives (`int`, `bigint`,
//! `boolean`, `double`, `string`) plus `NULL`. Values compare by exact
//! representation: doubles are equal only when their bit patterns are, so a
//! round trip that changes a double in the last ulp is a mismatch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// Boolean.
    Boolean,
    /// 64-bit IEEE-754 floating point.
    Double,
    /// UTF-8 string.
    #[serde(alias = "text")]
    String,
}

impl ColumnType {
    /// Type name as written in schema strings.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Boolean => "boolean",
            Self::Double => "double",
            Self::String => "string",
        }
    }

    /// One-byte tag used by binary formats.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Int => 1,
            Self::BigInt => 2,
            Self::Boolean => 3,
            Self::Double => 4,
            Self::String => 5,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Int),
            2 => Some(Self::BigInt),
            3 => Some(Self::Boolean),
            4 => Some(Self::Double),
            5 => Some(Self::String),
            _ => None,
        }
    }

    /// Parse a textual literal of this type.
    ///
    /// Returns `None` if the literal is not a valid value of the type.
    #[must_use]
    pub fn parse_literal(self, literal: &str) -> Option<Value> {
        match self {
            Self::Int => literal.parse().ok().map(Value::Int),
            Self::BigInt => literal.parse().ok().map(Value::BigInt),
            Self::Boolean => match literal {
                "true" | "TRUE" | "True" => Some(Value::Boolean(true)),
                "false" | "FALSE" | "False" => Some(Value::Boolean(false)),
                _ => None,
            },
            Self::Double => literal.parse().ok().map(Value::Double),
            Self::String => Some(Value::Text(literal.to_owned())),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(Self::Int),
            "bigint" | "long" => Ok(Self::BigInt),
            "boolean" | "bool" => Ok(Self::Boolean),
            "double" => Ok(Self::Double),
            "string" | "text" | "chararray" => Ok(Self::String),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name (lowercase identifier).
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    /// Create a column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// Parse a comma-separated `name type` list such as `"a int, b string"`.
    ///
    /// An empty or whitespace-only string yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed entry.
    pub fn parse_list(spec: &str) -> Result<Vec<Self>, String> {
        if spec.trim().is_empty() {
            return Ok(Vec::new());
        }
        spec.split(',')
            .map(|entry| {
                let mut parts = entry.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(name), Some(ty), None) => {
                        Ok(Self::new(name.to_ascii_lowercase(), ty.parse()?))
                    }
                    _ => Err(format!("expected 'name type', got '{}'", entry.trim())),
                }
            })
            .collect()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.column_type)
    }
}

/// A single typed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i32),
    BigInt(i64),
    Boolean(bool),
    Double(f64),
    Text(String),
}

impl Value {
    /// Runtime type, or `None` for `NULL`.
    #[must_use]
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(ColumnType::Int),
            Self::BigInt(_) => Some(ColumnType::BigInt),
            Self::Boolean(_) => Some(ColumnType::Boolean),
            Self::Double(_) => Some(ColumnType::Double),
            Self::Text(_) => Some(ColumnType::String),
        }
    }

    /// Whether this value is `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value may be stored in a column of type `ty`.
    #[must_use]
    pub fn fits(&self, ty: ColumnType) -> bool {
        self.column_type().is_none_or(|actual| actual == ty)
    }

    /// Textual literal understood by [`ColumnType::parse_literal`]; `None` for `NULL`.
    #[must_use]
    pub fn to_literal(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Int(v) => Some(v.to_string()),
            Self::BigInt(v) => Some(v.to_string()),
            Self::Boolean(v) => Some(v.to_string()),
            Self::Double(v) => Some(v.to_string()),
            Self::Text(v) => Some(v.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Text(v) => write!(f, "{v:?}"),
            other => match other.to_literal() {
                Some(literal) => f.write_str(&literal),
                None => Ok(()),
            },
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// An ordered sequence of values matching a table's columns positionally.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row(Vec<Value>);

impl Row {
    /// Create a row from values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Borrow the values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Consume the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

/// Build a [`Row`] from heterogeneous literals: `row![1, "S1S"]`.
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        $crate::types::Row::new(vec![$($crate::types::Value::from($v)),*])
    };
}

/// The expected contents of a table, indexed by insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dataset {
    rows: Vec<Row>,
}

impl Dataset {
    /// Create an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(a int, b string)` grid `(i, "S{j}S")` for `i, j` in `1..=loop_size`,
    /// in row-major order. `basic(3)` is the nine-row fixture.
    #[must_use]
    pub fn basic(loop_size: i32) -> Self {
        (1..=loop_size)
            .flat_map(|i| (1..=loop_size).map(move |j| row![i, format!("S{j}S")]))
            .collect()
    }

    /// Schema of [`basic`](Self::basic) datasets.
    #[must_use]
    pub fn basic_columns() -> Vec<Column> {
        vec![
            Column::new("a", ColumnType::Int),
            Column::new("b", ColumnType::String),
        ]
    }

    /// Append a row; its index is the previous length.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Row at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate rows in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Borrow rows as a slice.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

impl FromIterator<Row> for Dataset {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
