//! Value types for replguard-rdbc
//!
//! The catalog and metadata queries issued by replguard only ever bind and
//! read a handful of SQL types: booleans, integers, text and text arrays.
//! Anything else the server returns is decoded as text.

use crate::error::{Error, Result};

/// A bound parameter or a decoded column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL. As a parameter it binds as a `text` NULL, so it is only
    /// accepted where the server infers a text-like type; write
    /// `$1::text::bigint` or similar for other types.
    Null,
    Bool(bool),
    /// `int2` and `int4`
    Int32(i32),
    /// `int8`; relation sizes and counts
    Int64(i64),
    /// `text`, `name`, `"char"` and every type without its own variant
    String(String),
    /// Bound as `text[]`
    Array(Vec<Value>),
}

impl Value {
    /// `text[]` parameter from a list of names
    pub fn text_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Booleans, plus the `t`/`f` text form of a cast boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s == "t" || s == "true" => Some(true),
            Self::String(s) if s == "f" || s == "false" => Some(false),
            _ => None,
        }
    }

    /// Integers of either width; numeric text is parsed
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One result row; columns keep the order of the select list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Row from `(column, value)` pairs, mostly for scripted test doubles
    pub fn from_pairs<I, C, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<Value>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(c, v)| (c.into(), v.into()))
            .unzip();
        Self { columns, values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at a select-list position
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value of a column; names compare case-insensitively like unquoted SQL
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    /// Text column that must be present and non-null
    pub fn require_str(&self, name: &str) -> Result<&str> {
        match self.get_by_name(name) {
            Some(value) => value
                .as_str()
                .ok_or_else(|| Error::decode(name, format!("expected text, got {:?}", value))),
            None => Err(Error::decode(name, "no such column")),
        }
    }

    /// Integer column that must be present and non-null
    pub fn require_i64(&self, name: &str) -> Result<i64> {
        match self.get_by_name(name) {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| Error::decode(name, format!("expected integer, got {:?}", value))),
            None => Err(Error::decode(name, "no such column")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_array() {
        match Value::text_array(["public", "sales"]) {
            Value::Array(items) => assert_eq!(items, vec![Value::from("public"), Value::from("sales")]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_null_column_is_a_decode_error() {
        let row = Row::from_pairs([("tgenabled", Value::Null)]);
        let err = row.require_str("tgenabled").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Decode);
        assert!(err.to_string().contains("tgenabled"));
    }
}
