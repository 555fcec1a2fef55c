use std::sync::Arc;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Values that can be bound as statement parameters or read back from a row.
///
/// ```rust
/// use sqlite_bridge::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value, stored as 0/1
    Bool(bool),
    /// Timestamp value, stored as text
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value, stored as text
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// A fetched row, shaped by the connection's [`RowFactory`].
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// Positional values only.
    Tuple(Vec<RowValues>),
    /// Values with the column names of the producing statement.
    Named {
        columns: Arc<Vec<String>>,
        values: Vec<RowValues>,
    },
}

impl Row {
    /// Values in column order, whatever the row shape.
    #[must_use]
    pub fn values(&self) -> &[RowValues] {
        match self {
            Row::Tuple(values) | Row::Named { values, .. } => values,
        }
    }

    #[must_use]
    pub fn into_values(self) -> Vec<RowValues> {
        match self {
            Row::Tuple(values) | Row::Named { values, .. } => values,
        }
    }

    #[must_use]
    pub fn get_index(&self, idx: usize) -> Option<&RowValues> {
        self.values().get(idx)
    }

    /// Look a value up by column name. Always `None` for [`Row::Tuple`].
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        match self {
            Row::Tuple(_) => None,
            Row::Named { columns, values } => columns
                .iter()
                .position(|col| col == column_name)
                .and_then(|idx| values.get(idx)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

/// Transaction mode used for implicit `BEGIN` statements.
///
/// `Option<IsolationLevel>` is what connections carry: `None` means autocommit
/// (no implicit transactions at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Plain `BEGIN`; locks are taken lazily.
    #[default]
    Deferred,
    /// `BEGIN IMMEDIATE`; the write lock is taken at once.
    Immediate,
    /// `BEGIN EXCLUSIVE`
    Exclusive,
}

impl IsolationLevel {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::Deferred => "DEFERRED",
            IsolationLevel::Immediate => "IMMEDIATE",
            IsolationLevel::Exclusive => "EXCLUSIVE",
        }
    }
}

/// How fetched rows are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RowFactory {
    #[default]
    Tuple,
    Named,
}

/// How TEXT columns are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextFactory {
    /// Strict UTF-8; invalid text is an error.
    #[default]
    Utf8,
    /// UTF-8 with replacement characters for invalid sequences.
    Lossy,
    /// Raw bytes, returned as [`RowValues::Blob`].
    Bytes,
}
