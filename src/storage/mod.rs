// Storage module - handles persistence of protein pairs in SQLite
// The schema lives in `schema`, bulk loading in `loader`

pub mod loader;
pub mod schema;

pub use loader::{
    convert_npy_to_sql, convert_with_options, LoadSummary, LoaderOptions, DEFAULT_BATCH_SIZE,
};
pub use schema::PairDatabase;

use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One stored pair as returned by the pair lookup
///
/// The `id` column is left out on purpose: lookups and CSV exports only
/// carry the three data columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairRow {
    pub protein1: String,
    pub protein2: String,
    pub score: i64,
}

impl PairRow {
    pub fn new(protein1: impl Into<String>, protein2: impl Into<String>, score: i64) -> Self {
        Self {
            protein1: protein1.into(),
            protein2: protein2.into(),
            score,
        }
    }

    /// Column names in output order
    pub const COLUMNS: [&'static str; 3] = ["protein1", "protein2", "score"];

    pub fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.protein1.clone()),
            Value::Text(self.protein2.clone()),
            Value::Integer(self.score),
        ]
    }
}

/// A single cell of an arbitrary query result
/// These are SQLite's storage classes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Integer(7).to_string(), "7");
        assert_eq!(Value::Real(2.5).to_string(), "2.5");
        assert_eq!(Value::Text("P1".to_string()).to_string(), "P1");
        assert_eq!(Value::Blob(vec![1, 2]).to_string(), "<2 bytes>");
    }

    #[test]
    fn test_from_value_ref() {
        assert_eq!(Value::from(ValueRef::Text(b"Q9")), Value::Text("Q9".to_string()));
        assert_eq!(Value::from(ValueRef::Integer(3)), Value::Integer(3));
    }

    #[test]
    fn test_pair_row_values() {
        let row = PairRow::new("P1", "P2", 10);
        assert_eq!(
            row.values(),
            vec![
                Value::Text("P1".to_string()),
                Value::Text("P2".to_string()),
                Value::Integer(10)
            ]
        );
    }
}
