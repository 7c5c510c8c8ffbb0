// Error types
// Every fallible operation in the library returns pairdb::Result

use thiserror::Error;

/// Errors raised while decoding input files, loading rows or running queries
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The input file is neither a .npy container nor JSON
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// The .npy container or the numpy objects inside it are not usable
    #[error("invalid .npy file: {0}")]
    Npy(String),

    #[error("pickle error at byte {offset}: {message}")]
    Pickle { offset: usize, message: String },

    #[error("input mapping is missing key '{0}'")]
    MissingKey(&'static str),

    #[error("input has {pairs} pairs but {measurements} measurements")]
    LengthMismatch { pairs: usize, measurements: usize },

    #[error("pair {index} is malformed: {reason}")]
    MalformedPair { index: usize, reason: String },

    #[error("measurement {index} cannot be converted to an integer score: {value}")]
    ScoreConversion { index: usize, value: String },

    #[error("SQL parsing error: {0}")]
    SqlParse(String),

    /// Pass-through SQL must be a single statement that only reads
    #[error("only a single read-only query is allowed: {0}")]
    NotReadOnly(String),
}

pub type Result<T> = std::result::Result<T, Error>;
