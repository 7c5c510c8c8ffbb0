// pairdb - protein pair scores in SQLite
// This is the library root that exposes the public API:
// decode a pairs/measurements source, load it into a table, query it.

pub mod error;
pub mod input;
pub mod query;
pub mod storage;

// Re-export commonly used types for convenience
pub use error::{Error, Result};
pub use input::{load_pair_set, Measurement, Pair, PairSet};
pub use query::{
    execute_select, get_database_stats, query_protein_pairs, search_proteins_by_pattern,
    DatabaseStats, PairTable, QueryResult, ReadQuery, ScoreRange,
};
pub use storage::{
    convert_npy_to_sql, convert_with_options, LoadSummary, LoaderOptions, PairDatabase, PairRow,
    Value, DEFAULT_BATCH_SIZE,
};
