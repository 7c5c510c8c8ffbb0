// Query module - read operations over the pair table
pub mod executor;
pub mod parser;
pub mod result;
pub mod stats;

pub use executor::{
    execute_select, get_database_stats, query_protein_pairs, search_proteins_by_pattern,
    ScoreRange,
};
pub use parser::ReadQuery;
pub use result::{PairTable, QueryResult};
pub use stats::DatabaseStats;
