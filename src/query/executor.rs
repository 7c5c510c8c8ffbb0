// Query executor
// Read operations over the pair table. Each one exists twice: as a method on
// an open PairDatabase, and as a free function that opens the database file,
// runs the query and closes it again.

use super::parser::ReadQuery;
use super::result::{PairTable, QueryResult};
use super::stats::{round2, DatabaseStats};
use crate::error::{Error, Result};
use crate::storage::{PairDatabase, PairRow, Value};
use log::debug;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

// Bounds are bound as NULL when absent, so one cached statement serves
// every combination. Equal scores keep insertion order.
const PAIRS_FOR_PROTEIN: &str = "
    SELECT protein1, protein2, score
    FROM protein_pairs
    WHERE (protein1 = ?1 OR protein2 = ?1)
      AND (?2 IS NULL OR score >= ?2)
      AND (?3 IS NULL OR score <= ?3)
    ORDER BY score DESC, id ASC";

const UNIQUE_PROTEINS: &str = "
    SELECT COUNT(*) FROM (
        SELECT protein1 AS protein FROM protein_pairs
        UNION
        SELECT protein2 AS protein FROM protein_pairs
    )";

const PROTEINS_LIKE: &str = "
    SELECT protein FROM (
        SELECT protein1 AS protein FROM protein_pairs WHERE protein1 LIKE ?1
        UNION
        SELECT protein2 AS protein FROM protein_pairs WHERE protein2 LIKE ?1
    ) ORDER BY protein";

/// Inclusive score bounds for a pair lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ScoreRange {
    /// No bounds
    pub fn any() -> Self {
        Self::default()
    }

    pub fn at_least(min: i64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn at_most(max: i64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn between(min: i64, max: i64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, score: i64) -> bool {
        self.min.map_or(true, |min| score >= min) && self.max.map_or(true, |max| score <= max)
    }
}

impl PairDatabase {
    /// All rows where `protein` is either member of the pair, within
    /// `range`, ordered by score descending
    pub fn query_protein_pairs(&self, protein: &str, range: ScoreRange) -> Result<PairTable> {
        debug!("Querying pairs for '{}' with {:?}", protein, range);
        let mut stmt = self.connection().prepare_cached(PAIRS_FOR_PROTEIN)?;
        let rows = stmt
            .query_map(params![protein, range.min, range.max], |row| {
                Ok(PairRow {
                    protein1: row.get(0)?,
                    protein2: row.get(1)?,
                    score: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(PairTable::new(rows))
    }

    /// Row count, distinct proteins and score summary for the whole table
    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.connection();

        let total_pairs: i64 = conn.query_row("SELECT COUNT(*) FROM protein_pairs", [], |row| {
            row.get(0)
        })?;
        let unique_proteins: i64 = conn.query_row(UNIQUE_PROTEINS, [], |row| row.get(0))?;
        let (min_score, max_score, avg_score): (Option<i64>, Option<i64>, Option<f64>) = conn
            .query_row(
                "SELECT MIN(score), MAX(score), AVG(score) FROM protein_pairs",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        Ok(DatabaseStats {
            total_pairs: total_pairs as u64,
            unique_proteins: unique_proteins as u64,
            min_score,
            max_score,
            avg_score: avg_score.map(round2),
        })
    }

    /// Distinct identifiers from either column matching a SQL LIKE pattern,
    /// sorted. `%` matches any run of characters and `_` a single one;
    /// SQLite compares ASCII letters case-insensitively.
    pub fn search_proteins_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        debug!("Searching proteins like '{}'", pattern);
        let mut stmt = self.connection().prepare_cached(PROTEINS_LIKE)?;
        let proteins = stmt
            .query_map([pattern], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(proteins)
    }

    /// protein1 of the first stored row, if any
    pub fn sample_protein(&self) -> Result<Option<String>> {
        let protein = self
            .connection()
            .query_row(
                "SELECT protein1 FROM protein_pairs ORDER BY id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(protein)
    }

    /// Run a validated read-only SQL query and collect every row
    pub fn execute_select(&self, sql: &str) -> Result<QueryResult> {
        let query = ReadQuery::parse(sql)?;
        debug!("Executing pass-through query: {}", query.sql());

        let mut stmt = self.connection().prepare(query.sql())?;
        // SQLite's own verdict, in case the parser let something through
        if !stmt.readonly() {
            return Err(Error::NotReadOnly(query.sql().to_string()));
        }

        let column_names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = column_names.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let values = (0..column_count)
                .map(|i| row.get_ref(i).map(Value::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.push(values);
        }

        Ok(QueryResult { column_names, rows })
    }
}

/// Open the database at `db_path` read-only for the duration of `f`
fn with_database<T>(db_path: &Path, f: impl FnOnce(&PairDatabase) -> Result<T>) -> Result<T> {
    let db = PairDatabase::open_read_only(db_path)?;
    f(&db)
}

/// Pair lookup against a database file
pub fn query_protein_pairs(db_path: &Path, protein: &str, range: ScoreRange) -> Result<PairTable> {
    with_database(db_path, |db| db.query_protein_pairs(protein, range))
}

/// Statistics for a database file
pub fn get_database_stats(db_path: &Path) -> Result<DatabaseStats> {
    with_database(db_path, PairDatabase::stats)
}

/// Pattern search against a database file
pub fn search_proteins_by_pattern(db_path: &Path, pattern: &str) -> Result<Vec<String>> {
    with_database(db_path, |db| db.search_proteins_by_pattern(pattern))
}

/// Read-only SQL against a database file
pub fn execute_select(db_path: &Path, sql: &str) -> Result<QueryResult> {
    with_database(db_path, |db| db.execute_select(sql))
}
