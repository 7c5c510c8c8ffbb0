// Bulk loader
// Rows are buffered and flushed in fixed-size batches through one cached
// INSERT statement. The whole load is a single transaction: if anything
// fails, nothing is committed.

use super::schema::PairDatabase;
use crate::error::Result;
use crate::input::{load_pair_set, PairSet};
use log::{debug, info};
use rusqlite::{params, CachedStatement};
use std::path::Path;

/// Rows per flushed batch
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

const INSERT_ROW: &str = "INSERT INTO protein_pairs (protein1, protein2, score) VALUES (?1, ?2, ?3)";

/// Tuning knobs for a load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    pub batch_size: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// What a load did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows_inserted: usize,
    pub batches: usize,
}

type PendingRow<'a> = (&'a str, &'a str, i64);

impl PairDatabase {
    /// Append every (pair, measurement) row of `set` to the table
    ///
    /// Rows are never deduplicated: loading the same set twice stores it
    /// twice. Scores are coerced to integers here, so a bad measurement
    /// aborts the load and rolls back everything before it.
    pub fn insert_pairs(&mut self, set: &PairSet, options: &LoaderOptions) -> Result<LoadSummary> {
        let batch_size = options.batch_size.max(1);
        let mut summary = LoadSummary::default();

        let tx = self.connection_mut().transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_ROW)?;
            let mut batch: Vec<PendingRow> = Vec::with_capacity(batch_size.min(set.len()));

            for (index, (pair, measurement)) in set.iter().enumerate() {
                let score = measurement.to_score(index)?;
                batch.push((pair.protein1.as_str(), pair.protein2.as_str(), score));

                if batch.len() >= batch_size {
                    flush(&mut stmt, &mut batch, &mut summary)?;
                }
            }

            if !batch.is_empty() {
                flush(&mut stmt, &mut batch, &mut summary)?;
            }
        }
        tx.commit()?;

        Ok(summary)
    }
}

fn flush(
    stmt: &mut CachedStatement<'_>,
    batch: &mut Vec<PendingRow<'_>>,
    summary: &mut LoadSummary,
) -> Result<()> {
    let count = batch.len();
    for (protein1, protein2, score) in batch.drain(..) {
        stmt.execute(params![protein1, protein2, score])?;
    }
    summary.rows_inserted += count;
    summary.batches += 1;
    debug!(
        "Flushed batch {} ({} rows, {} total)",
        summary.batches, count, summary.rows_inserted
    );
    Ok(())
}

/// Decode `npy_path` and append its rows to the database at `db_path`,
/// creating the table and indexes first if needed
///
/// Calling this twice on the same database duplicates every row; the CLI
/// guards against that by skipping conversion when the file exists.
pub fn convert_npy_to_sql(npy_path: &Path, db_path: &Path) -> Result<LoadSummary> {
    convert_with_options(npy_path, db_path, &LoaderOptions::default())
}

/// `convert_npy_to_sql` with explicit loader options
pub fn convert_with_options(
    npy_path: &Path,
    db_path: &Path,
    options: &LoaderOptions,
) -> Result<LoadSummary> {
    info!("Loading data from {}...", npy_path.display());
    let set = load_pair_set(npy_path)?;
    info!(
        "Found {} pairs with {} measurements",
        set.pairs().len(),
        set.measurements().len()
    );

    let mut db = PairDatabase::open(db_path)?;
    db.create_schema()?;

    info!("Inserting data into database...");
    let summary = db.insert_pairs(&set, options)?;
    info!(
        "Database created successfully at {} ({} rows in {} batches)",
        db_path.display(),
        summary.rows_inserted,
        summary.batches
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::input::{Measurement, Pair};
    use crate::query::DatabaseStats;

    fn sample_set() -> PairSet {
        PairSet::new(
            vec![Pair::new("P1", "P2"), Pair::new("P2", "P3"), Pair::new("P1", "P3")],
            vec![
                Measurement::Integer(10),
                Measurement::Integer(60),
                Measurement::Integer(30),
            ],
        )
        .unwrap()
    }

    fn fresh_db() -> PairDatabase {
        let db = PairDatabase::open_in_memory().unwrap();
        db.create_schema().unwrap();
        db
    }

    #[test]
    fn test_insert_counts_rows() {
        let mut db = fresh_db();
        let summary = db.insert_pairs(&sample_set(), &LoaderOptions::default()).unwrap();

        assert_eq!(summary, LoadSummary { rows_inserted: 3, batches: 1 });
        assert_eq!(db.row_count().unwrap(), 3);
    }

    #[test]
    fn test_batches_split_with_remainder() {
        let mut db = fresh_db();
        let options = LoaderOptions { batch_size: 2 };
        let summary = db.insert_pairs(&sample_set(), &options).unwrap();

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.rows_inserted, 3);
    }

    #[test]
    fn test_exactly_full_final_batch() {
        let mut db = fresh_db();
        let set = PairSet::new(
            vec![
                Pair::new("P1", "P2"),
                Pair::new("P2", "P3"),
                Pair::new("P1", "P3"),
                Pair::new("P3", "P4"),
            ],
            (1..=4).map(Measurement::Integer).collect(),
        )
        .unwrap();

        let summary = db.insert_pairs(&set, &LoaderOptions { batch_size: 2 }).unwrap();
        assert_eq!(summary, LoadSummary { rows_inserted: 4, batches: 2 });
        assert_eq!(db.row_count().unwrap(), 4);
    }

    #[test]
    fn test_empty_set_loads_nothing() {
        let mut db = fresh_db();
        let set = PairSet::new(Vec::new(), Vec::new()).unwrap();

        let summary = db.insert_pairs(&set, &LoaderOptions::default()).unwrap();
        assert_eq!(summary, LoadSummary::default());
        assert_eq!(db.row_count().unwrap(), 0);
        assert_eq!(db.stats().unwrap(), DatabaseStats::empty());
    }

    #[test]
    fn test_scores_and_order_preserved() {
        let mut db = fresh_db();
        db.insert_pairs(&sample_set(), &LoaderOptions::default()).unwrap();

        let mut stmt = db
            .connection()
            .prepare("SELECT id, protein1, protein2, score FROM protein_pairs ORDER BY id")
            .unwrap();
        let rows: Vec<(i64, String, String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        assert_eq!(
            rows,
            vec![
                (1, "P1".to_string(), "P2".to_string(), 10),
                (2, "P2".to_string(), "P3".to_string(), 60),
                (3, "P1".to_string(), "P3".to_string(), 30),
            ]
        );
    }

    #[test]
    fn test_second_load_duplicates_rows() {
        let mut db = fresh_db();
        db.insert_pairs(&sample_set(), &LoaderOptions::default()).unwrap();
        db.insert_pairs(&sample_set(), &LoaderOptions::default()).unwrap();
        assert_eq!(db.row_count().unwrap(), 6);
    }

    #[test]
    fn test_bad_score_rolls_back_everything() {
        let mut db = fresh_db();
        let set = PairSet::new(
            vec![Pair::new("P1", "P2"), Pair::new("P2", "P3"), Pair::new("P1", "P3")],
            vec![
                Measurement::Integer(10),
                Measurement::Integer(20),
                Measurement::Text("abc".to_string()),
            ],
        )
        .unwrap();

        // The first batch is already flushed when the third row fails
        let err = db
            .insert_pairs(&set, &LoaderOptions { batch_size: 2 })
            .unwrap_err();
        assert!(matches!(err, Error::ScoreConversion { index: 2, .. }));
        assert_eq!(db.row_count().unwrap(), 0);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let mut db = fresh_db();
        let summary = db
            .insert_pairs(&sample_set(), &LoaderOptions { batch_size: 0 })
            .unwrap();
        assert_eq!(summary.batches, 3);
    }
}
