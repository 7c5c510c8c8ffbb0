// Schema and connection handling
// One table, `protein_pairs`, plus three lookup indexes. Everything is
// created with IF NOT EXISTS so opening an existing database is harmless.

use crate::error::Result;
use log::debug;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

pub const TABLE_NAME: &str = "protein_pairs";

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS protein_pairs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        protein1 TEXT NOT NULL,
        protein2 TEXT NOT NULL,
        score INTEGER NOT NULL
    )";

/// (index name, indexed columns)
pub const INDEXES: [(&str, &str); 3] = [
    ("idx_protein1", "protein1"),
    ("idx_protein2", "protein2"),
    ("idx_both_proteins", "protein1, protein2"),
];

/// A handle on a protein pair database
///
/// Every operation goes through one connection owned by this struct.
/// Dropping the handle closes the connection, on error paths too.
pub struct PairDatabase {
    conn: Connection,
}

impl PairDatabase {
    /// Open (creating if needed) a database file for reading and writing
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening database {}", path.display());
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open an existing database file without write access
    pub fn open_read_only(path: &Path) -> Result<Self> {
        debug!("Opening database {} read-only", path.display());
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// A private in-memory database, mostly useful for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Create the pair table and its indexes if they are not there yet
    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TABLE)?;
        for (name, columns) in INDEXES {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                name, TABLE_NAME, columns
            );
            self.conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    /// Number of stored rows
    pub fn row_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM protein_pairs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_names(db: &PairDatabase) -> Vec<String> {
        let mut stmt = db
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([TABLE_NAME], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap();
        names
    }

    #[test]
    fn test_create_schema() {
        let db = PairDatabase::open_in_memory().unwrap();
        db.create_schema().unwrap();

        assert_eq!(db.row_count().unwrap(), 0);
        assert_eq!(
            index_names(&db),
            vec!["idx_both_proteins", "idx_protein1", "idx_protein2"]
        );
    }

    #[test]
    fn test_create_schema_is_idempotent() {
        let db = PairDatabase::open_in_memory().unwrap();
        db.create_schema().unwrap();
        db.create_schema().unwrap();
        assert_eq!(index_names(&db).len(), 3);
    }

    #[test]
    fn test_row_count_without_table_fails() {
        let db = PairDatabase::open_in_memory().unwrap();
        assert!(db.row_count().is_err());
    }
}
