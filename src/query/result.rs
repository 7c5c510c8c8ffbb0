// Query results
// Tabular values returned by the query layer, with terminal and CSV output

use crate::error::Result;
use crate::storage::{PairRow, Value};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Rows from an arbitrary read-only query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Format the result as a boxed text table
    pub fn format(&self) -> String {
        if self.rows.is_empty() {
            return "No rows found".to_string();
        }

        // Calculate column widths
        let mut widths: Vec<usize> = self.column_names.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                widths[i] = widths[i].max(value.to_string().chars().count());
            }
        }

        let mut result = String::new();
        push_border(&mut result, &widths, '┌', '┬', '┐');

        result.push('│');
        for (name, width) in self.column_names.iter().zip(&widths) {
            result.push_str(&format!(" {:<width$} │", name, width = width));
        }
        result.push('\n');

        push_border(&mut result, &widths, '├', '┼', '┤');

        for row in &self.rows {
            result.push('│');
            for (value, width) in row.iter().zip(&widths) {
                result.push_str(&format!(" {:<width$} │", value.to_string(), width = width));
            }
            result.push('\n');
        }

        push_border(&mut result, &widths, '└', '┴', '┘');
        result.push_str(&format!("\n{} row(s) returned", self.rows.len()));

        result
    }
}

fn push_border(out: &mut String, widths: &[usize], left: char, middle: char, right: char) {
    out.push(left);
    for (i, width) in widths.iter().enumerate() {
        out.push_str(&"─".repeat(width + 2));
        if i < widths.len() - 1 {
            out.push(middle);
        }
    }
    out.push(right);
    out.push('\n');
}

/// Result of a pair lookup: columns protein1, protein2, score
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairTable {
    rows: Vec<PairRow>,
}

impl PairTable {
    pub fn new(rows: Vec<PairRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[PairRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<PairRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first `n` rows
    pub fn head(&self, n: usize) -> PairTable {
        PairTable::new(self.rows.iter().take(n).cloned().collect())
    }

    /// Scores in row order
    pub fn scores(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.score).collect()
    }

    pub fn to_query_result(&self) -> QueryResult {
        QueryResult {
            column_names: PairRow::COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: self.rows.iter().map(PairRow::values).collect(),
        }
    }

    pub fn format(&self) -> String {
        self.to_query_result().format()
    }

    /// Write comma-separated rows with a header line and no index column
    ///
    /// The header is written even when there are no rows.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(PairRow::COLUMNS)?;
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_csv(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PairTable {
        PairTable::new(vec![PairRow::new("P1", "P3", 30), PairRow::new("P1", "P2", 10)])
    }

    #[test]
    fn test_csv_output() {
        let mut out = Vec::new();
        table().write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "protein1,protein2,score\nP1,P3,30\nP1,P2,10\n"
        );
    }

    #[test]
    fn test_csv_header_only_when_empty() {
        let mut out = Vec::new();
        PairTable::default().write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "protein1,protein2,score\n");
    }

    #[test]
    fn test_head() {
        let head = table().head(1);
        assert_eq!(head.rows(), &[PairRow::new("P1", "P3", 30)]);
        assert_eq!(table().head(10).len(), 2);
    }

    #[test]
    fn test_format_box() {
        let text = table().format();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "┌──────────┬──────────┬───────┐");
        assert_eq!(lines[1], "│ protein1 │ protein2 │ score │");
        assert_eq!(lines[3], "│ P1       │ P3       │ 30    │");
        assert!(text.ends_with("2 row(s) returned"));
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(PairTable::default().format(), "No rows found");
    }
}
