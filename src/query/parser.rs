// SQL pass-through validation
// Arbitrary SQL is parsed with the sqlparser crate before it reaches SQLite,
// and only a single statement that reads data is let through.

use crate::error::{Error, Result};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

/// A SQL string that parsed as exactly one read-only query
#[derive(Debug, Clone, PartialEq)]
pub struct ReadQuery {
    sql: String,
}

impl ReadQuery {
    /// Parse and validate a SQL string
    pub fn parse(sql: &str) -> Result<Self> {
        let dialect = SQLiteDialect {};
        let ast = Parser::parse_sql(&dialect, sql).map_err(|e| Error::SqlParse(e.to_string()))?;

        if ast.len() != 1 {
            return Err(Error::NotReadOnly(format!(
                "expected one statement, found {}",
                ast.len()
            )));
        }

        match &ast[0] {
            Statement::Query(query) => check_query(query)?,
            other => {
                return Err(Error::NotReadOnly(format!(
                    "{} statements are not allowed",
                    leading_keyword(&other.to_string())
                )))
            }
        }

        Ok(Self {
            sql: sql.trim().trim_end_matches(';').trim_end().to_string(),
        })
    }

    /// The original SQL text, without a trailing semicolon
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Walk a query and its common table expressions
fn check_query(query: &Query) -> Result<()> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(expr: &SetExpr) -> Result<()> {
    match expr {
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        other => Err(Error::NotReadOnly(format!(
            "{} statements are not allowed",
            leading_keyword(&other.to_string())
        ))),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or("empty")
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_accepted() {
        let query = ReadQuery::parse("SELECT protein1, score FROM protein_pairs WHERE score > 5;").unwrap();
        assert_eq!(query.sql(), "SELECT protein1, score FROM protein_pairs WHERE score > 5");
    }

    #[test]
    fn test_union_and_cte_are_accepted() {
        assert!(ReadQuery::parse(
            "SELECT protein1 FROM protein_pairs UNION SELECT protein2 FROM protein_pairs"
        )
        .is_ok());
        assert!(ReadQuery::parse(
            "WITH best AS (SELECT * FROM protein_pairs ORDER BY score DESC LIMIT 3) SELECT COUNT(*) FROM best"
        )
        .is_ok());
    }

    #[test]
    fn test_writes_are_rejected() {
        for sql in [
            "DELETE FROM protein_pairs",
            "INSERT INTO protein_pairs (protein1, protein2, score) VALUES ('A', 'B', 1)",
            "UPDATE protein_pairs SET score = 0",
            "DROP TABLE protein_pairs",
        ] {
            let err = ReadQuery::parse(sql).unwrap_err();
            assert!(matches!(err, Error::NotReadOnly(_)), "{} was accepted", sql);
        }
    }

    #[test]
    fn test_multiple_statements_are_rejected() {
        let err = ReadQuery::parse("SELECT 1; DELETE FROM protein_pairs").unwrap_err();
        assert!(err.to_string().contains("expected one statement, found 2"));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            ReadQuery::parse("SELEC * FROM protein_pairs"),
            Err(Error::SqlParse(_))
        ));
    }
}
