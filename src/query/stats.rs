// Table statistics

use serde::Serialize;
use std::fmt;

/// Aggregate figures over the whole pair table
///
/// The score fields are None on an empty table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_pairs: u64,
    /// Distinct identifiers across protein1 and protein2
    pub unique_proteins: u64,
    pub min_score: Option<i64>,
    pub max_score: Option<i64>,
    /// Mean score rounded to two decimals
    pub avg_score: Option<f64>,
}

impl DatabaseStats {
    pub fn empty() -> Self {
        Self {
            total_pairs: 0,
            unique_proteins: 0,
            min_score: None,
            max_score: None,
            avg_score: None,
        }
    }
}

/// Round half away from zero to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn or_none<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

impl fmt::Display for DatabaseStats {
    /// One `  key: value` line per field
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  total_pairs: {}", self.total_pairs)?;
        writeln!(f, "  unique_proteins: {}", self.unique_proteins)?;
        writeln!(f, "  min_score: {}", or_none(&self.min_score))?;
        writeln!(f, "  max_score: {}", or_none(&self.max_score))?;
        write!(f, "  avg_score: {}", or_none(&self.avg_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(100.0 / 3.0), 33.33);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(-1.005), -1.0);
        assert_eq!(round2(42.0), 42.0);
    }

    #[test]
    fn test_display_empty() {
        assert_eq!(
            DatabaseStats::empty().to_string(),
            "  total_pairs: 0\n  unique_proteins: 0\n  min_score: None\n  max_score: None\n  avg_score: None"
        );
    }

    #[test]
    fn test_serialize() {
        let stats = DatabaseStats {
            total_pairs: 3,
            unique_proteins: 3,
            min_score: Some(10),
            max_score: Some(60),
            avg_score: Some(33.33),
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert_eq!(
            json,
            r#"{"total_pairs":3,"unique_proteins":3,"min_score":10,"max_score":60,"avg_score":33.33}"#
        );
    }
}
