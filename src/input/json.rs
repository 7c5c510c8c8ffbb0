// JSON source reader
// Same mapping as the .npy files, written as plain JSON

use super::{Measurement, Pair, PairSet};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Expected layout:
///
/// ```json
/// { "pairs": [["P1", "P2"], ["P2", "P3"]], "measurements": [10, 60] }
/// ```
#[derive(Debug, Deserialize)]
struct Source {
    pairs: Option<Vec<JsonValue>>,
    measurements: Option<Vec<JsonValue>>,
}

pub fn from_str(text: &str) -> Result<PairSet> {
    from_slice(text.as_bytes())
}

/// Decode the raw bytes of a JSON source file
pub fn from_slice(bytes: &[u8]) -> Result<PairSet> {
    let source: Source = serde_json::from_slice(bytes)?;

    let measurements = source
        .measurements
        .ok_or(Error::MissingKey("measurements"))?;
    let pairs = source.pairs.ok_or(Error::MissingKey("pairs"))?;

    let pairs = pairs
        .iter()
        .enumerate()
        .map(|(index, value)| pair_from_json(index, value))
        .collect::<Result<Vec<_>>>()?;
    let measurements = measurements.iter().map(measurement_from_json).collect();

    PairSet::new(pairs, measurements)
}

fn pair_from_json(index: usize, value: &JsonValue) -> Result<Pair> {
    match value.as_array().map(Vec::as_slice) {
        Some([JsonValue::String(a), JsonValue::String(b)]) => Ok(Pair::new(a.clone(), b.clone())),
        _ => Err(Error::MalformedPair {
            index,
            reason: format!("expected two strings, found {}", value),
        }),
    }
}

fn measurement_from_json(value: &JsonValue) -> Measurement {
    match value {
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Measurement::Integer(i),
            None => Measurement::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::Bool(b) => Measurement::Boolean(*b),
        JsonValue::String(s) => Measurement::Text(s.clone()),
        JsonValue::Null => Measurement::Other("null".to_string()),
        JsonValue::Array(_) => Measurement::Other("array".to_string()),
        JsonValue::Object(_) => Measurement::Other("object".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        let set = from_str(r#"{"pairs": [["P1", "P2"], ["P2", "P3"]], "measurements": [10, 60.5]}"#)
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.pairs()[0], Pair::new("P1", "P2"));
        assert_eq!(set.measurements()[1], Measurement::Real(60.5));
    }

    #[test]
    fn test_missing_measurements() {
        let err = from_str(r#"{"pairs": []}"#).unwrap_err();
        assert!(matches!(err, Error::MissingKey("measurements")));
    }

    #[test]
    fn test_pair_with_three_members() {
        let err = from_str(r#"{"pairs": [["A", "B", "C"]], "measurements": [1]}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedPair { index: 0, .. }));
    }

    #[test]
    fn test_null_measurement_fails_at_conversion() {
        let set = from_str(r#"{"pairs": [["A", "B"]], "measurements": [null]}"#).unwrap();
        assert!(set.measurements()[0].to_score(0).is_err());
    }
}
