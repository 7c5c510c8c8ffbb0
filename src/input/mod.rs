// Input module - reads the pairs/measurements source file
// The source is a mapping with two positionally aligned sequences:
// `pairs` (protein identifier tuples) and `measurements` (scores).

pub mod json;
pub mod ndarray;
pub mod npy;
pub mod pickle;

use crate::error::{Error, Result};
use ndarray::Item;
use std::fmt;
use std::path::Path;

/// An ordered (protein1, protein2) identifier tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub protein1: String,
    pub protein2: String,
}

impl Pair {
    pub fn new(protein1: impl Into<String>, protein2: impl Into<String>) -> Self {
        Self {
            protein1: protein1.into(),
            protein2: protein2.into(),
        }
    }
}

/// A measurement as found in the source, before it becomes a score
///
/// Conversion is deferred to insert time so that a bad value fails the load
/// with its position rather than the whole decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
    /// Anything else, kept as a description for the error message
    Other(String),
}

impl Measurement {
    /// Coerce to an integer score: floats truncate toward zero, booleans are
    /// 0/1 and text must parse as an integer
    pub fn to_score(&self, index: usize) -> Result<i64> {
        let fail = || Error::ScoreConversion {
            index,
            value: self.to_string(),
        };
        match self {
            Measurement::Integer(v) => Ok(*v),
            Measurement::Boolean(b) => Ok(*b as i64),
            Measurement::Real(f) => {
                // i64::MAX as f64 rounds up to 2^63, hence the strict bound
                if f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Ok(f.trunc() as i64)
                } else {
                    Err(fail())
                }
            }
            Measurement::Text(s) => s.trim().parse::<i64>().map_err(|_| fail()),
            Measurement::Other(_) => Err(fail()),
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Integer(v) => write!(f, "{}", v),
            Measurement::Real(v) => write!(f, "{}", v),
            Measurement::Boolean(b) => write!(f, "{}", b),
            Measurement::Text(s) => write!(f, "'{}'", s),
            Measurement::Other(kind) => write!(f, "<{}>", kind),
        }
    }
}

/// The decoded source record
///
/// `pairs[i]` and `measurements[i]` describe the same row; the constructor
/// enforces equal lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSet {
    pairs: Vec<Pair>,
    measurements: Vec<Measurement>,
}

impl PairSet {
    pub fn new(pairs: Vec<Pair>, measurements: Vec<Measurement>) -> Result<Self> {
        if pairs.len() != measurements.len() {
            return Err(Error::LengthMismatch {
                pairs: pairs.len(),
                measurements: measurements.len(),
            });
        }
        Ok(Self {
            pairs,
            measurements,
        })
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate aligned (pair, measurement) rows
    pub fn iter(&self) -> impl Iterator<Item = (&Pair, &Measurement)> {
        self.pairs.iter().zip(self.measurements.iter())
    }

    /// Build from a decoded mapping with `pairs` and `measurements` keys
    pub fn from_item(root: &Item) -> Result<Self> {
        if !matches!(root, Item::Map(_)) {
            return Err(Error::Npy(format!(
                "expected a mapping at the top level, found {}",
                root.kind()
            )));
        }

        let measurements = root
            .get("measurements")
            .ok_or(Error::MissingKey("measurements"))?;
        let pairs = root.get("pairs").ok_or(Error::MissingKey("pairs"))?;

        let pair_rows = pairs
            .rows()
            .ok_or_else(|| Error::Npy(format!("'pairs' is a {}, not a sequence", pairs.kind())))?;
        let measurement_rows = measurements.rows().ok_or_else(|| {
            Error::Npy(format!(
                "'measurements' is a {}, not a sequence",
                measurements.kind()
            ))
        })?;

        let pairs = pair_rows
            .iter()
            .enumerate()
            .map(|(index, row)| pair_from_item(index, row))
            .collect::<Result<Vec<_>>>()?;
        let measurements = measurement_rows.iter().map(measurement_from_item).collect();

        Self::new(pairs, measurements)
    }
}

fn pair_from_item(index: usize, row: &Item) -> Result<Pair> {
    let malformed = |reason: String| Error::MalformedPair { index, reason };

    let parts = row
        .rows()
        .ok_or_else(|| malformed(format!("expected a 2-tuple, found {}", row.kind())))?;
    let [first, second] = &*parts else {
        return Err(malformed(format!("expected 2 elements, found {}", parts.len())));
    };
    Ok(Pair::new(
        identifier(first).map_err(&malformed)?,
        identifier(second).map_err(&malformed)?,
    ))
}

fn identifier(item: &Item) -> std::result::Result<String, String> {
    match item {
        Item::Str(s) => Ok(s.clone()),
        Item::Bytes(b) => String::from_utf8(b.clone())
            .map_err(|_| "identifier bytes are not UTF-8".to_string()),
        other => Err(format!("identifier is a {}, not a string", other.kind())),
    }
}

fn measurement_from_item(item: &Item) -> Measurement {
    match item {
        Item::Int(v) => Measurement::Integer(*v),
        Item::Float(v) => Measurement::Real(*v),
        Item::Bool(b) => Measurement::Boolean(*b),
        Item::Str(s) => Measurement::Text(s.clone()),
        // A 0-d array inside an object array is a plain scalar
        Item::Array(array) => match array.scalar() {
            Some(inner) => measurement_from_item(inner),
            None => Measurement::Other(item.kind().to_string()),
        },
        other => Measurement::Other(other.kind().to_string()),
    }
}

/// Decode a source file, picking the format from its content
///
/// Anything starting with the NUMPY magic string is read as a `.npy` file
/// holding a pickled mapping, whatever it is called. JSON (the same mapping
/// as `{"pairs": [[a, b], ...], "measurements": [...]}`) is recognised by a
/// `.json` extension or a leading `{`.
pub fn load_pair_set(path: &Path) -> Result<PairSet> {
    let bytes = std::fs::read(path)?;

    if bytes.starts_with(npy::MAGIC) {
        let root = npy::parse(&bytes)?;
        return PairSet::from_item(&root);
    }

    let json_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let json_content = bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');
    if json_extension || json_content {
        return json::from_slice(&bytes);
    }

    Err(Error::UnsupportedFormat(format!(
        "{} does not start with the NUMPY magic string and is not JSON",
        path.display()
    )))
}
