// numpy object interpretation
// Turns the inert objects left by the pickle decoder into plain data:
// arrays become flat item vectors with a shape, scalars become numbers.

use super::pickle::{Object, Value};
use crate::error::{Error, Result};
use std::borrow::Cow;

/// Nested lists inside a pickle can in principle refer to themselves
const MAX_DEPTH: usize = 64;

/// Plain data resolved from a pickle value
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Lists, tuples and sets
    Seq(Vec<Item>),
    Map(Vec<(Item, Item)>),
    Array(NdArray),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::None => "None",
            Item::Bool(_) => "bool",
            Item::Int(_) => "int",
            Item::Float(_) => "float",
            Item::Str(_) => "str",
            Item::Bytes(_) => "bytes",
            Item::Seq(_) => "sequence",
            Item::Map(_) => "mapping",
            Item::Array(_) => "ndarray",
        }
    }

    /// Look up a string key in a mapping
    pub fn get(&self, key: &str) -> Option<&Item> {
        match self {
            Item::Map(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, Item::Str(name) if name == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Split into the outermost rows: sequence elements, or the slices of an
    /// array along its first axis. Scalars yield None.
    ///
    /// Sequences and 1-d arrays are borrowed; only the rows of a
    /// multi-dimensional array are built.
    pub fn rows(&self) -> Option<Cow<'_, [Item]>> {
        match self {
            Item::Seq(items) => Some(Cow::Borrowed(items.as_slice())),
            Item::Array(array) => array.rows(),
            _ => None,
        }
    }
}

/// An n-dimensional array in C order
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub items: Vec<Item>,
}

impl NdArray {
    fn rows(&self) -> Option<Cow<'_, [Item]>> {
        match self.shape.len() {
            0 => None,
            1 => Some(Cow::Borrowed(self.items.as_slice())),
            _ => {
                let outer = self.shape[0];
                if outer == 0 {
                    return Some(Cow::Owned(Vec::new()));
                }
                // items.len() is the product of the shape, so this is exact
                let inner = self.items.len() / outer;
                let inner_shape = self.shape[1..].to_vec();
                if inner == 0 {
                    let empty = Item::Array(NdArray {
                        shape: inner_shape,
                        items: Vec::new(),
                    });
                    return Some(Cow::Owned(vec![empty; outer]));
                }
                Some(Cow::Owned(
                    self.items
                        .chunks(inner)
                        .map(|chunk| {
                            Item::Array(NdArray {
                                shape: inner_shape.clone(),
                                items: chunk.to_vec(),
                            })
                        })
                        .collect(),
                ))
            }
        }
    }

    /// The single element of a 0-d array
    pub fn scalar(&self) -> Option<&Item> {
        if self.shape.is_empty() && self.items.len() == 1 {
            self.items.first()
        } else {
            None
        }
    }
}

/// Byte order of a numpy dtype
#[derive(Debug, Clone, Copy, PartialEq)]
enum ByteOrder {
    Little,
    Big,
}

/// The element types we can decode from raw array bytes
#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Object,
    Bool,
    Int,
    UInt,
    Float,
    Unicode,
    ByteString,
}

/// A numpy dtype reduced to what decoding needs
#[derive(Debug, Clone, PartialEq)]
pub struct DType {
    kind: Kind,
    /// Bytes per element
    itemsize: usize,
    order: ByteOrder,
}

impl DType {
    /// Parse a type string such as `<i8`, `|O`, `U5` or `f8`, with an
    /// optional byte order taken from the pickled dtype state
    pub fn parse(descr: &str, order_hint: Option<&str>) -> Result<Self> {
        let (order_char, body) = match descr.chars().next() {
            Some(c @ ('<' | '>' | '|' | '=')) => (Some(c), &descr[1..]),
            _ => (None, descr),
        };
        let order = match order_char.or_else(|| order_hint.and_then(|h| h.chars().next())) {
            Some('>') => ByteOrder::Big,
            _ => ByteOrder::Little,
        };

        let mut chars = body.chars();
        let code = chars
            .next()
            .ok_or_else(|| Error::Npy(format!("empty dtype '{}'", descr)))?;
        let digits = chars.as_str();
        let size = if digits.is_empty() {
            None
        } else {
            Some(
                digits
                    .parse::<usize>()
                    .map_err(|_| Error::Npy(format!("unsupported dtype '{}'", descr)))?,
            )
        };

        let (kind, itemsize) = match code {
            'O' => (Kind::Object, size.unwrap_or(8)),
            '?' | 'b' => (Kind::Bool, 1),
            'i' => (Kind::Int, size.unwrap_or(8)),
            'u' => (Kind::UInt, size.unwrap_or(8)),
            'f' => (Kind::Float, size.unwrap_or(8)),
            'U' => {
                // UCS-4: four bytes per character
                let itemsize = size
                    .unwrap_or(0)
                    .checked_mul(4)
                    .ok_or_else(|| Error::Npy("array is too large".to_string()))?;
                (Kind::Unicode, itemsize)
            }
            'S' | 'a' => (Kind::ByteString, size.unwrap_or(0)),
            _ => return Err(Error::Npy(format!("unsupported dtype '{}'", descr))),
        };

        let valid = match kind {
            Kind::Int | Kind::UInt => matches!(itemsize, 1 | 2 | 4 | 8),
            Kind::Float => matches!(itemsize, 4 | 8),
            _ => true,
        };
        if !valid {
            return Err(Error::Npy(format!("unsupported dtype '{}'", descr)));
        }

        Ok(Self {
            kind,
            itemsize,
            order,
        })
    }

    pub fn is_object(&self) -> bool {
        self.kind == Kind::Object
    }

    /// Decode one element from its raw bytes
    fn decode(&self, raw: &[u8]) -> Item {
        match self.kind {
            Kind::Object => Item::None,
            Kind::Bool => Item::Bool(raw[0] != 0),
            Kind::Int => Item::Int(self.signed(raw)),
            Kind::UInt => {
                let value = self.unsigned(raw);
                // u64 values past i64::MAX stay representable as floats only
                match i64::try_from(value) {
                    Ok(v) => Item::Int(v),
                    Err(_) => Item::Float(value as f64),
                }
            }
            Kind::Float => {
                let bits = self.unsigned(raw);
                if self.itemsize == 4 {
                    Item::Float(f32::from_bits(bits as u32) as f64)
                } else {
                    Item::Float(f64::from_bits(bits))
                }
            }
            Kind::Unicode => {
                let text: String = raw
                    .chunks_exact(4)
                    .map(|c| match self.order {
                        ByteOrder::Little => u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                        ByteOrder::Big => u32::from_be_bytes([c[0], c[1], c[2], c[3]]),
                    })
                    .take_while(|&code| code != 0)
                    .map(|code| char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect();
                Item::Str(text)
            }
            Kind::ByteString => {
                let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                Item::Bytes(raw[..end].to_vec())
            }
        }
    }

    fn unsigned(&self, raw: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        match self.order {
            ByteOrder::Little => {
                buf[..raw.len()].copy_from_slice(raw);
                u64::from_le_bytes(buf)
            }
            ByteOrder::Big => {
                buf[8 - raw.len()..].copy_from_slice(raw);
                u64::from_be_bytes(buf)
            }
        }
    }

    fn signed(&self, raw: &[u8]) -> i64 {
        let bits = self.itemsize * 8;
        let value = self.unsigned(raw);
        if bits == 64 {
            value as i64
        } else {
            // Sign-extend from the element width
            let shift = 64 - bits;
            ((value << shift) as i64) >> shift
        }
    }
}

/// Resolve a decoded pickle value into plain data, interpreting the numpy
/// constructors it contains
pub fn resolve(value: &Value) -> Result<Item> {
    resolve_at(value, 0)
}

fn resolve_at(value: &Value, depth: usize) -> Result<Item> {
    if depth > MAX_DEPTH {
        return Err(Error::Npy("object nesting is too deep".to_string()));
    }
    let next = depth + 1;
    Ok(match value {
        Value::None => Item::None,
        Value::Bool(b) => Item::Bool(*b),
        Value::Int(i) => Item::Int(*i),
        Value::Float(f) => Item::Float(*f),
        Value::Str(s) => Item::Str(s.clone()),
        Value::Bytes(b) => Item::Bytes(b.clone()),
        Value::Tuple(items) => Item::Seq(resolve_all(items, next)?),
        Value::List(items) => Item::Seq(resolve_all(&items.borrow(), next)?),
        Value::Dict(entries) => {
            let entries = entries.borrow();
            let mut resolved = Vec::with_capacity(entries.len());
            for (key, value) in entries.iter() {
                resolved.push((resolve_at(key, next)?, resolve_at(value, next)?));
            }
            Item::Map(resolved)
        }
        Value::Global(global) => {
            return Err(Error::Npy(format!(
                "unexpected reference to {}.{}",
                global.module, global.name
            )))
        }
        Value::Object(object) => resolve_object(&object.borrow(), next)?,
    })
}

fn resolve_all(values: &[Value], depth: usize) -> Result<Vec<Item>> {
    values.iter().map(|v| resolve_at(v, depth)).collect()
}

fn resolve_object(object: &Object, depth: usize) -> Result<Item> {
    let callable = &object.callable;

    if callable.matches("numpy.core.multiarray", "_reconstruct") {
        let state = object
            .state
            .as_ref()
            .ok_or_else(|| Error::Npy("ndarray without state".to_string()))?;
        return reconstruct_array(state, depth);
    }

    if callable.matches("numpy.core.multiarray", "scalar") {
        return match object.args.as_slice() {
            [dtype, Value::Bytes(raw), ..] => {
                let dtype = dtype_of(dtype)?;
                if raw.len() < dtype.itemsize || dtype.is_object() {
                    return Err(Error::Npy("malformed numpy scalar".to_string()));
                }
                Ok(dtype.decode(&raw[..dtype.itemsize]))
            }
            // Object scalars carry the Python object itself
            [_, other] => resolve_at(other, depth),
            _ => Err(Error::Npy("malformed numpy scalar".to_string())),
        };
    }

    // Protocol 5 in-band buffers: _frombuffer(buffer, dtype, shape, order)
    if callable.matches("numpy.core.numeric", "_frombuffer") {
        return match object.args.as_slice() {
            [Value::Bytes(raw), dtype, shape, order] => {
                let dtype = dtype_of(dtype)?;
                let shape = shape_of(shape)?;
                let fortran = matches!(order, Value::Str(o) if o == "F");
                decode_raw(raw, &dtype, shape, fortran)
            }
            _ => Err(Error::Npy("malformed _frombuffer call".to_string())),
        };
    }

    Err(Error::Npy(format!(
        "unsupported object {}.{}",
        callable.module, callable.name
    )))
}

/// `_reconstruct` state is `(version, shape, dtype, is_fortran, data)`
fn reconstruct_array(state: &Value, depth: usize) -> Result<Item> {
    let Value::Tuple(fields) = state else {
        return Err(Error::Npy("ndarray state is not a tuple".to_string()));
    };
    let [_version, shape, dtype, fortran, data] = fields.as_slice() else {
        return Err(Error::Npy(format!(
            "ndarray state has {} fields, expected 5",
            fields.len()
        )));
    };

    let shape = shape_of(shape)?;
    let dtype = dtype_of(dtype)?;
    let fortran = matches!(fortran, Value::Bool(true) | Value::Int(1));

    match data {
        Value::Bytes(raw) if !dtype.is_object() => decode_raw(raw, &dtype, shape, fortran),
        Value::List(items) if dtype.is_object() => {
            let items = resolve_all(&items.borrow(), depth)?;
            build_array(items, shape, fortran)
        }
        other => Err(Error::Npy(format!(
            "ndarray data of type {} does not match its dtype",
            other.kind()
        ))),
    }
}

fn decode_raw(raw: &[u8], dtype: &DType, shape: Vec<usize>, fortran: bool) -> Result<Item> {
    if dtype.is_object() {
        return Err(Error::Npy("object arrays cannot come from raw bytes".to_string()));
    }
    let count = element_count(&shape)?;
    let needed = count
        .checked_mul(dtype.itemsize)
        .ok_or_else(|| Error::Npy("array is too large".to_string()))?;
    if raw.len() < needed {
        return Err(Error::Npy(format!(
            "array needs {} bytes of data but has {}",
            needed,
            raw.len()
        )));
    }

    let items = if dtype.itemsize == 0 {
        vec![dtype.decode(&[]); count]
    } else {
        raw[..needed]
            .chunks_exact(dtype.itemsize)
            .map(|chunk| dtype.decode(chunk))
            .collect()
    };
    build_array(items, shape, fortran)
}

fn build_array(items: Vec<Item>, shape: Vec<usize>, fortran: bool) -> Result<Item> {
    let count = element_count(&shape)?;
    if items.len() != count {
        return Err(Error::Npy(format!(
            "array of shape {:?} holds {} items",
            shape,
            items.len()
        )));
    }

    let items = if fortran && shape.len() == 2 {
        // Column-major storage: element (r, c) sits at c * rows + r
        let (rows, cols) = (shape[0], shape[1]);
        let mut ordered = Vec::with_capacity(count);
        for r in 0..rows {
            for c in 0..cols {
                ordered.push(items[c * rows + r].clone());
            }
        }
        ordered
    } else if fortran && shape.len() > 2 {
        return Err(Error::Npy(
            "Fortran-ordered arrays above two dimensions are not supported".to_string(),
        ));
    } else {
        items
    };

    Ok(Item::Array(NdArray { shape, items }))
}

/// A dtype is pickled as `numpy.dtype(descr, align, copy)` with a BUILD
/// state whose second field is the byte order
fn dtype_of(value: &Value) -> Result<DType> {
    let Value::Object(object) = value else {
        return Err(Error::Npy(format!("expected a dtype, got {}", value.kind())));
    };
    let object = object.borrow();
    if !object.callable.matches("numpy", "dtype") {
        return Err(Error::Npy(format!(
            "expected a dtype, got {}.{}",
            object.callable.module, object.callable.name
        )));
    }
    let Some(Value::Str(descr)) = object.args.first() else {
        return Err(Error::Npy("dtype without a type string".to_string()));
    };

    let order = match &object.state {
        Some(Value::Tuple(state)) => match state.get(1) {
            Some(Value::Str(order)) => Some(order.as_str()),
            _ => None,
        },
        _ => None,
    };
    DType::parse(descr, order)
}

/// Number of elements in an array of this shape
fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| Error::Npy("array is too large".to_string()))
}

fn shape_of(value: &Value) -> Result<Vec<usize>> {
    let Value::Tuple(dims) = value else {
        return Err(Error::Npy(format!("expected a shape tuple, got {}", value.kind())));
    };
    dims.iter()
        .map(|dim| match dim {
            Value::Int(n) if *n >= 0 => Ok(*n as usize),
            other => Err(Error::Npy(format!("bad array dimension {:?}", other))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::pickle::{self, Global};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn dtype_value(descr: &str, order: &str) -> Value {
        Value::Object(Rc::new(RefCell::new(Object {
            callable: Global {
                module: "numpy".to_string(),
                name: "dtype".to_string(),
            },
            args: vec![
                Value::Str(descr.to_string()),
                Value::Bool(false),
                Value::Bool(true),
            ],
            state: Some(Value::Tuple(vec![
                Value::Int(3),
                Value::Str(order.to_string()),
            ])),
        })))
    }

    fn array_value(shape: Vec<i64>, dtype: Value, fortran: bool, data: Value) -> Value {
        Value::Object(Rc::new(RefCell::new(Object {
            callable: Global {
                module: "numpy.core.multiarray".to_string(),
                name: "_reconstruct".to_string(),
            },
            args: Vec::new(),
            state: Some(Value::Tuple(vec![
                Value::Int(1),
                Value::Tuple(shape.into_iter().map(Value::Int).collect()),
                dtype,
                Value::Bool(fortran),
                data,
            ])),
        })))
    }

    #[test]
    fn test_dtype_parse() {
        let d = DType::parse("<i4", None).unwrap();
        assert_eq!(d.kind, Kind::Int);
        assert_eq!(d.itemsize, 4);

        let d = DType::parse("U5", Some("<")).unwrap();
        assert_eq!(d.kind, Kind::Unicode);
        assert_eq!(d.itemsize, 20);

        let d = DType::parse("f8", Some(">")).unwrap();
        assert_eq!(d.order, ByteOrder::Big);

        assert!(DType::parse("c16", None).is_err());
        assert!(DType::parse("i3", None).is_err());
    }

    #[test]
    fn test_signed_decoding() {
        let d = DType::parse("<i2", None).unwrap();
        assert_eq!(d.decode(&[0xfe, 0xff]), Item::Int(-2));

        let d = DType::parse(">i4", None).unwrap();
        assert_eq!(d.decode(&[0, 0, 1, 0]), Item::Int(256));
    }

    #[test]
    fn test_int_array() {
        let raw: Vec<u8> = [10i64, 60, 30].iter().flat_map(|v| v.to_le_bytes()).collect();
        let value = array_value(vec![3], dtype_value("i8", "<"), false, Value::Bytes(raw));

        let item = resolve(&value).unwrap();
        assert_eq!(
            item.rows().unwrap(),
            vec![Item::Int(10), Item::Int(60), Item::Int(30)]
        );
    }

    #[test]
    fn test_unicode_matrix_rows() {
        let raw: Vec<u8> = ["A", "BC", "D", "E"]
            .iter()
            .flat_map(|s| {
                let mut cells: Vec<u32> = s.chars().map(|c| c as u32).collect();
                cells.resize(2, 0);
                cells.into_iter().flat_map(|c| c.to_le_bytes())
            })
            .collect();
        let value = array_value(vec![2, 2], dtype_value("U2", "<"), false, Value::Bytes(raw));

        let resolved = resolve(&value).unwrap();
        let rows = resolved.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].rows().unwrap(),
            vec![Item::Str("A".to_string()), Item::Str("BC".to_string())]
        );
    }

    #[test]
    fn test_fortran_order_is_transposed() {
        // Column-major [[1, 2], [3, 4]] is stored as 1, 3, 2, 4
        let raw: Vec<u8> = [1i32, 3, 2, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        let value = array_value(vec![2, 2], dtype_value("i4", "<"), true, Value::Bytes(raw));

        let resolved = resolve(&value).unwrap();
        let rows = resolved.rows().unwrap();
        assert_eq!(rows[0].rows().unwrap(), vec![Item::Int(1), Item::Int(2)]);
        assert_eq!(rows[1].rows().unwrap(), vec![Item::Int(3), Item::Int(4)]);
    }

    #[test]
    fn test_short_data_is_rejected() {
        let value = array_value(vec![4], dtype_value("i8", "<"), false, Value::Bytes(vec![0; 8]));
        assert!(matches!(resolve(&value), Err(Error::Npy(_))));
    }

    #[test]
    fn test_oversized_shape_is_rejected() {
        let huge = i64::MAX;
        let value = array_value(
            vec![huge, huge, 2],
            dtype_value("i8", "<"),
            false,
            Value::Bytes(Vec::new()),
        );
        let err = resolve(&value).unwrap_err();
        assert!(err.to_string().contains("array is too large"));

        let value = array_value(
            vec![huge, huge],
            dtype_value("|O", "|"),
            false,
            Value::List(Rc::new(RefCell::new(Vec::new()))),
        );
        let err = resolve(&value).unwrap_err();
        assert!(err.to_string().contains("array is too large"));
    }

    #[test]
    fn test_oversized_unicode_dtype_is_rejected() {
        let descr = format!("<U{}", usize::MAX / 2);
        let err = DType::parse(&descr, None).unwrap_err();
        assert!(err.to_string().contains("array is too large"));
    }

    #[test]
    fn test_one_dimensional_rows_are_borrowed() {
        let item = Item::Seq(vec![Item::Int(1), Item::Int(2)]);
        assert!(matches!(item.rows(), Some(Cow::Borrowed(_))));

        let raw: Vec<u8> = [10i64, 60].iter().flat_map(|v| v.to_le_bytes()).collect();
        let value = array_value(vec![2], dtype_value("i8", "<"), false, Value::Bytes(raw));
        let array = resolve(&value).unwrap();
        assert!(matches!(array.rows(), Some(Cow::Borrowed(_))));
    }

    #[test]
    fn test_empty_leading_axis_has_no_rows() {
        let value = array_value(
            vec![0, 2],
            dtype_value("i8", "<"),
            false,
            Value::Bytes(Vec::new()),
        );
        let resolved = resolve(&value).unwrap();
        let rows = resolved.rows().unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_unknown_global_is_rejected() {
        // os.system('x') as an inert call
        let data = b"\x80\x02cos\nsystem\nX\x01\x00\x00\x00x\x85R.";
        let value = pickle::from_slice(data).unwrap();
        let err = resolve(&value).unwrap_err();
        assert!(err.to_string().contains("os.system"));
    }
}
