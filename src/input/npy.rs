// .npy container reader
// A .npy file is a magic string, a Python dict literal describing the array,
// then the array payload. For object arrays the payload is a pickle stream.

use super::ndarray::{self, DType, Item};
use super::pickle;
use crate::error::{Error, Result};

pub(crate) const MAGIC: &[u8] = b"\x93NUMPY";

/// The header dict: `{'descr': '|O', 'fortran_order': False, 'shape': (), }`
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

/// Decode a whole .npy file holding a pickled object
///
/// Only object arrays are accepted since nothing else can hold a mapping.
/// An array holding exactly one element (0-d or any size-1 shape) is
/// unwrapped to that element.
pub fn parse(bytes: &[u8]) -> Result<Item> {
    let (header, payload) = split_header(bytes)?;

    let dtype = DType::parse(&header.descr, None)?;
    if !dtype.is_object() {
        return Err(Error::Npy(format!(
            "expected a pickled mapping, found an array of dtype '{}'",
            header.descr
        )));
    }

    let value = pickle::from_slice(payload)?;
    let item = ndarray::resolve(&value)?;

    match item {
        Item::Array(mut array) if array.items.len() == 1 => array
            .items
            .pop()
            .ok_or_else(|| Error::Npy("array without an element".to_string())),
        Item::Array(_) if header.shape.is_empty() => {
            Err(Error::Npy("0-d array without an element".to_string()))
        }
        other => Ok(other),
    }
}

/// Split a .npy file into its parsed header and the payload bytes
pub fn split_header(bytes: &[u8]) -> Result<(Header, &[u8])> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(Error::Npy("missing NUMPY magic string".to_string()));
    }

    let major = bytes[6];
    let (header_len, start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(Error::Npy("truncated header".to_string()));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        _ => return Err(Error::Npy(format!("unsupported format version {}", major))),
    };

    let end = start + header_len;
    if bytes.len() < end {
        return Err(Error::Npy("truncated header".to_string()));
    }

    // Versions 1 and 2 use latin-1 headers; 3 allows UTF-8
    let text: String = if major == 3 {
        std::str::from_utf8(&bytes[start..end])
            .map_err(|_| Error::Npy("header is not UTF-8".to_string()))?
            .to_string()
    } else {
        bytes[start..end].iter().map(|&b| b as char).collect()
    };

    Ok((parse_header(&text)?, &bytes[end..]))
}

/// Values that can appear in a header literal
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Bool(bool),
    Int(i64),
    None,
    Tuple(Vec<Literal>),
}

fn parse_header(text: &str) -> Result<Header> {
    let mut cursor = Cursor::new(text);
    let entries = cursor.dict()?;

    let mut descr = None;
    let mut fortran_order = None;
    let mut shape = None;

    for (key, value) in entries {
        match (key.as_str(), value) {
            ("descr", Literal::Str(s)) => descr = Some(s),
            ("fortran_order", Literal::Bool(b)) => fortran_order = Some(b),
            ("shape", Literal::Tuple(dims)) => {
                let dims = dims
                    .into_iter()
                    .map(|d| match d {
                        Literal::Int(n) if n >= 0 => Ok(n as usize),
                        other => Err(Error::Npy(format!("bad shape entry {:?}", other))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                shape = Some(dims);
            }
            (key, value) => {
                return Err(Error::Npy(format!(
                    "unexpected header entry '{}': {:?}",
                    key, value
                )))
            }
        }
    }

    Ok(Header {
        descr: descr.ok_or_else(|| Error::Npy("header has no 'descr'".to_string()))?,
        fortran_order: fortran_order
            .ok_or_else(|| Error::Npy("header has no 'fortran_order'".to_string()))?,
        shape: shape.ok_or_else(|| Error::Npy("header has no 'shape'".to_string()))?,
    })
}

/// Tiny reader for the Python literal subset numpy writes
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    /// Consume `c` if it is next
    fn accept(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn dict(&mut self) -> Result<Vec<(String, Literal)>> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            if self.accept('}') {
                break;
            }
            let key = match self.literal()? {
                Literal::Str(key) => key,
                other => return Err(self.error(&format!("non-string key {:?}", other))),
            };
            self.expect(':')?;
            let value = self.literal()?;
            entries.push((key, value));
            if !self.accept(',') {
                self.expect('}')?;
                break;
            }
        }
        Ok(entries)
    }

    fn literal(&mut self) -> Result<Literal> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let rest = self.rest();
                let len = rest
                    .find(quote)
                    .ok_or_else(|| self.error("unterminated string"))?;
                self.pos += len + 1;
                Ok(Literal::Str(rest[..len].to_string()))
            }
            Some('(') | Some('[') => {
                let close = if self.accept('(') {
                    ')'
                } else {
                    self.pos += 1;
                    ']'
                };
                let mut items = Vec::new();
                loop {
                    if self.accept(close) {
                        break;
                    }
                    items.push(self.literal()?);
                    if !self.accept(',') {
                        self.expect(close)?;
                        break;
                    }
                }
                Ok(Literal::Tuple(items))
            }
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let rest = self.rest();
                let len = rest
                    .char_indices()
                    .find(|&(i, ch)| !(ch.is_ascii_digit() || (i == 0 && ch == '-')))
                    .map_or(rest.len(), |(i, _)| i);
                let value = rest[..len]
                    .parse::<i64>()
                    .map_err(|_| self.error("bad integer"))?;
                self.pos += len;
                // Python 2 long suffix
                self.accept('L');
                Ok(Literal::Int(value))
            }
            Some(_) => {
                let rest = self.rest();
                let len = rest
                    .find(|ch: char| !ch.is_ascii_alphabetic())
                    .unwrap_or(rest.len());
                let literal = match &rest[..len] {
                    "True" => Literal::Bool(true),
                    "False" => Literal::Bool(false),
                    "None" => Literal::None,
                    _ => return Err(self.error("unexpected token")),
                };
                self.pos += len;
                Ok(literal)
            }
            None => Err(self.error("unexpected end of header")),
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::Npy(format!("header {} at column {}", message, self.pos))
    }
}
