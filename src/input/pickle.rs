// Pickle decoder
// numpy stores object arrays as a pickle stream. We only need the data they
// carry, so this is a small stack machine over the binary protocols (2-5).
// Nothing is imported or executed: globals and constructor calls are kept as
// inert descriptions that the ndarray module interprets afterwards.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A `module.name` reference as written by GLOBAL / STACK_GLOBAL
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub module: String,
    pub name: String,
}

impl Global {
    /// Compare against a numpy path, accepting both `numpy.core` (1.x)
    /// and `numpy._core` (2.x) module names
    pub fn matches(&self, module: &str, name: &str) -> bool {
        let normalized = self.module.replacen("numpy._core", "numpy.core", 1);
        self.name == name && normalized == module
    }
}

/// A constructor call recorded by REDUCE / NEWOBJ, plus the BUILD state
#[derive(Debug, Clone)]
pub struct Object {
    pub callable: Global,
    pub args: Vec<Value>,
    pub state: Option<Value>,
}

/// A decoded pickle value
///
/// Containers are reference counted because the memo can hand out the
/// same list or dict again after it has been filled.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Global(Global),
    Object(Rc<RefCell<Object>>),
}

impl Value {
    fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    fn dict(entries: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    /// Short name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Global(_) => "global",
            Value::Object(_) => "object",
        }
    }
}

const HIGHEST_PROTOCOL: u8 = 5;

/// Decode one pickle stream, returning the value left by STOP
pub fn from_slice(data: &[u8]) -> Result<Value> {
    Machine::new(data).run()
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<usize, Value>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value> {
        loop {
            let op = self.read_u8()?;
            match op {
                // PROTO
                0x80 => {
                    let version = self.read_u8()?;
                    if version > HIGHEST_PROTOCOL {
                        return Err(self.error(format!("unsupported protocol {}", version)));
                    }
                }
                // FRAME: frames are only a buffering hint
                0x95 => {
                    self.read_u64()?;
                }
                b'.' => return self.pop(),

                b'(' => self.marks.push(self.stack.len()),
                b'0' => {
                    self.pop()?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }

                b'N' => self.stack.push(Value::None),
                0x88 => self.stack.push(Value::Bool(true)),
                0x89 => self.stack.push(Value::Bool(false)),

                // BININT, BININT1, BININT2
                b'J' => {
                    let raw = self.take(4)?;
                    let v = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    self.stack.push(Value::Int(v as i64));
                }
                b'K' => {
                    let v = self.read_u8()?;
                    self.stack.push(Value::Int(v as i64));
                }
                b'M' => {
                    let raw = self.take(2)?;
                    let v = u16::from_le_bytes([raw[0], raw[1]]);
                    self.stack.push(Value::Int(v as i64));
                }
                // LONG1, LONG4
                0x8a => {
                    let n = self.read_u8()? as usize;
                    self.push_long(n)?;
                }
                0x8b => {
                    let n = self.read_u32()? as usize;
                    self.push_long(n)?;
                }
                // INT / LONG in text form
                b'I' => {
                    let line = self.read_line()?;
                    let value = match line {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        text => Value::Int(self.parse_int(text)?),
                    };
                    self.stack.push(value);
                }
                b'L' => {
                    let line = self.read_line()?;
                    let v = self.parse_int(line.trim_end_matches('L'))?;
                    self.stack.push(Value::Int(v));
                }
                // BINFLOAT is big-endian
                b'G' => {
                    let raw = self.take(8)?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(raw);
                    self.stack.push(Value::Float(f64::from_be_bytes(buf)));
                }
                b'F' => {
                    let line = self.read_line()?;
                    let v = line
                        .parse::<f64>()
                        .map_err(|_| self.error(format!("bad float literal '{}'", line)))?;
                    self.stack.push(Value::Float(v));
                }

                // SHORT_BINUNICODE, BINUNICODE, BINUNICODE8
                0x8c => {
                    let n = self.read_u8()? as usize;
                    self.push_unicode(n)?;
                }
                b'X' => {
                    let n = self.read_u32()? as usize;
                    self.push_unicode(n)?;
                }
                0x8d => {
                    let n = self.read_len64()?;
                    self.push_unicode(n)?;
                }
                // SHORT_BINBYTES, BINBYTES, BINBYTES8, BYTEARRAY8
                b'C' => {
                    let n = self.read_u8()? as usize;
                    let raw = self.take(n)?.to_vec();
                    self.stack.push(Value::Bytes(raw));
                }
                b'B' => {
                    let n = self.read_u32()? as usize;
                    let raw = self.take(n)?.to_vec();
                    self.stack.push(Value::Bytes(raw));
                }
                0x8e | 0x96 => {
                    let n = self.read_len64()?;
                    let raw = self.take(n)?.to_vec();
                    self.stack.push(Value::Bytes(raw));
                }
                // Python 2 byte strings, read as latin-1 text
                b'U' => {
                    let n = self.read_u8()? as usize;
                    let text = self.take(n)?.iter().map(|&b| b as char).collect();
                    self.stack.push(Value::Str(text));
                }
                b'T' => {
                    let n = self.read_u32()? as usize;
                    let text = self.take(n)?.iter().map(|&b| b as char).collect();
                    self.stack.push(Value::Str(text));
                }

                b')' => self.stack.push(Value::Tuple(Vec::new())),
                b't' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                0x85 => {
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a]));
                }
                0x86 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b]));
                }
                0x87 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b, c]));
                }

                b']' => self.stack.push(Value::list(Vec::new())),
                b'l' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::list(items));
                }
                b'a' => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                b'e' => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }

                // Sets only ever matter to us as sequences
                0x8f => self.stack.push(Value::list(Vec::new())),
                0x90 => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                0x91 => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::list(items));
                }

                b'}' => self.stack.push(Value::dict(Vec::new())),
                b'd' => {
                    let items = self.pop_mark()?;
                    let entries = self.pair_up(items)?;
                    self.stack.push(Value::dict(entries));
                }
                b's' => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.extend_dict(vec![(key, value)])?;
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    let entries = self.pair_up(items)?;
                    self.extend_dict(entries)?;
                }

                b'c' => {
                    let module = self.read_line()?.to_string();
                    let name = self.read_line()?.to_string();
                    self.stack.push(Value::Global(Global { module, name }));
                }
                0x93 => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Value::Str(module), Value::Str(name)) => {
                            self.stack.push(Value::Global(Global { module, name }))
                        }
                        _ => return Err(self.error("STACK_GLOBAL expects two strings")),
                    }
                }

                b'R' => {
                    let args = self.pop_tuple("REDUCE")?;
                    let callable = self.pop_global("REDUCE")?;
                    let value = self.call(callable, args)?;
                    self.stack.push(value);
                }
                0x81 => {
                    let args = self.pop_tuple("NEWOBJ")?;
                    let class = self.pop_global("NEWOBJ")?;
                    self.stack.push(new_object(class, args));
                }
                // NEWOBJ_EX: keyword arguments are not needed by anything we read
                0x92 => {
                    self.pop()?;
                    let args = self.pop_tuple("NEWOBJ_EX")?;
                    let class = self.pop_global("NEWOBJ_EX")?;
                    self.stack.push(new_object(class, args));
                }
                b'b' => {
                    let state = self.pop()?;
                    match self.top()? {
                        Value::Object(object) => object.borrow_mut().state = Some(state),
                        other => {
                            let kind = other.kind();
                            return Err(self.error(format!("BUILD on a {}", kind)));
                        }
                    }
                }

                // Memo
                b'p' => {
                    let line = self.read_line()?;
                    let index = self.parse_int(line)? as usize;
                    self.put(index)?;
                }
                b'q' => {
                    let index = self.read_u8()? as usize;
                    self.put(index)?;
                }
                b'r' => {
                    let index = self.read_u32()? as usize;
                    self.put(index)?;
                }
                0x94 => {
                    let index = self.memo.len();
                    self.put(index)?;
                }
                b'g' => {
                    let line = self.read_line()?;
                    let index = self.parse_int(line)? as usize;
                    self.get(index)?;
                }
                b'h' => {
                    let index = self.read_u8()? as usize;
                    self.get(index)?;
                }
                b'j' => {
                    let index = self.read_u32()? as usize;
                    self.get(index)?;
                }

                other => {
                    return Err(Error::Pickle {
                        offset: self.pos - 1,
                        message: format!("unsupported opcode 0x{:02x}", other),
                    })
                }
            }
        }
    }

    /// Evaluate the only call that is safe and useful to run eagerly:
    /// `_codecs.encode(text, "latin1")`, which protocol 2 uses for bytes.
    /// Everything else becomes an inert Object.
    fn call(&self, callable: Global, args: Vec<Value>) -> Result<Value> {
        if callable.module == "_codecs" && callable.name == "encode" {
            return match args.as_slice() {
                [Value::Str(text), Value::Str(encoding)]
                    if encoding == "latin1" || encoding == "latin-1" =>
                {
                    text.chars()
                        .map(|c| u8::try_from(c as u32))
                        .collect::<std::result::Result<Vec<u8>, _>>()
                        .map(Value::Bytes)
                        .map_err(|_| self.error("non latin-1 character in encoded bytes"))
                }
                _ => Err(self.error("unsupported _codecs.encode arguments")),
            };
        }
        Ok(new_object(callable, args))
    }

    fn push_long(&mut self, n: usize) -> Result<()> {
        let raw = self.take(n)?;
        let value = decode_long(raw).ok_or_else(|| self.error("integer does not fit in 64 bits"))?;
        self.stack.push(Value::Int(value));
        Ok(())
    }

    fn push_unicode(&mut self, n: usize) -> Result<()> {
        let raw = self.take(n)?;
        let text = std::str::from_utf8(raw)
            .map_err(|_| self.error("invalid UTF-8 in string"))?
            .to_string();
        self.stack.push(Value::Str(text));
        Ok(())
    }

    fn extend_list(&mut self, items: Vec<Value>) -> Result<()> {
        match self.top()? {
            Value::List(list) => {
                list.borrow_mut().extend(items);
                Ok(())
            }
            other => {
                let kind = other.kind();
                Err(self.error(format!("append to a {}", kind)))
            }
        }
    }

    fn extend_dict(&mut self, entries: Vec<(Value, Value)>) -> Result<()> {
        match self.top()? {
            Value::Dict(dict) => {
                let mut dict = dict.borrow_mut();
                for (key, value) in entries {
                    // Later assignments to an equal string key replace earlier ones
                    if let Value::Str(name) = &key {
                        if let Some(slot) = dict
                            .iter_mut()
                            .find(|(k, _)| matches!(k, Value::Str(existing) if existing == name))
                        {
                            slot.1 = value;
                            continue;
                        }
                    }
                    dict.push((key, value));
                }
                Ok(())
            }
            other => {
                let kind = other.kind();
                Err(self.error(format!("set item on a {}", kind)))
            }
        }
    }

    fn pair_up(&self, items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
        if items.len() % 2 != 0 {
            return Err(self.error("odd number of items for a dict"));
        }
        let mut entries = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn put(&mut self, index: usize) -> Result<()> {
        let top = self.top()?.clone();
        self.memo.insert(index, top);
        Ok(())
    }

    fn get(&mut self, index: usize) -> Result<()> {
        let value = self
            .memo
            .get(&index)
            .cloned()
            .ok_or_else(|| self.error(format!("memo slot {} is empty", index)))?;
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        if self.marks.last() == Some(&self.stack.len()) {
            return Err(self.error("stack underflow at mark"));
        }
        self.stack
            .pop()
            .ok_or_else(|| self.error("stack underflow"))
    }

    fn top(&self) -> Result<&Value> {
        self.stack.last().ok_or_else(|| self.error("empty stack"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let start = self
            .marks
            .pop()
            .ok_or_else(|| self.error("no mark on the stack"))?;
        Ok(self.stack.split_off(start))
    }

    fn pop_tuple(&mut self, op: &str) -> Result<Vec<Value>> {
        match self.pop()? {
            Value::Tuple(items) => Ok(items),
            other => Err(self.error(format!("{} expects a tuple, got {}", op, other.kind()))),
        }
    }

    fn pop_global(&mut self, op: &str) -> Result<Global> {
        match self.pop()? {
            Value::Global(global) => Ok(global),
            other => Err(self.error(format!("{} expects a global, got {}", op, other.kind()))),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.error("unexpected end of data"))?;
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_len64(&mut self) -> Result<usize> {
        let n = self.read_u64()?;
        usize::try_from(n).map_err(|_| self.error("length does not fit in memory"))
    }

    fn read_line(&mut self) -> Result<&'a str> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| self.error("unterminated line"))?;
        let line = std::str::from_utf8(&rest[..len])
            .map_err(|_| self.error("invalid UTF-8 in text opcode"))?;
        self.pos += len + 1;
        Ok(line)
    }

    fn parse_int(&self, text: &str) -> Result<i64> {
        text.trim()
            .parse::<i64>()
            .map_err(|_| self.error(format!("bad integer literal '{}'", text)))
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Pickle {
            offset: self.pos,
            message: message.into(),
        }
    }
}

fn new_object(callable: Global, args: Vec<Value>) -> Value {
    Value::Object(Rc::new(RefCell::new(Object {
        callable,
        args,
        state: None,
    })))
}

/// Little-endian two's complement, as written by LONG1 / LONG4
fn decode_long(raw: &[u8]) -> Option<i64> {
    if raw.is_empty() {
        return Some(0);
    }
    if raw.len() > 8 {
        return None;
    }
    let negative = raw[raw.len() - 1] & 0x80 != 0;
    let mut buf = if negative { [0xff; 8] } else { [0; 8] };
    buf[..raw.len()].copy_from_slice(raw);
    Some(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_long_sign_extension() {
        assert_eq!(decode_long(&[]), Some(0));
        assert_eq!(decode_long(&[0xff]), Some(-1));
        assert_eq!(decode_long(&[0x00, 0x01]), Some(256));
        assert_eq!(decode_long(&[0xff, 0x00]), Some(255));
        assert_eq!(decode_long(&[0; 9]), None);
    }

    #[test]
    fn test_dict_of_list_of_tuples() {
        // pickle.dumps({'pairs': [('A', 'B')]}, protocol=2)
        let data = b"\x80\x02}q\x00X\x05\x00\x00\x00pairsq\x01]q\x02X\x01\x00\x00\x00Aq\x03X\x01\x00\x00\x00Bq\x04\x86q\x05as.";
        let value = from_slice(data).unwrap();

        let Value::Dict(dict) = value else {
            panic!("expected a dict");
        };
        let dict = dict.borrow();
        assert_eq!(dict.len(), 1);
        assert!(matches!(&dict[0].0, Value::Str(k) if k == "pairs"));

        let Value::List(list) = &dict[0].1 else {
            panic!("expected a list");
        };
        let list = list.borrow();
        match &list[0] {
            Value::Tuple(items) => {
                assert!(matches!(&items[0], Value::Str(s) if s == "A"));
                assert!(matches!(&items[1], Value::Str(s) if s == "B"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_memo_shares_filled_list() {
        // EMPTY_LIST, BINPUT 0, BININT1 7, APPEND, POP, BINGET 0, STOP
        let data = b"\x80\x02]q\x00K\x07a0h\x00.";
        let value = from_slice(data).unwrap();

        let Value::List(list) = value else {
            panic!("expected a list");
        };
        assert!(matches!(list.borrow().as_slice(), [Value::Int(7)]));
    }

    #[test]
    fn test_codecs_encode_becomes_bytes() {
        // _codecs.encode('\xff\x01', 'latin1') as protocol 2 writes it
        let data = b"\x80\x02c_codecs\nencode\nX\x03\x00\x00\x00\xc3\xbf\x01X\x06\x00\x00\x00latin1\x86R.";
        let value = from_slice(data).unwrap();
        assert!(matches!(value, Value::Bytes(ref b) if b == &[0xff, 0x01]));
    }

    #[test]
    fn test_reduce_and_build_are_recorded() {
        // GLOBAL numpy dtype, ('i8', False, True), REDUCE, (3, '<'), BUILD
        let data = b"\x80\x02cnumpy\ndtype\nX\x02\x00\x00\x00i8\x89\x88\x87R(K\x03X\x01\x00\x00\x00<tb.";
        let value = from_slice(data).unwrap();

        let Value::Object(object) = value else {
            panic!("expected an object");
        };
        let object = object.borrow();
        assert!(object.callable.matches("numpy", "dtype"));
        assert_eq!(object.args.len(), 3);
        assert!(matches!(object.state, Some(Value::Tuple(ref s)) if s.len() == 2));
    }

    #[test]
    fn test_numpy_2_module_path_matches() {
        let global = Global {
            module: "numpy._core.multiarray".to_string(),
            name: "_reconstruct".to_string(),
        };
        assert!(global.matches("numpy.core.multiarray", "_reconstruct"));
        assert!(!global.matches("numpy.core.multiarray", "scalar"));
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let err = from_slice(b"\x80\x02X\x05\x00\x00\x00ab").unwrap_err();
        assert!(matches!(err, Error::Pickle { .. }));
    }

    #[test]
    fn test_unknown_opcode_is_an_error() {
        let err = from_slice(b"\x80\x02\xff").unwrap_err();
        match err {
            Error::Pickle { offset, message } => {
                assert_eq!(offset, 2);
                assert!(message.contains("0xff"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
