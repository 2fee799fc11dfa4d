//! Decoder for the serialized object graph holding the archive index.
//!
//! The index is written by Python's `pickle` module. Only the subset of the
//! opcode set needed for plain data is understood: integers, byte and text
//! strings, tuples, lists and dicts, plus the two reductions Python 3 emits
//! when it writes byte strings at protocol 2. Everything else is rejected.

use std::collections::HashMap;

use unrpa_common::BinaryReader;

use crate::{Error, Result};

/// A decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Bytes(Vec<u8>),
    Text(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    /// A reference to a module-level callable, only valid as a reduce target.
    Global { module: String, name: String },
}

impl Value {
    /// Short type name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Global { .. } => "global",
        }
    }
}

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';

    // Protocol 2
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    // Protocol 3
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    // Protocol 4
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    // Protocol 5
    pub const BYTEARRAY8: u8 = 0x96;
}

/// Highest protocol version understood.
pub const HIGHEST_PROTOCOL: u8 = 5;

/// Decode a complete pickle stream into a [`Value`].
///
/// Containers are memoized by value: a memo entry is a snapshot of the
/// value when it was stored. Recalling a list or dict is rejected, since a
/// later `APPEND` or `SETITEM` would not show up in the snapshot.
///
/// Truncated streams and undecodable text are reported as [`Error::Format`].
pub fn loads(data: &[u8]) -> Result<Value> {
    Machine::new(data).run().map_err(|e| match e {
        Error::Common(e) => Error::format(format!("malformed pickle: {e}")),
        other => other,
    })
}

struct Machine<'a> {
    reader: BinaryReader<'a>,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BinaryReader::new(data),
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value> {
        loop {
            let position = self.reader.position();
            let opcode = self.reader.read_u8()?;

            match opcode {
                op::PROTO => {
                    let protocol = self.reader.read_u8()?;
                    if protocol > HIGHEST_PROTOCOL {
                        return Err(Error::format(format!(
                            "unsupported pickle protocol {protocol}"
                        )));
                    }
                }
                op::FRAME => {
                    self.reader.read_u64()?;
                }
                op::STOP => {
                    let value = self.pop()?;
                    if !self.stack.is_empty() || !self.marks.is_empty() {
                        return Err(Error::format("pickle stopped with items left on the stack"));
                    }
                    return Ok(value);
                }

                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    self.pop()?;
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }

                op::NONE => self.stack.push(Value::None),
                op::NEWTRUE => self.stack.push(Value::Bool(true)),
                op::NEWFALSE => self.stack.push(Value::Bool(false)),

                op::INT => {
                    let line = self.read_text_line()?;
                    let value = match line {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        _ => Value::Int(parse_decimal(line)?),
                    };
                    self.stack.push(value);
                }
                op::LONG => {
                    let line = self.read_text_line()?;
                    let digits = line.strip_suffix('L').unwrap_or(line);
                    self.stack.push(Value::Int(parse_decimal(digits)?));
                }
                op::BININT => {
                    let value = self.reader.read_i32()?;
                    self.stack.push(Value::Int(value.into()));
                }
                op::BININT1 => {
                    let value = self.reader.read_u8()?;
                    self.stack.push(Value::Int(value.into()));
                }
                op::BININT2 => {
                    let value = self.reader.read_u16()?;
                    self.stack.push(Value::Int(value.into()));
                }
                op::LONG1 => {
                    let size = self.reader.read_u8()? as usize;
                    let bytes = self.reader.read_bytes(size)?;
                    self.stack.push(Value::Int(decode_long(bytes)?));
                }
                op::LONG4 => {
                    let size = self.read_length_i32()?;
                    let bytes = self.reader.read_bytes(size)?;
                    self.stack.push(Value::Int(decode_long(bytes)?));
                }

                op::STRING => {
                    let line = self.reader.read_line()?;
                    self.stack.push(Value::Bytes(unquote_string(line)?));
                }
                op::BINSTRING => {
                    let size = self.read_length_i32()?;
                    let bytes = self.reader.read_bytes(size)?;
                    self.stack.push(Value::Bytes(bytes.to_vec()));
                }
                op::SHORT_BINSTRING | op::SHORT_BINBYTES => {
                    let size = self.reader.read_u8()? as usize;
                    let bytes = self.reader.read_bytes(size)?;
                    self.stack.push(Value::Bytes(bytes.to_vec()));
                }
                op::BINBYTES => {
                    let size = self.reader.read_u32()? as usize;
                    let bytes = self.reader.read_bytes(size)?;
                    self.stack.push(Value::Bytes(bytes.to_vec()));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let size = self.read_length_u64()?;
                    let bytes = self.reader.read_bytes(size)?;
                    self.stack.push(Value::Bytes(bytes.to_vec()));
                }

                op::UNICODE => {
                    let line = self.reader.read_line()?;
                    self.stack.push(Value::Text(decode_raw_unicode_escape(line)?));
                }
                op::SHORT_BINUNICODE => {
                    let size = self.reader.read_u8()? as usize;
                    let text = self.reader.read_string(size)?;
                    self.stack.push(Value::Text(text.to_string()));
                }
                op::BINUNICODE => {
                    let size = self.reader.read_u32()? as usize;
                    let text = self.reader.read_string(size)?;
                    self.stack.push(Value::Text(text.to_string()));
                }
                op::BINUNICODE8 => {
                    let size = self.read_length_u64()?;
                    let text = self.reader.read_string(size)?;
                    self.stack.push(Value::Text(text.to_string()));
                }

                op::EMPTY_TUPLE => self.stack.push(Value::Tuple(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let count = (opcode - op::TUPLE1 + 1) as usize;
                    if self.stack.len() < count + self.floor() {
                        return Err(Error::format("tuple opcode underflows the stack"));
                    }
                    let items = self.stack.split_off(self.stack.len() - count);
                    self.stack.push(Value::Tuple(items));
                }

                op::EMPTY_LIST => self.stack.push(Value::List(Vec::new())),
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                op::APPEND => {
                    let item = self.pop()?;
                    self.list_mut()?.push(item);
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.list_mut()?.extend(items);
                }

                op::EMPTY_DICT => self.stack.push(Value::Dict(Vec::new())),
                op::DICT => {
                    let items = self.pop_mark()?;
                    let pairs = pair_up(items)?;
                    self.stack.push(Value::Dict(pairs));
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.dict_mut()?.push((key, value));
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = pair_up(items)?;
                    self.dict_mut()?.extend(pairs);
                }

                op::PUT => {
                    let id = parse_memo_id(self.read_text_line()?)?;
                    self.memoize(id)?;
                }
                op::BINPUT => {
                    let id = self.reader.read_u8()?.into();
                    self.memoize(id)?;
                }
                op::LONG_BINPUT => {
                    let id = self.reader.read_u32()?;
                    self.memoize(id)?;
                }
                op::MEMOIZE => {
                    let id = u32::try_from(self.memo.len())
                        .map_err(|_| Error::format("memo table overflow"))?;
                    self.memoize(id)?;
                }
                op::GET => {
                    let id = parse_memo_id(self.read_text_line()?)?;
                    self.recall(id)?;
                }
                op::BINGET => {
                    let id = self.reader.read_u8()?.into();
                    self.recall(id)?;
                }
                op::LONG_BINGET => {
                    let id = self.reader.read_u32()?;
                    self.recall(id)?;
                }

                op::GLOBAL => {
                    let module = self.read_text_line()?.to_string();
                    let name = self.read_text_line()?.to_string();
                    self.stack.push(Value::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Value::Text(module), Value::Text(name)) => {
                            self.stack.push(Value::Global { module, name })
                        }
                        _ => return Err(Error::format("STACK_GLOBAL expects two text values")),
                    }
                }
                op::REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.stack.push(reduce(callable, args)?);
                }

                other => {
                    return Err(Error::format(format!(
                        "unsupported pickle opcode {other:#04x} at offset {position}"
                    )));
                }
            }
        }
    }

    /// Lowest stack index usable by the innermost open mark.
    fn floor(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    fn pop(&mut self) -> Result<Value> {
        if self.stack.len() <= self.floor() {
            return Err(Error::format("pickle stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| Error::format("pickle stack underflow"))
    }

    fn top(&self) -> Result<&Value> {
        self.stack
            .last()
            .ok_or_else(|| Error::format("pickle stack is empty"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| Error::format("pickle mark not found"))?;
        Ok(self.stack.split_off(mark))
    }

    fn list_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self.stack.last_mut() {
            Some(Value::List(items)) => Ok(items),
            Some(other) => Err(Error::format(format!("cannot append to {}", other.kind()))),
            None => Err(Error::format("append with an empty stack")),
        }
    }

    fn dict_mut(&mut self) -> Result<&mut Vec<(Value, Value)>> {
        match self.stack.last_mut() {
            Some(Value::Dict(pairs)) => Ok(pairs),
            Some(other) => Err(Error::format(format!("cannot set item on {}", other.kind()))),
            None => Err(Error::format("set item with an empty stack")),
        }
    }

    fn memoize(&mut self, id: u32) -> Result<()> {
        let value = self.top()?.clone();
        self.memo.insert(id, value);
        Ok(())
    }

    fn recall(&mut self, id: u32) -> Result<()> {
        let value = self
            .memo
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::format(format!("memo key {id} not found")))?;
        if matches!(value, Value::List(_) | Value::Dict(_)) {
            return Err(Error::format(format!(
                "memo key {id} refers to a mutable {}",
                value.kind()
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn read_text_line(&mut self) -> Result<&'a str> {
        let line = self.reader.read_line()?;
        std::str::from_utf8(line).map_err(|e| Error::format(format!("invalid text line: {e}")))
    }

    fn read_length_i32(&mut self) -> Result<usize> {
        let size = self.reader.read_i32()?;
        usize::try_from(size).map_err(|_| Error::format(format!("negative length {size}")))
    }

    fn read_length_u64(&mut self) -> Result<usize> {
        let size = self.reader.read_u64()?;
        usize::try_from(size).map_err(|_| Error::format(format!("length {size} is too large")))
    }
}

fn pair_up(items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        return Err(Error::format("odd number of items for a dict"));
    }

    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Evaluate the reductions used to rebuild byte strings.
fn reduce(callable: Value, args: Value) -> Result<Value> {
    let (module, name) = match callable {
        Value::Global { module, name } => (module, name),
        other => return Err(Error::format(format!("cannot call {}", other.kind()))),
    };
    let args = match args {
        Value::Tuple(args) => args,
        _ => return Err(Error::format("reduce arguments must be a tuple")),
    };

    match (module.as_str(), name.as_str(), args.as_slice()) {
        ("_codecs", "encode", [Value::Text(text), Value::Text(encoding)])
            if matches!(encoding.as_str(), "latin1" | "latin-1" | "iso-8859-1") =>
        {
            Ok(Value::Bytes(encode_latin1(text)?))
        }
        ("__builtin__" | "builtins", "bytes" | "bytearray", []) => Ok(Value::Bytes(Vec::new())),
        _ => Err(Error::format(format!(
            "unsupported reduction {module}.{name} with {} arguments",
            args.len()
        ))),
    }
}

/// Encode text as Latin-1, failing on code points above 0xFF.
pub fn encode_latin1(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| Error::format(format!("character {c:?} is not Latin-1")))
        })
        .collect()
}

/// Decode a little-endian two's complement integer.
fn decode_long(bytes: &[u8]) -> Result<i128> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 16 {
        return Err(Error::format(format!(
            "integer of {} bytes is too large",
            bytes.len()
        )));
    }

    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buffer = [fill; 16];
    buffer[..bytes.len()].copy_from_slice(bytes);
    Ok(i128::from_le_bytes(buffer))
}

fn parse_decimal(text: &str) -> Result<i128> {
    text.trim()
        .parse()
        .map_err(|e| Error::format(format!("invalid integer {text:?}: {e}")))
}

fn parse_memo_id(text: &str) -> Result<u32> {
    text.trim()
        .parse()
        .map_err(|e| Error::format(format!("invalid memo key {text:?}: {e}")))
}

/// Decode a protocol 0 `STRING` argument: a quoted Python literal.
fn unquote_string(line: &[u8]) -> Result<Vec<u8>> {
    let inner = match line {
        [b'\'', inner @ .., b'\''] | [b'"', inner @ .., b'"'] => inner,
        _ => return Err(Error::format("STRING argument is not quoted")),
    };

    let mut out = Vec::with_capacity(inner.len());
    let mut bytes = inner.iter().copied();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'0') => out.push(0),
            Some(b'x') => {
                let hi = bytes.next();
                let lo = bytes.next();
                let digits = [hi.unwrap_or(0), lo.unwrap_or(0)];
                let value = std::str::from_utf8(&digits)
                    .ok()
                    .and_then(|d| u8::from_str_radix(d, 16).ok())
                    .ok_or_else(|| Error::format("invalid \\x escape in STRING"))?;
                out.push(value);
            }
            Some(other @ (b'\\' | b'\'' | b'"')) => out.push(other),
            _ => return Err(Error::format("invalid escape in STRING")),
        }
    }
    Ok(out)
}

/// Decode a protocol 0 `UNICODE` argument (raw-unicode-escape).
fn decode_raw_unicode_escape(line: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let b = line[i];
        let width = match (b, line.get(i + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            _ => 0,
        };

        if width == 0 {
            out.push(char::from(b));
            i += 1;
            continue;
        }

        let digits = line
            .get(i + 2..i + 2 + width)
            .and_then(|d| std::str::from_utf8(d).ok())
            .ok_or_else(|| Error::format("truncated unicode escape"))?;
        let c = u32::from_str_radix(digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| Error::format(format!("invalid unicode escape \\u{digits}")))?;
        out.push(c);
        i += 2 + width;
    }
    Ok(out)
}
