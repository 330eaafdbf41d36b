use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::{DbError, Result};

/// Deepest nesting of arrays and documents accepted by the codec
pub const MAX_NESTING_DEPTH: usize = 64;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT64: u8 = 0x02;
const TAG_FLOAT64: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BINARY: u8 = 0x05;
const TAG_ARRAY: u8 = 0x06;
const TAG_DOCUMENT: u8 = 0x07;

/// A typed document value.
///
/// Documents keep their fields in insertion order. Equality compares
/// `Float64` bitwise, so a value always equals its own decoded encoding,
/// NaN payloads included.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Document(Vec<(String, Value)>),
}

impl Value {
    /// Builds a document from `(name, value)` pairs, keeping their order.
    pub fn document<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Document(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Looks up the first field called `name` when this is a document.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Document(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Serializes the value into its tagged binary form.
    ///
    /// Fails with `ValueTooLarge` when a string, binary or aggregate exceeds
    /// its length prefix, or with `CorruptEncoding` when nesting is deeper
    /// than `MAX_NESTING_DEPTH`.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf, 0)?;
        Ok(buf.freeze())
    }

    /// Returns the number of bytes `encode` produces.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int64(_) | Value::Float64(_) => 8,
            Value::String(s) => 4 + s.len(),
            Value::Binary(b) => 4 + b.len(),
            Value::Array(items) => 8 + items.iter().map(Value::encoded_len).sum::<usize>(),
            Value::Document(fields) => {
                8 + fields
                    .iter()
                    .map(|(name, value)| 2 + name.len() + value.encoded_len())
                    .sum::<usize>()
            }
        }
    }

    fn encode_into(&self, buf: &mut BytesMut, depth: usize) -> Result<()> {
        match self {
            Value::Null => buf.put_u8(TAG_NULL),
            Value::Bool(b) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(u8::from(*b));
            }
            Value::Int64(v) => {
                buf.put_u8(TAG_INT64);
                buf.put_i64_le(*v);
            }
            Value::Float64(v) => {
                buf.put_u8(TAG_FLOAT64);
                buf.put_f64_le(*v);
            }
            Value::String(s) => {
                buf.put_u8(TAG_STRING);
                buf.put_u32_le(length_u32(s.len())?);
                buf.put_slice(s.as_bytes());
            }
            Value::Binary(b) => {
                buf.put_u8(TAG_BINARY);
                buf.put_u32_le(length_u32(b.len())?);
                buf.put_slice(b);
            }
            Value::Array(items) => {
                check_depth(depth)?;
                buf.put_u8(TAG_ARRAY);
                let start = reserve_len(buf);
                buf.put_u32_le(length_u32(items.len())?);
                for item in items {
                    item.encode_into(buf, depth + 1)?;
                }
                backfill_len(buf, start)?;
            }
            Value::Document(fields) => {
                check_depth(depth)?;
                buf.put_u8(TAG_DOCUMENT);
                let start = reserve_len(buf);
                buf.put_u32_le(length_u32(fields.len())?);
                for (name, value) in fields {
                    if name.len() > u16::MAX as usize {
                        return Err(DbError::ValueTooLarge {
                            size: name.len(),
                            max: u16::MAX as usize,
                        });
                    }
                    buf.put_u16_le(name.len() as u16);
                    buf.put_slice(name.as_bytes());
                    value.encode_into(buf, depth + 1)?;
                }
                backfill_len(buf, start)?;
            }
        }
        Ok(())
    }

    /// Parses exactly one value from `data`; trailing bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Value> {
        let mut buf = data;
        let value = decode_value(&mut buf, 0)?;
        if buf.has_remaining() {
            return Err(DbError::corrupt(format!(
                "{} trailing bytes after value",
                buf.remaining()
            )));
        }
        Ok(value)
    }
}

/// Reserves an aggregate's payload length field, returning its offset.
fn reserve_len(buf: &mut BytesMut) -> usize {
    let start = buf.len();
    buf.put_u32_le(0);
    start
}

/// Fills in the length reserved at `start` with the bytes written since.
fn backfill_len(buf: &mut BytesMut, start: usize) -> Result<()> {
    let len = length_u32(buf.len() - start - 4)?;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn length_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| DbError::ValueTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

fn check_depth(depth: usize) -> Result<()> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(DbError::corrupt(format!(
            "nesting deeper than {}",
            MAX_NESTING_DEPTH
        )));
    }
    Ok(())
}

fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(DbError::corrupt(format!(
            "{} needs {} bytes, {} remain",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_bytes<'a>(buf: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    ensure(buf, len, what)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_string(buf: &mut &[u8], len: usize, what: &str) -> Result<String> {
    let raw = take_bytes(buf, len, what)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DbError::corrupt(format!("{} is not UTF-8", what)))
}

fn decode_value(buf: &mut &[u8], depth: usize) -> Result<Value> {
    ensure(buf, 1, "type tag")?;
    let tag = buf.get_u8();
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => {
            ensure(buf, 1, "bool")?;
            match buf.get_u8() {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(DbError::corrupt(format!("invalid bool byte {:#04x}", other))),
            }
        }
        TAG_INT64 => {
            ensure(buf, 8, "int64")?;
            Ok(Value::Int64(buf.get_i64_le()))
        }
        TAG_FLOAT64 => {
            ensure(buf, 8, "float64")?;
            Ok(Value::Float64(buf.get_f64_le()))
        }
        TAG_STRING => {
            ensure(buf, 4, "string length")?;
            let len = buf.get_u32_le() as usize;
            Ok(Value::String(take_string(buf, len, "string")?))
        }
        TAG_BINARY => {
            ensure(buf, 4, "binary length")?;
            let len = buf.get_u32_le() as usize;
            Ok(Value::Binary(take_bytes(buf, len, "binary")?.to_vec()))
        }
        TAG_ARRAY => {
            check_depth(depth)?;
            let mut payload = take_payload(buf, "array")?;
            let count = payload.get_u32_le() as usize;
            let mut items = Vec::with_capacity(count.min(payload.remaining()));
            for _ in 0..count {
                items.push(decode_value(&mut payload, depth + 1)?);
            }
            finish_payload(payload, "array")?;
            Ok(Value::Array(items))
        }
        TAG_DOCUMENT => {
            check_depth(depth)?;
            let mut payload = take_payload(buf, "document")?;
            let count = payload.get_u32_le() as usize;
            let mut fields = Vec::with_capacity(count.min(payload.remaining()));
            for _ in 0..count {
                ensure(payload, 2, "field name length")?;
                let name_len = payload.get_u16_le() as usize;
                let name = take_string(&mut payload, name_len, "field name")?;
                let value = decode_value(&mut payload, depth + 1)?;
                fields.push((name, value));
            }
            finish_payload(payload, "document")?;
            Ok(Value::Document(fields))
        }
        other => Err(DbError::corrupt(format!("unknown type tag {:#04x}", other))),
    }
}

/// Splits off an aggregate's declared payload; the returned slice starts at
/// the element count.
fn take_payload<'a>(buf: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    ensure(buf, 4, what)?;
    let len = buf.get_u32_le() as usize;
    if len < 4 {
        return Err(DbError::corrupt(format!(
            "{} payload of {} bytes cannot hold a count",
            what, len
        )));
    }
    take_bytes(buf, len, what)
}

fn finish_payload(payload: &[u8], what: &str) -> Result<()> {
    if payload.has_remaining() {
        return Err(DbError::corrupt(format!(
            "{} payload length disagrees with contents by {} bytes",
            what,
            payload.remaining()
        )));
    }
    Ok(())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Binary(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Document(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Binary(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
