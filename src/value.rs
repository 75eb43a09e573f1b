//! The value grammar shared by metadata and every record payload.
//!
//! See [`crate::decode`] and [`crate::encode`] for the wire format these
//! types are read from and written to.

use std::collections::BTreeMap;

/// A tagged numeric scalar.
///
/// Two scalars with the same numeric value but different tags are not
/// equal and serialize to different wire types -- `Num::U16(7)` and
/// `Num::U32(7)` are distinct values, not the same `7` wearing different
/// clothes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    I32(i32),
    F32(f32),
    F64(f64),
}

impl Num {
    /// Name used in [`crate::MmdbError::Unserializable`] messages.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Num::U16(_) => "uint16",
            Num::U32(_) => "uint32",
            Num::U64(_) => "uint64",
            Num::U128(_) => "uint128",
            Num::I32(_) => "int32",
            Num::F32(_) => "float",
            Num::F64(_) => "double",
        }
    }
}

/// A value in the MMDB grammar: what metadata is built from and what a
/// leaf record stores.
///
/// Booleans, UTF-8 strings, and raw byte strings are not wrapped in a
/// tagged scalar the way numbers are -- their Rust representation already
/// carries the wire type unambiguously.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Num(Num),
    Map(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Value::Num(Num::U16(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Num(Num::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Num(Num::U64(v)) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Num> for Value {
    fn from(n: Num) -> Self {
        Value::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
