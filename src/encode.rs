//! The value codec encoder, written in a buffer-then-prefix-length style.

use std::collections::HashMap;

use crate::error::{MmdbError, MmdbResult};
use crate::value::{Num, Value};

const TYPE_UTF8: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOLEAN: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Builds a value header: the control byte(s) for `type_` encoding `length`,
/// with the minimal length-extension form. Mirrors
/// `writer.py:_make_value_header`.
fn make_header(type_: u8, length: u64) -> MmdbResult<Vec<u8>> {
    if length >= 16_843_036 {
        return Err(MmdbError::HeaderLengthOverflow(length));
    }

    let (five_bits, extra): (u8, Vec<u8>) = if length >= 65_821 {
        let rem = length - 65_821;
        (
            31,
            vec![(rem >> 16) as u8, (rem >> 8) as u8, rem as u8],
        )
    } else if length >= 285 {
        let rem = length - 285;
        (30, vec![(rem >> 8) as u8, rem as u8])
    } else if length >= 29 {
        (29, vec![(length - 29) as u8])
    } else {
        (length as u8, Vec::new())
    };

    let mut out = Vec::with_capacity(2 + extra.len());
    if type_ <= 7 {
        out.push((type_ << 5) | five_bits);
    } else {
        out.push(five_bits);
        out.push(type_ - 7);
    }
    out.extend(extra);
    Ok(out)
}

/// Encodes an absolute pointer value using the smallest of the four
/// pointer encodings. Mirrors `writer.py:_make_pointer`.
fn make_pointer(pointer: u64) -> MmdbResult<Vec<u8>> {
    if pointer >= 1 << 32 {
        return Err(MmdbError::PointerOverflow(pointer));
    }
    if pointer >= 134_217_728 {
        let mut out = vec![0x38];
        out.extend_from_slice(&(pointer as u32).to_be_bytes());
        Ok(out)
    } else if pointer >= 526_336 {
        let p = pointer - 526_336;
        Ok(vec![
            0x30 | (((p >> 24) & 0x07) as u8),
            (p >> 16) as u8,
            (p >> 8) as u8,
            p as u8,
        ])
    } else if pointer >= 2048 {
        let p = pointer - 2048;
        Ok(vec![0x28 | (((p >> 16) & 0x07) as u8), (p >> 8) as u8, p as u8])
    } else {
        Ok(vec![0x20 | (((pointer >> 8) & 0x07) as u8), pointer as u8])
    }
}

/// Strips leading zero bytes from an unsigned value's big-endian
/// representation, enforcing `maxlen`. Mirrors
/// `writer.py:_serialize_unsigned`.
fn serialize_unsigned(value: u128, ty: &'static str, maxlen: usize) -> MmdbResult<Vec<u8>> {
    let full = value.to_be_bytes();
    let first_nonzero = full.iter().position(|b| *b != 0).unwrap_or(full.len());
    let trimmed = &full[first_nonzero..];
    if trimmed.len() > maxlen {
        return Err(MmdbError::IntegerTooWide {
            ty,
            len: trimmed.len(),
            max: maxlen,
        });
    }
    Ok(trimmed.to_vec())
}

/// Identity-keyed pointer back-reference cache for the writer's leaf
/// dedup pass (see [`encode_leaf`]).
///
/// Keyed on an `Rc<Value>`'s address, not its structural content: this is
/// what lets a caller opt two leaves into sharing storage by building them
/// from the same `Rc<Value>`, while two merely-equal-but-distinct values
/// still get independent copies. See Design Note "Identity-keyed pointer
/// dedup".
#[derive(Default)]
pub struct PointerCache {
    offsets: HashMap<usize, u64>,
    data: Vec<u8>,
}

impl PointerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The encoded data section accumulated so far, in the order leaves
    /// were first encountered.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Encodes one value, starting immediately at the current cursor with no
/// preamble and no pointer back-references. Used for metadata (which has
/// no data section to point into) and for any value nested inside a leaf.
pub fn encode(value: &Value) -> MmdbResult<Vec<u8>> {
    match value {
        Value::String(s) => {
            let bytes = s.as_bytes();
            let mut out = make_header(TYPE_UTF8, bytes.len() as u64)?;
            out.extend_from_slice(bytes);
            Ok(out)
        }
        Value::Bytes(b) => {
            let mut out = make_header(TYPE_BYTES, b.len() as u64)?;
            out.extend_from_slice(b);
            Ok(out)
        }
        Value::Bool(b) => make_header(TYPE_BOOLEAN, if *b { 1 } else { 0 }),
        Value::Num(n @ Num::U16(v)) => {
            let payload = serialize_unsigned(*v as u128, n.type_name(), 2)?;
            let mut out = make_header(TYPE_UINT16, payload.len() as u64)?;
            out.extend_from_slice(&payload);
            Ok(out)
        }
        Value::Num(n @ Num::U32(v)) => {
            let payload = serialize_unsigned(*v as u128, n.type_name(), 4)?;
            let mut out = make_header(TYPE_UINT32, payload.len() as u64)?;
            out.extend_from_slice(&payload);
            Ok(out)
        }
        Value::Num(n @ Num::U64(v)) => {
            let payload = serialize_unsigned(*v as u128, n.type_name(), 8)?;
            let mut out = make_header(TYPE_UINT64, payload.len() as u64)?;
            out.extend_from_slice(&payload);
            Ok(out)
        }
        Value::Num(n @ Num::U128(v)) => {
            let payload = serialize_unsigned(*v, n.type_name(), 16)?;
            let mut out = make_header(TYPE_UINT128, payload.len() as u64)?;
            out.extend_from_slice(&payload);
            Ok(out)
        }
        Value::Num(Num::F64(v)) => {
            let mut out = make_header(TYPE_DOUBLE, 8)?;
            out.extend_from_slice(&v.to_be_bytes());
            Ok(out)
        }
        Value::Num(Num::F32(v)) => {
            let mut out = make_header(TYPE_FLOAT, 4)?;
            out.extend_from_slice(&v.to_be_bytes());
            Ok(out)
        }
        Value::Num(Num::I32(_)) => Err(MmdbError::Int32Unimplemented),
        Value::Map(m) => {
            let mut out = make_header(TYPE_MAP, m.len() as u64)?;
            for (k, v) in m {
                out.extend(encode(&Value::String(k.clone()))?);
                out.extend(encode(v)?);
            }
            Ok(out)
        }
        Value::Array(a) => {
            let mut out = make_header(TYPE_ARRAY, a.len() as u64)?;
            for v in a {
                out.extend(encode(v)?);
            }
            Ok(out)
        }
    }
}

/// Encodes one leaf's value into `cache`'s data section, deduplicating by
/// the `Rc<Value>`'s identity.
///
/// On first encounter of a given value's address, its full encoding is
/// appended to the data section and the value's identity is registered
/// against the offset it was written at. On every later encounter of the
/// *same* `Rc<Value>` (two leaves built from one shared `Rc`, e.g. many
/// networks all mapping to one `{"country": "US"}` record), only a pointer
/// to the first offset is appended -- the shared value's bytes are written
/// exactly once. Returns the offset (relative to the start of the data
/// section, matching `data_pointer - 16` in `writer.py:_enumerate_nodes`)
/// at which *this* leaf's entry begins, which is what the caller stashes
/// on the leaf and uses to build its tree record.
pub fn encode_leaf(value: &std::rc::Rc<Value>, cache: &mut PointerCache) -> MmdbResult<u32> {
    let key = std::rc::Rc::as_ptr(value) as usize;
    let entry_offset = cache.data.len() as u32;

    if let Some(&target) = cache.offsets.get(&key) {
        let ptr = make_pointer(target)?;
        cache.data.extend_from_slice(&ptr);
    } else {
        let bytes = encode(value)?;
        cache.offsets.insert(key, entry_offset as u64);
        cache.data.extend_from_slice(&bytes);
    }

    Ok(entry_offset)
}
