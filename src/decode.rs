//! The value codec decoder.
//!
//! Byte access follows a cursor-returning style
//! (`parse_u16`/`parse_u32`/... each returning `(value, remainder)`), adapted
//! here to an absolute-offset cursor since pointers jump around rather than
//! simply advancing.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::error::{MmdbError, MmdbResult};
use crate::value::{Num, Value};

const TYPE_POINTER: u8 = 1;
const TYPE_UTF8: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_DATA_CACHE_CONTAINER: u8 = 12;
const TYPE_END_MARKER: u8 = 13;
const TYPE_BOOLEAN: u8 = 14;
const TYPE_FLOAT: u8 = 15;

fn byte_at(buf: &[u8], offset: usize) -> MmdbResult<u8> {
    buf.get(offset).copied().ok_or(MmdbError::Truncated {
        needed: offset + 1,
        available: buf.len(),
    })
}

fn slice_at(buf: &[u8], offset: usize, len: usize) -> MmdbResult<&[u8]> {
    buf.get(offset..offset + len).ok_or(MmdbError::Truncated {
        needed: offset + len,
        available: buf.len(),
    })
}

fn read_uint(buf: &[u8], offset: usize, len: usize) -> MmdbResult<u128> {
    let bytes = slice_at(buf, offset, len)?;
    let mut n: u128 = 0;
    for b in bytes {
        n = (n << 8) | *b as u128;
    }
    Ok(n)
}

/// Decodes values out of a shared buffer, resolving pointer back-references
/// relative to `data_offset` and memoising each distinct pointer payload so
/// shared substructures decode to a single logical [`Value`].
///
/// A `Decoder`'s pointer cache never outlives it, and decoders are never
/// shared across files.
pub struct Decoder<'a> {
    buf: &'a [u8],
    data_offset: usize,
    pointer_cache: HashMap<u64, Value>,
}

impl<'a> Decoder<'a> {
    /// `data_offset` is the byte offset (from the start of `buf`) of the
    /// data section; pointer payloads are added to it.
    pub fn new(buf: &'a [u8], data_offset: usize) -> Self {
        Decoder {
            buf,
            data_offset,
            pointer_cache: HashMap::new(),
        }
    }

    /// Decodes one value starting at `offset`, returning the value and the
    /// offset immediately past its header+payload (not recursing through a
    /// pointer target's own bytes -- the outer cursor resumes right after
    /// the pointer, per spec).
    pub fn decode_at(&mut self, offset: usize) -> MmdbResult<(Value, usize)> {
        let control = byte_at(self.buf, offset)?;
        let mut cursor = offset + 1;

        let mut tag = control >> 5;
        if tag == 0 {
            tag = 7 + byte_at(self.buf, cursor)?;
            cursor += 1;
        }

        let mut length = (control & 0x1f) as usize;
        if tag != TYPE_POINTER && tag != TYPE_BOOLEAN {
            match length {
                29 => {
                    length = 29 + byte_at(self.buf, cursor)? as usize;
                    cursor += 1;
                }
                30 => {
                    let b = slice_at(self.buf, cursor, 2)?;
                    length = 285 + ((b[0] as usize) << 8 | b[1] as usize);
                    cursor += 2;
                }
                31 => {
                    let b = slice_at(self.buf, cursor, 3)?;
                    length = 65821
                        + ((b[0] as usize) << 16 | (b[1] as usize) << 8 | b[2] as usize);
                    cursor += 3;
                }
                _ => {}
            }
        }

        match tag {
            TYPE_POINTER => self.decode_pointer(control, cursor),
            TYPE_UTF8 => {
                let bytes = slice_at(self.buf, cursor, length)?;
                let s = std::str::from_utf8(bytes)?.to_owned();
                Ok((Value::String(s), cursor + length))
            }
            TYPE_DOUBLE => {
                let bytes = slice_at(self.buf, cursor, 8)?;
                let v = f64::from_be_bytes(bytes.try_into().unwrap());
                Ok((Value::Num(Num::F64(v)), cursor + 8))
            }
            TYPE_BYTES => {
                let bytes = slice_at(self.buf, cursor, length)?.to_vec();
                Ok((Value::Bytes(bytes), cursor + length))
            }
            TYPE_UINT16 => {
                let n = read_uint(self.buf, cursor, length)?;
                Ok((Value::Num(Num::U16(n as u16)), cursor + length))
            }
            TYPE_UINT32 => {
                let n = read_uint(self.buf, cursor, length)?;
                Ok((Value::Num(Num::U32(n as u32)), cursor + length))
            }
            TYPE_MAP => {
                let mut map = BTreeMap::new();
                let mut pos = cursor;
                for _ in 0..length {
                    let (key, next) = self.decode_at(pos)?;
                    let key = key
                        .as_str()
                        .ok_or(MmdbError::Unserializable("map key must be a string"))?
                        .to_owned();
                    let (value, next) = self.decode_at(next)?;
                    map.insert(key, value);
                    pos = next;
                }
                Ok((Value::Map(map), pos))
            }
            TYPE_INT32 => Err(MmdbError::Int32Unimplemented),
            TYPE_UINT64 => {
                let n = read_uint(self.buf, cursor, length)?;
                Ok((Value::Num(Num::U64(n as u64)), cursor + length))
            }
            TYPE_UINT128 => {
                let n = read_uint(self.buf, cursor, length)?;
                Ok((Value::Num(Num::U128(n)), cursor + length))
            }
            TYPE_ARRAY => {
                let mut items = Vec::with_capacity(length);
                let mut pos = cursor;
                for _ in 0..length {
                    let (value, next) = self.decode_at(pos)?;
                    items.push(value);
                    pos = next;
                }
                Ok((Value::Array(items), pos))
            }
            TYPE_DATA_CACHE_CONTAINER => Err(MmdbError::ReservedTag(TYPE_DATA_CACHE_CONTAINER)),
            TYPE_END_MARKER => Err(MmdbError::ReservedTag(TYPE_END_MARKER)),
            TYPE_BOOLEAN => Ok((Value::Bool(length != 0), cursor)),
            TYPE_FLOAT => {
                let bytes = slice_at(self.buf, cursor, 4)?;
                let v = f32::from_be_bytes(bytes.try_into().unwrap());
                Ok((Value::Num(Num::F32(v)), cursor + 4))
            }
            other => Err(MmdbError::UnknownTypeTag(other)),
        }
    }

    fn decode_pointer(&mut self, control: u8, cursor: usize) -> MmdbResult<(Value, usize)> {
        let ss = (control >> 3) & 0x03;
        let vvv = (control & 0x07) as u64;

        let (pointer, next) = match ss {
            0 => {
                let b1 = byte_at(self.buf, cursor)? as u64;
                (vvv * 256 + b1, cursor + 1)
            }
            1 => {
                let b = slice_at(self.buf, cursor, 2)?;
                let v = (vvv * 256 + b[0] as u64) * 256 + b[1] as u64 + 2048;
                (v, cursor + 2)
            }
            2 => {
                let b = slice_at(self.buf, cursor, 3)?;
                let v = ((vvv * 256 + b[0] as u64) * 256 + b[1] as u64) * 256 + b[2] as u64
                    + 526336;
                (v, cursor + 3)
            }
            _ => {
                let b = slice_at(self.buf, cursor, 4)?;
                let v = ((b[0] as u64 * 256 + b[1] as u64) * 256 + b[2] as u64) * 256
                    + b[3] as u64;
                (v, cursor + 4)
            }
        };

        if let Some(cached) = self.pointer_cache.get(&pointer) {
            return Ok((cached.clone(), next));
        }

        let target = self.data_offset + pointer as usize;
        let (value, _) = self.decode_at(target)?;
        self.pointer_cache.insert(pointer, value.clone());
        Ok((value, next))
    }
}

/// Decodes a single standalone value with no data section to resolve
/// pointers against (`data_offset = 0`). Suitable for round-tripping values
/// produced by [`crate::encode::encode`] with caching disabled, and for the
/// metadata value, which is decoded before the data section's location is
/// even known.
pub fn decode(buf: &[u8], offset: usize) -> MmdbResult<(Value, usize)> {
    Decoder::new(buf, 0).decode_at(offset)
}
