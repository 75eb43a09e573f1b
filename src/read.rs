//! The search-tree reader. Buffer access follows a "slurp the whole file,
//! then parse" style; see Design Note "Shared buffer vs streaming".

use std::collections::HashMap;
use std::fs::File;
use std::io::Read as IoRead;
use std::path::Path;
use std::rc::Rc;

use crate::decode::Decoder;
use crate::error::{MmdbError, MmdbResult};
use crate::metadata::Metadata;
use crate::tree::{Child, Leaf, Node};
use crate::MAGIC;

/// A fully materialized MMDB file: its tree and its metadata.
pub struct Database {
    pub root: Child,
    pub metadata: Metadata,
}

/// Reads and parses the file at `path` into memory.
pub fn read_file(path: impl AsRef<Path>) -> MmdbResult<Database> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    read_bytes(&buf)
}

/// Memory-maps the file at `path` and parses it without a full copy.
#[cfg(feature = "mmap")]
pub fn read_mmap(path: impl AsRef<Path>) -> MmdbResult<Database> {
    let file = File::open(path)?;
    // Safety: mutation of the backing file while mapped is the caller's
    // responsibility, same as any other mmap-based reader.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    read_bytes(&mmap)
}

/// Parses an in-memory MMDB file.
pub fn read_bytes(buf: &[u8]) -> MmdbResult<Database> {
    let magic_pos = find_rightmost_magic(buf).ok_or(MmdbError::NoMetadata)?;
    let metadata_start = magic_pos + MAGIC.len();
    let (metadata_value, _) = Decoder::new(buf, 0).decode_at(metadata_start)?;
    let metadata = Metadata::from_value(&metadata_value)?;

    if !matches!(metadata.record_size, 24 | 28 | 32) {
        return Err(MmdbError::UnsupportedRecordSize(metadata.record_size));
    }

    log::debug!(
        "parsing {} node(s), record_size={}, database_type={:?}",
        metadata.node_count,
        metadata.record_size,
        metadata.database_type
    );

    let data_offset =
        (metadata.record_size as usize * 2 / 8) * metadata.node_count as usize + 16;
    let root = read_tree(buf, metadata.node_count, metadata.record_size, data_offset)?;

    Ok(Database { root, metadata })
}

fn find_rightmost_magic(buf: &[u8]) -> Option<usize> {
    if buf.len() < MAGIC.len() {
        return None;
    }
    (0..=buf.len() - MAGIC.len())
        .rev()
        .find(|&i| buf[i..i + MAGIC.len()] == MAGIC[..])
}

fn read_record(buf: &[u8], record_size: u16, index: u32) -> MmdbResult<(u32, u32)> {
    match record_size {
        24 => {
            let base = 6 * index as usize;
            let b = get(buf, base, 6)?;
            let left = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
            let right = (b[3] as u32) << 16 | (b[4] as u32) << 8 | b[5] as u32;
            Ok((left, right))
        }
        28 => {
            let base = 7 * index as usize;
            let b = get(buf, base, 7)?;
            let left = ((b[3] as u32 >> 4) << 24) | (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
            let right =
                ((b[3] as u32 & 0x0f) << 24) | (b[4] as u32) << 16 | (b[5] as u32) << 8 | b[6] as u32;
            Ok((left, right))
        }
        32 => {
            let base = 8 * index as usize;
            let b = get(buf, base, 8)?;
            let left = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
            let right = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
            Ok((left, right))
        }
        other => Err(MmdbError::UnsupportedRecordSize(other)),
    }
}

fn get(buf: &[u8], offset: usize, len: usize) -> MmdbResult<&[u8]> {
    buf.get(offset..offset + len).ok_or(MmdbError::Truncated {
        needed: offset + len,
        available: buf.len(),
    })
}

/// Builds the in-memory tree starting at node index 0.
///
/// Uses an explicit stack rather than recursion: IPv6 trees run 128 levels
/// deep, and a node reachable from more than one parent (a shared subtree)
/// must be built exactly once and shared via `Rc`, so this is a post-order
/// walk over what is in general a DAG, not a tree.
fn read_tree(buf: &[u8], node_count: u32, record_size: u16, data_offset: usize) -> MmdbResult<Child> {
    if node_count == 0 {
        return Ok(Child::Null);
    }

    let mut built: HashMap<u32, Rc<Node>> = HashMap::new();
    let mut leaves: HashMap<usize, Rc<Leaf>> = HashMap::new();
    let mut decoder = Decoder::new(buf, data_offset);

    let mut stack = vec![(0u32, false)];
    while let Some((index, expanded)) = stack.pop() {
        if built.contains_key(&index) {
            continue;
        }
        let (left_raw, right_raw) = read_record(buf, record_size, index)?;

        if !expanded {
            stack.push((index, true));
            if left_raw < node_count && !built.contains_key(&left_raw) {
                stack.push((left_raw, false));
            }
            if right_raw < node_count && !built.contains_key(&right_raw) {
                stack.push((right_raw, false));
            }
            continue;
        }

        let left = resolve_child(left_raw, node_count, data_offset, &built, &mut leaves, &mut decoder)?;
        let right = resolve_child(right_raw, node_count, data_offset, &built, &mut leaves, &mut decoder)?;
        built.insert(index, Rc::new(Node::new(left, right)));
    }

    built
        .get(&0)
        .cloned()
        .map(Child::Node)
        .ok_or(MmdbError::UnexpectedChild(0))
}

fn resolve_child(
    raw: u32,
    node_count: u32,
    data_offset: usize,
    built: &HashMap<u32, Rc<Node>>,
    leaves: &mut HashMap<usize, Rc<Leaf>>,
    decoder: &mut Decoder<'_>,
) -> MmdbResult<Child> {
    if raw == node_count {
        return Ok(Child::Null);
    }
    if raw < node_count {
        return built
            .get(&raw)
            .cloned()
            .map(Child::Node)
            .ok_or(MmdbError::UnexpectedChild(raw));
    }

    let relative = raw
        .checked_sub(node_count)
        .and_then(|v| v.checked_sub(16))
        .ok_or(MmdbError::UnexpectedChild(raw))?;
    let byte_offset = data_offset + relative as usize;

    if let Some(leaf) = leaves.get(&byte_offset) {
        return Ok(Child::Leaf(leaf.clone()));
    }

    let (value, _) = decoder.decode_at(byte_offset)?;
    let leaf = Rc::new(Leaf::new(Rc::new(value)));
    leaf.set_data_offset(raw);
    leaves.insert(byte_offset, leaf.clone());
    Ok(Child::Leaf(leaf))
}
