//! The search-tree writer. Buffer-then-flush style: build the whole file in
//! memory, then hand it to any `io::Write` in one shot.

use std::fs::File;
use std::io::{self, Write as IoWrite};
use std::path::Path;
use std::rc::Rc;

use byteorder::{BigEndian, WriteBytesExt};

use crate::encode::{self, PointerCache};
use crate::error::{MmdbError, MmdbResult};
use crate::metadata::Metadata;
use crate::read::Database;
use crate::tree::{Child, Node};
use crate::MAGIC;

/// Distinct nodes in traversal order, and the identity → index map used to
/// collapse shared subtrees to a single record.
struct Enumeration {
    order: Vec<Rc<Node>>,
    indices: std::collections::HashMap<usize, u32>,
}

/// Walks the tree with an explicit stack (traversals here can run 128 levels
/// deep for IPv6, and diamond-heavy customer trees get wide) assigning each
/// distinct node an index in left-before-right DFS order, and serializing
/// each distinct leaf's value into `cache` the first time it's reached.
fn enumerate_nodes(root: &Child, cache: &mut PointerCache) -> MmdbResult<Enumeration> {
    let mut enumeration = Enumeration {
        order: Vec::new(),
        indices: std::collections::HashMap::new(),
    };

    let mut stack = vec![root.clone()];
    while let Some(child) = stack.pop() {
        match child {
            Child::Null => {}
            Child::Leaf(leaf) => {
                if leaf.data_offset().is_none() {
                    let relative = encode::encode_leaf(&leaf.value, cache)?;
                    // The 16-byte null gap precedes the data section, so the
                    // index this leaf's record will carry is relative + 16.
                    leaf.set_data_offset(relative + 16);
                }
            }
            Child::Node(node) => {
                let key = Node::identity(&node);
                if enumeration.indices.contains_key(&key) {
                    continue;
                }
                enumeration.indices.insert(key, enumeration.order.len() as u32);
                stack.push(node.right.clone());
                stack.push(node.left.clone());
                enumeration.order.push(node);
            }
        }
    }

    Ok(enumeration)
}

/// Picks the smallest of {24, 28, 32} whose bit width can hold `max_id`,
/// i.e. the smallest `record_size` with `2^record_size >= max_id`. An exact
/// power of two needs only its own exponent's worth of bits, not one more.
fn choose_record_size(max_id: u64) -> MmdbResult<u16> {
    let bits_needed = if max_id <= 1 {
        0
    } else if max_id.is_power_of_two() {
        max_id.trailing_zeros()
    } else {
        64 - max_id.leading_zeros()
    };
    for size in [24u32, 28, 32] {
        if bits_needed <= size {
            return Ok(size as u16);
        }
    }
    Err(MmdbError::RecordSizeOverflow { bits: bits_needed })
}

/// Packs one node's `(left, right)` indices into a record of `record_size`
/// bits, using the bit layout from `decode`'s record readers inverted.
fn pack_record(record_size: u16, left: u32, right: u32) -> MmdbResult<Vec<u8>> {
    match record_size {
        24 => Ok(vec![
            (left >> 16) as u8,
            (left >> 8) as u8,
            left as u8,
            (right >> 16) as u8,
            (right >> 8) as u8,
            right as u8,
        ]),
        28 => Ok(vec![
            (left >> 16) as u8,
            (left >> 8) as u8,
            left as u8,
            (((left >> 24) & 0x0f) << 4) as u8 | ((right >> 24) & 0x0f) as u8,
            (right >> 16) as u8,
            (right >> 8) as u8,
            right as u8,
        ]),
        32 => {
            let mut out = Vec::with_capacity(8);
            out.write_u32::<BigEndian>(left)?;
            out.write_u32::<BigEndian>(right)?;
            Ok(out)
        }
        other => Err(MmdbError::UnsupportedRecordSize(other)),
    }
}

fn child_index(child: &Child, enumeration: &Enumeration, node_count: u32) -> MmdbResult<u32> {
    match child {
        Child::Null => Ok(node_count),
        Child::Node(node) => enumeration
            .indices
            .get(&Node::identity(node))
            .copied()
            .ok_or_else(|| MmdbError::UnexpectedChild(node_count)),
        Child::Leaf(leaf) => {
            let offset = leaf
                .data_offset()
                .expect("every leaf is serialized before records are emitted");
            Ok(offset + node_count)
        }
    }
}

/// Serializes `root` and `metadata` into a single in-memory MMDB file.
///
/// `metadata.node_count` and `metadata.record_size` are overwritten with the
/// values this traversal computes; everything else is taken as given.
pub fn write_to_vec(root: &Child, metadata: &mut Metadata) -> MmdbResult<Vec<u8>> {
    let mut cache = PointerCache::new();
    let enumeration = enumerate_nodes(root, &mut cache)?;

    let node_count = enumeration.order.len() as u32;
    let data_pointer = 16u64 + cache.data().len() as u64;
    let max_id = node_count as u64 + data_pointer + 1;
    let record_size = choose_record_size(max_id)?;

    metadata.node_count = node_count;
    metadata.record_size = record_size;
    log::debug!(
        "enumerated {node_count} node(s), {} byte(s) of leaf data, record_size={record_size}",
        cache.data().len()
    );

    let mut out = Vec::new();
    for node in &enumeration.order {
        let left = child_index(&node.left, &enumeration, node_count)?;
        let right = child_index(&node.right, &enumeration, node_count)?;
        out.extend(pack_record(record_size, left, right)?);
    }

    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(cache.data());
    out.extend_from_slice(&MAGIC);
    out.extend(encode::encode(&metadata.to_value())?);

    Ok(out)
}

/// Serializes `root` and `metadata` to `w`.
pub fn write_tree<W: IoWrite>(root: &Child, metadata: &mut Metadata, mut w: W) -> MmdbResult<()> {
    let bytes = write_to_vec(root, metadata)?;
    w.write_all(&bytes)?;
    Ok(())
}

/// Persists `db` to the file at `path`, creating or truncating it.
///
/// `db.metadata` is not mutated: a clone carries the freshly computed
/// `node_count`/`record_size` into the emitted file.
pub fn write(db: &Database, path: impl AsRef<Path>) -> MmdbResult<()> {
    let mut metadata = db.metadata.clone();
    let file = File::create(path)?;
    let mut w = io::BufWriter::new(file);
    write_tree(&db.root, &mut metadata, &mut w)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use crate::value::Value;
    use std::collections::BTreeMap;

    fn leaf_map(country: &str) -> Rc<Value> {
        let mut m = BTreeMap::new();
        m.insert("country".to_string(), Value::String(country.to_string()));
        Rc::new(Value::Map(m))
    }

    #[test]
    fn empty_tree_is_one_null_node() {
        let root = Child::node(Node::new(Child::Null, Child::Null));
        let mut metadata = Metadata::new("Test", 4);
        let bytes = write_to_vec(&root, &mut metadata).unwrap();

        assert_eq!(metadata.node_count, 1);
        assert_eq!(metadata.record_size, 24);
        // 6-byte record + 16 zero gap + (no data) + 14-byte magic + metadata.
        assert_eq!(&bytes[0..6], &[0, 0, 1, 0, 0, 1]);
        assert_eq!(&bytes[6..22], [0u8; 16]);
        assert_eq!(&bytes[22..36], MAGIC);
    }

    #[test]
    fn single_leaf_both_sides_decodes_same_value() {
        let leaf = Child::leaf(leaf_map("US"));
        let root = Child::node(Node::new(leaf.clone(), leaf));
        let mut metadata = Metadata::new("Test", 4);
        let bytes = write_to_vec(&root, &mut metadata).unwrap();

        let data_offset = (metadata.record_size as usize * 2 / 8) * metadata.node_count as usize + 16;
        let (value, _) = decode::decode(&bytes, data_offset).unwrap();
        assert_eq!(value.as_map().unwrap().get("country").unwrap().as_str(), Some("US"));
    }

    #[test]
    fn shared_leaf_object_serializes_once() {
        let shared = leaf_map("US");
        let leaf_a = Child::leaf(shared.clone());
        let leaf_b = Child::leaf(shared);
        let root = Child::node(Node::new(leaf_a, leaf_b));

        let mut cache = PointerCache::new();
        let enumeration = enumerate_nodes(&root, &mut cache).unwrap();
        assert_eq!(enumeration.order.len(), 1);

        let first_len = encode::encode(&leaf_map("US")).unwrap().len();
        // data section = [full map][pointer back to it]
        assert!(cache.data().len() < first_len * 2);
        assert!(cache.data().len() > first_len);
    }

    #[test]
    fn record_size_escalates_with_tree_size() {
        assert_eq!(choose_record_size(100).unwrap(), 24);
        assert_eq!(choose_record_size((1 << 24) - 1).unwrap(), 24);
        // An exact power of two fits exactly at its own exponent.
        assert_eq!(choose_record_size(1 << 24).unwrap(), 24);
        assert_eq!(choose_record_size((1 << 24) + 1).unwrap(), 28);
        assert_eq!(choose_record_size((1u64 << 28) - 1).unwrap(), 28);
        assert_eq!(choose_record_size(1u64 << 28).unwrap(), 28);
        assert_eq!(choose_record_size((1u64 << 28) + 1).unwrap(), 32);
        assert_eq!(choose_record_size(1u64 << 32).unwrap(), 32);
        assert!(choose_record_size((1u64 << 32) + 1).is_err());
    }
}
