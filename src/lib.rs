//! Read and write MaxMind DB (MMDB) files: a compact, read-optimized binary
//! format mapping IP prefixes to structured records.
//!
//! The format layers two codecs:
//!
//! - A type-tagged, self-describing **value codec** ([`decode`]/[`encode`])
//!   used for both the metadata section and every record payload.
//! - A **search-tree codec** ([`read`]/[`write`]) over a binary trie of
//!   24/28/32-bit records, whose indices either name a sibling node, a null
//!   sentinel, or a byte offset into the value codec's data section.
//!
//! ```text
//! [ node_records ] [ 16 zero bytes ] [ data_section ] [ 14-byte magic ] [ metadata value ]
//! ```

pub mod decode;
pub mod encode;
pub mod error;
pub mod metadata;
pub mod read;
pub mod tree;
pub mod value;
pub mod walk;
pub mod write;

pub use error::{MmdbError, MmdbResult};
pub use metadata::Metadata;
pub use read::{read_bytes, read_file, Database};
pub use tree::{Child, Leaf, Node};
pub use value::{Num, Value};
pub use write::{write, write_to_vec};

#[cfg(feature = "mmap")]
pub use read::read_mmap;

/// Sentinel marking the start of the metadata section: `\xAB\xCD\xEF` plus
/// the ASCII bytes `MaxMind.com`. The reader takes the rightmost occurrence
/// in the file; the writer emits exactly one, immediately after the data
/// section.
pub const MAGIC: [u8; 14] = [
    0xAB, 0xCD, 0xEF, b'M', b'a', b'x', b'M', b'i', b'n', b'd', b'.', b'c', b'o', b'm',
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    #[test]
    fn writes_and_reads_back_a_small_database() {
        let mut us = BTreeMap::new();
        us.insert("country".to_string(), Value::String("US".into()));
        let us_leaf = Child::leaf(Rc::new(Value::Map(us)));

        let mut ca = BTreeMap::new();
        ca.insert("country".to_string(), Value::String("CA".into()));
        let ca_leaf = Child::leaf(Rc::new(Value::Map(ca)));

        let root = Child::node(Node::new(us_leaf, ca_leaf));

        let mut metadata = Metadata::new("Test-db", 4);
        metadata.languages.push("en".to_string());
        metadata
            .description
            .insert("en".to_string(), "a test database".to_string());

        let bytes = write_to_vec(&root, &mut metadata).unwrap();
        let db = read_bytes(&bytes).unwrap();

        assert_eq!(db.metadata.database_type, "Test-db");
        assert_eq!(db.metadata.languages, vec!["en".to_string()]);

        let records = walk::dump_tree(&db);
        assert_eq!(records.len(), 2);
        let countries: Vec<_> = records
            .iter()
            .map(|(cidr, v)| (cidr.clone(), v.as_map().unwrap().get("country").unwrap().as_str().unwrap().to_string()))
            .collect();
        assert!(countries.iter().any(|(_, c)| c == "US"));
        assert!(countries.iter().any(|(_, c)| c == "CA"));
    }
}
