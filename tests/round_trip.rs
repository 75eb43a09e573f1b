use std::collections::BTreeMap;
use std::io::Read;
use std::rc::Rc;

use anyhow::Result;
use tempfile::NamedTempFile;

use mmdb::{read_bytes, read_file, walk, write, write_to_vec, Child, Database, Metadata, Node, Num, Value};

fn country_leaf(country: &str) -> Child {
    let mut m = BTreeMap::new();
    m.insert("country".to_string(), Value::String(country.to_string()));
    Child::leaf(Rc::new(Value::Map(m)))
}

fn write_and_reread(root: &Child, metadata: Metadata) -> Result<Database> {
    let db = Database {
        root: root.clone(),
        metadata,
    };
    let file = NamedTempFile::new()?;
    write(&db, file.path())?;

    let mut bytes = Vec::new();
    std::fs::File::open(file.path())?.read_to_end(&mut bytes)?;
    Ok(read_bytes(&bytes)?)
}

#[test]
fn database_round_trips_through_a_real_file() -> Result<()> {
    let root = Child::node(Node::new(country_leaf("US"), country_leaf("CA")));
    let mut metadata = Metadata::new("Test-db", 4);
    metadata.languages = vec!["en".to_string()];
    metadata
        .description
        .insert("en".to_string(), "a test database".to_string());

    let file = NamedTempFile::new()?;
    let db = Database {
        root,
        metadata: metadata.clone(),
    };
    write(&db, file.path())?;

    let read_back = read_file(file.path())?;
    assert_eq!(read_back.metadata.database_type, "Test-db");
    assert_eq!(read_back.metadata.languages, vec!["en".to_string()]);
    assert_eq!(
        read_back.metadata.description.get("en").map(String::as_str),
        Some("a test database")
    );

    let records = walk::dump_tree(&read_back);
    let countries: Vec<String> = records
        .iter()
        .map(|(_, v)| {
            v.as_map().unwrap().get("country").unwrap().as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(countries.len(), 2);
    assert!(countries.contains(&"US".to_string()));
    assert!(countries.contains(&"CA".to_string()));
    Ok(())
}

#[test]
fn empty_tree_round_trips() -> Result<()> {
    let root = Child::node(Node::new(Child::Null, Child::Null));
    let metadata = Metadata::new("Test-empty", 4);
    let db = write_and_reread(&root, metadata)?;

    assert_eq!(db.metadata.node_count, 1);
    assert_eq!(db.metadata.record_size, 24);
    match db.root {
        Child::Node(n) => {
            assert!(matches!(n.left, Child::Null));
            assert!(matches!(n.right, Child::Null));
        }
        _ => panic!("expected a node at the root"),
    }
    Ok(())
}

#[test]
fn single_leaf_at_default_route_decodes_on_every_descent() -> Result<()> {
    let mut m = BTreeMap::new();
    m.insert("x".to_string(), Value::Num(Num::U32(42)));
    let leaf = Child::leaf(Rc::new(Value::Map(m)));
    let root = Child::node(Node::new(leaf.clone(), leaf));

    let db = write_and_reread(&root, Metadata::new("Test", 4))?;
    match db.root {
        Child::Node(n) => {
            for side in [&n.left, &n.right] {
                match side {
                    Child::Leaf(l) => {
                        assert_eq!(l.value.as_map().unwrap().get("x").unwrap().as_u32(), Some(42));
                    }
                    _ => panic!("expected a leaf"),
                }
            }
        }
        _ => panic!("expected a node at the root"),
    }
    Ok(())
}

#[test]
fn shared_leaf_object_is_one_entry_in_the_written_file() -> Result<()> {
    let shared = {
        let mut m = BTreeMap::new();
        m.insert("country".to_string(), Value::String("US".into()));
        Rc::new(Value::Map(m))
    };
    let leaf_a = Child::leaf(shared.clone());
    let leaf_b = Child::leaf(shared.clone());
    let root = Child::node(Node::new(leaf_a, leaf_b));

    let mut metadata = Metadata::new("Test", 4);
    let bytes = write_to_vec(&root, &mut metadata)?;

    let data_offset = (metadata.record_size as usize * 2 / 8) * metadata.node_count as usize + 16;
    let magic_pos = bytes
        .windows(mmdb::MAGIC.len())
        .position(|w| w == &mmdb::MAGIC[..])
        .expect("magic must be present");
    let data_section_len = magic_pos - data_offset;

    // The first leaf's full payload, plus only a small pointer for the second.
    let header_and_payload = mmdb::encode::encode(&shared)?.len();
    assert!(data_section_len > header_and_payload);
    assert!(data_section_len < header_and_payload * 2);

    let db = read_bytes(&bytes)?;
    let records = walk::dump_tree(&db);
    assert_eq!(records.len(), 2);
    for (_, v) in &records {
        assert_eq!(v.as_map().unwrap().get("country").unwrap().as_str(), Some("US"));
    }
    Ok(())
}

#[test]
fn magic_embedded_in_leaf_data_does_not_confuse_the_reader() -> Result<()> {
    // A raw byte value that happens to contain the magic bytes, stored as a
    // leaf before the real metadata is appended. The reader must still find
    // the rightmost (real) occurrence.
    let mut m = BTreeMap::new();
    m.insert("payload".to_string(), Value::Bytes(mmdb::MAGIC.to_vec()));
    let leaf = Child::leaf(Rc::new(Value::Map(m)));
    let root = Child::node(Node::new(leaf.clone(), leaf));

    let db = write_and_reread(&root, Metadata::new("Test", 4))?;
    assert_eq!(db.metadata.database_type, "Test");
    Ok(())
}

#[test]
fn length_boundary_strings_round_trip_through_a_file() -> Result<()> {
    for len in [29usize, 285, 65821] {
        let s = "a".repeat(len);
        let mut m = BTreeMap::new();
        m.insert("s".to_string(), Value::String(s.clone()));
        let leaf = Child::leaf(Rc::new(Value::Map(m)));
        let root = Child::node(Node::new(leaf.clone(), leaf));

        let db = write_and_reread(&root, Metadata::new("Test", 4))?;
        let records = walk::dump_tree(&db);
        assert_eq!(
            records[0].1.as_map().unwrap().get("s").unwrap().as_str(),
            Some(s.as_str())
        );
    }
    Ok(())
}
