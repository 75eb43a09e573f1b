//! The fixed metadata attribute set carried by every MMDB file.

use std::collections::BTreeMap;

use crate::error::{MmdbError, MmdbResult};
use crate::value::{Num, Value};

/// `binary_format_major_version` this crate reads and writes. The format
/// has only ever shipped one major version.
pub const FORMAT_MAJOR_VERSION: u16 = 2;
/// `binary_format_minor_version` this crate reads and writes.
pub const FORMAT_MINOR_VERSION: u16 = 0;

/// The metadata map, typed.
///
/// On the wire this is just another [`Value::Map`] -- see
/// [`Metadata::to_value`] and [`Metadata::from_value`] for the boundary
/// between the two representations.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub build_epoch: u64,
    pub database_type: String,
    pub description: BTreeMap<String, String>,
    pub ip_version: u16,
    pub languages: Vec<String>,
    pub node_count: u32,
    pub record_size: u16,
}

impl Metadata {
    pub fn new(database_type: impl Into<String>, ip_version: u16) -> Self {
        Metadata {
            build_epoch: 0,
            database_type: database_type.into(),
            description: BTreeMap::new(),
            ip_version,
            languages: Vec::new(),
            node_count: 0,
            record_size: 0,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert(
            "binary_format_major_version".to_string(),
            Value::Num(Num::U16(FORMAT_MAJOR_VERSION)),
        );
        map.insert(
            "binary_format_minor_version".to_string(),
            Value::Num(Num::U16(FORMAT_MINOR_VERSION)),
        );
        map.insert(
            "build_epoch".to_string(),
            Value::Num(Num::U64(self.build_epoch)),
        );
        map.insert(
            "database_type".to_string(),
            Value::String(self.database_type.clone()),
        );
        map.insert(
            "description".to_string(),
            Value::Map(
                self.description
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert(
            "ip_version".to_string(),
            Value::Num(Num::U16(self.ip_version)),
        );
        map.insert(
            "languages".to_string(),
            Value::Array(self.languages.iter().map(|l| Value::String(l.clone())).collect()),
        );
        map.insert(
            "node_count".to_string(),
            Value::Num(Num::U32(self.node_count)),
        );
        map.insert(
            "record_size".to_string(),
            Value::Num(Num::U16(self.record_size)),
        );
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> MmdbResult<Self> {
        let map = value
            .as_map()
            .ok_or(MmdbError::Unserializable("metadata is not a map"))?;

        let field_u16 = |name: &'static str| -> MmdbResult<u16> {
            map.get(name)
                .and_then(Value::as_u16)
                .ok_or(MmdbError::Unserializable(name))
        };
        let field_u32 = |name: &'static str| -> MmdbResult<u32> {
            map.get(name)
                .and_then(Value::as_u32)
                .ok_or(MmdbError::Unserializable(name))
        };
        let field_u64 = |name: &'static str| -> MmdbResult<u64> {
            map.get(name)
                .and_then(Value::as_u64)
                .ok_or(MmdbError::Unserializable(name))
        };
        let field_str = |name: &'static str| -> MmdbResult<String> {
            map.get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(MmdbError::Unserializable(name))
        };

        let description = match map.get("description").and_then(Value::as_map) {
            Some(m) => m
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect(),
            None => BTreeMap::new(),
        };
        let languages = match map.get("languages").and_then(Value::as_array) {
            Some(a) => a.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
            None => Vec::new(),
        };

        Ok(Metadata {
            build_epoch: field_u64("build_epoch")?,
            database_type: field_str("database_type")?,
            description,
            ip_version: field_u16("ip_version")?,
            languages,
            node_count: field_u32("node_count")?,
            record_size: field_u16("record_size")?,
        })
    }
}
