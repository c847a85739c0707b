use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute names owned by the catalog schema. Extension maps never carry them.
pub const RESERVED_ATTRIBUTES: [&str; 4] = ["docId", "key", "eTag", "size"];

/// Indexed representation of one blob store object
///
/// `doc_id` is the primary key of the catalog and always equals `key`.
/// Additional attributes supplied by the blob store are kept in `extra` and
/// flattened next to the required fields when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    /// Catalog primary key (the blob store key)
    pub doc_id: String,
    /// Blob store object key
    pub key: String,
    /// Content fingerprint assigned by the blob store at upload time
    pub e_tag: String,
    /// Object length in bytes at index time
    pub size: u64,
    /// Extension attributes merged in verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CatalogRecord {
    /// Build a record for a blob store key. `doc_id` is derived from `key`.
    pub fn new(key: impl Into<String>, e_tag: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        Self {
            doc_id: key.clone(),
            key,
            e_tag: e_tag.into(),
            size,
            extra: BTreeMap::new(),
        }
    }

    /// Attach extension attributes, dropping any that would shadow a schema field.
    pub fn with_extra(mut self, extra: BTreeMap<String, Value>) -> Self {
        self.extra = extra
            .into_iter()
            .filter(|(name, _)| !is_reserved(name))
            .collect();
        self
    }

    /// Projection served by the list endpoint
    pub fn entry(&self) -> CatalogEntry {
        CatalogEntry {
            e_tag: self.e_tag.clone(),
            key: self.key.clone(),
            size: self.size,
        }
    }
}

/// Catalog listing projection. `docId` is intentionally absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub e_tag: String,
    pub key: String,
    pub size: u64,
}

impl From<CatalogRecord> for CatalogEntry {
    fn from(record: CatalogRecord) -> Self {
        Self {
            e_tag: record.e_tag,
            key: record.key,
            size: record.size,
        }
    }
}

/// Whether an attribute name belongs to the catalog schema
pub fn is_reserved(name: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&name)
}
