//! Key layouts for primary data, secondary indexes and DAG heads.
//!
//! Primary data:  `{collection:4BE}{index=0:4BE}{doc_id:escaped}{field:4BE}{instance:1}`
//! Index entries: `{collection:4BE}{index:4BE}{value_1}..{value_n}[{doc_id:escaped}]`
//! Heads:         `{doc_id:escaped}{field:4BE}{commit:32}`
//!
//! Big-endian identifiers and the escaped, terminated document ID keep all
//! keys of one collection, one document and one field contiguous in byte
//! order. The `{collection}{0}{doc_id}` prefix is the document boundary.

use byteorder::{BigEndian, ByteOrder};
use docshard_types::{
    CollectionId, CommitId, FieldId, FieldValue, IndexDescription, IndexId, PRIMARY_INDEX_ID,
};

use crate::{
    encoding::{decode_escaped, decode_value, encode_escaped, encode_value},
    error::{Error, Result},
};

/// Field identifier reserved for the per-document composite CRDT.
pub const COMPOSITE_FIELD_ID: FieldId = FieldId::MAX;

/// Length of the `{collection}{index}` prefix.
const TABLE_PREFIX_LEN: usize = 8;

/// Distinguishes the value payload of a field from its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceType {
    /// CBOR-encoded field value. Only this contributes to documents.
    Value,
    /// Big-endian priority of the last merged commit.
    Priority,
    /// Deletion marker on the composite field.
    Deleted,
}

impl InstanceType {
    /// Key byte for this instance type.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Value => b'v',
            Self::Priority => b'p',
            Self::Deleted => b'd',
        }
    }

    /// Parses a key byte.
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'v' => Some(Self::Value),
            b'p' => Some(Self::Priority),
            b'd' => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Key of one field instance in primary data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataStoreKey {
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Document identifier.
    pub doc_id: String,
    /// Field, or [`COMPOSITE_FIELD_ID`].
    pub field_id: FieldId,
    /// Which sub-key of the field.
    pub instance: InstanceType,
}

impl DataStoreKey {
    /// Creates a primary data key.
    pub fn new(
        collection_id: CollectionId,
        doc_id: impl Into<String>,
        field_id: FieldId,
        instance: InstanceType,
    ) -> Self {
        Self { collection_id, doc_id: doc_id.into(), field_id, instance }
    }

    /// Returns the same key with a different instance type.
    pub fn with_instance(&self, instance: InstanceType) -> Self {
        Self { instance, ..self.clone() }
    }

    /// Encodes the key.
    pub fn encode(&self) -> Vec<u8> {
        let mut key = document_prefix(self.collection_id, &self.doc_id);
        put_u32(&mut key, self.field_id);
        key.push(self.instance.as_byte());
        key
    }

    /// Decodes a primary data key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDecoding`] if the key is not a complete primary
    /// data key.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let (collection_id, index_id) = table_of(raw)?;
        if index_id != PRIMARY_INDEX_ID {
            return Err(Error::KeyDecoding {
                reason: format!("index {index_id} is not primary data"),
            });
        }
        let (doc_id, used) = decode_escaped(&raw[TABLE_PREFIX_LEN..])?;
        let rest = &raw[TABLE_PREFIX_LEN + used..];
        if rest.len() != 5 {
            return Err(Error::KeyDecoding {
                reason: format!("expected 5 trailing bytes after document id, got {}", rest.len()),
            });
        }
        let field_id = BigEndian::read_u32(&rest[..4]);
        let instance = InstanceType::from_byte(rest[4]).ok_or_else(|| Error::KeyDecoding {
            reason: format!("unknown instance type 0x{:02x}", rest[4]),
        })?;
        let doc_id = String::from_utf8(doc_id).map_err(|e| Error::KeyDecoding {
            reason: format!("document id is not UTF-8: {e}"),
        })?;
        Ok(Self { collection_id, doc_id, field_id, instance })
    }
}

/// Prefix of all primary data of a collection.
pub fn collection_prefix(collection_id: CollectionId) -> Vec<u8> {
    table_prefix(collection_id, PRIMARY_INDEX_ID)
}

/// Prefix of all keys of one document: the document boundary.
pub fn document_prefix(collection_id: CollectionId, doc_id: &str) -> Vec<u8> {
    let mut key = collection_prefix(collection_id);
    encode_escaped(&mut key, doc_id.as_bytes());
    key
}

/// Length of the document-boundary prefix of a raw primary data key.
///
/// # Errors
///
/// Returns [`Error::KeyDecoding`] if the key is too short or the document ID
/// is not terminated.
pub fn document_boundary_len(raw: &[u8]) -> Result<usize> {
    table_of(raw)?;
    let (_, used) = decode_escaped(&raw[TABLE_PREFIX_LEN..])?;
    Ok(TABLE_PREFIX_LEN + used)
}

/// Decodes a bare document prefix as built by [`document_prefix`].
///
/// # Errors
///
/// Returns [`Error::KeyDecoding`] if `raw` is not exactly one document
/// prefix of primary data.
pub fn decode_document_prefix(raw: &[u8]) -> Result<(CollectionId, String)> {
    let (collection_id, index_id) = table_of(raw)?;
    if index_id != PRIMARY_INDEX_ID {
        return Err(Error::KeyDecoding {
            reason: format!("index {index_id} is not primary data"),
        });
    }
    let (doc_id, used) = decode_escaped(&raw[TABLE_PREFIX_LEN..])?;
    if TABLE_PREFIX_LEN + used != raw.len() {
        return Err(Error::KeyDecoding {
            reason: format!("{} bytes after document id", raw.len() - TABLE_PREFIX_LEN - used),
        });
    }
    let doc_id = String::from_utf8(doc_id).map_err(|e| Error::KeyDecoding {
        reason: format!("document id is not UTF-8: {e}"),
    })?;
    Ok((collection_id, doc_id))
}

/// Prefix of all entries of a collection/index pair.
pub fn table_prefix(collection_id: CollectionId, index_id: IndexId) -> Vec<u8> {
    let mut key = Vec::with_capacity(TABLE_PREFIX_LEN + 16);
    put_u32(&mut key, collection_id);
    put_u32(&mut key, index_id);
    key
}

fn table_of(raw: &[u8]) -> Result<(CollectionId, IndexId)> {
    if raw.len() < TABLE_PREFIX_LEN {
        return Err(Error::KeyDecoding { reason: format!("key too short: {} bytes", raw.len()) });
    }
    Ok((BigEndian::read_u32(&raw[..4]), BigEndian::read_u32(&raw[4..8])))
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    let mut bytes = [0u8; 4];
    BigEndian::write_u32(&mut bytes, v);
    buf.extend_from_slice(&bytes);
}

/// Key of one secondary index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDataStoreKey {
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Index identifier.
    pub index_id: IndexId,
    /// Leading indexed values, in index field order. May be a prefix.
    pub values: Vec<FieldValue>,
    /// Document ID, present for non-unique entries and unique entries with
    /// a null component.
    pub doc_id: Option<String>,
}

impl IndexDataStoreKey {
    /// Creates a key over `values` without a document ID.
    pub fn new(collection_id: CollectionId, index: &IndexDescription, values: Vec<FieldValue>) -> Self {
        Self { collection_id, index_id: index.id, values, doc_id: None }
    }

    /// Encodes the key, honoring each field's sort direction.
    ///
    /// With fewer values than indexed fields the result is a scan prefix.
    pub fn encode(&self, index: &IndexDescription) -> Vec<u8> {
        let mut key = table_prefix(self.collection_id, self.index_id);
        for (value, field) in self.values.iter().zip(&index.fields) {
            encode_value(&mut key, value, field.descending);
        }
        if let Some(doc_id) = &self.doc_id {
            encode_escaped(&mut key, doc_id.as_bytes());
        }
        key
    }

    /// Decodes a complete index entry key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDecoding`] if the key does not belong to `index`
    /// or a component is malformed.
    pub fn decode(raw: &[u8], index: &IndexDescription) -> Result<Self> {
        let (collection_id, index_id) = table_of(raw)?;
        if index_id != index.id {
            return Err(Error::KeyDecoding {
                reason: format!("key of index {index_id} decoded as index {}", index.id),
            });
        }
        let mut pos = TABLE_PREFIX_LEN;
        let mut values = Vec::with_capacity(index.fields.len());
        for field in &index.fields {
            let (value, used) = decode_value(&raw[pos..], field.descending)?;
            values.push(value);
            pos += used;
        }
        let doc_id = if pos < raw.len() {
            let (id, used) = decode_escaped(&raw[pos..])?;
            pos += used;
            let id = String::from_utf8(id).map_err(|e| Error::KeyDecoding {
                reason: format!("document id is not UTF-8: {e}"),
            })?;
            Some(id)
        } else {
            None
        };
        if pos != raw.len() {
            return Err(Error::KeyDecoding {
                reason: format!("{} trailing bytes after index key", raw.len() - pos),
            });
        }
        Ok(Self { collection_id, index_id, values, doc_id })
    }
}

/// Builds the key and value of the index entry for one document.
///
/// Non-unique indexes put the document ID in the key and store an empty
/// value. Unique indexes store the document ID as the value, unless a
/// component is null: nulls are not unique, so such entries carry the
/// document ID in the key like a non-unique index.
pub fn index_entry(
    collection_id: CollectionId,
    index: &IndexDescription,
    values: Vec<FieldValue>,
    doc_id: &str,
) -> (Vec<u8>, Vec<u8>) {
    let mut key = IndexDataStoreKey::new(collection_id, index, values);
    if index.unique && !key.values.iter().any(FieldValue::is_null) {
        (key.encode(index), doc_id.as_bytes().to_vec())
    } else {
        key.doc_id = Some(doc_id.to_string());
        (key.encode(index), Vec::new())
    }
}

/// Key recording one head commit of a document field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeadStoreKey {
    /// Document identifier.
    pub doc_id: String,
    /// Field, or [`COMPOSITE_FIELD_ID`].
    pub field_id: FieldId,
    /// Head commit.
    pub commit: CommitId,
}

impl HeadStoreKey {
    /// Prefix of all heads of one document field.
    pub fn prefix(doc_id: &str, field_id: FieldId) -> Vec<u8> {
        let mut key = Vec::with_capacity(doc_id.len() + 6 + CommitId::LEN);
        encode_escaped(&mut key, doc_id.as_bytes());
        put_u32(&mut key, field_id);
        key
    }

    /// Encodes the key.
    pub fn encode(&self) -> Vec<u8> {
        let mut key = Self::prefix(&self.doc_id, self.field_id);
        key.extend_from_slice(self.commit.as_bytes());
        key
    }

    /// Decodes a head key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDecoding`] if the key is malformed.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let (doc_id, used) = decode_escaped(raw)?;
        let rest = &raw[used..];
        if rest.len() != 4 + CommitId::LEN {
            return Err(Error::KeyDecoding {
                reason: format!("head key suffix has {} bytes", rest.len()),
            });
        }
        let field_id = BigEndian::read_u32(&rest[..4]);
        let commit = CommitId::from_slice(&rest[4..]).ok_or_else(|| Error::KeyDecoding {
            reason: "head key commit id has wrong length".to_string(),
        })?;
        let doc_id = String::from_utf8(doc_id).map_err(|e| Error::KeyDecoding {
            reason: format!("document id is not UTF-8: {e}"),
        })?;
        Ok(Self { doc_id, field_id, commit })
    }
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// Returns an empty vector, meaning "unbounded", when no such key exists
/// (the prefix is empty or all `0xFF`).
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return end;
        }
    }
    end
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use docshard_types::IndexedField;

    use super::*;

    fn name_index(unique: bool) -> IndexDescription {
        IndexDescription {
            id: 1,
            name: "by_name".into(),
            unique,
            fields: vec![IndexedField::asc("name")],
        }
    }

    #[test]
    fn test_data_key_roundtrip() {
        let key = DataStoreKey::new(7, "bae-1", 3, InstanceType::Value);
        let raw = key.encode();
        assert_eq!(DataStoreKey::decode(&raw).unwrap(), key);
        assert!(raw.starts_with(&document_prefix(7, "bae-1")));
        assert_eq!(document_boundary_len(&raw).unwrap(), document_prefix(7, "bae-1").len());
    }

    #[test]
    fn test_decode_document_prefix() {
        let prefix = document_prefix(7, "bae-1");
        assert_eq!(decode_document_prefix(&prefix).unwrap(), (7, "bae-1".to_string()));
        let full = DataStoreKey::new(7, "bae-1", 3, InstanceType::Value).encode();
        assert!(decode_document_prefix(&full).is_err());
        assert!(decode_document_prefix(&collection_prefix(7)).is_err());
    }

    #[test]
    fn test_document_prefixes_do_not_overlap() {
        let short = document_prefix(1, "doc");
        let long = DataStoreKey::new(1, "doc2", 1, InstanceType::Value).encode();
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn test_document_keys_are_contiguous() {
        let a1 = DataStoreKey::new(1, "a", 1, InstanceType::Value).encode();
        let a_comp = DataStoreKey::new(1, "a", COMPOSITE_FIELD_ID, InstanceType::Deleted).encode();
        let b1 = DataStoreKey::new(1, "b", 1, InstanceType::Value).encode();
        assert!(a1 < a_comp && a_comp < b1);
        assert!(a_comp < prefix_end(&document_prefix(1, "a")));
        assert!(b1 >= prefix_end(&document_prefix(1, "a")));
    }

    #[test]
    fn test_data_key_rejects_index_keys_and_garbage() {
        let index_key = IndexDataStoreKey::new(1, &name_index(false), vec![]).encode(&name_index(false));
        assert!(DataStoreKey::decode(&index_key).is_err());
        assert!(DataStoreKey::decode(&[0, 0, 1]).is_err());

        let mut bad_instance = DataStoreKey::new(1, "d", 1, InstanceType::Value).encode();
        *bad_instance.last_mut().unwrap() = b'x';
        assert!(DataStoreKey::decode(&bad_instance).is_err());
    }

    #[test]
    fn test_unique_index_entry_stores_doc_id_as_value() {
        let index = name_index(true);
        let (key, value) = index_entry(1, &index, vec![FieldValue::from("Alice")], "bae-a");
        assert_eq!(value, b"bae-a");
        let decoded = IndexDataStoreKey::decode(&key, &index).unwrap();
        assert_eq!(decoded.values, vec![FieldValue::from("Alice")]);
        assert_eq!(decoded.doc_id, None);
    }

    #[test]
    fn test_unique_index_entry_with_null_keeps_doc_id_in_key() {
        let index = name_index(true);
        let (key, value) = index_entry(1, &index, vec![FieldValue::Null], "bae-a");
        assert!(value.is_empty());
        let decoded = IndexDataStoreKey::decode(&key, &index).unwrap();
        assert_eq!(decoded.doc_id.as_deref(), Some("bae-a"));
    }

    #[test]
    fn test_non_unique_index_entry_sorted_by_value_then_doc() {
        let index = name_index(false);
        let (k1, _) = index_entry(1, &index, vec![FieldValue::from("Bob")], "z");
        let (k2, _) = index_entry(1, &index, vec![FieldValue::from("Bobby")], "a");
        let (k3, _) = index_entry(1, &index, vec![FieldValue::from("Bob")], "a");
        assert!(k3 < k1 && k1 < k2);
        let prefix = IndexDataStoreKey::new(1, &index, vec![FieldValue::from("Bob")]).encode(&index);
        assert!(k1.starts_with(&prefix) && k3.starts_with(&prefix));
        assert!(!k2.starts_with(&prefix));
    }

    #[test]
    fn test_descending_index_component() {
        let index = IndexDescription {
            id: 2,
            name: "by_age_desc".into(),
            unique: false,
            fields: vec![IndexedField::desc("age")],
        };
        let (young, _) = index_entry(1, &index, vec![FieldValue::Int(21)], "a");
        let (old, _) = index_entry(1, &index, vec![FieldValue::Int(27)], "b");
        assert!(old < young);
        let decoded = IndexDataStoreKey::decode(&old, &index).unwrap();
        assert_eq!(decoded.values, vec![FieldValue::Int(27)]);
    }

    #[test]
    fn test_head_key_roundtrip() {
        let key = HeadStoreKey { doc_id: "bae-1".into(), field_id: 2, commit: CommitId::of(b"c1") };
        let raw = key.encode();
        assert!(raw.starts_with(&HeadStoreKey::prefix("bae-1", 2)));
        assert_eq!(HeadStoreKey::decode(&raw).unwrap(), key);
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"abc"), b"abd");
        assert_eq!(prefix_end(&[0x01, 0xFF]), vec![0x02]);
        assert_eq!(prefix_end(&[0xFF, 0xFF]), Vec::<u8>::new());
        assert_eq!(prefix_end(&[]), Vec::<u8>::new());
    }
}
