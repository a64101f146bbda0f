//! Collection, field and index descriptions.
//!
//! Keys never carry field names: every primary-data and index key refers to
//! fields by their numeric [`FieldId`], which is stable for the life of a
//! schema version. Filters refer to fields by their position in
//! [`CollectionDescription::fields`].

use serde::{Deserialize, Serialize};

/// Numeric collection identifier, the first component of every key.
pub type CollectionId = u32;

/// Numeric field identifier, stable within a schema version.
pub type FieldId = u32;

/// Numeric index identifier. `0` is reserved for primary document data.
pub type IndexId = u32;

/// Index identifier of the primary data key space.
pub const PRIMARY_INDEX_ID: IndexId = 0;

/// Scalar value kinds a field (or array element) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// `true` / `false`.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Opaque byte string.
    Bytes,
    /// UTC timestamp with nanosecond precision.
    DateTime,
}

/// The value kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// The document identifier itself.
    DocId,
    /// A single scalar value, always nillable.
    Scalar(ScalarKind),
    /// An array of scalars.
    Array {
        /// Kind of every element.
        element: ScalarKind,
        /// Whether individual elements may be null.
        nillable_elements: bool,
    },
    /// A reference to one document of another collection, stored as its ID.
    Object,
    /// The many side of a relation. Never stored on this side.
    ObjectArray,
}

impl FieldKind {
    /// Shorthand for [`FieldKind::Scalar`] of [`ScalarKind::Bool`].
    pub const BOOL: Self = Self::Scalar(ScalarKind::Bool);
    /// Shorthand for [`FieldKind::Scalar`] of [`ScalarKind::Int`].
    pub const INT: Self = Self::Scalar(ScalarKind::Int);
    /// Shorthand for [`FieldKind::Scalar`] of [`ScalarKind::Float`].
    pub const FLOAT: Self = Self::Scalar(ScalarKind::Float);
    /// Shorthand for [`FieldKind::Scalar`] of [`ScalarKind::String`].
    pub const STRING: Self = Self::Scalar(ScalarKind::String);
    /// Shorthand for [`FieldKind::Scalar`] of [`ScalarKind::Bytes`].
    pub const BYTES: Self = Self::Scalar(ScalarKind::Bytes);
    /// Shorthand for [`FieldKind::Scalar`] of [`ScalarKind::DateTime`].
    pub const DATETIME: Self = Self::Scalar(ScalarKind::DateTime);

    /// Returns true if a stored value of this kind may be null.
    pub fn is_nillable(&self) -> bool {
        !matches!(self, Self::DocId | Self::ObjectArray)
    }

    /// Returns true for array kinds.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// Returns true if values of this kind are persisted in primary data.
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::ObjectArray)
    }
}

/// Merge semantics attached to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrdtType {
    /// Last-writer-wins register, ordered by commit priority.
    LwwRegister,
    /// Grow-only counter.
    PCounter,
    /// Counter accepting positive and negative increments.
    PnCounter,
    /// The per-document composite node linking all field commits.
    Composite,
}

/// One field of a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescription {
    /// Stable numeric identifier used inside keys.
    pub id: FieldId,
    /// Field name as exposed on decoded documents.
    pub name: String,
    /// Value kind.
    pub kind: FieldKind,
    /// Merge semantics.
    pub crdt: CrdtType,
}

impl FieldDescription {
    /// Creates a field description.
    pub fn new(id: FieldId, name: impl Into<String>, kind: FieldKind, crdt: CrdtType) -> Self {
        Self { id, name: name.into(), kind, crdt }
    }

    /// Creates a last-writer-wins field, the default for scalar fields.
    pub fn lww(id: FieldId, name: impl Into<String>, kind: FieldKind) -> Self {
        Self::new(id, name, kind, CrdtType::LwwRegister)
    }
}

/// One field of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedField {
    /// Name of the indexed collection field.
    pub name: String,
    /// Whether this component sorts in descending order.
    pub descending: bool,
}

impl IndexedField {
    /// An ascending index component.
    pub fn asc(name: impl Into<String>) -> Self {
        Self { name: name.into(), descending: false }
    }

    /// A descending index component.
    pub fn desc(name: impl Into<String>) -> Self {
        Self { name: name.into(), descending: true }
    }
}

/// A secondary index over one or more collection fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescription {
    /// Index identifier, never [`PRIMARY_INDEX_ID`].
    pub id: IndexId,
    /// Human readable name.
    pub name: String,
    /// Whether indexed value tuples are unique across documents.
    pub unique: bool,
    /// Indexed fields in key order.
    pub fields: Vec<IndexedField>,
}

/// A collection and its current schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct CollectionDescription {
    /// Stable collection identifier.
    pub id: CollectionId,
    /// Collection name.
    #[builder(into)]
    pub name: String,
    /// Identifier of the schema version documents are written with.
    #[builder(into)]
    pub schema_version_id: String,
    /// Ordered field list. Filter conditions address fields by position here.
    pub fields: Vec<FieldDescription>,
    /// Secondary indexes.
    #[builder(default)]
    pub indexes: Vec<IndexDescription>,
}

impl CollectionDescription {
    /// Looks up a field by its numeric identifier.
    pub fn field_by_id(&self, id: FieldId) -> Option<&FieldDescription> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Looks up a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescription> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the field at `position` in the field list.
    pub fn field_at(&self, position: usize) -> Option<&FieldDescription> {
        self.fields.get(position)
    }

    /// Returns the position of the named field in the field list.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Looks up a secondary index by identifier.
    pub fn index_by_id(&self, id: IndexId) -> Option<&IndexDescription> {
        self.indexes.iter().find(|i| i.id == id)
    }
}

/// Lifecycle status of a stored document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    /// The document is live.
    #[default]
    Active,
    /// The document carries a deletion marker.
    Deleted,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn users() -> CollectionDescription {
        CollectionDescription::builder()
            .id(1)
            .name("Users")
            .schema_version_id("v1")
            .fields(vec![
                FieldDescription::lww(1, "name", FieldKind::STRING),
                FieldDescription::lww(2, "age", FieldKind::INT),
            ])
            .indexes(vec![IndexDescription {
                id: 1,
                name: "users_name".to_string(),
                unique: true,
                fields: vec![IndexedField::asc("name")],
            }])
            .build()
    }

    #[test]
    fn test_field_lookup_by_id_name_and_position() {
        let col = users();
        assert_eq!(col.field_by_id(2).map(|f| f.name.as_str()), Some("age"));
        assert_eq!(col.field_by_name("name").map(|f| f.id), Some(1));
        assert_eq!(col.field_at(1).map(|f| f.id), Some(2));
        assert_eq!(col.position_of("age"), Some(1));
        assert!(col.field_by_id(99).is_none());
        assert!(col.position_of("missing").is_none());
    }

    #[test]
    fn test_index_lookup() {
        let col = users();
        assert!(col.index_by_id(1).is_some_and(|i| i.unique));
        assert!(col.index_by_id(PRIMARY_INDEX_ID).is_none());
    }

    #[test]
    fn test_kind_nillability() {
        assert!(FieldKind::INT.is_nillable());
        assert!(
            FieldKind::Array { element: ScalarKind::Int, nillable_elements: false }.is_nillable()
        );
        assert!(!FieldKind::DocId.is_nillable());
        assert!(!FieldKind::ObjectArray.is_stored());
    }
}
