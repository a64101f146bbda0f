//! Per-iteration document accumulator.
//!
//! An [`EncodedDocument`] collects the raw CBOR value of every fetched field
//! of one document. It is owned by a fetcher and reset between documents,
//! so a reference handed out by `fetch_next` is only valid until the next
//! call. Each property decodes lazily, at most once.

use std::{cell::OnceCell, collections::BTreeMap, sync::Arc};

use docshard_types::{CollectionDescription, DocumentStatus, FieldDescription, FieldValue};
use snafu::ResultExt;

use crate::error::{DecodeSnafu, FetchError, Result};

/// Raw value of one field, with its decoded form cached on first use.
#[derive(Debug, Clone)]
pub struct EncodedProperty {
    position: usize,
    raw: Vec<u8>,
    is_filter: bool,
    decoded: OnceCell<FieldValue>,
}

impl EncodedProperty {
    /// Position of the field in the collection's field list.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Raw CBOR bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Whether the property is needed to evaluate a filter.
    pub fn is_filter(&self) -> bool {
        self.is_filter
    }

    fn decode(&self, field: &FieldDescription) -> Result<&FieldValue> {
        if let Some(value) = self.decoded.get() {
            return Ok(value);
        }
        let value = FieldValue::from_cbor(&self.raw, field.kind)
            .context(DecodeSnafu { field: field.name.clone() })?;
        Ok(self.decoded.get_or_init(|| value))
    }
}

/// Fields of one document as stored, before decoding.
#[derive(Debug, Clone)]
pub struct EncodedDocument {
    collection: Arc<CollectionDescription>,
    id: String,
    schema_version_id: String,
    status: DocumentStatus,
    properties: Vec<EncodedProperty>,
}

impl EncodedDocument {
    /// Creates an empty document of `collection`.
    pub fn new(collection: Arc<CollectionDescription>) -> Self {
        Self {
            collection,
            id: String::new(),
            schema_version_id: String::new(),
            status: DocumentStatus::Active,
            properties: Vec::new(),
        }
    }

    /// Document identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Schema version the document was last written with.
    pub fn schema_version_id(&self) -> &str {
        &self.schema_version_id
    }

    /// Document status.
    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    /// The collection the document belongs to.
    pub fn collection(&self) -> &CollectionDescription {
        &self.collection
    }

    /// Raw properties in insertion order.
    pub fn raw_properties(&self) -> &[EncodedProperty] {
        &self.properties
    }

    /// Clears all state, keeping allocations for the next document.
    pub fn reset(&mut self) {
        self.id.clear();
        self.schema_version_id.clear();
        self.status = DocumentStatus::Active;
        self.properties.clear();
    }

    pub(crate) fn set_id(&mut self, id: &str) {
        self.id.clear();
        self.id.push_str(id);
    }

    pub(crate) fn set_schema_version_id(&mut self, version: &str) {
        self.schema_version_id.clear();
        self.schema_version_id.push_str(version);
    }

    pub(crate) fn set_status(&mut self, status: DocumentStatus) {
        self.status = status;
    }

    /// Stores the raw value of the field at `position`, replacing any
    /// previous value.
    pub(crate) fn set_property(&mut self, position: usize, raw: Vec<u8>, is_filter: bool) {
        let property = EncodedProperty { position, raw, is_filter, decoded: OnceCell::new() };
        match self.properties.iter_mut().find(|p| p.position == position) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    /// Stores an already decoded value, encoding it for [`EncodedProperty::raw`].
    pub(crate) fn set_value(
        &mut self,
        position: usize,
        value: FieldValue,
        is_filter: bool,
    ) -> Result<()> {
        let name = self.collection.field_at(position).map(|f| f.name.clone()).unwrap_or_default();
        let raw = value.to_cbor().context(DecodeSnafu { field: name })?;
        let decoded = OnceCell::from(value);
        let property = EncodedProperty { position, raw, is_filter, decoded };
        match self.properties.iter_mut().find(|p| p.position == position) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
        Ok(())
    }

    /// Copies identity, status and every property of `other` over this
    /// document. Properties present in both take `other`'s value.
    pub(crate) fn merge_from(&mut self, other: &EncodedDocument) {
        self.set_id(&other.id);
        self.set_schema_version_id(&other.schema_version_id);
        self.status = other.status;
        for property in &other.properties {
            let is_filter = property.is_filter
                || self.properties.iter().any(|p| p.position == property.position && p.is_filter);
            let mut copy = property.clone();
            copy.is_filter = is_filter;
            match self.properties.iter_mut().find(|p| p.position == property.position) {
                Some(existing) => *existing = copy,
                None => self.properties.push(copy),
            }
        }
    }

    /// Decoded value of the field at `position`, if it was fetched.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] if the raw value is malformed, or
    /// [`FetchError::UnknownFieldPosition`] if the position is not in the
    /// schema.
    pub fn value_at(&self, position: usize) -> Result<Option<&FieldValue>> {
        let Some(property) = self.properties.iter().find(|p| p.position == position) else {
            return Ok(None);
        };
        let field = self
            .collection
            .field_at(position)
            .ok_or(FetchError::UnknownFieldPosition { position })?;
        property.decode(field).map(Some)
    }

    /// Decoded properties in field-position order, optionally restricted to
    /// those needed for filter evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] if a raw value is malformed.
    pub fn properties(&self, only_filter: bool) -> Result<Vec<(&FieldDescription, &FieldValue)>> {
        let mut selected: Vec<&EncodedProperty> =
            self.properties.iter().filter(|p| !only_filter || p.is_filter).collect();
        selected.sort_by_key(|p| p.position);
        selected
            .into_iter()
            .map(|p| {
                let field = self
                    .collection
                    .field_at(p.position)
                    .ok_or(FetchError::UnknownFieldPosition { position: p.position })?;
                Ok((field, p.decode(field)?))
            })
            .collect()
    }

    /// Decodes every property into a [`Document`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] if a raw value is malformed.
    pub fn decode(&self) -> Result<Document> {
        let fields = self
            .properties(false)?
            .into_iter()
            .map(|(field, value)| (field.name.clone(), value.clone()))
            .collect();
        Ok(Document {
            id: self.id.clone(),
            schema_version_id: self.schema_version_id.clone(),
            status: self.status,
            fields,
            clean: true,
        })
    }
}

/// A decoded document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document identifier.
    pub id: String,
    /// Schema version the document was last written with.
    pub schema_version_id: String,
    /// Document status.
    pub status: DocumentStatus,
    /// Field values by field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// No local edits are pending. Always true for fetched documents.
    pub clean: bool,
}

impl Document {
    /// Value of the named field, if fetched.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use docshard_types::{FieldDescription, FieldKind};

    use super::*;

    fn users() -> Arc<CollectionDescription> {
        Arc::new(
            CollectionDescription::builder()
                .id(1)
                .name("Users")
                .schema_version_id("v1")
                .fields(vec![
                    FieldDescription::lww(1, "name", FieldKind::STRING),
                    FieldDescription::lww(2, "age", FieldKind::INT),
                ])
                .build(),
        )
    }

    fn cbor(value: impl Into<FieldValue>) -> Vec<u8> {
        value.into().to_cbor().unwrap()
    }

    fn alice(doc: &mut EncodedDocument) {
        doc.set_id("bae-alice");
        doc.set_schema_version_id("v1");
        doc.set_property(0, cbor("Alice"), false);
        doc.set_property(1, cbor(27i64), true);
    }

    #[test]
    fn test_decode_normalizes_by_kind() {
        let mut doc = EncodedDocument::new(users());
        doc.set_id("bae-alice");
        doc.set_property(1, cbor(27.0), false);
        let decoded = doc.decode().unwrap();
        assert_eq!(decoded.get("age"), Some(&FieldValue::Int(27)));
        assert!(decoded.clean);
    }

    #[test]
    fn test_properties_only_filter() {
        let mut doc = EncodedDocument::new(users());
        alice(&mut doc);
        let all = doc.properties(false).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0.name, "name");
        let filter = doc.properties(true).unwrap();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter[0].1, &FieldValue::Int(27));
    }

    #[test]
    fn test_reset_then_refill_matches_fresh_document() {
        let mut reused = EncodedDocument::new(users());
        reused.set_id("bae-bob");
        reused.set_status(DocumentStatus::Deleted);
        reused.set_property(0, cbor("Bob"), true);
        reused.value_at(0).unwrap();
        reused.reset();
        alice(&mut reused);

        let mut fresh = EncodedDocument::new(users());
        alice(&mut fresh);
        assert_eq!(reused.decode().unwrap(), fresh.decode().unwrap());
        assert_eq!(reused.status(), DocumentStatus::Active);
    }

    #[test]
    fn test_set_property_replaces_value() {
        let mut doc = EncodedDocument::new(users());
        doc.set_property(1, cbor(1i64), false);
        assert_eq!(doc.value_at(1).unwrap(), Some(&FieldValue::Int(1)));
        doc.set_property(1, cbor(2i64), false);
        assert_eq!(doc.value_at(1).unwrap(), Some(&FieldValue::Int(2)));
        assert_eq!(doc.raw_properties().len(), 1);
    }

    #[test]
    fn test_merge_from_prefers_other() {
        let mut partial = EncodedDocument::new(users());
        partial.set_value(0, FieldValue::from("Alice"), true).unwrap();

        let mut primary = EncodedDocument::new(users());
        alice(&mut primary);
        primary.set_property(0, cbor("Alicia"), false);

        partial.merge_from(&primary);
        assert_eq!(partial.id(), "bae-alice");
        assert_eq!(partial.value_at(0).unwrap(), Some(&FieldValue::from("Alicia")));
        assert_eq!(partial.properties(true).unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_value_is_decode_error() {
        let mut doc = EncodedDocument::new(users());
        doc.set_property(0, vec![0xFF, 0x00], false);
        assert!(matches!(doc.value_at(0), Err(FetchError::Decode { .. })));
        assert_eq!(doc.value_at(1).unwrap(), None);
    }
}
