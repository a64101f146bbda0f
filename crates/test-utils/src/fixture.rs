//! In-memory database fixture that writes documents the way the write path
//! does: one Merkle-DAG block per mutated field, a composite block linking
//! them, CRDT merges into primary data, head records and index entries.
//!
//! Fetcher tests read the result back through [`TestDatabase::txn`].

use std::{collections::HashMap, sync::Arc};

use docshard_store::{
    Block, COMPOSITE_FIELD_ID, CompositeDelta, CrdtProvider, CrdtTarget, DataStoreKey, Datastore,
    DefaultCrdtProvider, Delta, FieldDelta, HeadStoreKey, InstanceType, Link, MemoryRootstore,
    MemoryTxn, Txn, block::store_block, keys::index_entry,
};
use docshard_types::{
    CollectionDescription, CommitId, DocumentStatus, FieldDescription, FieldId, FieldKind,
    FieldValue, IndexDescription, IndexedField, ValueError,
};
use snafu::{ResultExt, Snafu};

/// Errors raised while writing fixture documents.
#[derive(Debug, Snafu)]
pub enum FixtureError {
    /// The collection has no field of that name.
    #[snafu(display("Collection {collection} has no field {name:?}"))]
    UnknownField {
        /// Collection name.
        collection: String,
        /// Requested field name.
        name: String,
    },

    /// Update or delete of a document that was never created.
    #[snafu(display("Document {doc_id} does not exist"))]
    UnknownDocument {
        /// Requested document.
        doc_id: String,
    },

    /// A value could not be CBOR-encoded.
    #[snafu(display("Value error: {source}"))]
    Value {
        /// The underlying value error.
        source: ValueError,
    },

    /// The store rejected a write.
    #[snafu(display("Store error: {source}"))]
    Store {
        /// The underlying store error.
        source: docshard_store::Error,
    },
}

/// Result type alias for fixture operations.
pub type Result<T> = std::result::Result<T, FixtureError>;

/// Latest head and chain height of one CRDT.
#[derive(Debug, Clone, Copy)]
struct Head {
    commit: CommitId,
    priority: u64,
}

#[derive(Debug, Default)]
struct DocState {
    composite: Option<Head>,
    fields: HashMap<FieldId, Head>,
    status: DocumentStatus,
}

/// A single-collection database backed by [`MemoryRootstore`].
pub struct TestDatabase {
    root: MemoryRootstore,
    collection: Arc<CollectionDescription>,
    provider: DefaultCrdtProvider,
    docs: HashMap<String, DocState>,
}

impl TestDatabase {
    /// Creates an empty database for `collection`.
    pub fn new(collection: CollectionDescription) -> Self {
        Self::with_batch_size(collection, docshard_store::memory::DEFAULT_BATCH_SIZE)
    }

    /// Creates an empty database whose iterators refill `batch_size` entries
    /// at a time.
    pub fn with_batch_size(collection: CollectionDescription, batch_size: usize) -> Self {
        Self {
            root: MemoryRootstore::with_batch_size(batch_size),
            collection: Arc::new(collection),
            provider: DefaultCrdtProvider,
            docs: HashMap::new(),
        }
    }

    /// The collection every document belongs to.
    pub fn collection(&self) -> Arc<CollectionDescription> {
        Arc::clone(&self.collection)
    }

    /// A read-only transaction over the committed state.
    pub fn txn(&self) -> Arc<dyn Txn> {
        self.memory_txn()
    }

    /// A read-only transaction exposing its concrete stores, for tests that
    /// assert on operation counters.
    pub fn memory_txn(&self) -> Arc<MemoryTxn> {
        Arc::new(self.root.new_txn(true))
    }

    /// Writes a new document, returning the composite commit.
    ///
    /// For counter fields the value is the increment.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::UnknownField`] for fields outside the schema,
    /// or an encoding or store error.
    pub fn create(&mut self, doc_id: &str, values: &[(&str, FieldValue)]) -> Result<CommitId> {
        self.write(doc_id, values, DocumentStatus::Active)
    }

    /// Writes a new version of an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::UnknownDocument`] if the document was never
    /// created, plus the errors of [`Self::create`].
    pub fn update(&mut self, doc_id: &str, values: &[(&str, FieldValue)]) -> Result<CommitId> {
        self.ensure_exists(doc_id)?;
        self.write(doc_id, values, DocumentStatus::Active)
    }

    /// Marks a document deleted, returning the composite commit.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::UnknownDocument`] if the document was never
    /// created, or a store error.
    pub fn delete(&mut self, doc_id: &str) -> Result<CommitId> {
        self.ensure_exists(doc_id)?;
        self.write(doc_id, &[], DocumentStatus::Deleted)
    }

    fn ensure_exists(&self, doc_id: &str) -> Result<()> {
        if self.docs.contains_key(doc_id) {
            Ok(())
        } else {
            UnknownDocumentSnafu { doc_id }.fail()
        }
    }

    fn write(
        &mut self,
        doc_id: &str,
        values: &[(&str, FieldValue)],
        status: DocumentStatus,
    ) -> Result<CommitId> {
        let collection = Arc::clone(&self.collection);
        let fields = values
            .iter()
            .map(|(name, value)| {
                collection.field_by_name(name).map(|f| (f, value)).ok_or_else(|| {
                    FixtureError::UnknownField {
                        collection: collection.name.clone(),
                        name: name.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let txn = self.root.new_txn(false);
        let data = txn.datastore();
        let heads = txn.headstore();
        let blocks = txn.blockstore();

        let state = self.docs.entry(doc_id.to_string()).or_default();
        let old_entries = if state.status == DocumentStatus::Active && state.composite.is_some() {
            index_values(&txn, &collection, doc_id)?
        } else {
            Vec::new()
        };

        let mut links = Vec::with_capacity(values.len() + 1);
        for (field, value) in fields {
            let previous = state.fields.get(&field.id).copied();
            let priority = previous.map_or(1, |h| h.priority + 1);
            let block = Block {
                delta: Delta::Field(FieldDelta {
                    doc_id: doc_id.to_string(),
                    field_name: field.name.clone(),
                    priority,
                    data: value.to_cbor().context(ValueSnafu)?,
                }),
                links: previous.map(|h| Link::head(h.commit)).into_iter().collect(),
            };
            let commit = store_block(blocks.as_ref(), &block).context(StoreSnafu)?;
            let mut crdt = self
                .provider
                .instance_for(collection.id, doc_id, CrdtTarget::Field(field))
                .context(StoreSnafu)?;
            crdt.merge(data.as_ref(), &block.delta, commit).context(StoreSnafu)?;
            move_head(heads.as_ref(), doc_id, field.id, previous, commit, priority)?;
            state.fields.insert(field.id, Head { commit, priority });
            links.push(Link::field(field.name.clone(), commit));
        }

        let previous = state.composite;
        let priority = previous.map_or(1, |h| h.priority + 1);
        if let Some(head) = previous {
            links.insert(0, Link::head(head.commit));
        }
        let block = Block {
            delta: Delta::Composite(CompositeDelta {
                doc_id: doc_id.to_string(),
                schema_version_id: collection.schema_version_id.clone(),
                priority: Some(priority),
                status,
            }),
            links,
        };
        let commit = store_block(blocks.as_ref(), &block).context(StoreSnafu)?;
        let mut crdt = self
            .provider
            .instance_for(collection.id, doc_id, CrdtTarget::Composite)
            .context(StoreSnafu)?;
        crdt.merge(data.as_ref(), &block.delta, commit).context(StoreSnafu)?;
        move_head(heads.as_ref(), doc_id, COMPOSITE_FIELD_ID, previous, commit, priority)?;
        state.composite = Some(Head { commit, priority });
        state.status = status;

        for (key, _) in old_entries {
            data.delete(&key).context(StoreSnafu)?;
        }
        if status == DocumentStatus::Active {
            for (key, value) in index_values(&txn, &collection, doc_id)? {
                data.put(&key, &value).context(StoreSnafu)?;
            }
        }
        self.root.commit(&txn).context(StoreSnafu)?;
        Ok(commit)
    }
}

fn move_head(
    heads: &dyn Datastore,
    doc_id: &str,
    field_id: FieldId,
    previous: Option<Head>,
    commit: CommitId,
    priority: u64,
) -> Result<()> {
    if let Some(head) = previous {
        let old = HeadStoreKey { doc_id: doc_id.to_string(), field_id, commit: head.commit };
        heads.delete(&old.encode()).context(StoreSnafu)?;
    }
    let key = HeadStoreKey { doc_id: doc_id.to_string(), field_id, commit };
    heads.put(&key.encode(), &priority.to_be_bytes()).context(StoreSnafu)
}

/// Index entries of the document as currently merged in `txn`.
fn index_values(
    txn: &MemoryTxn,
    collection: &CollectionDescription,
    doc_id: &str,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let data = txn.datastore();
    let mut entries = Vec::with_capacity(collection.indexes.len());
    for index in &collection.indexes {
        let mut values = Vec::with_capacity(index.fields.len());
        for indexed in &index.fields {
            let Some(field) = collection.field_by_name(&indexed.name) else {
                return UnknownFieldSnafu {
                    collection: collection.name.clone(),
                    name: indexed.name.clone(),
                }
                .fail();
            };
            let key = DataStoreKey::new(collection.id, doc_id, field.id, InstanceType::Value);
            let value = match data.get(&key.encode()).context(StoreSnafu)? {
                Some(raw) => FieldValue::from_cbor(&raw, field.kind).context(ValueSnafu)?,
                None => FieldValue::Null,
            };
            values.push(value);
        }
        entries.push(index_entry(collection.id, index, values, doc_id));
    }
    Ok(entries)
}

/// The `Users` collection: `name` (string) and `age` (int), with a unique
/// ascending index `by_name` (id 1).
pub fn users_collection() -> CollectionDescription {
    CollectionDescription::builder()
        .id(1)
        .name("Users")
        .schema_version_id("users-v1")
        .fields(vec![
            FieldDescription::lww(1, "name", FieldKind::STRING),
            FieldDescription::lww(2, "age", FieldKind::INT),
        ])
        .indexes(vec![IndexDescription {
            id: 1,
            name: "by_name".into(),
            unique: true,
            fields: vec![IndexedField::asc("name")],
        }])
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use docshard_store::{Query, ScanOrder, keys::table_prefix};

    use super::*;

    fn index_keys(db: &TestDatabase) -> Vec<Vec<u8>> {
        let txn = db.memory_txn();
        let mut it = txn.data().query(Query::prefix(&table_prefix(1, 1), ScanOrder::Ascending)).unwrap();
        let mut keys = Vec::new();
        while let Some((k, _)) = it.next_entry().unwrap() {
            keys.push(k);
        }
        keys
    }

    #[test]
    fn test_create_writes_blocks_heads_and_index() {
        let mut db = TestDatabase::new(users_collection());
        let commit = db
            .create("bae-1", &[("name", "Alice".into()), ("age", FieldValue::Int(27))])
            .unwrap();

        let txn = db.memory_txn();
        assert!(txn.blocks().get(commit.as_bytes()).unwrap().is_some());
        let head = HeadStoreKey { doc_id: "bae-1".into(), field_id: COMPOSITE_FIELD_ID, commit };
        assert!(txn.heads().get(&head.encode()).unwrap().is_some());
        assert_eq!(index_keys(&db).len(), 1);
    }

    #[test]
    fn test_update_links_previous_composite() {
        let mut db = TestDatabase::new(users_collection());
        let first = db.create("bae-1", &[("name", "Alice".into())]).unwrap();
        let second = db.update("bae-1", &[("age", FieldValue::Int(30))]).unwrap();

        let txn = db.memory_txn();
        let (block, _) = docshard_store::block::load_block(txn.blocks().as_ref(), second).unwrap();
        assert_eq!(block.head(), Some(first));
        assert_eq!(block.sub_links().count(), 1);
    }

    #[test]
    fn test_update_replaces_index_entry() {
        let mut db = TestDatabase::new(users_collection());
        db.create("bae-1", &[("name", "Alice".into())]).unwrap();
        let before = index_keys(&db);
        db.update("bae-1", &[("name", "Alicia".into())]).unwrap();
        let after = index_keys(&db);
        assert_eq!(after.len(), 1);
        assert_ne!(before, after);
    }

    #[test]
    fn test_delete_removes_index_entry() {
        let mut db = TestDatabase::new(users_collection());
        db.create("bae-1", &[("name", "Alice".into())]).unwrap();
        db.delete("bae-1").unwrap();
        assert!(index_keys(&db).is_empty());
    }

    #[test]
    fn test_unknown_field_and_document() {
        let mut db = TestDatabase::new(users_collection());
        assert!(matches!(
            db.create("bae-1", &[("email", "a@b".into())]),
            Err(FixtureError::UnknownField { .. })
        ));
        assert!(matches!(db.delete("bae-2"), Err(FixtureError::UnknownDocument { .. })));
    }
}
