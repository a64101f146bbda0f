//! Merge primitives folding DAG deltas into field-sharded state.
//!
//! Each CRDT instance owns the keys of one document field (or the composite
//! pseudo-field) in primary data: the value sub-key holds the CBOR value and
//! the priority sub-key holds the priority of the winning delta.

use byteorder::{BigEndian, ByteOrder};
use docshard_types::{
    CollectionId, CommitId, CrdtType, DocumentStatus, FieldDescription, FieldKind, FieldValue,
    ScalarKind,
};
use snafu::ResultExt;
use tracing::trace;

use crate::{
    block::{Block, CompositeDelta, Delta, FieldDelta},
    datastore::Datastore,
    error::{Error, Result, ValueSnafu},
    keys::{COMPOSITE_FIELD_ID, DataStoreKey, InstanceType},
};

/// Which CRDT of a document an instance is requested for.
#[derive(Debug, Clone, Copy)]
pub enum CrdtTarget<'a> {
    /// The per-document composite node.
    Composite,
    /// One schema field.
    Field(&'a FieldDescription),
}

/// A CRDT bound to one document field.
pub trait MerkleCrdt: Send {
    /// Extracts the delta of `block`, checking it is of the kind this CRDT
    /// merges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crdt`] if the delta kind does not match.
    fn decode_delta<'b>(&self, block: &'b Block) -> Result<&'b Delta>;

    /// Folds `delta`, committed as `id`, into the state held in `store`.
    ///
    /// # Errors
    ///
    /// Returns storage, value or integrity errors.
    fn merge(&mut self, store: &dyn Datastore, delta: &Delta, id: CommitId) -> Result<()>;
}

/// Creates CRDT instances for document fields.
pub trait CrdtProvider: Send + Sync {
    /// Returns the CRDT handling `target` of document `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crdt`] if the field's CRDT type is not supported.
    fn instance_for(
        &self,
        collection_id: CollectionId,
        doc_id: &str,
        target: CrdtTarget<'_>,
    ) -> Result<Box<dyn MerkleCrdt>>;
}

/// Provider for the built-in CRDT types.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCrdtProvider;

impl CrdtProvider for DefaultCrdtProvider {
    fn instance_for(
        &self,
        collection_id: CollectionId,
        doc_id: &str,
        target: CrdtTarget<'_>,
    ) -> Result<Box<dyn MerkleCrdt>> {
        match target {
            CrdtTarget::Composite => Ok(Box::new(CompositeDag::new(collection_id, doc_id))),
            CrdtTarget::Field(field) => {
                let key = DataStoreKey::new(collection_id, doc_id, field.id, InstanceType::Value);
                match field.crdt {
                    CrdtType::LwwRegister => Ok(Box::new(LwwRegister { key })),
                    CrdtType::PCounter => Ok(Box::new(Counter::new(key, field.kind, false)?)),
                    CrdtType::PnCounter => Ok(Box::new(Counter::new(key, field.kind, true)?)),
                    CrdtType::Composite => Err(Error::Crdt {
                        reason: format!("field {:?} cannot use the composite CRDT", field.name),
                    }),
                }
            },
        }
    }
}

fn read_priority(store: &dyn Datastore, key: &DataStoreKey) -> Result<u64> {
    let raw = store.get(&key.with_instance(InstanceType::Priority).encode())?;
    match raw {
        Some(bytes) if bytes.len() == 8 => Ok(BigEndian::read_u64(&bytes)),
        Some(bytes) => Err(Error::KeyDecoding {
            reason: format!("priority value has {} bytes", bytes.len()),
        }),
        None => Ok(0),
    }
}

fn write_priority(store: &dyn Datastore, key: &DataStoreKey, priority: u64) -> Result<()> {
    let mut bytes = [0u8; 8];
    BigEndian::write_u64(&mut bytes, priority);
    store.put(&key.with_instance(InstanceType::Priority).encode(), &bytes)
}

fn expect_field<'b>(block: &'b Block) -> Result<&'b Delta> {
    match &block.delta {
        d @ Delta::Field(_) => Ok(d),
        Delta::Composite(_) => {
            Err(Error::Crdt { reason: "composite delta routed to a field CRDT".to_string() })
        },
    }
}

fn field_delta(delta: &Delta) -> Result<&FieldDelta> {
    match delta {
        Delta::Field(f) => Ok(f),
        Delta::Composite(_) => {
            Err(Error::Crdt { reason: "composite delta routed to a field CRDT".to_string() })
        },
    }
}

/// Last-writer-wins register ordered by priority, ties broken by payload.
struct LwwRegister {
    key: DataStoreKey,
}

impl MerkleCrdt for LwwRegister {
    fn decode_delta<'b>(&self, block: &'b Block) -> Result<&'b Delta> {
        expect_field(block)
    }

    fn merge(&mut self, store: &dyn Datastore, delta: &Delta, id: CommitId) -> Result<()> {
        let delta = field_delta(delta)?;
        let current = read_priority(store, &self.key)?;
        let wins = if delta.priority == current {
            let existing = store.get(&self.key.encode())?;
            existing.is_none_or(|existing| delta.data > existing)
        } else {
            delta.priority > current
        };
        trace!(commit = %id, field = self.key.field_id, priority = delta.priority, wins, "lww merge");
        if wins {
            store.put(&self.key.encode(), &delta.data)?;
            write_priority(store, &self.key, delta.priority)?;
        }
        Ok(())
    }
}

/// Counter summing CBOR increments.
struct Counter {
    key: DataStoreKey,
    kind: FieldKind,
    allow_negative: bool,
}

impl Counter {
    fn new(key: DataStoreKey, kind: FieldKind, allow_negative: bool) -> Result<Self> {
        match kind {
            FieldKind::Scalar(ScalarKind::Int | ScalarKind::Float) => {
                Ok(Self { key, kind, allow_negative })
            },
            other => Err(Error::Crdt { reason: format!("counter over non-numeric kind {other:?}") }),
        }
    }
}

impl MerkleCrdt for Counter {
    fn decode_delta<'b>(&self, block: &'b Block) -> Result<&'b Delta> {
        expect_field(block)
    }

    fn merge(&mut self, store: &dyn Datastore, delta: &Delta, id: CommitId) -> Result<()> {
        let delta = field_delta(delta)?;
        let increment = FieldValue::from_cbor(&delta.data, self.kind).context(ValueSnafu)?;
        let current = match store.get(&self.key.encode())? {
            Some(raw) => FieldValue::from_cbor(&raw, self.kind).context(ValueSnafu)?,
            None => FieldValue::Null,
        };
        let next = match (current, increment) {
            (current, FieldValue::Int(i)) => {
                if i < 0 && !self.allow_negative {
                    return Err(Error::Crdt {
                        reason: format!("negative increment {i} on grow-only counter"),
                    });
                }
                match current {
                    FieldValue::Int(c) => FieldValue::Int(c.wrapping_add(i)),
                    _ => FieldValue::Int(i),
                }
            },
            (current, FieldValue::Float(f)) => {
                if f < 0.0 && !self.allow_negative {
                    return Err(Error::Crdt {
                        reason: format!("negative increment {f} on grow-only counter"),
                    });
                }
                match current {
                    FieldValue::Float(c) => FieldValue::Float(c + f),
                    _ => FieldValue::Float(f),
                }
            },
            (_, other) => {
                return Err(Error::Crdt {
                    reason: format!("counter increment must be numeric, got {}", other.type_name()),
                });
            },
        };
        trace!(commit = %id, field = self.key.field_id, "counter merge");
        store.put(&self.key.encode(), &next.to_cbor().context(ValueSnafu)?)?;
        if delta.priority > read_priority(store, &self.key)? {
            write_priority(store, &self.key, delta.priority)?;
        }
        Ok(())
    }
}

/// The per-document composite node: schema version, status and priority.
struct CompositeDag {
    key: DataStoreKey,
}

impl CompositeDag {
    fn new(collection_id: CollectionId, doc_id: &str) -> Self {
        Self {
            key: DataStoreKey::new(collection_id, doc_id, COMPOSITE_FIELD_ID, InstanceType::Value),
        }
    }

    fn apply(&self, store: &dyn Datastore, delta: &CompositeDelta, priority: u64) -> Result<()> {
        store.put(&self.key.encode(), delta.schema_version_id.as_bytes())?;
        let marker = self.key.with_instance(InstanceType::Deleted).encode();
        match delta.status {
            DocumentStatus::Deleted => store.put(&marker, &[])?,
            DocumentStatus::Active => store.delete(&marker)?,
        }
        write_priority(store, &self.key, priority)
    }
}

impl MerkleCrdt for CompositeDag {
    fn decode_delta<'b>(&self, block: &'b Block) -> Result<&'b Delta> {
        match &block.delta {
            d @ Delta::Composite(_) => Ok(d),
            Delta::Field(f) => Err(Error::Crdt {
                reason: format!("field delta for {:?} routed to the composite CRDT", f.field_name),
            }),
        }
    }

    fn merge(&mut self, store: &dyn Datastore, delta: &Delta, id: CommitId) -> Result<()> {
        let Delta::Composite(delta) = delta else {
            return Err(Error::Crdt { reason: "field delta routed to the composite CRDT".into() });
        };
        let priority = delta.priority.ok_or(Error::MissingPriority { id })?;
        trace!(commit = %id, doc_id = %delta.doc_id, priority, "composite merge");
        if priority >= read_priority(store, &self.key)? {
            self.apply(store, delta, priority)?;
        }
        Ok(())
    }
}
