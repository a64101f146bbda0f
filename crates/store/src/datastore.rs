//! Storage contracts consumed by the fetchers.
//!
//! Fetchers see storage only through these traits: an ordered key/value
//! store with range queries, a content-addressed block store, and a
//! transaction that bundles the data, head and block namespaces of one
//! consistent snapshot.

use std::sync::Arc;

use docshard_types::CommitId;

use crate::{error::Result, span::Span};

/// Direction of a range query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanOrder {
    /// Increasing key order.
    #[default]
    Ascending,
    /// Decreasing key order.
    Descending,
}

impl ScanOrder {
    /// Ascending unless `reverse` is set.
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse { Self::Descending } else { Self::Ascending }
    }
}

/// A range query over `[start, end)`. An empty `end` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Inclusive lower bound.
    pub start: Vec<u8>,
    /// Exclusive upper bound, or empty for unbounded.
    pub end: Vec<u8>,
    /// Result order.
    pub order: ScanOrder,
}

impl Query {
    /// A query over a span.
    pub fn span(span: &Span, order: ScanOrder) -> Self {
        Self { start: span.start.clone(), end: span.end.clone(), order }
    }

    /// A query over every key starting with `prefix`.
    pub fn prefix(prefix: &[u8], order: ScanOrder) -> Self {
        Self::span(&Span::prefix(prefix), order)
    }
}

/// Cursor over the results of one range query.
pub trait KvIterator: Send {
    /// Returns the next entry, or `None` at the end of the range.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails, or if the iterator
    /// has been closed.
    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Releases the scan. Idempotent.
    fn close(&mut self);
}

/// Ordered byte-key store.
pub trait Datastore: Send + Sync {
    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts or replaces a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or fails.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes a key. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or fails.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Opens an ordered range query.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn query(&self, query: Query) -> Result<Box<dyn KvIterator>>;
}

/// Content-addressed store of encoded DAG blocks.
pub trait Blockstore: Send + Sync {
    /// Fetches the encoded block for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn get_block(&self, id: &CommitId) -> Result<Option<Vec<u8>>>;

    /// Returns true if the block is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn has_block(&self, id: &CommitId) -> Result<bool> {
        Ok(self.get_block(id)?.is_some())
    }

    /// Stores an encoded block under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or fails.
    fn put_block(&self, id: &CommitId, bytes: &[u8]) -> Result<()>;
}

/// A consistent snapshot over the data, head and block namespaces.
pub trait Txn: Send + Sync {
    /// Monotonic transaction identifier, for diagnostics.
    fn id(&self) -> u64;

    /// Primary data and index entries.
    fn datastore(&self) -> Arc<dyn Datastore>;

    /// Head commit markers.
    fn headstore(&self) -> Arc<dyn Datastore>;

    /// DAG blocks.
    fn blockstore(&self) -> Arc<dyn Blockstore>;
}
