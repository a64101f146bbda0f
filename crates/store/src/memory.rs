//! In-memory, copy-on-write implementation of the storage contracts.
//!
//! Each [`MemoryStore`] holds its entries in an `Arc<BTreeMap>`. Snapshots
//! share the map and writers clone it on first mutation, so a transaction
//! forked from a root store sees a stable view no matter what is committed
//! afterwards. Used for tests, benchmarks and the transient store of the
//! versioned fetcher.

use std::{
    collections::{BTreeMap, VecDeque},
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use docshard_types::CommitId;
use parking_lot::RwLock;
use tracing::trace;

use crate::{
    datastore::{Blockstore, Datastore, KvIterator, Query, ScanOrder, Txn},
    error::{Error, Result},
};

/// Default number of entries an iterator copies out of the map per refill.
pub const DEFAULT_BATCH_SIZE: usize = 256;

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// Operation counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Point lookups served.
    pub gets: u64,
    /// Range queries opened.
    pub queries: u64,
    /// Writes and deletes applied.
    pub writes: u64,
}

/// Ordered in-memory key/value store.
pub struct MemoryStore {
    tree: RwLock<Arc<Tree>>,
    read_only: bool,
    batch_size: usize,
    gets: AtomicU64,
    queries: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty writable store.
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_BATCH_SIZE)
    }

    /// Creates an empty writable store whose iterators refill `batch_size`
    /// entries at a time.
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self::from_tree(Arc::new(Tree::new()), false, batch_size)
    }

    fn from_tree(tree: Arc<Tree>, read_only: bool, batch_size: usize) -> Self {
        Self {
            tree: RwLock::new(tree),
            read_only,
            batch_size: batch_size.max(1),
            gets: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Returns a store sharing the current contents. Writes to either side
    /// are invisible to the other.
    pub fn fork(&self, read_only: bool) -> Self {
        Self::from_tree(self.snapshot(), read_only, self.batch_size)
    }

    /// The current contents.
    pub fn snapshot(&self) -> Arc<Tree> {
        Arc::clone(&self.tree.read())
    }

    /// Replaces the contents with `other`'s.
    pub fn replace_with(&self, other: &MemoryStore) {
        *self.tree.write() = other.snapshot();
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        *self.tree.write() = Arc::new(Tree::new());
    }

    /// Returns true if writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Operation counters since creation.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            gets: self.gets.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut Tree)) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut guard = self.tree.write();
        f(Arc::make_mut(&mut guard));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Datastore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.tree.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.mutate(|tree| {
            tree.insert(key.to_vec(), value.to_vec());
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.mutate(|tree| {
            tree.remove(key);
        })
    }

    fn query(&self, query: Query) -> Result<Box<dyn KvIterator>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        trace!(start = ?query.start, end = ?query.end, order = ?query.order, "memory query");
        Ok(Box::new(MemoryIterator::new(self.snapshot(), query, self.batch_size)))
    }
}

impl Blockstore for MemoryStore {
    fn get_block(&self, id: &CommitId) -> Result<Option<Vec<u8>>> {
        self.get(id.as_bytes())
    }

    fn put_block(&self, id: &CommitId, bytes: &[u8]) -> Result<()> {
        self.put(id.as_bytes(), bytes)
    }
}

/// Buffered cursor over a snapshot of a [`MemoryStore`].
///
/// Entries are copied out of the map `batch_size` at a time. When the buffer
/// drains, the next range resumes just past the last key returned, so the
/// iterator never holds a borrow of the map between calls.
pub struct MemoryIterator {
    /// `None` once closed.
    snapshot: Option<Arc<Tree>>,
    start: Vec<u8>,
    end: Vec<u8>,
    order: ScanOrder,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    last_key: Option<Vec<u8>>,
    exhausted: bool,
    batch_size: usize,
}

impl MemoryIterator {
    fn new(snapshot: Arc<Tree>, query: Query, batch_size: usize) -> Self {
        let empty_range = !query.end.is_empty() && query.start >= query.end;
        Self {
            snapshot: Some(snapshot),
            start: query.start,
            end: query.end,
            order: query.order,
            buffer: VecDeque::with_capacity(batch_size),
            last_key: None,
            exhausted: empty_range,
            batch_size,
        }
    }

    fn refill_buffer(&mut self) {
        let Some(tree) = self.snapshot.as_ref() else {
            self.exhausted = true;
            return;
        };

        let end_bound = if self.end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(self.end.as_slice())
        };

        let (lower, upper) = match (self.order, self.last_key.as_deref()) {
            (ScanOrder::Ascending, Some(last)) => (Bound::Excluded(last), end_bound),
            (ScanOrder::Ascending, None) => (Bound::Included(self.start.as_slice()), end_bound),
            (ScanOrder::Descending, Some(last)) => {
                (Bound::Included(self.start.as_slice()), Bound::Excluded(last))
            },
            (ScanOrder::Descending, None) => (Bound::Included(self.start.as_slice()), end_bound),
        };

        let range = tree.range::<[u8], _>((lower, upper));
        let entries: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)> + '_> = match self.order {
            ScanOrder::Ascending => Box::new(range),
            ScanOrder::Descending => Box::new(range.rev()),
        };

        let mut count = 0;
        for (k, v) in entries.take(self.batch_size) {
            self.buffer.push_back((k.clone(), v.clone()));
            count += 1;
        }
        if count < self.batch_size {
            self.exhausted = true;
        }
    }
}

impl KvIterator for MemoryIterator {
    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.snapshot.is_none() {
            return Err(Error::IteratorClosed);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.refill_buffer();
        }
        match self.buffer.pop_front() {
            Some((k, v)) => {
                self.last_key = Some(k.clone());
                Ok(Some((k, v)))
            },
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.snapshot = None;
        self.buffer.clear();
    }
}

/// Data, head and block namespaces of one database.
pub struct MemoryRootstore {
    data: Arc<MemoryStore>,
    heads: Arc<MemoryStore>,
    blocks: Arc<MemoryStore>,
    next_txn_id: AtomicU64,
}

impl MemoryRootstore {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_BATCH_SIZE)
    }

    /// Creates an empty database whose iterators refill `batch_size` entries
    /// at a time.
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            data: Arc::new(MemoryStore::with_batch_size(batch_size)),
            heads: Arc::new(MemoryStore::with_batch_size(batch_size)),
            blocks: Arc::new(MemoryStore::with_batch_size(batch_size)),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// Opens a transaction over a snapshot of the current state.
    pub fn new_txn(&self, read_only: bool) -> MemoryTxn {
        MemoryTxn {
            id: self.next_txn_id.fetch_add(1, Ordering::Relaxed),
            data: Arc::new(self.data.fork(read_only)),
            heads: Arc::new(self.heads.fork(read_only)),
            blocks: Arc::new(self.blocks.fork(read_only)),
        }
    }

    /// Publishes the transaction's state as the new current state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] for read-only transactions.
    pub fn commit(&self, txn: &MemoryTxn) -> Result<()> {
        if txn.data.is_read_only() {
            return Err(Error::ReadOnly);
        }
        self.data.replace_with(&txn.data);
        self.heads.replace_with(&txn.heads);
        self.blocks.replace_with(&txn.blocks);
        Ok(())
    }
}

impl Default for MemoryRootstore {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction over [`MemoryStore`] namespaces.
pub struct MemoryTxn {
    id: u64,
    data: Arc<MemoryStore>,
    heads: Arc<MemoryStore>,
    blocks: Arc<MemoryStore>,
}

impl MemoryTxn {
    /// A standalone writable transaction over fresh, empty namespaces whose
    /// iterators refill `batch_size` entries at a time.
    pub fn detached(id: u64, batch_size: usize) -> Self {
        Self {
            id,
            data: Arc::new(MemoryStore::with_batch_size(batch_size)),
            heads: Arc::new(MemoryStore::with_batch_size(batch_size)),
            blocks: Arc::new(MemoryStore::with_batch_size(batch_size)),
        }
    }

    /// Concrete data namespace, for counters and resets.
    pub fn data(&self) -> &Arc<MemoryStore> {
        &self.data
    }

    /// Concrete head namespace.
    pub fn heads(&self) -> &Arc<MemoryStore> {
        &self.heads
    }

    /// Concrete block namespace.
    pub fn blocks(&self) -> &Arc<MemoryStore> {
        &self.blocks
    }
}

impl Txn for MemoryTxn {
    fn id(&self) -> u64 {
        self.id
    }

    fn datastore(&self) -> Arc<dyn Datastore> {
        self.data.clone()
    }

    fn headstore(&self) -> Arc<dyn Datastore> {
        self.heads.clone()
    }

    fn blockstore(&self) -> Arc<dyn Blockstore> {
        self.blocks.clone()
    }
}
