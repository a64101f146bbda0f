//! docshard-store: storage contracts and primitives beneath the fetchers.
//!
//! The fetchers consume storage only through narrow contracts. This crate
//! defines those contracts and the shared layouts every reader and writer
//! must agree on:
//!
//! - **Contracts**: [`Datastore`], [`Blockstore`], [`Txn`], [`KvIterator`]
//! - **Key layouts**: primary data, secondary index and head keys ([`keys`])
//! - **Value encoding**: order-preserving key components ([`encoding`])
//! - **Spans**: half-open key ranges ([`span`])
//! - **Merkle-DAG blocks**: deltas and named links ([`block`])
//! - **CRDTs**: delta merge into field-sharded state ([`crdt`])
//! - **In-memory store**: copy-on-write implementation of the contracts
//!   ([`memory`])
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │        Fetchers (document / index / version)  │
//! └──────────────┬───────────────────┬────────────┘
//!                │ Txn               │ CrdtProvider
//! ┌──────────────▼──────┐   ┌────────▼────────────┐
//! │ Datastore (data,    │   │ MerkleCrdt          │
//! │ heads) + Blockstore │◄──┤ (LWW, counters,     │
//! └─────────────────────┘   │  composite)         │
//!                           └─────────────────────┘
//! ```

#![deny(unsafe_code)]

pub mod block;
pub mod crdt;
pub mod datastore;
pub mod encoding;
pub mod error;
pub mod keys;
pub mod memory;
pub mod span;

pub use block::{Block, CompositeDelta, Delta, FieldDelta, HEAD_LINK_NAME, Link};
pub use crdt::{CrdtProvider, CrdtTarget, DefaultCrdtProvider, MerkleCrdt};
pub use datastore::{Blockstore, Datastore, KvIterator, Query, ScanOrder, Txn};
pub use error::{Error, Result};
pub use keys::{COMPOSITE_FIELD_ID, DataStoreKey, HeadStoreKey, IndexDataStoreKey, InstanceType};
pub use memory::{MemoryRootstore, MemoryStore, MemoryTxn, StoreStats};
pub use span::Span;
