//! Error types for the docshard store layer.

use docshard_types::{CommitId, ValueError};
use snafu::Snafu;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in store, key and CRDT operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A key does not follow the expected layout.
    #[snafu(display("Invalid key encoding: {reason}"))]
    KeyDecoding {
        /// What was malformed.
        reason: String,
    },

    /// A block is not present in the block store.
    #[snafu(display("Block {id} not found"))]
    BlockNotFound {
        /// The missing commit.
        id: CommitId,
    },

    /// A stored block could not be decoded.
    #[snafu(display("Block {id} is malformed: {source}"))]
    BlockDecode {
        /// The offending commit.
        id: CommitId,
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// A block could not be encoded.
    #[snafu(display("Block encoding failed: {source}"))]
    BlockEncode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// A field value could not be encoded or decoded.
    #[snafu(display("Value error: {source}"))]
    Value {
        /// The underlying value error.
        source: ValueError,
    },

    /// A write was attempted through a read-only handle.
    #[snafu(display("Store is read-only"))]
    ReadOnly,

    /// An iterator was used after being closed.
    #[snafu(display("Iterator already closed"))]
    IteratorClosed,

    /// A composite delta carries no priority.
    #[snafu(display("Composite delta of commit {id} has no priority"))]
    MissingPriority {
        /// The malformed commit.
        id: CommitId,
    },

    /// A delta cannot be merged by the CRDT it was routed to.
    #[snafu(display("CRDT merge failed: {reason}"))]
    Crdt {
        /// Why the merge was rejected.
        reason: String,
    },
}

impl Error {
    /// Returns true if the error reports malformed persisted data rather than
    /// an operational failure.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::MissingPriority { .. } | Self::KeyDecoding { .. })
    }
}
