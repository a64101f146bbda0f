//! Merkle-DAG block format.
//!
//! A block carries one delta and a list of named links to other blocks. The
//! link named [`HEAD_LINK_NAME`] points at the previous version of the same
//! CRDT. A composite block additionally links every field block written by
//! the same document mutation, under the field's name.
//!
//! Blocks are postcard-encoded; a block's [`CommitId`] is the SHA-256 digest
//! of that encoding, so the encoding must stay deterministic (postcard writes
//! fields in declaration order with no padding).

use docshard_types::{CommitId, DocumentStatus};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::{
    datastore::Blockstore,
    error::{BlockDecodeSnafu, BlockEncodeSnafu, Error, Result},
};

/// Reserved link name meaning "previous version".
pub const HEAD_LINK_NAME: &str = "_head";

/// A named pointer to another block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Link name: [`HEAD_LINK_NAME`] or a field name.
    pub name: String,
    /// Target commit.
    pub id: CommitId,
}

impl Link {
    /// A "previous version" link.
    pub fn head(id: CommitId) -> Self {
        Self { name: HEAD_LINK_NAME.to_string(), id }
    }

    /// A link to the commit of the named field.
    pub fn field(name: impl Into<String>, id: CommitId) -> Self {
        Self { name: name.into(), id }
    }

    /// Returns true for the "previous version" link.
    pub fn is_head(&self) -> bool {
        self.name == HEAD_LINK_NAME
    }
}

/// Mutation of the per-document composite CRDT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeDelta {
    /// Document the mutation applies to.
    pub doc_id: String,
    /// Schema version the document was written with.
    pub schema_version_id: String,
    /// Height in the document's composite chain. Required.
    pub priority: Option<u64>,
    /// Document status after the mutation.
    pub status: DocumentStatus,
}

/// Mutation of one field CRDT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDelta {
    /// Document the mutation applies to.
    pub doc_id: String,
    /// Name of the mutated field.
    pub field_name: String,
    /// Height in the field's chain.
    pub priority: u64,
    /// CBOR payload: the new value for registers, the increment for counters.
    pub data: Vec<u8>,
}

/// Delta payload of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta {
    /// Composite node of a document mutation.
    Composite(CompositeDelta),
    /// Per-field mutation.
    Field(FieldDelta),
}

impl Delta {
    /// Priority of the delta, if it carries one.
    pub fn priority(&self) -> Option<u64> {
        match self {
            Self::Composite(c) => c.priority,
            Self::Field(f) => Some(f.priority),
        }
    }

    /// Document the delta applies to.
    pub fn doc_id(&self) -> &str {
        match self {
            Self::Composite(c) => &c.doc_id,
            Self::Field(f) => &f.doc_id,
        }
    }
}

/// One node of the Merkle-DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The mutation.
    pub delta: Delta,
    /// Named links to parent blocks.
    pub links: Vec<Link>,
}

impl Block {
    /// Encodes the block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockEncode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).context(BlockEncodeSnafu)
    }

    /// Encodes the block and returns its identifier along with the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockEncode`] if serialization fails.
    pub fn encode_with_id(&self) -> Result<(CommitId, Vec<u8>)> {
        let bytes = self.encode()?;
        Ok((CommitId::of(&bytes), bytes))
    }

    /// Decodes the block stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockDecode`] if the bytes are malformed.
    pub fn decode(id: CommitId, bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).context(BlockDecodeSnafu { id })
    }

    /// The "previous version" link target, if any.
    pub fn head(&self) -> Option<CommitId> {
        self.links.iter().find(|l| l.is_head()).map(|l| l.id)
    }

    /// Links other than "previous version".
    pub fn sub_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| !l.is_head())
    }
}

/// Fetches and decodes a block, returning it with its raw bytes.
///
/// # Errors
///
/// Returns [`Error::BlockNotFound`] if the block is absent, or a decode or
/// storage error.
pub fn load_block(store: &dyn Blockstore, id: CommitId) -> Result<(Block, Vec<u8>)> {
    let bytes = store.get_block(&id)?.ok_or(Error::BlockNotFound { id })?;
    let block = Block::decode(id, &bytes)?;
    Ok((block, bytes))
}

/// Encodes `block` and stores it, returning its identifier.
///
/// # Errors
///
/// Returns an encoding or storage error.
pub fn store_block(store: &dyn Blockstore, block: &Block) -> Result<CommitId> {
    let (id, bytes) = block.encode_with_id()?;
    store.put_block(&id, &bytes)?;
    Ok(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn field_block(priority: u64, prev: Option<CommitId>) -> Block {
        Block {
            delta: Delta::Field(FieldDelta {
                doc_id: "bae-1".into(),
                field_name: "age".into(),
                priority,
                data: vec![0x18, 0x15],
            }),
            links: prev.map(Link::head).into_iter().collect(),
        }
    }

    #[test]
    fn test_block_id_is_digest_of_encoding() {
        let block = field_block(1, None);
        let (id, bytes) = block.encode_with_id().unwrap();
        assert_eq!(id, CommitId::of(&bytes));
        assert_eq!(Block::decode(id, &bytes).unwrap(), block);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let prev = CommitId::of(b"prev");
        assert_eq!(
            field_block(2, Some(prev)).encode_with_id().unwrap(),
            field_block(2, Some(prev)).encode_with_id().unwrap()
        );
        assert_ne!(
            field_block(2, Some(prev)).encode_with_id().unwrap().0,
            field_block(3, Some(prev)).encode_with_id().unwrap().0
        );
    }

    #[test]
    fn test_truncated_block_fails_to_decode() {
        let (id, bytes) = field_block(1, Some(CommitId::of(b"prev"))).encode_with_id().unwrap();
        let err = Block::decode(id, &bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, Error::BlockDecode { id: bad, .. } if bad == id));
        assert!(err.to_string().starts_with(&format!("Block {id} is malformed")));
        assert!(matches!(Block::decode(id, &[]), Err(Error::BlockDecode { .. })));
    }

    #[test]
    fn test_head_and_sub_links() {
        let prev = CommitId::of(b"prev");
        let field = CommitId::of(b"field");
        let block = Block {
            delta: Delta::Composite(CompositeDelta {
                doc_id: "bae-1".into(),
                schema_version_id: "v1".into(),
                priority: Some(2),
                status: DocumentStatus::Active,
            }),
            links: vec![Link::field("age", field), Link::head(prev)],
        };
        assert_eq!(block.head(), Some(prev));
        let subs: Vec<_> = block.sub_links().map(|l| l.name.as_str()).collect();
        assert_eq!(subs, vec!["age"]);
        assert_eq!(block.delta.priority(), Some(2));
        assert_eq!(block.delta.doc_id(), "bae-1");
    }

    #[test]
    fn test_genesis_block_has_no_head() {
        assert_eq!(field_block(1, None).head(), None);
    }

    #[test]
    fn test_load_and_store() {
        let store = MemoryStore::new();
        let block = field_block(1, None);
        let id = store_block(&store, &block).unwrap();
        let (loaded, _) = load_block(&store, id).unwrap();
        assert_eq!(loaded, block);

        let missing = CommitId::of(b"missing");
        assert!(matches!(load_block(&store, missing), Err(Error::BlockNotFound { .. })));
    }

    #[test]
    fn test_malformed_block() {
        let store = MemoryStore::new();
        let id = CommitId::of(b"junk");
        store.put_block(&id, &[0xFF, 0xFF, 0xFF]).unwrap();
        assert!(matches!(load_block(&store, id), Err(Error::BlockDecode { .. })));
    }
}
