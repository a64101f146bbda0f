//! Content addressing for DAG blocks.
//!
//! Every block is identified by the SHA-256 digest of its canonical encoding.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 hash output (32 bytes).
pub type Hash = [u8; 32];

/// Compute SHA-256 hash of arbitrary data.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Identifier of one commit (DAG block), the digest of its encoded bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId(Hash);

impl CommitId {
    /// Byte length of an encoded commit identifier.
    pub const LEN: usize = 32;

    /// Computes the identifier of `block_bytes`.
    pub fn of(block_bytes: &[u8]) -> Self {
        Self(sha256(block_bytes))
    }

    /// Wraps a raw digest.
    pub const fn from_hash(hash: Hash) -> Self {
        Self(hash)
    }

    /// Parses an identifier from exactly [`CommitId::LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <Hash>::try_from(bytes).ok().map(Self)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are enough to tell commits apart in logs.
        write!(f, "CommitId(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}
