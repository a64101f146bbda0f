//! Core types for docshard: schema descriptions, field values, commit
//! identifiers and configuration.
//!
//! This crate provides the vocabulary shared by the store and fetcher crates:
//! - Collection, field and index descriptions ([`schema`])
//! - Typed field values and their CBOR representation ([`value`])
//! - Content-addressed commit identifiers (SHA-256)
//! - Fetcher configuration

#![deny(unsafe_code)]

pub mod config;
pub mod hash;
pub mod schema;
pub mod value;

pub use hash::{CommitId, Hash, sha256};
pub use schema::{
    CollectionDescription, CollectionId, CrdtType, DocumentStatus, FieldDescription, FieldId,
    FieldKind, IndexDescription, IndexId, IndexedField, PRIMARY_INDEX_ID, ScalarKind,
};
pub use value::{FieldValue, ValueError};
