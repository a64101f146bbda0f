//! Shared test utilities for docshard crates.
//!
//! - [`TestDatabase`] - In-memory database writing documents through the
//!   Merkle-DAG, CRDT and index layers
//! - [`users_collection`] - The two-field `Users` collection most tests use
//! - [`test_fetch_config`] - Fetch configuration with tiny batches
//! - [`strategies`] - Proptest generators for field values and documents

#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod config;
pub use config::test_fetch_config;

mod fixture;
pub use fixture::{FixtureError, TestDatabase, users_collection};

pub mod strategies;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_is_valid() {
        let config = test_fetch_config();
        config.validate().unwrap();
        assert_eq!(config.scan_batch_size, 2);
    }

    #[test]
    fn test_users_collection_has_unique_name_index() {
        let users = users_collection();
        let index = users.index_by_id(1).unwrap();
        assert!(index.unique);
        assert_eq!(users.position_of(&index.fields[0].name), Some(0));
    }
}
