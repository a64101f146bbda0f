//! docshard-fetcher: the read path over field-sharded CRDT storage.
//!
//! Documents are stored one key per field, so reading them back means
//! reassembling scans. This crate provides three fetchers behind one
//! [`Fetcher`] lifecycle (`init`, `start`, `fetch_next`, `close`):
//!
//! - [`DocumentFetcher`]: sweeps primary data spans and emits one
//!   [`EncodedDocument`] per document boundary.
//! - [`IndexFetcher`]: answers filters from a secondary index using a scan
//!   strategy chosen by the leading field's operator, falling back to a
//!   document scan when the index cannot narrow the query.
//! - [`VersionedFetcher`]: replays a document's Merkle-DAG into a transient
//!   store to read it as of any historical commit.
//!
//! [`AnyFetcher::for_params`] picks between the document and index fetchers.
//! Long scans check the caller's [`ExecScope`] for cancellation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docshard_fetcher::{AnyFetcher, ExecScope, FetchParams, Fetcher, Filter};
//! # fn run(
//! #     collection: Arc<docshard_types::CollectionDescription>,
//! #     txn: Arc<dyn docshard_store::Txn>,
//! # ) -> docshard_fetcher::Result<()> {
//! let filter = Filter::new().on(&collection, "name", "_eq", "Alice")?;
//! let params = FetchParams::builder().collection(collection).filter(filter).build();
//! let mut fetcher = AnyFetcher::for_params(&params);
//! fetcher.init(params)?;
//! fetcher.start(txn, Vec::new(), ExecScope::background())?;
//! while let (Some(doc), _info) = fetcher.fetch_next()? {
//!     println!("{:?}", doc.decode()?);
//! }
//! fetcher.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod document;
pub mod encoded_doc;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod index;
pub mod matcher;
pub mod scope;
pub mod versioned;

pub use document::DocumentFetcher;
pub use encoded_doc::{Document, EncodedDocument, EncodedProperty};
pub use error::{ErrorKind, FetchError, Result};
pub use fetcher::{AnyFetcher, ExecInfo, FetchParams, Fetcher};
pub use filter::{Condition, Filter, FilterOp};
pub use index::{IndexFetcher, Strategy};
pub use matcher::{LikeMatcher, ValueMatcher};
pub use scope::ExecScope;
pub use versioned::VersionedFetcher;
