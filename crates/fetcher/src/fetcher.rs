//! The fetcher lifecycle shared by every fetcher kind.
//!
//! ```text
//! new ──init(params)──► ready ──start(txn, spans, scope)──► started
//!                                                              │
//!                         ┌────── fetch_next() ◄───────────────┤
//!                         └──────────────────────────────────► │
//!                                                        close()
//! ```

use std::{collections::BTreeSet, ops::AddAssign, sync::Arc};

use docshard_store::{Span, Txn};
use docshard_types::{CollectionDescription, config::FetchConfig};
use snafu::ResultExt;

use crate::{
    document::DocumentFetcher,
    encoded_doc::EncodedDocument,
    error::{ConfigSnafu, FetchError, Result},
    filter::Filter,
    index::IndexFetcher,
    scope::ExecScope,
    versioned::VersionedFetcher,
};

/// Immutable parameters of a fetch.
#[derive(Debug, Clone, bon::Builder)]
pub struct FetchParams {
    /// Collection to read.
    pub collection: Arc<CollectionDescription>,
    /// Positions of the requested fields. Empty requests every field.
    #[builder(default)]
    pub fields: Vec<usize>,
    /// Conditions every yielded document must satisfy.
    pub filter: Option<Filter>,
    /// Yield documents in descending key order.
    #[builder(default)]
    pub reverse: bool,
    /// Also yield documents carrying a deletion marker.
    #[builder(default)]
    pub show_deleted: bool,
    /// Tuning.
    #[builder(default)]
    pub config: FetchConfig,
}

impl FetchParams {
    /// Checks the configuration and that every referenced position exists.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] or [`FetchError::UnknownFieldPosition`].
    pub fn validate(&self) -> Result<()> {
        self.config.validate().context(ConfigSnafu)?;
        if let Some(position) = self.fields.iter().find(|p| self.collection.field_at(**p).is_none())
        {
            return Err(FetchError::UnknownFieldPosition { position: *position });
        }
        match &self.filter {
            Some(filter) => filter.validate(&self.collection),
            None => Ok(()),
        }
    }

    /// Requested positions, with an empty request expanded to every field.
    pub fn requested_fields(&self) -> BTreeSet<usize> {
        if self.fields.is_empty() {
            (0..self.collection.fields.len()).collect()
        } else {
            self.fields.iter().copied().collect()
        }
    }

    /// Positions constrained by the filter.
    pub fn filter_fields(&self) -> BTreeSet<usize> {
        self.filter.iter().flat_map(|f| f.iter().map(|(p, _)| p)).collect()
    }
}

/// Work performed by fetch calls, for plan diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecInfo {
    /// Documents yielded.
    pub docs_fetched: u64,
    /// Field values read from primary data.
    pub fields_fetched: u64,
    /// Index entries read from the store, matched or not.
    pub indexes_fetched: u64,
}

impl ExecInfo {
    /// Adds `other`'s counters to this one.
    pub fn add(&mut self, other: ExecInfo) {
        self.docs_fetched += other.docs_fetched;
        self.fields_fetched += other.fields_fetched;
        self.indexes_fetched += other.indexes_fetched;
    }
}

impl AddAssign for ExecInfo {
    fn add_assign(&mut self, other: ExecInfo) {
        self.add(other);
    }
}

/// A pull-based cursor over documents.
pub trait Fetcher: Send {
    /// Binds the fetcher to immutable scan parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the parameters are invalid.
    fn init(&mut self, params: FetchParams) -> Result<()>;

    /// Starts a scan of `spans` in the snapshot of `txn`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::NotInitialized`] before `init`, or an error from
    /// preparing the scan.
    fn start(&mut self, txn: Arc<dyn Txn>, spans: Vec<Span>, scope: ExecScope) -> Result<()>;

    /// Yields the next document, or `None` at the end of the scan, together
    /// with the work done by this call.
    ///
    /// The document is only valid until the next call.
    ///
    /// # Errors
    ///
    /// Returns a usage error before `start` or after `close`, or a storage,
    /// integrity or cancellation error from the scan.
    fn fetch_next(&mut self) -> Result<(Option<&EncodedDocument>, ExecInfo)>;

    /// Releases the scan. Idempotent and safe after errors.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing resources fails.
    fn close(&mut self) -> Result<()>;
}

/// Lifecycle position of a fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    New,
    Ready,
    Started,
    Closed,
}

impl Lifecycle {
    pub(crate) fn check_startable(self) -> Result<()> {
        match self {
            Self::New => Err(FetchError::NotInitialized),
            Self::Closed => Err(FetchError::Closed),
            Self::Ready | Self::Started => Ok(()),
        }
    }

    pub(crate) fn check_started(self) -> Result<()> {
        match self {
            Self::New | Self::Ready => Err(FetchError::NotStarted),
            Self::Closed => Err(FetchError::Closed),
            Self::Started => Ok(()),
        }
    }
}

/// The closed set of fetcher kinds behind one [`Fetcher`] interface.
pub enum AnyFetcher {
    /// Primary data scan.
    Document(DocumentFetcher),
    /// Secondary index scan.
    Index(IndexFetcher),
    /// Single document at a historical commit.
    Versioned(VersionedFetcher),
}

impl AnyFetcher {
    /// Chooses the fetcher for `params`: the index fetcher when the filter
    /// constrains the leading field of one of the collection's indexes,
    /// otherwise the document fetcher.
    pub fn for_params(params: &FetchParams) -> Self {
        let Some(filter) = &params.filter else {
            return Self::Document(DocumentFetcher::new());
        };
        let collection = &params.collection;
        let usable = collection.indexes.iter().find(|index| {
            index
                .fields
                .first()
                .and_then(|leading| collection.position_of(&leading.name))
                .is_some_and(|position| filter.get(position).is_some())
        });
        match usable {
            Some(index) => Self::Index(IndexFetcher::new(index.id)),
            None => Self::Document(DocumentFetcher::new()),
        }
    }

    /// A versioned fetcher.
    pub fn versioned() -> Self {
        Self::Versioned(VersionedFetcher::new())
    }

    /// Short name of the selected kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::Index(_) => "index",
            Self::Versioned(_) => "versioned",
        }
    }
}

impl Fetcher for AnyFetcher {
    fn init(&mut self, params: FetchParams) -> Result<()> {
        match self {
            Self::Document(f) => f.init(params),
            Self::Index(f) => f.init(params),
            Self::Versioned(f) => f.init(params),
        }
    }

    fn start(&mut self, txn: Arc<dyn Txn>, spans: Vec<Span>, scope: ExecScope) -> Result<()> {
        match self {
            Self::Document(f) => f.start(txn, spans, scope),
            Self::Index(f) => f.start(txn, spans, scope),
            Self::Versioned(f) => f.start(txn, spans, scope),
        }
    }

    fn fetch_next(&mut self) -> Result<(Option<&EncodedDocument>, ExecInfo)> {
        match self {
            Self::Document(f) => f.fetch_next(),
            Self::Index(f) => f.fetch_next(),
            Self::Versioned(f) => f.fetch_next(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Self::Document(f) => f.close(),
            Self::Index(f) => f.close(),
            Self::Versioned(f) => f.close(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use docshard_types::{FieldDescription, FieldKind, IndexDescription, IndexedField};

    use super::*;
    use crate::filter::{Condition, FilterOp};

    fn users() -> Arc<CollectionDescription> {
        Arc::new(
            CollectionDescription::builder()
                .id(1)
                .name("Users")
                .schema_version_id("v1")
                .fields(vec![
                    FieldDescription::lww(1, "name", FieldKind::STRING),
                    FieldDescription::lww(2, "age", FieldKind::INT),
                ])
                .indexes(vec![IndexDescription {
                    id: 1,
                    name: "by_name".into(),
                    unique: true,
                    fields: vec![IndexedField::asc("name")],
                }])
                .build(),
        )
    }

    #[test]
    fn test_exec_info_accumulates() {
        let mut total = ExecInfo::default();
        total.add(ExecInfo { docs_fetched: 1, fields_fetched: 2, indexes_fetched: 3 });
        total += ExecInfo { docs_fetched: 1, fields_fetched: 0, indexes_fetched: 1 };
        assert_eq!(total, ExecInfo { docs_fetched: 2, fields_fetched: 2, indexes_fetched: 4 });
    }

    #[test]
    fn test_params_validate() {
        let ok = FetchParams::builder().collection(users()).fields(vec![0]).build();
        assert!(ok.validate().is_ok());
        let bad = FetchParams::builder().collection(users()).fields(vec![7]).build();
        assert!(matches!(bad.validate(), Err(FetchError::UnknownFieldPosition { position: 7 })));
    }

    #[test]
    fn test_requested_fields_default_to_all() {
        let params = FetchParams::builder().collection(users()).build();
        assert_eq!(params.requested_fields().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_selection_uses_index_on_leading_field() {
        let on_name = FetchParams::builder()
            .collection(users())
            .filter(Filter::new().with(0, Condition::new(FilterOp::Eq, "Alice")))
            .build();
        assert_eq!(AnyFetcher::for_params(&on_name).kind(), "index");

        let on_age = FetchParams::builder()
            .collection(users())
            .filter(Filter::new().with(1, Condition::new(FilterOp::Gt, 21i64)))
            .build();
        assert_eq!(AnyFetcher::for_params(&on_age).kind(), "document");

        let unfiltered = FetchParams::builder().collection(users()).build();
        assert_eq!(AnyFetcher::for_params(&unfiltered).kind(), "document");
        assert_eq!(AnyFetcher::versioned().kind(), "versioned");
    }

    #[test]
    fn test_lifecycle_checks() {
        assert!(matches!(Lifecycle::New.check_startable(), Err(FetchError::NotInitialized)));
        assert!(matches!(Lifecycle::Ready.check_started(), Err(FetchError::NotStarted)));
        assert!(matches!(Lifecycle::Closed.check_started(), Err(FetchError::Closed)));
        assert!(Lifecycle::Started.check_started().is_ok());
    }
}
