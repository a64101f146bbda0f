//! Error types for fetch operations using snafu.
//!
//! Every variant maps to an [`ErrorKind`] so callers can tell programming
//! errors from storage failures and malformed data without matching on
//! individual variants:
//!
//! | Kind            | Examples                                             |
//! |-----------------|------------------------------------------------------|
//! | Configuration   | start before init, bad span count, bad operator      |
//! | Storage         | get/query failure, missing block, CBOR decode        |
//! | DataIntegrity   | composite without priority, unresolvable link        |
//! | Usage           | fetch before start or after close                    |
//! | Cancelled       | execution scope cancelled or past its deadline       |

use docshard_types::{CommitId, FieldId, ValueError, config::ConfigError};
use snafu::{Location, Snafu};

/// Result type for fetch operations.
pub type Result<T, E = FetchError> = std::result::Result<T, E>;

/// Error category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller or programmer error detected before any scan. Never retried.
    Configuration,
    /// Underlying storage or decode failure.
    Storage,
    /// Persisted data violates an invariant. Fatal for the current fetch.
    DataIntegrity,
    /// Lifecycle misuse such as fetching from an unstarted fetcher.
    Usage,
    /// The execution scope ended.
    Cancelled,
}

/// Errors from initializing, starting or driving a fetcher.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    /// `start` was called before `init`.
    #[snafu(display("Fetcher started before init"))]
    NotInitialized,

    /// The requested collection has no index with this identifier.
    #[snafu(display("Collection {collection:?} has no index {index_id}"))]
    MissingIndex {
        /// Collection name.
        collection: String,
        /// Requested index.
        index_id: u32,
    },

    /// The versioned fetcher accepts exactly one span.
    #[snafu(display("Versioned fetch requires exactly one span, got {count}"))]
    InvalidSpanCount {
        /// Number of spans supplied.
        count: usize,
    },

    /// A version span does not carry a document key and commit.
    #[snafu(display("Invalid version span: {reason}"))]
    InvalidVersionSpan {
        /// What was wrong.
        reason: String,
    },

    /// A filter operator name is not recognized.
    #[snafu(display("Unsupported filter operator {op:?}"))]
    UnsupportedOperator {
        /// The operator as written.
        op: String,
    },

    /// A filter operand does not fit its operator or field.
    #[snafu(display("Invalid filter operand for {op}: {reason}"))]
    InvalidFilterValue {
        /// Operator the operand belongs to.
        op: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// A filter references a field position outside the schema.
    #[snafu(display("Filter references unknown field position {position}"))]
    UnknownFieldPosition {
        /// The offending position.
        position: usize,
    },

    /// Fetch parameters failed validation.
    #[snafu(display("Invalid fetch configuration: {source}"))]
    Config {
        /// The underlying validation error.
        source: ConfigError,
    },

    /// `fetch_next` was called before `start`.
    #[snafu(display("Fetcher has not been started"))]
    NotStarted,

    /// The fetcher was used after `close`.
    #[snafu(display("Fetcher is closed"))]
    Closed,

    /// The last seek failed and no version is materialized.
    #[snafu(display("No document version is materialized"))]
    NoVersion,

    /// An underlying store operation failed.
    #[snafu(display("Storage error during {operation} at {location}: {source}"))]
    Storage {
        /// Operation that failed.
        operation: &'static str,
        /// The underlying store error.
        source: docshard_store::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A stored field value could not be decoded.
    #[snafu(display("Failed to decode field {field:?}: {source}"))]
    Decode {
        /// Field name.
        field: String,
        /// The underlying value error.
        source: ValueError,
    },

    /// A primary data key names a field the schema does not have.
    #[snafu(display("Document {doc_id:?} has data for unknown field {field_id}"))]
    UnknownField {
        /// Owning document.
        doc_id: String,
        /// Field identifier found in the key.
        field_id: FieldId,
    },

    /// A composite link names a field the schema does not have.
    #[snafu(display("Commit {commit} links unresolvable field {name:?}"))]
    UnresolvableField {
        /// Composite commit holding the link.
        commit: CommitId,
        /// Link name.
        name: String,
    },

    /// A version walk exceeded the configured history depth.
    #[snafu(display("History deeper than {limit} commits"))]
    HistoryTooDeep {
        /// Configured limit.
        limit: usize,
    },

    /// The execution scope ended.
    #[snafu(display("Fetch cancelled: {reason}"))]
    Cancelled {
        /// Why the scope ended.
        reason: &'static str,
    },

    /// Rebuilding a document at a commit failed.
    #[snafu(display("Failed to seek to {target}: {source}"))]
    FailedToSeek {
        /// Target commit.
        target: CommitId,
        /// The underlying failure.
        #[snafu(source(from(FetchError, Box::new)))]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInitialized
            | Self::MissingIndex { .. }
            | Self::InvalidSpanCount { .. }
            | Self::InvalidVersionSpan { .. }
            | Self::UnsupportedOperator { .. }
            | Self::InvalidFilterValue { .. }
            | Self::UnknownFieldPosition { .. }
            | Self::Config { .. } => ErrorKind::Configuration,
            Self::Storage { source, .. } if source.is_integrity() => ErrorKind::DataIntegrity,
            Self::Storage { .. } | Self::Decode { .. } => ErrorKind::Storage,
            Self::UnknownField { .. }
            | Self::UnresolvableField { .. }
            | Self::HistoryTooDeep { .. } => ErrorKind::DataIntegrity,
            Self::NotStarted | Self::Closed | Self::NoVersion => ErrorKind::Usage,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::FailedToSeek { source, .. } => source.kind(),
        }
    }

    /// Whether a retry of the whole fetch may succeed.
    ///
    /// Only storage failures are transient. The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}
