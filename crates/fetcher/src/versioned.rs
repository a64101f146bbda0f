//! Rebuilds one document as of a historical commit.
//!
//! A seek walks the Merkle-DAG backward from the target commit, copying
//! every block it needs into a transient store, then replays the composite
//! commits oldest first through the CRDT layer. The transient data namespace
//! then holds the document exactly as of the target, and an inner
//! [`DocumentFetcher`] reads it back.
//!
//! The walk uses an explicit stack and visited set, so history depth is
//! bounded by memory rather than by the call stack. Merged commits stop the
//! walk: seeking forward from the current version only replays the newer
//! commits. Any other seek resets the transient data and replays from
//! genesis; blocks already copied stay cached.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use docshard_store::{
    Block, Blockstore, CrdtProvider, CrdtTarget, DefaultCrdtProvider, MemoryTxn, MerkleCrdt,
    Span, Txn, block::load_block, keys::decode_document_prefix,
};
use docshard_types::{CollectionDescription, CollectionId, CommitId, FieldId};
use snafu::ResultExt;
use tracing::{debug, trace};

use crate::{
    document::DocumentFetcher,
    encoded_doc::EncodedDocument,
    error::{FailedToSeekSnafu, FetchError, Result, StorageSnafu},
    fetcher::{ExecInfo, FetchParams, Fetcher, Lifecycle},
    scope::ExecScope,
};

/// Transient state of one `start`..`close` cycle.
struct Session {
    durable: Arc<dyn Txn>,
    transient: Arc<MemoryTxn>,
    scope: ExecScope,
    doc_id: String,
    current: Option<CommitId>,
    merged: HashSet<CommitId>,
    composite: Option<Box<dyn MerkleCrdt>>,
    fields: HashMap<FieldId, Box<dyn MerkleCrdt>>,
}

impl Session {
    fn reset_state(&mut self) {
        self.transient.data().clear();
        self.transient.heads().clear();
        self.merged.clear();
        self.composite = None;
        self.fields.clear();
        self.current = None;
    }

    /// Decodes `id`, copying it from durable storage on first use.
    fn materialize(&self, id: CommitId) -> Result<Block> {
        let cache = self.transient.blocks();
        if let Some(bytes) = cache.get_block(&id).context(StorageSnafu { operation: "get block" })? {
            return Block::decode(id, &bytes).context(StorageSnafu { operation: "decode block" });
        }
        let (block, bytes) = load_block(self.durable.blockstore().as_ref(), id)
            .context(StorageSnafu { operation: "load block" })?;
        cache.put_block(&id, &bytes).context(StorageSnafu { operation: "cache block" })?;
        Ok(block)
    }
}

/// Fetcher over a single document at a single version.
pub struct VersionedFetcher {
    lifecycle: Lifecycle,
    provider: Arc<dyn CrdtProvider>,
    params: Option<FetchParams>,
    session: Option<Session>,
    inner: DocumentFetcher,
}

impl VersionedFetcher {
    /// Creates an uninitialized fetcher using the built-in CRDTs.
    pub fn new() -> Self {
        Self::with_provider(Arc::new(DefaultCrdtProvider))
    }

    /// Creates an uninitialized fetcher merging through `provider`.
    pub fn with_provider(provider: Arc<dyn CrdtProvider>) -> Self {
        Self {
            lifecycle: Lifecycle::New,
            provider,
            params: None,
            session: None,
            inner: DocumentFetcher::new(),
        }
    }

    /// The commit the document is currently materialized at.
    pub fn current(&self) -> Option<CommitId> {
        self.session.as_ref().and_then(|s| s.current)
    }

    /// Rebuilds the document at `target` and restarts the inner fetch.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::FailedToSeek`] wrapping the storage, integrity
    /// or cancellation error that stopped the seek, or a usage error if the
    /// fetcher is not started.
    pub fn seek_to(&mut self, target: CommitId) -> Result<()> {
        self.lifecycle.check_started()?;
        if let Err(err) = self.seek(target) {
            // Drop the scan over the reset transient store; reads fail with
            // `NoVersion` until a seek succeeds.
            if let Some(params) = &self.params {
                self.inner.init(FetchParams { reverse: false, ..params.clone() })?;
            }
            return Err(err).context(FailedToSeekSnafu { target });
        }
        let (Some(session), Some(_)) = (&self.session, &self.params) else {
            return Err(FetchError::NotStarted);
        };
        let transient: Arc<dyn Txn> = session.transient.clone();
        self.inner.start(transient, Vec::new(), session.scope.clone())
    }

    fn seek(&mut self, target: CommitId) -> Result<()> {
        let (Some(session), Some(params)) = (self.session.as_mut(), &self.params) else {
            return Err(FetchError::NotStarted);
        };
        if session.current == Some(target) {
            return Ok(());
        }
        let limit = params.config.max_history_depth;
        let provider = self.provider.as_ref();
        let result = walk(session, target, limit).and_then(|(queue, stopped_at)| {
            if session.merged.is_empty() || stopped_at == session.current {
                return replay(session, &params.collection, provider, &queue);
            }
            trace!(%target, "Seek does not extend current version, replaying from genesis");
            session.reset_state();
            let (queue, _) = walk(session, target, limit)?;
            replay(session, &params.collection, provider, &queue)
        });
        match result {
            Ok(()) => {
                session.current = Some(target);
                Ok(())
            },
            Err(err) => {
                session.reset_state();
                Err(err)
            },
        }
    }

    fn release(&mut self) -> Result<()> {
        // Dropping the session releases the transient namespaces.
        self.session = None;
        self.inner.close()
    }
}

impl Default for VersionedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks back from `target`, returning the composite commits to replay,
/// oldest first, and the merged commit the top-parent chain stopped at.
fn walk(
    session: &Session,
    target: CommitId,
    limit: usize,
) -> Result<(Vec<CommitId>, Option<CommitId>)> {
    let mut queue = Vec::new();
    let mut stopped_at = None;
    let mut visited = HashSet::new();
    let mut stack = vec![(target, true)];
    while let Some((id, top)) = stack.pop() {
        session.scope.check()?;
        if session.merged.contains(&id) {
            if top {
                stopped_at = Some(id);
            }
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        let block = session.materialize(id)?;
        if top {
            queue.push(id);
            if limit > 0 && queue.len() > limit {
                return Err(FetchError::HistoryTooDeep { limit });
            }
            if let Some(head) = block.head() {
                stack.push((head, true));
            }
        }
        stack.extend(block.sub_links().map(|link| (link.id, false)));
    }
    queue.reverse();
    debug!(%target, queued = queue.len(), "Walked version history");
    Ok((queue, stopped_at))
}

/// Merges `queue` in order into the transient data namespace.
///
/// One composite CRDT and one CRDT per field are created lazily and reused
/// for the rest of the session.
fn replay(
    session: &mut Session,
    collection: &CollectionDescription,
    provider: &dyn CrdtProvider,
    queue: &[CommitId],
) -> Result<()> {
    let store = session.transient.datastore();
    for id in queue {
        session.scope.check()?;
        let block = session.materialize(*id)?;
        let mut composite = match session.composite.take() {
            Some(crdt) => crdt,
            None => provider
                .instance_for(collection.id, &session.doc_id, CrdtTarget::Composite)
                .context(StorageSnafu { operation: "create composite crdt" })?,
        };
        let delta = composite.decode_delta(&block).context(StorageSnafu { operation: "decode delta" })?;
        composite.merge(store.as_ref(), delta, *id).context(StorageSnafu { operation: "merge" })?;
        session.composite = Some(composite);
        session.merged.insert(*id);

        for link in block.sub_links() {
            if session.merged.contains(&link.id) {
                continue;
            }
            let field = collection.field_by_name(&link.name).ok_or_else(|| {
                FetchError::UnresolvableField { commit: *id, name: link.name.clone() }
            })?;
            let field_block = session.materialize(link.id)?;
            let mut crdt = match session.fields.remove(&field.id) {
                Some(crdt) => crdt,
                None => provider
                    .instance_for(collection.id, &session.doc_id, CrdtTarget::Field(field))
                    .context(StorageSnafu { operation: "create field crdt" })?,
            };
            let delta = crdt
                .decode_delta(&field_block)
                .context(StorageSnafu { operation: "decode delta" })?;
            crdt.merge(store.as_ref(), delta, link.id).context(StorageSnafu { operation: "merge" })?;
            session.fields.insert(field.id, crdt);
            session.merged.insert(link.id);
        }
    }
    Ok(())
}

/// Splits a version span into its document identifier and target commit.
fn parse_span(span: &Span, collection_id: CollectionId) -> Result<(String, CommitId)> {
    let (span_collection, doc_id) =
        decode_document_prefix(&span.start).map_err(|e| FetchError::InvalidVersionSpan {
            reason: format!("start is not a document key: {e}"),
        })?;
    if span_collection != collection_id {
        return Err(FetchError::InvalidVersionSpan {
            reason: format!("document belongs to collection {span_collection}, not {collection_id}"),
        });
    }
    let target = CommitId::from_slice(&span.end).ok_or_else(|| FetchError::InvalidVersionSpan {
        reason: format!("end holds {} bytes, not a commit id", span.end.len()),
    })?;
    Ok((doc_id, target))
}

impl Fetcher for VersionedFetcher {
    fn init(&mut self, params: FetchParams) -> Result<()> {
        params.validate()?;
        self.release()?;
        self.inner.init(FetchParams { reverse: false, ..params.clone() })?;
        self.params = Some(params);
        self.lifecycle = Lifecycle::Ready;
        Ok(())
    }

    fn start(&mut self, txn: Arc<dyn Txn>, spans: Vec<Span>, scope: ExecScope) -> Result<()> {
        self.lifecycle.check_startable()?;
        let Some(params) = &self.params else {
            return Err(FetchError::NotInitialized);
        };
        let [span] = spans.as_slice() else {
            return Err(FetchError::InvalidSpanCount { count: spans.len() });
        };
        let (doc_id, target) = parse_span(span, params.collection.id)?;
        debug!(collection = %params.collection.name, %doc_id, %target, "Starting versioned fetch");
        let transient = Arc::new(MemoryTxn::detached(txn.id(), params.config.scan_batch_size));
        let scope = scope.or_timeout(params.config.scan_timeout);
        self.session = Some(Session {
            durable: txn,
            transient,
            scope,
            doc_id,
            current: None,
            merged: HashSet::new(),
            composite: None,
            fields: HashMap::new(),
        });
        self.lifecycle = Lifecycle::Started;
        self.seek_to(target)
    }

    fn fetch_next(&mut self) -> Result<(Option<&EncodedDocument>, ExecInfo)> {
        self.lifecycle.check_started()?;
        if self.current().is_none() {
            return Err(FetchError::NoVersion);
        }
        self.inner.fetch_next()
    }

    fn close(&mut self) -> Result<()> {
        let released = self.release();
        self.lifecycle = Lifecycle::Closed;
        released
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use docshard_store::{MemoryRootstore, keys::document_prefix};
    use docshard_types::{CollectionDescription, FieldDescription, FieldKind};

    use super::*;

    fn users() -> Arc<CollectionDescription> {
        Arc::new(
            CollectionDescription::builder()
                .id(1)
                .name("Users")
                .schema_version_id("v1")
                .fields(vec![FieldDescription::lww(1, "name", FieldKind::STRING)])
                .build(),
        )
    }

    fn initialized() -> VersionedFetcher {
        let mut fetcher = VersionedFetcher::new();
        fetcher.init(FetchParams::builder().collection(users()).build()).unwrap();
        fetcher
    }

    fn txn() -> Arc<dyn Txn> {
        Arc::new(MemoryRootstore::new().new_txn(true))
    }

    #[test]
    fn test_requires_exactly_one_span() {
        let mut fetcher = initialized();
        let span = Span::for_version(document_prefix(1, "d"), CommitId::of(b"c"));
        let err = fetcher.start(txn(), vec![span.clone(), span], ExecScope::background()).unwrap_err();
        assert!(matches!(err, FetchError::InvalidSpanCount { count: 2 }));
        let err = fetcher.start(txn(), vec![], ExecScope::background()).unwrap_err();
        assert!(matches!(err, FetchError::InvalidSpanCount { count: 0 }));
    }

    #[test]
    fn test_rejects_malformed_version_spans() {
        let mut fetcher = initialized();
        let bad_commit = Span::new(document_prefix(1, "d"), b"short".to_vec());
        assert!(matches!(
            fetcher.start(txn(), vec![bad_commit], ExecScope::background()),
            Err(FetchError::InvalidVersionSpan { .. })
        ));
        let other_collection = Span::for_version(document_prefix(2, "d"), CommitId::of(b"c"));
        assert!(matches!(
            fetcher.start(txn(), vec![other_collection], ExecScope::background()),
            Err(FetchError::InvalidVersionSpan { .. })
        ));
    }

    #[test]
    fn test_missing_block_fails_to_seek() {
        let mut fetcher = initialized();
        let target = CommitId::of(b"absent");
        let span = Span::for_version(document_prefix(1, "d"), target);
        let err = fetcher.start(txn(), vec![span], ExecScope::background()).unwrap_err();
        assert!(matches!(&err, FetchError::FailedToSeek { target: t, .. } if *t == target));
        assert!(err.is_retryable());
        fetcher.close().unwrap();
        fetcher.close().unwrap();
    }

    #[test]
    fn test_start_before_init() {
        let mut fetcher = VersionedFetcher::new();
        let span = Span::for_version(document_prefix(1, "d"), CommitId::of(b"c"));
        assert!(matches!(
            fetcher.start(txn(), vec![span], ExecScope::background()),
            Err(FetchError::NotInitialized)
        ));
    }
}
