//! Fetcher answering filtered queries from a secondary index.
//!
//! Index entries carry the indexed values, so documents whose requested
//! fields are all indexed never touch primary data. Other fields, and the
//! fields of conditions the index cannot check, are fetched per document
//! through an inner [`DocumentFetcher`] and merged over the indexed values.
//!
//! When the filter leaves the index's leading field unconstrained the index
//! cannot narrow the scan, and the fetcher degrades to a plain document
//! scan over the given spans.

mod iterators;

use std::{collections::BTreeSet, sync::Arc};

use docshard_store::{ScanOrder, Span, Txn, keys::document_prefix};
use docshard_types::{IndexDescription, IndexId};
use tracing::{debug, warn};

pub use self::iterators::Strategy;
use self::iterators::{IndexIterator, ScanPlan};
use crate::{
    document::DocumentFetcher,
    encoded_doc::EncodedDocument,
    error::{FetchError, Result},
    fetcher::{ExecInfo, FetchParams, Fetcher, Lifecycle},
    filter::{Condition, Filter},
    matcher::coerce_operand,
    scope::ExecScope,
};

struct IndexPath {
    index: IndexDescription,
    plan: ScanPlan,
    /// Collection positions of the index fields, in index order.
    positions: Vec<usize>,
    filter_fields: BTreeSet<usize>,
    /// Fetches fields the index does not carry. `None` when every requested
    /// field is indexed.
    inner: Option<DocumentFetcher>,
}

enum Mode {
    Index(IndexPath),
    Fallback(DocumentFetcher),
}

struct Running {
    txn: Arc<dyn Txn>,
    scope: ExecScope,
    iter: IndexIterator,
}

/// Fetcher over one secondary index.
pub struct IndexFetcher {
    index_id: IndexId,
    lifecycle: Lifecycle,
    params: Option<FetchParams>,
    mode: Option<Mode>,
    running: Option<Running>,
    doc: Option<EncodedDocument>,
}

impl IndexFetcher {
    /// Creates an uninitialized fetcher over the index `index_id`.
    pub fn new(index_id: IndexId) -> Self {
        Self {
            index_id,
            lifecycle: Lifecycle::New,
            params: None,
            mode: None,
            running: None,
            doc: None,
        }
    }

    /// The chosen strategy, or `None` before `init` and when degraded to a
    /// document scan.
    pub fn strategy(&self) -> Option<Strategy> {
        match &self.mode {
            Some(Mode::Index(path)) => Some(path.plan.strategy),
            _ => None,
        }
    }

    /// Returns true if the fetcher degraded to a full document scan.
    pub fn is_fallback(&self) -> bool {
        matches!(self.mode, Some(Mode::Fallback(_)))
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut running) = self.running.take() {
            running.iter.close();
        }
        match self.mode.as_mut() {
            Some(Mode::Index(IndexPath { inner: Some(inner), .. })) => inner.close(),
            Some(Mode::Fallback(fetcher)) => fetcher.close(),
            _ => Ok(()),
        }
    }

    fn plan(&self, params: &FetchParams) -> Result<Mode> {
        let collection = &params.collection;
        let index = collection.index_by_id(self.index_id).ok_or_else(|| {
            FetchError::MissingIndex { collection: collection.name.clone(), index_id: self.index_id }
        })?;
        let positions = index
            .fields
            .iter()
            .map(|f| collection.position_of(&f.name))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| FetchError::MissingIndex {
                collection: collection.name.clone(),
                index_id: self.index_id,
            })?;
        let filter = params.filter.clone().unwrap_or_default();

        let leading_constrained = positions.first().is_some_and(|p| filter.get(*p).is_some());
        if !leading_constrained {
            let mut fetcher = DocumentFetcher::new();
            fetcher.init(params.clone())?;
            return Ok(Mode::Fallback(fetcher));
        }

        let conditions: Vec<Option<Condition>> = positions
            .iter()
            .map(|p| {
                let kind = collection.fields[*p].kind;
                filter.get(*p).map(|c| Condition {
                    op: c.op,
                    value: coerce_operand(c.value.clone(), kind),
                })
            })
            .collect();
        let plan = ScanPlan::new(collection.id, index, &conditions)?;

        let (_, residual) = filter.split(&positions);
        let indexed: BTreeSet<usize> = positions.iter().copied().collect();
        let remaining: Vec<usize> = params
            .requested_fields()
            .union(&params.filter_fields())
            .filter(|p| !indexed.contains(p))
            .copied()
            .collect();
        let inner = if remaining.is_empty() {
            None
        } else {
            let mut fetcher = DocumentFetcher::new();
            fetcher.init(FetchParams {
                collection: Arc::clone(collection),
                fields: remaining,
                filter: (!residual.is_empty()).then_some(residual),
                reverse: false,
                show_deleted: params.show_deleted,
                config: params.config.clone(),
            })?;
            Some(fetcher)
        };
        Ok(Mode::Index(IndexPath {
            index: index.clone(),
            plan,
            positions,
            filter_fields: params.filter_fields(),
            inner,
        }))
    }

    fn next_indexed(&mut self, info: &mut ExecInfo) -> Result<bool> {
        let (Some(Mode::Index(path)), Some(running), Some(doc), Some(params)) =
            (self.mode.as_mut(), self.running.as_mut(), self.doc.as_mut(), &self.params)
        else {
            return Err(FetchError::NotStarted);
        };
        loop {
            let Some(entry) = running.iter.next(info)? else {
                return Ok(false);
            };
            doc.reset();
            doc.set_id(&entry.doc_id);
            for (position, value) in path.positions.iter().zip(entry.values) {
                doc.set_value(*position, value, path.filter_fields.contains(position))?;
            }
            let Some(inner) = path.inner.as_mut() else {
                info.docs_fetched += 1;
                return Ok(true);
            };
            let span = Span::prefix(&document_prefix(params.collection.id, &entry.doc_id));
            inner.start(Arc::clone(&running.txn), vec![span], running.scope.clone())?;
            let (found, sub) = inner.fetch_next()?;
            info.add(sub);
            if let Some(primary) = found {
                doc.merge_from(primary);
                return Ok(true);
            }
        }
    }
}

impl Fetcher for IndexFetcher {
    fn init(&mut self, params: FetchParams) -> Result<()> {
        params.validate()?;
        self.release()?;
        let mode = self.plan(&params)?;
        self.doc = Some(EncodedDocument::new(Arc::clone(&params.collection)));
        self.mode = Some(mode);
        self.params = Some(params);
        self.lifecycle = Lifecycle::Ready;
        Ok(())
    }

    fn start(&mut self, txn: Arc<dyn Txn>, spans: Vec<Span>, scope: ExecScope) -> Result<()> {
        self.lifecycle.check_startable()?;
        if let Some(mut running) = self.running.take() {
            running.iter.close();
        }
        let (Some(mode), Some(params)) = (self.mode.as_mut(), &self.params) else {
            return Err(FetchError::NotInitialized);
        };
        match mode {
            Mode::Fallback(fetcher) => {
                warn!(
                    collection = %params.collection.name,
                    index_id = self.index_id,
                    "Filter does not constrain the leading index field, falling back to a full scan"
                );
                fetcher.start(txn, spans, scope)?;
            },
            Mode::Index(path) => {
                let scope = scope.or_timeout(params.config.scan_timeout);
                debug!(
                    collection = %params.collection.name,
                    index = %path.index.name,
                    strategy = %path.plan.strategy,
                    txn = txn.id(),
                    "Starting index fetch"
                );
                let iter = IndexIterator::new(
                    &path.plan,
                    path.index.clone(),
                    txn.datastore(),
                    ScanOrder::from_reverse(params.reverse),
                    scope.clone(),
                    params.config.cancellation_check_interval,
                );
                self.running = Some(Running { txn, scope, iter });
            },
        }
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    fn fetch_next(&mut self) -> Result<(Option<&EncodedDocument>, ExecInfo)> {
        self.lifecycle.check_started()?;
        if matches!(self.mode, Some(Mode::Fallback(_))) {
            return match self.mode.as_mut() {
                Some(Mode::Fallback(fetcher)) => fetcher.fetch_next(),
                _ => unreachable!("mode checked to be Fallback above"),
            };
        }
        let mut info = ExecInfo::default();
        let found = match self.next_indexed(&mut info) {
            Ok(found) => found,
            Err(err) => {
                if let Some(running) = self.running.as_mut() {
                    running.iter.close();
                }
                return Err(err);
            },
        };
        Ok((if found { self.doc.as_ref() } else { None }, info))
    }

    fn close(&mut self) -> Result<()> {
        let released = self.release();
        self.lifecycle = Lifecycle::Closed;
        released
    }
}
