//! Reassembles documents from ordered scans over primary data.
//!
//! Every field of a document lives under its own key sharing the document
//! boundary prefix. The fetcher sweeps its spans in key order and emits a
//! document each time the boundary changes.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::Arc,
};

use docshard_store::{
    COMPOSITE_FIELD_ID, DataStoreKey, InstanceType, KvIterator, Query, ScanOrder, Span, Txn,
    keys::{collection_prefix, document_boundary_len},
    span::merge_spans,
};
use docshard_types::{DocumentStatus, FieldId, FieldValue};
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::{
    encoded_doc::EncodedDocument,
    error::{FetchError, Result, StorageSnafu},
    fetcher::{ExecInfo, FetchParams, Fetcher, Lifecycle},
    matcher::ValueMatcher,
    scope::ExecScope,
};

type Entry = (Vec<u8>, Vec<u8>);

/// Parameters compiled by `init`.
struct Plan {
    params: FetchParams,
    /// Field ID to position, for every schema field.
    positions: HashMap<FieldId, usize>,
    /// Positions whose values are collected.
    collected: BTreeSet<usize>,
    /// Positions needed by the filter.
    filter_fields: BTreeSet<usize>,
    matchers: Vec<(usize, ValueMatcher)>,
}

/// Fetcher over primary data.
pub struct DocumentFetcher {
    lifecycle: Lifecycle,
    plan: Option<Plan>,
    txn: Option<Arc<dyn Txn>>,
    scope: ExecScope,
    spans: VecDeque<Span>,
    iter: Option<Box<dyn KvIterator>>,
    /// First entry of the next document, read while closing the current one.
    pending: Option<Entry>,
    boundary: Vec<u8>,
    doc: Option<EncodedDocument>,
}

impl DocumentFetcher {
    /// Creates an uninitialized fetcher.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::New,
            plan: None,
            txn: None,
            scope: ExecScope::background(),
            spans: VecDeque::new(),
            iter: None,
            pending: None,
            boundary: Vec::new(),
            doc: None,
        }
    }

    fn release_scan(&mut self) {
        if let Some(mut iter) = self.iter.take() {
            iter.close();
        }
        self.spans.clear();
        self.pending = None;
        self.boundary.clear();
    }

    /// Next entry of the sweep, opening the next span's query as needed.
    fn next_entry(&mut self) -> Result<Option<Entry>> {
        if let Some(entry) = self.pending.take() {
            return Ok(Some(entry));
        }
        let (Some(txn), Some(plan)) = (&self.txn, &self.plan) else {
            return Err(FetchError::NotStarted);
        };
        loop {
            if self.iter.is_none() {
                let Some(span) = self.spans.pop_front() else {
                    return Ok(None);
                };
                let order = ScanOrder::from_reverse(plan.params.reverse);
                let iter = txn
                    .datastore()
                    .query(Query::span(&span, order))
                    .context(StorageSnafu { operation: "query" })?;
                self.iter = Some(iter);
            }
            let Some(iter) = self.iter.as_mut() else {
                continue;
            };
            match iter.next_entry() {
                Ok(Some(entry)) => return Ok(Some(entry)),
                Ok(None) => {
                    iter.close();
                    self.iter = None;
                },
                Err(source) => {
                    warn!(error = %source, "Primary data iterator failed, terminating scan");
                    self.release_scan();
                    return Err(source).context(StorageSnafu { operation: "iterate" });
                },
            }
        }
    }

    /// Reads the entries of one document into the accumulator. Returns
    /// false when the sweep is exhausted with no document pending.
    fn read_document(&mut self, info: &mut ExecInfo) -> Result<bool> {
        self.boundary.clear();
        if let Some(doc) = self.doc.as_mut() {
            doc.reset();
        }
        loop {
            let Some((raw_key, value)) = self.next_entry()? else {
                return Ok(!self.boundary.is_empty());
            };
            let key = DataStoreKey::decode(&raw_key).context(StorageSnafu { operation: "decode key" })?;
            if key.instance == InstanceType::Priority {
                continue;
            }
            if self.boundary.is_empty() {
                let len = document_boundary_len(&raw_key)
                    .context(StorageSnafu { operation: "decode key" })?;
                self.boundary.extend_from_slice(&raw_key[..len]);
                if let Some(doc) = self.doc.as_mut() {
                    doc.set_id(&key.doc_id);
                }
            } else if !raw_key.starts_with(&self.boundary) {
                self.pending = Some((raw_key, value));
                return Ok(true);
            }
            self.apply(key, value, info)?;
        }
    }

    fn apply(&mut self, key: DataStoreKey, value: Vec<u8>, info: &mut ExecInfo) -> Result<()> {
        let (Some(plan), Some(doc)) = (&self.plan, self.doc.as_mut()) else {
            return Err(FetchError::NotStarted);
        };
        match (key.field_id, key.instance) {
            (COMPOSITE_FIELD_ID, InstanceType::Value) => {
                doc.set_schema_version_id(&String::from_utf8_lossy(&value));
            },
            (COMPOSITE_FIELD_ID, InstanceType::Deleted) => doc.set_status(DocumentStatus::Deleted),
            (_, InstanceType::Value) => {
                let position = *plan.positions.get(&key.field_id).ok_or_else(|| {
                    FetchError::UnknownField { doc_id: key.doc_id.clone(), field_id: key.field_id }
                })?;
                if plan.collected.contains(&position) {
                    doc.set_property(position, value, plan.filter_fields.contains(&position));
                    info.fields_fetched += 1;
                }
            },
            _ => {},
        }
        Ok(())
    }

    fn passes(&self) -> Result<bool> {
        let (Some(plan), Some(doc)) = (&self.plan, &self.doc) else {
            return Err(FetchError::NotStarted);
        };
        if doc.status() == DocumentStatus::Deleted && !plan.params.show_deleted {
            return Ok(false);
        }
        for (position, matcher) in &plan.matchers {
            let value = doc.value_at(*position)?.unwrap_or(&FieldValue::Null);
            if !matcher.matches(value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn next_match(&mut self, info: &mut ExecInfo) -> Result<bool> {
        loop {
            self.scope.check()?;
            if !self.read_document(info)? {
                return Ok(false);
            }
            if self.passes()? {
                info.docs_fetched += 1;
                return Ok(true);
            }
        }
    }
}

impl Default for DocumentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for DocumentFetcher {
    fn init(&mut self, params: FetchParams) -> Result<()> {
        params.validate()?;
        self.release_scan();
        let positions = params
            .collection
            .fields
            .iter()
            .enumerate()
            .map(|(position, field)| (field.id, position))
            .collect();
        let filter_fields = params.filter_fields();
        let collected = params.requested_fields().union(&filter_fields).copied().collect();
        let matchers = match &params.filter {
            Some(filter) => filter
                .iter()
                .map(|(position, condition)| {
                    let kind = params
                        .collection
                        .fields
                        .get(position)
                        .map(|f| f.kind)
                        .ok_or(FetchError::UnknownFieldPosition { position })?;
                    Ok((position, ValueMatcher::compile_for(Some(condition), kind)?))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        self.doc = Some(EncodedDocument::new(Arc::clone(&params.collection)));
        self.plan = Some(Plan { params, positions, collected, filter_fields, matchers });
        self.lifecycle = Lifecycle::Ready;
        Ok(())
    }

    fn start(&mut self, txn: Arc<dyn Txn>, spans: Vec<Span>, scope: ExecScope) -> Result<()> {
        self.lifecycle.check_startable()?;
        let Some(plan) = &self.plan else {
            return Err(FetchError::NotInitialized);
        };
        let collection = &plan.params.collection;
        let reverse = plan.params.reverse;
        let scope = scope.or_timeout(plan.params.config.scan_timeout);
        let spans = if spans.is_empty() {
            vec![Span::prefix(&collection_prefix(collection.id))]
        } else {
            merge_spans(spans, reverse)
        };
        debug!(
            collection = %collection.name,
            txn = txn.id(),
            spans = spans.len(),
            reverse,
            "Starting document fetch"
        );
        self.release_scan();
        self.spans = spans.into();
        self.txn = Some(txn);
        self.scope = scope;
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    fn fetch_next(&mut self) -> Result<(Option<&EncodedDocument>, ExecInfo)> {
        self.lifecycle.check_started()?;
        let mut info = ExecInfo::default();
        let found = match self.next_match(&mut info) {
            Ok(found) => found,
            Err(err) => {
                self.release_scan();
                return Err(err);
            },
        };
        Ok((if found { self.doc.as_ref() } else { None }, info))
    }

    fn close(&mut self) -> Result<()> {
        self.release_scan();
        self.txn = None;
        self.lifecycle = Lifecycle::Closed;
        Ok(())
    }
}
