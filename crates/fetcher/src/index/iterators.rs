//! Scan strategies over secondary index entries.
//!
//! A [`ScanPlan`] is derived once from the per-field conditions: the leading
//! field's operator picks the strategy, which reduces to a queue of probes
//! (point lookups or prefix scans). [`IndexIterator`] drains the probes
//! against one transaction and applies the residual matchers per entry.

use std::{collections::VecDeque, fmt, sync::Arc};

use docshard_store::{
    Datastore, IndexDataStoreKey, KvIterator, Query, ScanOrder, keys::table_prefix,
};
use docshard_types::{CollectionId, FieldValue, IndexDescription};
use snafu::ResultExt;

use crate::{
    error::{Result, StorageSnafu},
    fetcher::ExecInfo,
    filter::{Condition, FilterOp},
    matcher::{ValueMatcher, match_all},
    scope::ExecScope,
};

/// How an index is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Unique index, every field bound by `_eq`: one point lookup.
    EqSingle,
    /// Scan of the longest leading `_eq` prefix.
    EqPrefix,
    /// One lookup or prefix scan per `_in` value, concatenated.
    In,
    /// Full scan of the index with every matcher evaluated per entry.
    Scanning,
}

impl Strategy {
    /// Short name for diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EqSingle => "eq_single",
            Self::EqPrefix => "eq_prefix",
            Self::In => "in",
            Self::Scanning => "scanning",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Probe {
    Point(Vec<u8>),
    Prefix(Vec<u8>),
}

/// Strategy, probes and residual matchers for one index and filter.
#[derive(Debug, Clone)]
pub(crate) struct ScanPlan {
    pub(crate) strategy: Strategy,
    probes: Vec<Probe>,
    matchers: Vec<ValueMatcher>,
}

impl ScanPlan {
    /// Plans a scan of `index`. `conditions[i]` constrains index field `i`
    /// and must already be coerced to the field's kind.
    pub(crate) fn new(
        collection_id: CollectionId,
        index: &IndexDescription,
        conditions: &[Option<Condition>],
    ) -> Result<Self> {
        let mut matchers = conditions
            .iter()
            .map(|c| ValueMatcher::compile(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let leading = conditions.first().and_then(Option::as_ref);
        let plan = match leading.map(|c| (c.op, &c.value)) {
            Some((FilterOp::Eq, _)) => {
                let eq_values: Vec<FieldValue> = conditions
                    .iter()
                    .map_while(|c| match c {
                        Some(c) if c.op == FilterOp::Eq => Some(c.value.clone()),
                        _ => None,
                    })
                    .collect();
                let bound = eq_values.len();
                let full_key = bound == index.fields.len();
                let has_null = eq_values.iter().any(FieldValue::is_null);
                let key = IndexDataStoreKey::new(collection_id, index, eq_values).encode(index);
                for matcher in matchers.iter_mut().take(bound) {
                    *matcher = ValueMatcher::Any;
                }
                if index.unique && full_key && !has_null {
                    Self { strategy: Strategy::EqSingle, probes: vec![Probe::Point(key)], matchers }
                } else {
                    Self { strategy: Strategy::EqPrefix, probes: vec![Probe::Prefix(key)], matchers }
                }
            },
            Some((FilterOp::In, FieldValue::Array(values))) => {
                let tail = unique_key_tail(index, conditions);
                let probes = values
                    .iter()
                    .map(|value| match &tail {
                        Some(tail) if !value.is_null() => {
                            let mut key_values = Vec::with_capacity(tail.len() + 1);
                            key_values.push(value.clone());
                            key_values.extend(tail.iter().cloned());
                            Probe::Point(
                                IndexDataStoreKey::new(collection_id, index, key_values)
                                    .encode(index),
                            )
                        },
                        _ => Probe::Prefix(
                            IndexDataStoreKey::new(collection_id, index, vec![value.clone()])
                                .encode(index),
                        ),
                    })
                    .collect();
                if let Some(first) = matchers.first_mut() {
                    *first = ValueMatcher::Any;
                }
                Self { strategy: Strategy::In, probes, matchers }
            },
            _ => Self {
                strategy: Strategy::Scanning,
                probes: vec![Probe::Prefix(table_prefix(collection_id, index.id))],
                matchers,
            },
        };
        Ok(plan)
    }
}

/// Values of the index fields after the leading one when the index is unique
/// and each of them is bound by a non-null `_eq`, so that any leading value
/// completes a full key.
fn unique_key_tail(
    index: &IndexDescription,
    conditions: &[Option<Condition>],
) -> Option<Vec<FieldValue>> {
    if !index.unique {
        return None;
    }
    (1..index.fields.len())
        .map(|i| match conditions.get(i) {
            Some(Some(c)) if c.op == FilterOp::Eq && !c.value.is_null() => Some(c.value.clone()),
            _ => None,
        })
        .collect()
}

/// One index entry that survived the matchers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexEntry {
    pub(crate) values: Vec<FieldValue>,
    pub(crate) doc_id: String,
}

/// Drains a [`ScanPlan`] against one store.
pub(crate) struct IndexIterator {
    index: IndexDescription,
    matchers: Vec<ValueMatcher>,
    probes: VecDeque<Probe>,
    store: Arc<dyn Datastore>,
    order: ScanOrder,
    scope: ExecScope,
    check_interval: usize,
    since_check: usize,
    iter: Option<Box<dyn KvIterator>>,
}

impl IndexIterator {
    pub(crate) fn new(
        plan: &ScanPlan,
        index: IndexDescription,
        store: Arc<dyn Datastore>,
        order: ScanOrder,
        scope: ExecScope,
        check_interval: usize,
    ) -> Self {
        Self {
            index,
            matchers: plan.matchers.clone(),
            probes: plan.probes.iter().cloned().collect(),
            store,
            order,
            scope,
            check_interval: check_interval.max(1),
            since_check: 0,
            iter: None,
        }
    }

    /// Returns the next matching entry. Every entry read from the store is
    /// counted in `info.indexes_fetched`, matched or not.
    pub(crate) fn next(&mut self, info: &mut ExecInfo) -> Result<Option<IndexEntry>> {
        loop {
            let read = match self.iter.as_mut() {
                Some(iter) => match iter.next_entry() {
                    Ok(Some(entry)) => Some(entry),
                    Ok(None) => {
                        iter.close();
                        self.iter = None;
                        continue;
                    },
                    Err(source) => {
                        self.close();
                        return Err(source).context(StorageSnafu { operation: "iterate index" });
                    },
                },
                None => {
                    self.scope.check()?;
                    match self.probes.pop_front() {
                        None => return Ok(None),
                        Some(Probe::Point(key)) => self
                            .store
                            .get(&key)
                            .context(StorageSnafu { operation: "index get" })?
                            .map(|value| (key, value)),
                        Some(Probe::Prefix(prefix)) => {
                            let iter = self
                                .store
                                .query(Query::prefix(&prefix, self.order))
                                .context(StorageSnafu { operation: "index query" })?;
                            self.iter = Some(iter);
                            continue;
                        },
                    }
                },
            };
            let Some((key, value)) = read else {
                continue;
            };
            info.indexes_fetched += 1;
            self.since_check += 1;
            if self.since_check >= self.check_interval {
                self.since_check = 0;
                self.scope.check()?;
            }
            let entry = self.decode(&key, value)?;
            if match_all(&self.matchers, &entry.values)? {
                return Ok(Some(entry));
            }
        }
    }

    fn decode(&self, key: &[u8], value: Vec<u8>) -> Result<IndexEntry> {
        let decoded = IndexDataStoreKey::decode(key, &self.index)
            .context(StorageSnafu { operation: "decode index key" })?;
        let doc_id = match decoded.doc_id {
            Some(doc_id) => Ok(doc_id),
            None if !value.is_empty() => String::from_utf8(value).map_err(|e| {
                docshard_store::Error::KeyDecoding {
                    reason: format!("indexed document id is not UTF-8: {e}"),
                }
            }),
            None => Err(docshard_store::Error::KeyDecoding {
                reason: "index entry carries no document id".to_string(),
            }),
        }
        .context(StorageSnafu { operation: "decode index entry" })?;
        Ok(IndexEntry { values: decoded.values, doc_id })
    }

    /// Releases any open scan. Idempotent.
    pub(crate) fn close(&mut self) {
        if let Some(mut iter) = self.iter.take() {
            iter.close();
        }
        self.probes.clear();
    }
}
