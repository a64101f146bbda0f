//! Half-open key ranges describing sub-scans.

use docshard_types::CommitId;

use crate::keys::prefix_end;

/// A `[start, end)` byte-key range. An empty `end` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    /// Inclusive lower bound.
    pub start: Vec<u8>,
    /// Exclusive upper bound, or empty for unbounded.
    pub end: Vec<u8>,
}

impl Span {
    /// Creates a span from explicit bounds.
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self { start: start.into(), end: end.into() }
    }

    /// The span covering every key that starts with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        Self { start: prefix.to_vec(), end: prefix_end(prefix) }
    }

    /// A version span: `start` is a document prefix and `end` carries the
    /// target commit identifier instead of a key bound.
    pub fn for_version(doc_prefix: Vec<u8>, commit: CommitId) -> Self {
        Self { start: doc_prefix, end: commit.as_bytes().to_vec() }
    }

    /// Returns true if the upper bound is open.
    pub fn is_unbounded(&self) -> bool {
        self.end.is_empty()
    }

    /// Returns true if `key` falls inside the span.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && (self.is_unbounded() || key < self.end.as_slice())
    }

    fn ends_before(&self, start: &[u8]) -> bool {
        !self.is_unbounded() && self.end.as_slice() < start
    }
}

/// Sorts spans by start key and merges overlapping or touching ranges.
///
/// The result is returned in scan order: ascending, or descending by start
/// key when `reverse` is set.
pub fn merge_spans(mut spans: Vec<Span>, reverse: bool) -> Vec<Span> {
    spans.sort_by(|a, b| a.start.cmp(&b.start));
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if !last.ends_before(&span.start) => {
                if last.is_unbounded() || span.is_unbounded() {
                    last.end.clear();
                } else if span.end > last.end {
                    last.end = span.end;
                }
            },
            _ => merged.push(span),
        }
    }
    if reverse {
        merged.reverse();
    }
    merged
}
