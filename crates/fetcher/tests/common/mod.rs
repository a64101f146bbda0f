//! Helpers shared by the fetcher integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use docshard_fetcher::{Document, ExecInfo, Fetcher};
use docshard_test_utils::{TestDatabase, users_collection};
use docshard_types::FieldValue;

/// Drains a started fetcher, returning every decoded document and the
/// summed execution counters.
pub fn drain(fetcher: &mut impl Fetcher) -> (Vec<Document>, ExecInfo) {
    let mut docs = Vec::new();
    let mut total = ExecInfo::default();
    loop {
        let (doc, info) = fetcher.fetch_next().unwrap();
        total += info;
        match doc {
            Some(doc) => docs.push(doc.decode().unwrap()),
            None => break,
        }
    }
    (docs, total)
}

/// Names of the documents, in yield order.
pub fn names(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .map(|d| match d.get("name") {
            Some(FieldValue::String(s)) => s.clone(),
            other => format!("{other:?}"),
        })
        .collect()
}

/// A users database holding `(doc_id, name, age)` rows.
pub fn users_db(rows: &[(&str, &str, i64)]) -> TestDatabase {
    let mut db = TestDatabase::new(users_collection());
    for (doc_id, name, age) in rows {
        db.create(doc_id, &[("name", (*name).into()), ("age", FieldValue::Int(*age))]).unwrap();
    }
    db
}
