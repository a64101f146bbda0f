//! Fetch path benchmarks.
//!
//! Compares an equality lookup answered from a unique index with the same
//! lookup answered by a filtered full document scan, and measures version
//! replay cost as a document's history grows.

#![allow(clippy::expect_used, missing_docs)]

use std::{hint::black_box, time::Duration};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use docshard_fetcher::{
    DocumentFetcher, ExecScope, FetchParams, Fetcher, Filter, IndexFetcher, VersionedFetcher,
};
use docshard_store::{Span, keys::document_prefix};
use docshard_test_utils::{TestDatabase, users_collection};
use docshard_types::FieldValue;

// =============================================================================
// Helpers
// =============================================================================

fn populate(count: usize) -> TestDatabase {
    let mut db = TestDatabase::new(users_collection());
    for i in 0..count {
        db.create(
            &format!("bae-{i:08}"),
            &[("name", format!("user-{i:08}").into()), ("age", FieldValue::Int((i % 90) as i64))],
        )
        .expect("create document");
    }
    db
}

fn drain(fetcher: &mut impl Fetcher) -> usize {
    let mut count = 0;
    while fetcher.fetch_next().expect("fetch").0.is_some() {
        count += 1;
    }
    count
}

// =============================================================================
// Index vs Scan
// =============================================================================

fn bench_eq_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch/eq_lookup");
    group.throughput(Throughput::Elements(1));

    for count in [100, 1_000] {
        let db = populate(count);
        let collection = db.collection();
        let target = format!("user-{:08}", count / 2);
        let filter =
            Filter::new().on(&collection, "name", "_eq", target.as_str()).expect("filter");
        let params = FetchParams::builder().collection(collection).filter(filter).build();

        group.bench_with_input(BenchmarkId::new("index", count), &params, |b, params| {
            let mut fetcher = IndexFetcher::new(1);
            fetcher.init(params.clone()).expect("init");
            b.iter(|| {
                fetcher.start(db.txn(), Vec::new(), ExecScope::background()).expect("start");
                black_box(drain(&mut fetcher))
            });
        });

        group.bench_with_input(BenchmarkId::new("scan", count), &params, |b, params| {
            let mut fetcher = DocumentFetcher::new();
            fetcher.init(params.clone()).expect("init");
            b.iter(|| {
                fetcher.start(db.txn(), Vec::new(), ExecScope::background()).expect("start");
                black_box(drain(&mut fetcher))
            });
        });
    }

    group.finish();
}

// =============================================================================
// Version Replay
// =============================================================================

fn bench_version_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch/version_replay");

    for depth in [10u64, 100] {
        let mut db = TestDatabase::new(users_collection());
        let mut head = db.create("bae-1", &[("name", "Alice".into())]).expect("create");
        for age in 0..depth {
            head = db.update("bae-1", &[("age", FieldValue::Int(age as i64))]).expect("update");
        }
        let span = Span::for_version(document_prefix(db.collection().id, "bae-1"), head);
        let params = FetchParams::builder().collection(db.collection()).build();

        group.throughput(Throughput::Elements(depth + 1));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &span, |b, span| {
            b.iter(|| {
                let mut fetcher = VersionedFetcher::new();
                fetcher.init(params.clone()).expect("init");
                fetcher
                    .start(db.txn(), vec![span.clone()], ExecScope::background())
                    .expect("start");
                black_box(drain(&mut fetcher))
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = fetch_benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5))
        .sample_size(50);
    targets = bench_eq_lookup, bench_version_replay
}

criterion_main!(fetch_benches);
