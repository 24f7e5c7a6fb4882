use std::collections::HashSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use sqlexec::optimizer::{select_index, IndexDescriptor, TableStatistics};
use sqlexec::txn::{is_visible, CommitLog, IsolationLevel, Snapshot, TupleVersion, TxnStatus};
use sqlexec::types::{Filter, Row, Value};

/// Performance benchmarks for the two per-row hot paths: version visibility
/// checks and index selection.

fn bench_visibility(c: &mut Criterion) {
    let mut log = CommitLog::new();
    for xid in 2..1000u32 {
        log.set(xid, TxnStatus::Committed);
    }
    let xip: HashSet<u32> = (900..950).collect();
    let snapshot = Snapshot::new(900, 1000, xip, IsolationLevel::RepeatableRead);

    let mut versions = Vec::new();
    for xid in (2..1000u32).step_by(7) {
        let mut version = TupleVersion::new(
            Row::from_pairs([("id", Value::Integer(xid as i64))]),
            xid,
            0,
            xid as u64,
        );
        if xid % 3 == 0 {
            version.stamp(xid + 1, 0, true);
        }
        versions.push(version);
    }

    c.bench_function("visibility_walk", |b| {
        b.iter(|| {
            let mut visible = 0;
            for version in &versions {
                if is_visible(black_box(version), &snapshot, &log, None) {
                    visible += 1;
                }
            }
            visible
        })
    });
}

fn bench_index_selection(c: &mut Criterion) {
    let rows: Vec<Row> = (1..=10_000i64)
        .map(|i| {
            Row::from_pairs([
                ("id", Value::Integer(i)),
                ("name", Value::String(format!("u{}", i))),
                ("age", Value::Integer(i % 80)),
            ])
        })
        .collect();
    let stats = TableStatistics::collect(&rows, 10_000, 16);

    let mut group = c.benchmark_group("index_selection");
    for index_count in [2usize, 8, 32] {
        let indexes: Vec<IndexDescriptor> = (0..index_count)
            .map(|i| {
                IndexDescriptor::btree(
                    format!("idx_{:02}", i),
                    "t",
                    vec!["id".into(), "name".into()],
                )
                .with_cardinality(10_000)
            })
            .collect();
        let filters = vec![Filter::eq("id", Value::Integer(42))];
        let required = vec!["id".to_string(), "name".to_string()];

        group.bench_with_input(
            BenchmarkId::from_parameter(index_count),
            &indexes,
            |b, indexes| {
                b.iter(|| {
                    select_index(
                        Some(black_box(&stats)),
                        indexes,
                        black_box(&filters),
                        &required,
                    )
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_visibility, bench_index_selection);
criterion_main!(benches);
