//! Compaction benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use sofadb_bench::{doc_id, random_data};
use sofadb_core::{CancellationToken, CompactionConfig, Compactor, Config, Database};

/// Benchmark compacting a file where every document has several stale revisions.
fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");
    group.sample_size(10);

    for doc_count in [1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*doc_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(doc_count),
            doc_count,
            |b, &count| {
                let dir = tempfile::tempdir().unwrap();
                let source = dir.path().join("source.sofa");
                let db = Database::open_with_config(&source, Config::default().sync_on_commit(false))
                    .unwrap();
                let data = random_data(256);
                for _ in 0..3 {
                    for i in 0..count {
                        db.put(&doc_id(i), b"", &data).unwrap();
                    }
                    db.commit().unwrap();
                }
                for i in (0..count).step_by(10) {
                    db.delete(&doc_id(i)).unwrap();
                }
                db.commit().unwrap();
                let snapshot = db.snapshot().unwrap();
                let target = dir.path().join("target.sofa");

                b.iter_batched(
                    || Compactor::new(CompactionConfig::purge_all()),
                    |compactor| {
                        compactor
                            .compact(&snapshot, &target, &CancellationToken::new())
                            .unwrap()
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_compact);
criterion_main!(benches);
