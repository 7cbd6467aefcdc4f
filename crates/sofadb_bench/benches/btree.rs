//! B-tree benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sofadb_bench::doc_id;
use sofadb_core::block::BlockStore;
use sofadb_core::btree::{BTree, CountReducer, NodeCache, RootPointer, TreeBuilder};
use sofadb_storage::InMemoryBackend;
use std::sync::Arc;

fn tree(order: usize, cache: usize) -> BTree {
    let store = Arc::new(BlockStore::new(Box::new(InMemoryBackend::new())));
    BTree::new(store, Arc::new(NodeCache::new(cache)), Arc::new(CountReducer), order)
}

fn build(tree: &BTree, count: usize) -> Option<RootPointer> {
    let mut builder = TreeBuilder::new(tree.clone());
    for i in 0..count {
        builder.push(doc_id(i), i.to_le_bytes().to_vec()).unwrap();
    }
    builder.finish().unwrap()
}

/// Benchmark copy-on-write inserts for different node orders.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for order in [8, 32, 128].iter() {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(BenchmarkId::from_parameter(order), order, |b, &order| {
            b.iter(|| {
                let tree = tree(order, 1024);
                let mut root = None;
                for i in 0..1000 {
                    root = tree
                        .insert(root.as_ref(), &doc_id(i), black_box(b"value"))
                        .unwrap();
                }
                black_box(root)
            });
        });
    }
    group.finish();
}

/// Benchmark point lookups with and without the node cache.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_lookup");

    for cache in [0, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("cache", cache), cache, |b, &cache| {
            let tree = tree(32, cache);
            let root = build(&tree, 10_000);
            let mut i = 0;

            b.iter(|| {
                i = (i + 7919) % 10_000;
                black_box(tree.lookup(root.as_ref(), &doc_id(i)).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark bottom-up bulk loading.
fn bench_bulk_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_bulk_load");

    for count in [1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| black_box(build(&tree(32, 0), count)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_bulk_load);
criterion_main!(benches);
