//! Insert and lookup against a `BTreeMap` baseline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cuckoo_trie::{Config, CuckooTrie};
use std::collections::BTreeMap;

fn generate_keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user:{:08}", i)).collect()
}

fn new_trie(size: usize) -> CuckooTrie {
    CuckooTrie::with_config(Config::with_capacity(size * 4)).unwrap()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [1_000, 10_000, 100_000] {
        let keys = generate_keys(size);

        group.bench_with_input(BenchmarkId::new("BTreeMap", size), &size, |b, _| {
            b.iter(|| {
                let mut map: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
                for (i, key) in keys.iter().enumerate() {
                    map.insert(key.as_bytes().to_vec(), i.to_le_bytes().to_vec());
                }
                black_box(map)
            });
        });

        group.bench_with_input(BenchmarkId::new("CuckooTrie", size), &size, |b, &size| {
            b.iter(|| {
                let trie = new_trie(size);
                for (i, key) in keys.iter().enumerate() {
                    trie.insert(key.as_bytes(), &i.to_le_bytes()).unwrap();
                }
                black_box(trie)
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for size in [1_000, 10_000, 100_000] {
        let keys = generate_keys(size);

        let mut btree: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let trie = new_trie(size);
        for (i, key) in keys.iter().enumerate() {
            btree.insert(key.as_bytes().to_vec(), i.to_le_bytes().to_vec());
            trie.insert(key.as_bytes(), &i.to_le_bytes()).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("BTreeMap", size), &size, |b, _| {
            b.iter(|| {
                for key in &keys {
                    black_box(btree.get(key.as_bytes()));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("CuckooTrie", size), &size, |b, _| {
            b.iter(|| {
                for key in &keys {
                    black_box(trie.lookup_with(key.as_bytes(), |v| v.len()).unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
