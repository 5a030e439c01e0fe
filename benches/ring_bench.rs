//! Benchmarks for ring lookups and rebuilds.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shard_ring::services::{RingConfig, ShardInfo, ShardRegistry, ShardedRing};
use std::sync::Arc;

fn shards(count: usize) -> Vec<ShardInfo<usize>> {
    (0..count)
        .map(|i| ShardInfo::named(format!("shard-{i}"), move || i))
        .collect()
}

fn bench_keys(count: usize) -> Vec<String> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..count)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            format!("user:{state:016x}")
        })
        .collect()
}

fn bench_lookup(c: &mut Criterion) {
    let keys = bench_keys(1024);

    let mut group = c.benchmark_group("ring_lookup");
    for &count in &[4usize, 16, 64] {
        let ring = ShardedRing::new(shards(count), RingConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("plain", count), &ring, |b, ring| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(ring.resource_for_key(&keys[i]).unwrap());
            });
        });

        let tagged =
            ShardedRing::new(shards(count), RingConfig::default().with_default_key_tag()).unwrap();
        group.bench_with_input(BenchmarkId::new("key_tag", count), &tagged, |b, ring| {
            b.iter(|| black_box(ring.resource_for_key("session{42}:token").unwrap()));
        });
    }
    group.finish();
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_rebuild");
    for &count in &[4usize, 16, 64] {
        let registry = Arc::new(ShardRegistry::with_shards(shards(count)));
        let ring = ShardedRing::with_registry(&registry, RingConfig::default());
        let extra: ShardInfo<usize> = ShardInfo::named("extra", || usize::MAX);

        group.bench_function(BenchmarkId::new("add_remove", count), |b| {
            b.iter(|| {
                registry.add_shard(extra.clone());
                registry.remove_shard(&extra);
            });
        });
        black_box(ring.version());
    }
    group.finish();
}

criterion_group!(benches, bench_lookup, bench_rebuild);
criterion_main!(benches);
