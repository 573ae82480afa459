//! Benchmarks for the hot synchronous paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagekeep::cache::{CacheEntry, EntryKind, WeightedCache};
use stagekeep::retry::RetryPolicy;

fn cache_benchmark(c: &mut Criterion) {
    c.bench_function("cache_put_get", |b| {
        let cache = WeightedCache::with_default_capacity();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let id = format!("entry-{}", n % 64);
            cache
                .put(
                    CacheEntry::new("benchmark payload", EntryKind::Definition)
                        .with_id(id.clone()),
                )
                .unwrap();
            black_box(cache.get(&id))
        })
    });
}

fn retry_delay_benchmark(c: &mut Criterion) {
    c.bench_function("retry_delay", |b| {
        let policy = RetryPolicy::default();
        b.iter(|| black_box(policy.delay_for_attempt(black_box(2))))
    });
}

criterion_group!(benches, cache_benchmark, retry_delay_benchmark);
criterion_main!(benches);
