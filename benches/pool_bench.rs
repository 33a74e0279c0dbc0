//! Pool throughput: routed updates and full restoration.
//!
//! Run with: cargo bench --bench pool_bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use countcraft::pool::{CounterPool, PoolConfig};

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/update");
    for &k in &[4usize, 8] {
        let cfg = PoolConfig::new(1 << 20, (1 << 20) / 8, k).unwrap();
        let mut pool: CounterPool<i64> = CounterPool::with_config(&cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let ids: Vec<usize> = (0..4096).map(|_| rng.gen_range(0..1 << 20)).collect();

        group.throughput(Throughput::Elements(ids.len() as u64));
        group.bench_function(format!("k{k}"), |b| {
            b.iter(|| {
                for &id in &ids {
                    pool.update(black_box(id), 1);
                }
            })
        });
    }
    group.finish();
}

fn bench_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/restore");
    group.sample_size(20);
    group.bench_function("n64k_k8", |b| {
        b.iter_batched(
            || {
                let cfg = PoolConfig::new(1 << 16, (1 << 16) / 8, 8).unwrap();
                let mut pool: CounterPool<i64> = CounterPool::with_config(&cfg).unwrap();
                let mut rng = StdRng::seed_from_u64(2);
                // skewed: a handful of elephants over uniform mice
                for _ in 0..64 {
                    let v = rng.gen_range(0..1 << 16);
                    for _ in 0..512 {
                        pool.update(v, 3);
                    }
                }
                for _ in 0..100_000 {
                    pool.update(rng.gen_range(0..1 << 16), 1);
                }
                pool
            },
            |mut pool| {
                pool.restore();
                black_box(pool.query(0))
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_update, bench_restore);
criterion_main!(benches);
