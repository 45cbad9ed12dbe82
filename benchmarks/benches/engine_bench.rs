//! Criterion benchmarks for the rolling metrics engines and thread dispatch

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rollbench::engine::Backend;
use rollbench::pool::{Job, Strategy, WorkerPool};
use rollbench::utils::market_data::{self, MarketDataSpec};
use rollbench::Dataset;

fn dataset(rows_per_symbol: usize) -> Dataset {
    let spec = MarketDataSpec {
        rows_per_symbol,
        ..Default::default()
    };
    market_data::generate(&spec).expect("market data")
}

/// One partition, both backends, growing window
fn bench_engines(c: &mut Criterion) {
    let data = dataset(5_000);
    let columns = vec!["price".to_string()];
    let mut group = c.benchmark_group("engine_compute");
    group.throughput(Throughput::Elements(5_000));

    for window in [20usize, 250, 1000] {
        for backend in Backend::ALL {
            let engine = backend.engine();
            group.bench_with_input(BenchmarkId::new(backend.as_str(), window), &window, |b, &window| {
                b.iter(|| {
                    engine
                        .compute(black_box(&data), "AAPL", &columns, window)
                        .expect("compute")
                })
            });
        }
    }
    group.finish();
}

/// Every symbol on the rayon pool
fn bench_thread_dispatch(c: &mut Criterion) {
    let data = dataset(2_000);
    let keys = data.symbols();
    let columns = vec!["price".to_string()];
    let job = Job {
        dataset: &data,
        keys: &keys,
        columns: &columns,
        window: 100,
    };

    let mut group = c.benchmark_group("thread_dispatch");
    for workers in [1usize, 2, keys.len()] {
        let pool = WorkerPool::new(Strategy::Threads).with_workers(Some(workers));
        let engine = Backend::Streaming.engine();
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| pool.run(&job, engine.as_ref()).expect("run"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_engines, bench_thread_dispatch);
criterion_main!(benches);
