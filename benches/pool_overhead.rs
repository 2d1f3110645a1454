//! Benchmarks for pool scheduling overhead
//!
//! Measures the cost of driving trivial actions through parallel and series
//! pools, so the numbers are dominated by the scheduler rather than the work.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tandem_core::config::Config;
use tandem_exec::{Action, Scheduler};

fn scheduler() -> Scheduler {
    let mut config = Config::default();
    config.workers.max_threads = 4;
    Scheduler::new(&config).expect("scheduler")
}

fn trivial_actions(n: usize) -> Vec<Action<usize>> {
    (0..n)
        .map(|i| Action::from_fn(format!("task-{i}"), move |_ctx| Ok(black_box(i))))
        .collect()
}

fn bench_pool_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_overhead");
    let scheduler = scheduler();

    for size in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("parallel", size), &size, |b, &n| {
            b.iter(|| {
                let pool = scheduler.parallel(trivial_actions(n)).unwrap();
                black_box(pool.wait().unwrap())
            });
        });

        group.bench_with_input(BenchmarkId::new("series", size), &size, |b, &n| {
            b.iter(|| {
                let pool = scheduler.series(trivial_actions(n)).unwrap();
                black_box(pool.wait().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_standalone_action(c: &mut Criterion) {
    let scheduler = scheduler();
    let action = Action::from_fn("standalone", |_ctx| Ok(black_box(42u64)));

    c.bench_function("standalone_action/execute_wait", |b| {
        b.iter(|| {
            action.execute(&scheduler).unwrap();
            black_box(action.wait())
        });
    });
}

criterion_group!(benches, bench_pool_modes, bench_standalone_action);
criterion_main!(benches);
