//! Benchmarks for the island population store.

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

use evosearch::{
    PopulationStore,
    schema::{Candidate, Verdict},
};

const RESET_PERIOD: Duration = Duration::from_secs(4 * 60 * 60);

fn populated_store(num_islands: usize, per_island: usize) -> PopulationStore {
    let mut store = PopulationStore::new(num_islands, 2, RESET_PERIOD);
    for i in 0..num_islands * per_island {
        let candidate =
            Candidate::new(format!("program-{i}")).with_verdict(Verdict::valid((i % 97) as f64));
        store.register_solution(candidate, Some(i % num_islands));
    }
    store
}

fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_solution");

    for num_islands in [1, 10, 50] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_islands),
            &num_islands,
            |b, &n| {
                let mut store = PopulationStore::new(n, 2, RESET_PERIOD);
                let candidate = Candidate::new("x = 1").with_verdict(Verdict::valid(1.0));
                let mut island = 0;
                b.iter(|| {
                    island = (island + 1) % n;
                    store.register_solution(black_box(candidate.clone()), Some(island))
                });
            },
        );
    }

    group.finish();
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_prompt_solutions");

    for per_island in [10, 100, 1000] {
        let store = populated_store(10, per_island);
        let mut rng = StdRng::seed_from_u64(0);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("10x{}", per_island)),
            &per_island,
            |b, _| {
                b.iter(|| black_box(store.select_prompt_solutions(&mut rng)));
            },
        );
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let store = populated_store(10, 100);

    c.bench_function("snapshot_json_roundtrip", |b| {
        b.iter(|| {
            let json = store.to_json().unwrap();
            black_box(PopulationStore::from_json(&json).unwrap())
        });
    });
}

criterion_group!(benches, bench_register, bench_select, bench_snapshot);
criterion_main!(benches);
