use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use sailrace::{
    core::store::EntityStore,
    engine::MutationEngine,
    model::{Lap, Participant, Racer},
    types::{EntityKind, EntityRef},
};

fn participant(i: u64) -> Participant {
    Participant {
        key: format!("P{i}"),
        sail_number: format!("GBR {i}"),
        helm: "helm".to_string(),
        boat_class: "ILCA 7".to_string(),
    }
}

fn racer(i: u64, participant: u64) -> Racer {
    Racer {
        key: format!("X{i}"),
        participant: format!("P{participant}"),
        laps: vec![Lap { elapsed: 300 + i % 60 }],
    }
}

fn seeded(participants: u64, racers: u64) -> EntityStore {
    let engine = MutationEngine::default();
    let mut store = EntityStore::new();
    engine
        .upsert_records(&mut store, (0..participants).map(participant).collect())
        .expect("participants");
    let all: Vec<Racer> = (0..racers).map(|i| racer(i, i % participants)).collect();
    for chunk in all.chunks(1_000) {
        engine
            .upsert_records(&mut store, chunk.to_vec())
            .expect("racers");
    }
    store
}

fn bench_single_item_batches(c: &mut Criterion) {
    c.bench_function("racer_upsert_10k_single", |b| {
        b.iter(|| {
            let engine = MutationEngine::default();
            let mut store = seeded(100, 0);
            for i in 0..10_000u64 {
                engine
                    .upsert_records(&mut store, vec![racer(i, i % 100)])
                    .expect("upsert");
            }
        });
    });
}

fn bench_batch_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("racer_upsert_batch");
    for n in [10u64, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let engine = MutationEngine::default();
                let mut store = seeded(10, 0);
                let batch = (0..n).map(|i| racer(i, i % 10)).collect();
                engine.upsert_records(&mut store, batch).expect("batch");
            });
        });
    }
    group.finish();
}

fn bench_dependent_checks(c: &mut Criterion) {
    let store = seeded(50, 20_000);
    c.bench_function("referenced_by_participant", |b| {
        b.iter(|| store.referenced_by(EntityKind::Participant, "P7").len());
    });

    c.bench_function("rejected_participant_delete", |b| {
        let engine = MutationEngine::default();
        let mut store = seeded(50, 20_000);
        b.iter(|| {
            let err = engine
                .delete(&mut store, vec![EntityRef::participant("P7")])
                .expect_err("has racers");
            err.violations().len()
        });
    });
}

criterion_group!(
    benches,
    bench_single_item_batches,
    bench_batch_sizes,
    bench_dependent_checks
);
criterion_main!(benches);
