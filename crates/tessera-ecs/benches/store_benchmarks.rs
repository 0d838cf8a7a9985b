//! Store performance benchmarks.
//!
//! Three hot paths: spawning entities with a few components, migration
//! churn (adding and removing a component, which moves rows between
//! archetypes), and linear query iteration over column slices.
//!
//! Run with: `cargo bench --bench store_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_ecs::prelude::*;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Position {
    x: f64,
    y: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Velocity {
    dx: f64,
    dy: f64,
}

fn setup(entity_count: usize) -> (EntityStore, Vec<EntityId>, NameId, NameId, NameId) {
    let mut store = EntityStore::new();
    let position = store.intern("position");
    let velocity = store.intern("velocity");
    let health = store.intern("health");
    let entities: Vec<EntityId> = (0..entity_count)
        .map(|i| {
            let e = store.new_entity().unwrap();
            store
                .set_component(
                    e,
                    position,
                    Position {
                        x: i as f64,
                        y: i as f64 * 2.0,
                    },
                )
                .unwrap();
            store
                .set_component(e, velocity, Velocity { dx: 1.0, dy: -1.0 })
                .unwrap();
            e
        })
        .collect();
    (store, entities, position, velocity, health)
}

fn bench_spawn_with_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_with_components");
    for count in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let (store, ..) = setup(count);
                black_box(store.entity_count())
            });
        });
    }
    group.finish();
}

fn bench_migration_churn(c: &mut Criterion) {
    c.bench_function("migration_churn_1k", |b| {
        let (mut store, entities, _, _, health) = setup(1_000);
        b.iter(|| {
            for &e in &entities {
                store.set_component(e, health, 100u64).unwrap();
            }
            for &e in &entities {
                store.remove_component(e, health).unwrap();
            }
        });
    });
}

fn bench_query_iteration(c: &mut Criterion) {
    c.bench_function("query_sum_10k", |b| {
        let (store, _, position, velocity, _) = setup(10_000);
        b.iter(|| {
            let mut sum = 0.0f64;
            for handle in store.query(QueryFilter::all([position, velocity])) {
                let positions = handle.column::<Position>(position).unwrap();
                let velocities = handle.column::<Velocity>(velocity).unwrap();
                for (p, v) in positions.iter().zip(velocities) {
                    sum += p.x * v.dx + p.y * v.dy;
                }
            }
            black_box(sum)
        });
    });
}

criterion_group!(
    benches,
    bench_spawn_with_components,
    bench_migration_churn,
    bench_query_iteration
);
criterion_main!(benches);
