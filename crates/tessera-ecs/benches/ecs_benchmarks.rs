//! Registry throughput benchmarks.
//!
//! Compares the three ways of walking `(Position, Velocity)`: a view over
//! sparse sets, the same view with an exclusion, and an owning group. Also
//! measures raw create/emplace/destroy churn.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Velocity {
    dx: f64,
    dy: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Sleeping;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `entity_count` entities with Position; every second one also moves and
/// every tenth one sleeps.
fn setup_registry(entity_count: usize) -> Registry {
    let mut registry = Registry::with_config(RegistryConfig {
        entity_capacity: entity_count,
        storage_capacity: entity_count,
        ..Default::default()
    });
    for i in 0..entity_count {
        let e = registry.create();
        registry
            .emplace(e, Position { x: i as f64, y: 0.0 })
            .unwrap();
        if i % 2 == 0 {
            registry.emplace(e, Velocity { dx: 1.0, dy: 0.5 }).unwrap();
        }
        if i % 10 == 0 {
            registry.emplace(e, Sleeping).unwrap();
        }
    }
    registry
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate_position_velocity");
    for &count in &[1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("view", count), &count, |b, &count| {
            let mut registry = setup_registry(count);
            b.iter(|| {
                registry
                    .view_mut::<(Position, Velocity)>()
                    .each(|_, (p, v): (&mut Position, &mut Velocity)| {
                        p.x += v.dx;
                        p.y += v.dy;
                    });
            });
        });

        group.bench_with_input(
            BenchmarkId::new("view_exclude", count),
            &count,
            |b, &count| {
                let mut registry = setup_registry(count);
                b.iter(|| {
                    registry
                        .view_mut::<(Position, Velocity)>()
                        .exclude::<(Sleeping,)>()
                        .each(|_, (p, v): (&mut Position, &mut Velocity)| {
                            p.x += v.dx;
                            p.y += v.dy;
                        });
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("group", count), &count, |b, &count| {
            let mut registry = setup_registry(count);
            registry.group::<(Position, Velocity), (), ()>().unwrap();
            b.iter(|| {
                registry
                    .group::<(Position, Velocity), (), ()>()
                    .unwrap()
                    .each_mut(|_, (p, v): (&mut Position, &mut Velocity), _: ()| {
                        p.x += v.dx;
                        p.y += v.dy;
                    });
            });
        });
    }
    group.finish();
}

fn bench_read_only_view(c: &mut Criterion) {
    let registry = setup_registry(10_000);
    c.bench_function("view_sum_10k", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            registry
                .view::<(Position, Velocity)>()
                .each(|_, (p, v)| sum += p.x * v.dx);
            black_box(sum)
        });
    });
}

fn bench_churn(c: &mut Criterion) {
    c.bench_function("create_emplace_destroy_1k", |b| {
        let mut registry = Registry::new();
        b.iter(|| {
            let entities: Vec<Entity> = (0..1_000)
                .map(|i| {
                    let e = registry.create();
                    registry
                        .emplace(e, Position { x: i as f64, y: 0.0 })
                        .unwrap();
                    e
                })
                .collect();
            for e in entities {
                registry.destroy(e).unwrap();
            }
        });
    });

    c.bench_function("group_maintenance_1k", |b| {
        let mut registry = setup_registry(1_000);
        registry.group::<(Position, Velocity), (), ()>().unwrap();
        let targets: Vec<Entity> = registry.view::<(Position,)>().iter().collect();
        b.iter(|| {
            for &e in &targets {
                registry
                    .emplace_or_replace(e, Velocity { dx: 0.0, dy: 0.0 })
                    .unwrap();
            }
            for &e in &targets {
                registry.remove::<Velocity>(black_box(e)).unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_iteration, bench_read_only_view, bench_churn);
criterion_main!(benches);
