//! Registry Benchmarks
//!
//! Measures the cost of queueing work before readiness, draining it, and
//! running work inline once the registry has completed.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use deferrals::prelude::*;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn manager() -> DeferralManager<SharedFactory> {
    let config = DeferralConfig::default()
        .with_worker_count(1)
        .with_fatal_policy(FatalPolicy::Report);
    DeferralManager::new(Arc::new(SharedFactory::new(&config)), config)
}

fn benchmark_queue_and_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("queue_and_drain");

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let manager = manager();
                    let registry = DeferredRegistration::new("bench");
                    let ctx = Context::new();

                    for i in 0..size {
                        if i % 2 == 0 {
                            registry
                                .add_registration_labeled("bench", &ctx, manager.host(), |_, _| async {
                                    Ok(())
                                })
                                .await
                                .unwrap();
                        } else {
                            registry
                                .add_func_labeled("bench", manager.host(), |host| {
                                    black_box(host);
                                })
                                .await;
                        }
                    }

                    manager
                        .manage_deferrals(&ctx, "bench", &registry, |_| async { true }, |_| async {
                            Ok(())
                        })
                        .await
                        .unwrap();
                })
            })
        });
    }

    group.finish();
}

fn benchmark_inline_after_completion(c: &mut Criterion) {
    let rt = runtime();
    let manager = manager();
    let registry = DeferredRegistration::new("bench-inline");
    let ctx = Context::new();
    rt.block_on(manager.initialize_factory(&ctx, &registry)).unwrap();

    c.bench_function("inline_registration", |b| {
        b.iter(|| {
            rt.block_on(registry.add_registration_labeled(
                "inline",
                &ctx,
                manager.host(),
                |_, _| async { Ok(()) },
            ))
            .unwrap()
        })
    });

    c.bench_function("inline_func", |b| {
        b.iter(|| {
            rt.block_on(registry.add_func_labeled("inline", manager.host(), |host| {
                black_box(host);
            }))
        })
    });
}

criterion_group!(
    benches,
    benchmark_queue_and_drain,
    benchmark_inline_after_completion
);
criterion_main!(benches);
