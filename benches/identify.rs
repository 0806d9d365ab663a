use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use contactlink::{
    IdentityResolver, InMemoryContactStore, ResolverRequest, ResolverRuntime,
    ResolverRuntimeConfig,
};

/// 256 clusters of four records each (one email, four phone numbers).
fn seeded_resolver() -> IdentityResolver {
    let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
    for cluster in 0..256u32 {
        let email = format!("user{cluster}@bench.io");
        for n in 0..4u32 {
            let phone = format!("{}", cluster * 10 + n);
            resolver
                .identify(Some(email.as_str()), Some(phone.as_str()))
                .unwrap();
        }
    }
    resolver
}

fn bench_exact_match(c: &mut Criterion) {
    let resolver = seeded_resolver();
    c.bench_function("identify/exact_match", |b| {
        b.iter(|| resolver.identify(Some("user128@bench.io"), Some("1282")).unwrap());
    });
}

fn bench_new_secondary(c: &mut Criterion) {
    let mut group = c.benchmark_group("identify/write");
    group.throughput(Throughput::Elements(1));

    group.bench_function("new_secondary", |b| {
        b.iter_custom(|iters| {
            // Fresh store per sample so clusters do not grow across samples.
            let resolver = seeded_resolver();
            let phones: Vec<String> = (0..iters).map(|i| format!("9{i}")).collect();

            let start = Instant::now();
            for phone in &phones {
                resolver
                    .identify(Some("user7@bench.io"), Some(phone.as_str()))
                    .unwrap();
            }
            start.elapsed()
        });
    });

    group.bench_function("merge_two_primaries", |b| {
        b.iter_custom(|iters| {
            let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
            let pairs: Vec<(String, String)> = (0..iters)
                .map(|i| {
                    let email = format!("m{i}@bench.io");
                    let phone = format!("7{i}");
                    resolver.identify(Some(email.as_str()), None).unwrap();
                    resolver.identify(None, Some(phone.as_str())).unwrap();
                    (email, phone)
                })
                .collect();

            let start = Instant::now();
            for (email, phone) in &pairs {
                resolver
                    .identify(Some(email.as_str()), Some(phone.as_str()))
                    .unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_runtime_round_trip(c: &mut Criterion) {
    c.bench_function("runtime/identify_round_trip", |b| {
        b.iter_custom(|iters| {
            let runtime = ResolverRuntime::new(
                seeded_resolver(),
                ResolverRuntimeConfig {
                    identify_workers: 1,
                    admin_workers: 1,
                    queue_capacity: 1024,
                },
            )
            .unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                runtime
                    .execute(ResolverRequest::Identify {
                        email: Some("user64@bench.io".to_string()),
                        phone_number: None,
                    })
                    .unwrap();
            }
            start.elapsed()
        });
    });
}

criterion_group!(
    identify,
    bench_exact_match,
    bench_new_secondary,
    bench_runtime_round_trip
);
criterion_main!(identify);
