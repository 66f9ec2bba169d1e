use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::Serialize;

use idempotency_core::idempotency::{fingerprint_bytes, request_fingerprint, MemoryStore, Workflow};
use idempotency_core::models::{lease_now, truncate_lease, Completion, Identity, Record};

#[derive(Serialize)]
struct ChargeRequest {
    merchant_id: String,
    amount_minor: i64,
    currency: String,
    description: String,
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    group.bench_function("request_fingerprint_json", |b| {
        let request = ChargeRequest {
            merchant_id: "merchant-1".to_string(),
            amount_minor: 12_345,
            currency: "USD".to_string(),
            description: "order #1001".to_string(),
        };
        b.iter(|| black_box(request_fingerprint(black_box(&request))))
    });

    for size in [64usize, 1024, 16 * 1024].iter() {
        group.bench_with_input(BenchmarkId::new("fingerprint_bytes", size), size, |b, &size| {
            let payload = vec![0xA5u8; size];
            b.iter(|| black_box(fingerprint_bytes(black_box(&payload))))
        });
    }

    group.finish();
}

fn benchmark_lease(c: &mut Criterion) {
    let mut group = c.benchmark_group("lease");

    group.bench_function("truncate_lease", |b| {
        let now = Utc::now();
        b.iter(|| black_box(truncate_lease(black_box(now))))
    });

    group.bench_function("reservation_validate", |b| {
        let now = lease_now();
        let record = Record::reservation(
            Identity::new("merchant-1", "/payments.v1.Payments/Charge", "key-1"),
            "hash",
            now,
            now + Duration::hours(24),
        );
        b.iter(|| black_box(record.validate_for_reserve()))
    });

    group.finish();
}

fn benchmark_memory_workflow(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");
    let mut group = c.benchmark_group("memory_workflow");

    group.bench_function("begin_finish", |b| {
        let workflow = Workflow::new(MemoryStore::new());
        let mut n: u64 = 0;
        b.to_async(&runtime).iter(|| {
            n += 1;
            let identity = Identity::new("merchant-1", "/payments.v1.Payments/Charge", format!("key-{n}"));
            let workflow = &workflow;
            async move {
                let decision = workflow
                    .begin(&identity, "hash", lease_now() + Duration::hours(1))
                    .await
                    .expect("begin failed");
                let applied = workflow
                    .finish(decision.record(), Completion::succeeded(200, vec![]))
                    .await
                    .expect("finish failed");
                black_box(applied)
            }
        });
        black_box(workflow.store().is_empty());
    });

    group.finish();
}

criterion_group!(benches, benchmark_fingerprint, benchmark_lease, benchmark_memory_workflow);
criterion_main!(benches);
