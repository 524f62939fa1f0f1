use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use bulkpatch_core::{BatchOptions, Operation};
use bulkpatch_infra::jobs::submitter::chunk_operations;
use bulkpatch_infra::jobs::{BatchSubmitter, JobRepository, RetentionPolicy};
use bulkpatch_infra::store::InMemoryKvStore;
use serde_json::json;

fn operations(n: usize) -> Vec<Operation> {
    (0..n)
        .map(|i| Operation::single(format!("acct-{i}"), "region", json!("emea")))
        .collect()
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_operations");

    for batch_size in [10usize, 50, 100].iter() {
        group.throughput(Throughput::Elements(500));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter_batched(
                    || operations(500),
                    |ops| black_box(chunk_operations(ops, batch_size)),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_submission(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_and_persist");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    for count in [50usize, 200, 500].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let store = Arc::new(InMemoryKvStore::new());
                    let repo = Arc::new(JobRepository::new(store, RetentionPolicy::default()));
                    (BatchSubmitter::new(repo), operations(count))
                },
                |(submitter, ops)| {
                    rt.block_on(async {
                        black_box(submitter.submit(ops, BatchOptions::default()).await.unwrap())
                    })
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunking, bench_submission);
criterion_main!(benches);
