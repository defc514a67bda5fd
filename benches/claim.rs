use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use lockstep::lock::{LockConfig, LockManager};
use lockstep::queue::{ClaimOutcome, LeaseQueue, NewJob, QueueConfig};
use lockstep::RuntimeLayout;
use serde_json::json;
use tempfile::tempdir;

const BATCH: usize = 100;

fn bench_claim_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.bench_function("claim_complete_100", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let dir = tempdir().expect("tempdir");
                let queue = LeaseQueue::open(
                    &RuntimeLayout::new(dir.path()),
                    "bench",
                    "run",
                    LockManager::new(LockConfig::default()),
                )
                .expect("open");
                queue.init(QueueConfig::default()).expect("init");
                let jobs = (0..BATCH)
                    .map(|i| NewJob::new("s", "exec", json!({ "n": i })))
                    .collect();
                queue.enqueue(jobs).expect("enqueue");

                let start = Instant::now();
                while let ClaimOutcome::Claimed(job) = queue.claim("bench", &[]).expect("claim") {
                    queue
                        .complete("bench", &job.job_id, json!(null))
                        .expect("complete");
                }
                total += start.elapsed();
            }
            total
        })
    });
    group.finish();
}

criterion_group!(benches, bench_claim_complete);
criterion_main!(benches);
