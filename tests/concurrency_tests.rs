//! Claim-protocol tests under concurrent load: no job is ever handed to two
//! workers, ordering guarantees hold, and versions only move forward.

use chrono::Utc;
use conveyor::{JobPriority, JobSpec, JobState, JobStore, RetryPolicy};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinSet;

fn open_store(dir: &TempDir) -> Arc<JobStore> {
    Arc::new(JobStore::open(dir.path().join("jobs.db")).unwrap())
}

fn pending(command: &str) -> conveyor::Job {
    JobSpec::new(command).build(3, Duration::from_secs(30), Utc::now())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_double_claim_across_workers() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let total = 40;
    for i in 0..total {
        store.insert(&pending(&format!("job {i}"))).unwrap();
    }

    let mut tasks = JoinSet::new();
    for worker in 0..8 {
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let worker_id = format!("w{worker}");
            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next(&worker_id).unwrap() {
                assert_eq!(job.worker_id.as_deref(), Some(worker_id.as_str()));
                claimed.push(job.id);
                tokio::task::yield_now().await;
            }
            claimed
        });
    }

    let mut all: Vec<String> = Vec::new();
    while let Some(result) = tasks.join_next().await {
        all.extend(result.unwrap());
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), total, "every job claimed exactly once");
    assert_eq!(unique.len(), total, "no job claimed by two workers");
    assert_eq!(store.count_by_state(JobState::Processing), total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_claims_on_single_job() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.insert(&pending("solo")).unwrap();

    let mut tasks = JoinSet::new();
    for worker in 0..16 {
        let store = Arc::clone(&store);
        tasks.spawn(async move { store.claim_next(&format!("w{worker}")).unwrap() });
    }

    let mut winners = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one worker wins the claim race");
}

#[test]
fn test_priority_overtakes_age() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let now = Utc::now();

    let low = JobSpec::new("low")
        .with_priority(JobPriority::Low)
        .build(3, Duration::from_secs(30), now);
    let critical = JobSpec::new("critical")
        .with_priority(JobPriority::Critical)
        .build(3, Duration::from_secs(30), now + chrono::Duration::milliseconds(1));
    store.insert(&low).unwrap();
    store.insert(&critical).unwrap();

    let first = store.claim_next("w").unwrap().unwrap();
    assert_eq!(first.id, critical.id);
    let second = store.claim_next("w").unwrap().unwrap();
    assert_eq!(second.id, low.id);
}

#[test]
fn test_fifo_within_priority() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let now = Utc::now();

    for i in 0..5 {
        let job = JobSpec::new(format!("job {i}")).build(
            3,
            Duration::from_secs(30),
            now + chrono::Duration::milliseconds(i),
        );
        store.insert(&job).unwrap();
    }

    for i in 0..5 {
        let job = store.claim_next("w").unwrap().unwrap();
        assert_eq!(job.command, format!("job {i}"));
    }
}

#[test]
fn test_backoff_gates_next_claim() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let policy = RetryPolicy::new(Duration::from_millis(150), Duration::from_secs(60), 0.0);

    let job = pending("flaky");
    store.insert(&job).unwrap();
    store.claim_next("w").unwrap().unwrap();
    let retried = store
        .fail_attempt(&job.id, &policy, 1, "boom")
        .unwrap()
        .unwrap();
    let run_at = retried.run_at.unwrap();

    // Not claimable before run_at.
    assert!(store.claim_next("w").unwrap().is_none());

    std::thread::sleep(Duration::from_millis(350));
    let reclaimed = store.claim_next("w").unwrap().unwrap();
    assert_eq!(reclaimed.id, job.id);
    assert!(Utc::now() >= run_at);
}

#[test]
fn test_version_strictly_increases_through_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_secs(1), 0.0);

    let job = JobSpec::new("flaky")
        .with_max_retries(1)
        .build(3, Duration::from_secs(30), Utc::now());
    store.insert(&job).unwrap();

    let mut versions = vec![store.require(&job.id).unwrap().version];

    store.claim_next("w").unwrap().unwrap();
    versions.push(store.require(&job.id).unwrap().version);

    store.fail_attempt(&job.id, &policy, 1, "boom").unwrap();
    versions.push(store.require(&job.id).unwrap().version);

    std::thread::sleep(Duration::from_millis(10));
    store.claim_next("w").unwrap().unwrap();
    versions.push(store.require(&job.id).unwrap().version);

    store.fail_attempt(&job.id, &policy, 1, "boom").unwrap();
    versions.push(store.require(&job.id).unwrap().version);

    store.retry_from_dlq(&job.id, true, None).unwrap();
    versions.push(store.require(&job.id).unwrap().version);

    for pair in versions.windows(2) {
        assert!(pair[1] > pair[0], "versions must only move forward");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_interleaved_enqueue_and_claim() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let producer_store = Arc::clone(&store);
    let producer = tokio::spawn(async move {
        for i in 0..30 {
            producer_store
                .insert(&pending(&format!("job {i}")))
                .unwrap();
            tokio::task::yield_now().await;
        }
    });

    let mut tasks = JoinSet::new();
    for worker in 0..4 {
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let worker_id = format!("w{worker}");
            let mut claimed = Vec::new();
            for _ in 0..200 {
                if let Some(job) = store.claim_next(&worker_id).unwrap() {
                    claimed.push(job.id);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            claimed
        });
    }

    producer.await.unwrap();
    let mut all = Vec::new();
    while let Some(result) = tasks.join_next().await {
        all.extend(result.unwrap());
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 30);
    assert_eq!(unique.len(), 30);
}
