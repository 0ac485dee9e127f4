//! Concurrent access to the job queue.
//!
//! The in-memory queue runs everywhere; the PostgreSQL variants need a
//! server and run with `DATABASE_URL` set and `cargo test -- --ignored`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use futures::future::join_all;
use photochanger_core::types::Timestamp;
use photochanger_db::models::job::Job;
use photochanger_pipeline::{JobQueue, MemoryJobQueue, PgJobQueue, QueueError};
use sqlx::PgPool;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn pending(created: Timestamp) -> Job {
    Job::new_pending("slot-001", None, created, created + Duration::seconds(48))
}

async fn claim_concurrently(queue: Arc<dyn JobQueue>, workers: usize) -> Vec<Job> {
    let tasks = (0..workers).map(|_| {
        let queue = queue.clone();
        tokio::spawn(async move { queue.acquire_for_processing(t0()).await })
    });
    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| joined.unwrap().unwrap())
        .collect()
}

async fn enqueue_concurrently(queue: Arc<dyn JobQueue>, jobs: usize) -> (usize, usize) {
    let tasks = (0..jobs).map(|_| {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(pending(t0())).await })
    });
    let mut accepted = 0;
    let mut busy = 0;
    for joined in join_all(tasks).await {
        match joined.unwrap() {
            Ok(_) => accepted += 1,
            Err(QueueError::Busy { .. }) => busy += 1,
            Err(e) => panic!("unexpected enqueue error: {e}"),
        }
    }
    (accepted, busy)
}

// ---------------------------------------------------------------------------
// In-memory queue
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_job_is_claimed_by_exactly_one_worker() {
    let queue = Arc::new(MemoryJobQueue::new(10));
    let job = queue.enqueue(pending(t0())).await.unwrap();

    let claimed = claim_concurrently(queue, 16).await;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, job.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_is_claimed_once() {
    let queue = Arc::new(MemoryJobQueue::new(10));
    for i in 0..5 {
        queue
            .enqueue(pending(t0() + Duration::milliseconds(i)))
            .await
            .unwrap();
    }

    let claimed = claim_concurrently(queue, 12).await;
    let ids: HashSet<_> = claimed.iter().map(|job| job.id).collect();
    assert_eq!(claimed.len(), 5);
    assert_eq!(ids.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueue_respects_capacity() {
    let queue = Arc::new(MemoryJobQueue::new(3));

    let (accepted, busy) = enqueue_concurrently(queue.clone(), 10).await;
    assert_eq!(accepted, 3);
    assert_eq!(busy, 7);
    assert_eq!(queue.in_flight(t0()).await.unwrap(), 3);
}

// ---------------------------------------------------------------------------
// PostgreSQL queue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn pg_claim_is_exclusive(pool: PgPool) {
    let queue = Arc::new(PgJobQueue::new(pool, 10));
    let job = queue.enqueue(pending(t0())).await.unwrap();

    let claimed = claim_concurrently(queue, 8).await;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, job.id);
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn pg_admission_is_atomic(pool: PgPool) {
    let queue = Arc::new(PgJobQueue::new(pool, 2));

    let (accepted, busy) = enqueue_concurrently(queue.clone(), 6).await;
    assert_eq!(accepted, 2);
    assert_eq!(busy, 4);
    assert_eq!(queue.in_flight(t0()).await.unwrap(), 2);
}
