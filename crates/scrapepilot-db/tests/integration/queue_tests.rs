use std::time::Duration;

use chrono::{TimeDelta, Utc};
use scrapepilot_core::job_queue::JobQueue;
use scrapepilot_core::traits::Storage;

use crate::integration::common::{seed_job, seed_user, setup_test_db};

#[tokio::test]
async fn claim_increments_attempt_and_locks_entry() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;

    db.queue().enqueue(job.id, 3).await.unwrap();
    // Enqueueing twice keeps a single entry.
    db.queue().enqueue(job.id, 3).await.unwrap();
    assert_eq!(db.queue().depth().await.unwrap(), 1);

    let entry = db.queue().claim("worker-1").await.unwrap().unwrap();
    assert_eq!(entry.job_id, job.id);
    assert_eq!(entry.attempt, 1);
    assert_eq!(entry.max_attempts, 3);
    assert_eq!(entry.claimed_by.as_deref(), Some("worker-1"));
    assert!(!entry.is_last_attempt());

    assert!(db.queue().claim("worker-2").await.unwrap().is_none());
}

#[tokio::test]
async fn claim_empty_queue_returns_none() {
    let (db, _container) = setup_test_db().await;
    assert!(db.queue().claim("worker-1").await.unwrap().is_none());
    assert_eq!(db.queue().depth().await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_claims_never_share_an_entry() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    for _ in 0..5 {
        let job = seed_job(&db, owner).await;
        db.queue().enqueue(job.id, 3).await.unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..8 {
        let queue = db.queue().clone();
        handles.push(tokio::spawn(async move {
            queue.claim(&format!("worker-{n}")).await.unwrap()
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(entry) = handle.await.unwrap() {
            claimed.push(entry.job_id);
        }
    }
    claimed.sort();
    let before = claimed.len();
    claimed.dedup();
    assert_eq!(before, claimed.len());
    assert_eq!(claimed.len(), 5);
}

#[tokio::test]
async fn retry_hides_entry_until_available() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;
    db.queue().enqueue(job.id, 3).await.unwrap();
    db.queue().claim("worker-1").await.unwrap().unwrap();

    db.queue()
        .retry(job.id, Utc::now() + TimeDelta::hours(1))
        .await
        .unwrap();
    assert!(db.queue().claim("worker-1").await.unwrap().is_none());

    db.queue()
        .retry(job.id, Utc::now() - TimeDelta::seconds(1))
        .await
        .unwrap();
    let entry = db.queue().claim("worker-2").await.unwrap().unwrap();
    assert_eq!(entry.attempt, 2);
}

#[tokio::test]
async fn ack_removes_entry() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;
    db.queue().enqueue(job.id, 3).await.unwrap();
    db.queue().claim("worker-1").await.unwrap().unwrap();

    db.queue().ack(job.id).await.unwrap();
    assert_eq!(db.queue().depth().await.unwrap(), 0);
    assert!(db.queue().get(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn release_worker_keeps_attempt_budget() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let a = seed_job(&db, owner).await;
    let b = seed_job(&db, owner).await;
    db.queue().enqueue(a.id, 3).await.unwrap();
    db.queue().enqueue(b.id, 3).await.unwrap();
    db.queue().claim("worker-1").await.unwrap().unwrap();
    db.queue().claim("worker-1").await.unwrap().unwrap();

    let released = db.queue().release_worker("worker-1").await.unwrap();
    assert_eq!(released, 2);
    assert_eq!(db.queue().release_worker("worker-1").await.unwrap(), 0);

    let entry = db.queue().get(a.id).await.unwrap().unwrap();
    assert_eq!(entry.attempt, 0);
    assert!(entry.claimed_by.is_none());

    let again = db.queue().claim("worker-2").await.unwrap().unwrap();
    assert_eq!(again.attempt, 1);
}

#[tokio::test]
async fn abandoned_claim_is_redelivered() {
    let (db, _container) = setup_test_db().await;
    let db = db.with_visibility_timeout(Duration::from_millis(200));
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;
    db.queue().enqueue(job.id, 3).await.unwrap();

    db.queue().claim("crashed-worker").await.unwrap().unwrap();
    assert!(db.queue().claim("worker-2").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let entry = db.queue().claim("worker-2").await.unwrap().unwrap();
    assert_eq!(entry.job_id, job.id);
    assert_eq!(entry.attempt, 2);
    assert_eq!(entry.claimed_by.as_deref(), Some("worker-2"));
}

#[tokio::test]
async fn deleting_job_drops_queue_entry() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;
    db.queue().enqueue(job.id, 3).await.unwrap();

    sqlx::query("DELETE FROM scrape_jobs WHERE id = $1")
        .bind(job.id)
        .execute(db.pool())
        .await
        .unwrap();
    assert_eq!(db.queue().depth().await.unwrap(), 0);
}
