use chrono::{TimeDelta, Utc};
use scrapepilot_core::job::{JobCompletion, JobError, JobStatus, NewJob};
use scrapepilot_core::request::{BrowserAction, ScrapeConfig};
use scrapepilot_core::AppError;
use scrapepilot_core::traits::{AccountLedger, JobStore, Storage};
use uuid::Uuid;

use crate::integration::common::{seed_job, seed_user, setup_test_db};

#[tokio::test]
async fn create_job_and_verify_fields() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;

    let job = seed_job(&db, owner).await;

    assert_eq!(job.owner_id, owner);
    assert_eq!(job.url, "https://example.com");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);
    assert!(job.result_id.is_none());
    assert!(job.error.is_none());
    assert!(job.metrics.started_at.is_none());
    assert_eq!(job.metrics.credits_used, 0);
    assert_eq!(job.metrics.retries, 0);
}

#[tokio::test]
async fn config_survives_storage() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;

    let mut config = ScrapeConfig {
        timeout_ms: 12_000,
        screenshot: true,
        extract_prompt: Some("list the prices".into()),
        ..Default::default()
    };
    config.actions.push(BrowserAction::Click {
        selector: "#more".into(),
        wait_after: Some(250),
    });
    config.headers.insert("X-Trace".into(), "abc".into());

    let job = db
        .jobs()
        .create(NewJob {
            owner_id: owner,
            credential_id: Uuid::new_v4(),
            url: "https://example.com/shop".into(),
            config: config.clone(),
        })
        .await
        .unwrap();

    let loaded = db.jobs().get(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.config, config);
    assert_eq!(loaded, job);
}

#[tokio::test]
async fn lifecycle_to_completed() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;

    let started = Utc::now();
    assert!(db.jobs().mark_processing(job.id, started).await.unwrap());
    // Second claim of the same job loses.
    assert!(!db.jobs().mark_processing(job.id, started).await.unwrap());

    db.jobs().set_progress(job.id, 50).await.unwrap();
    let processing = db.jobs().get(job.id).await.unwrap().unwrap();
    assert_eq!(processing.status, JobStatus::Processing);
    assert_eq!(processing.progress, 50);
    assert!(processing.metrics.started_at.is_some());

    let result_id = Uuid::new_v4();
    let completed = db
        .jobs()
        .complete(
            job.id,
            JobCompletion {
                result_id,
                completed_at: Utc::now(),
                duration_ms: 1234,
            },
        )
        .await
        .unwrap();
    assert!(completed);

    let done = db.jobs().get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.result_id, Some(result_id));
    assert_eq!(done.metrics.duration_ms, Some(1234));
}

#[tokio::test]
async fn pending_job_cannot_complete() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;

    let completed = db
        .jobs()
        .complete(
            job.id,
            JobCompletion {
                result_id: Uuid::new_v4(),
                completed_at: Utc::now(),
                duration_ms: 1,
            },
        )
        .await
        .unwrap();
    assert!(!completed);
    assert_eq!(
        db.jobs().get(job.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn cancel_only_pending() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;

    let pending = seed_job(&db, owner).await;
    assert!(db.jobs().cancel(pending.id).await.unwrap());
    let cancelled = db.jobs().get(pending.id).await.unwrap().unwrap();
    assert!(cancelled.is_cancelled());
    assert_eq!(
        cancelled.error.as_ref().map(|e| e.message.as_str()),
        Some("Job cancelled by user")
    );
    assert!(cancelled.metrics.duration_ms.is_some());

    // Cancelled is terminal: a late claim must not resurrect it.
    assert!(!db.jobs().mark_processing(pending.id, Utc::now()).await.unwrap());
    assert!(!db.jobs().cancel(pending.id).await.unwrap());

    let running = seed_job(&db, owner).await;
    db.jobs().mark_processing(running.id, Utc::now()).await.unwrap();
    assert!(!db.jobs().cancel(running.id).await.unwrap());
}

#[tokio::test]
async fn fail_records_error_once() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;
    db.jobs().mark_processing(job.id, Utc::now()).await.unwrap();

    let error = JobError {
        code: "SCRAPE_FAILED".into(),
        message: "connection reset".into(),
    };
    assert!(db.jobs().fail(job.id, error.clone(), Utc::now(), 500).await.unwrap());

    let other = JobError {
        code: "TIMEOUT".into(),
        message: "late".into(),
    };
    assert!(!db.jobs().fail(job.id, other, Utc::now(), 900).await.unwrap());

    let failed = db.jobs().get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error, Some(error));
    assert_eq!(failed.metrics.duration_ms, Some(500));
    assert!(!failed.is_cancelled());
}

#[tokio::test]
async fn charge_is_recorded_once() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;

    assert_eq!(db.charge_job(job.id, owner, 3).await.unwrap(), Some(97));
    assert_eq!(db.charge_job(job.id, owner, 3).await.unwrap(), None);
    db.jobs().record_retry(job.id, 2).await.unwrap();

    let loaded = db.jobs().get(job.id).await.unwrap().unwrap();
    assert!(loaded.is_charged());
    assert_eq!(loaded.metrics.credits_used, 3);
    assert_eq!(loaded.metrics.retries, 2);
    assert_eq!(db.ledger().get_balance(owner).await.unwrap(), 97);
}

#[tokio::test]
async fn declined_charge_leaves_job_unbilled() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 2).await;
    let job = seed_job(&db, owner).await;

    let err = db.charge_job(job.id, owner, 3).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientCredits {
            required: 3,
            available: 2
        }
    ));

    let loaded = db.jobs().get(job.id).await.unwrap().unwrap();
    assert!(!loaded.is_charged());
    assert_eq!(db.ledger().get_balance(owner).await.unwrap(), 2);

    db.accounts().add_credits(owner, 1).await.unwrap();
    assert_eq!(db.charge_job(job.id, owner, 3).await.unwrap(), Some(0));
}

#[tokio::test]
async fn list_is_scoped_to_owner() {
    let (db, _container) = setup_test_db().await;
    let alice = seed_user(&db, 100).await;
    let bob = seed_user(&db, 100).await;

    let first = seed_job(&db, alice).await;
    seed_job(&db, alice).await;
    seed_job(&db, bob).await;
    db.jobs().mark_processing(first.id, Utc::now()).await.unwrap();

    assert_eq!(db.jobs().list(alice, None, 10).await.unwrap().len(), 2);
    assert_eq!(db.jobs().list(bob, None, 10).await.unwrap().len(), 1);
    assert_eq!(db.jobs().list(alice, None, 1).await.unwrap().len(), 1);

    let processing = db
        .jobs()
        .list(alice, Some(JobStatus::Processing), 10)
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].id, first.id);
}

#[tokio::test]
async fn purge_removes_old_jobs() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let old = seed_job(&db, owner).await;
    let fresh = seed_job(&db, owner).await;

    sqlx::query("UPDATE scrape_jobs SET created_at = NOW() - INTERVAL '40 days' WHERE id = $1")
        .bind(old.id)
        .execute(db.pool())
        .await
        .unwrap();

    let removed = db
        .jobs()
        .purge_older_than(Utc::now() - TimeDelta::days(30))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(db.jobs().get(old.id).await.unwrap().is_none());
    assert!(db.jobs().get(fresh.id).await.unwrap().is_some());
}
