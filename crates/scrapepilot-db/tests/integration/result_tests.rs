use std::collections::BTreeMap;

use chrono::{TimeDelta, Utc};
use scrapepilot_core::models::{
    ActionResult, ExtractionFormat, NewScrapeResult, PageMetadata, Performance,
    PromptExtraction, RenderStrategy, compute_hash,
};
use scrapepilot_core::traits::{ResultStore, Storage};
use uuid::Uuid;

use crate::integration::common::{seed_job, seed_user, setup_test_db};

fn new_result(job_id: Uuid, owner_id: Uuid) -> NewScrapeResult {
    let html = "<html><body><h1>Hi</h1></body></html>".to_string();
    NewScrapeResult {
        job_id,
        owner_id,
        url: "https://example.com".into(),
        final_url: "https://example.com/".into(),
        status_code: 200,
        headers: BTreeMap::from([("content-type".to_string(), "text/html".to_string())]),
        content_hash: compute_hash(&html),
        html,
        text: "Hi".into(),
        metadata: PageMetadata {
            title: Some("Hi".into()),
            links: vec!["https://example.com/a".into()],
            ..Default::default()
        },
        screenshot: Some("data:image/png;base64,AAAA".into()),
        pdf: None,
        data: Some(serde_json::json!({"heading": "Hi"})),
        ai_extraction: Some(PromptExtraction {
            data: serde_json::json!(["Hi"]),
            format: ExtractionFormat::List,
            confidence: 0.75,
        }),
        action_results: Some(vec![ActionResult {
            index: 0,
            action: "click".into(),
            success: false,
            error: Some("no element".into()),
            duration_ms: 12,
            output: None,
            screenshot: None,
        }]),
        strategy: RenderStrategy::Browser,
        performance: Performance {
            load_time_ms: 800,
            render_time_ms: Some(120),
            size: 38,
        },
    }
}

#[tokio::test]
async fn save_and_read_back() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;
    let new = new_result(job.id, owner);

    let id = db.results().save(new.clone()).await.unwrap();
    let stored = db.results().get(id).await.unwrap().unwrap();

    assert_eq!(stored.id, id);
    assert_eq!(stored.clone(), new.into_result(id, stored.created_at));
    assert_eq!(db.results().find_by_job(job.id).await.unwrap(), Some(id));
}

#[tokio::test]
async fn save_is_idempotent_per_job() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let job = seed_job(&db, owner).await;

    let first = db.results().save(new_result(job.id, owner)).await.unwrap();
    let mut retry = new_result(job.id, owner);
    retry.text = "different".into();
    let second = db.results().save(retry).await.unwrap();

    assert_eq!(first, second);
    let stored = db.results().get(first).await.unwrap().unwrap();
    assert_eq!(stored.text, "Hi");
}

#[tokio::test]
async fn missing_result_is_none() {
    let (db, _container) = setup_test_db().await;
    assert!(db.results().get(Uuid::new_v4()).await.unwrap().is_none());
    assert!(db.results().find_by_job(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn purge_removes_old_results() {
    let (db, _container) = setup_test_db().await;
    let owner = seed_user(&db, 100).await;
    let old_job = seed_job(&db, owner).await;
    let new_job = seed_job(&db, owner).await;

    let old = db.results().save(new_result(old_job.id, owner)).await.unwrap();
    let fresh = db.results().save(new_result(new_job.id, owner)).await.unwrap();
    sqlx::query("UPDATE scrape_results SET created_at = NOW() - INTERVAL '8 days' WHERE id = $1")
        .bind(old)
        .execute(db.pool())
        .await
        .unwrap();

    let removed = db
        .results()
        .purge_older_than(Utc::now() - TimeDelta::days(7))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(db.results().get(old).await.unwrap().is_none());
    assert!(db.results().get(fresh).await.unwrap().is_some());
}
