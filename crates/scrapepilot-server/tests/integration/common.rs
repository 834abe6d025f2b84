use std::sync::Arc;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use scrapepilot_client::{BrowserRenderer, BrowserSession, BrowserSettings, HttpRenderer, LlmExtractor};
use scrapepilot_core::models::Permission;
use scrapepilot_core::{Orchestrator, ScrapeService};
use scrapepilot_db::Database;
use scrapepilot_server::routes;
use scrapepilot_server::state::AppState;

pub const TEST_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title><meta name="description" content="A page for tests"></head>
<body><h1>Hello</h1><p>Price: 42</p></body>
</html>"#;

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub user_id: Uuid,
    pub api_key: String,
    _container: ContainerAsync<GenericImage>,
}

/// Spin up PostgreSQL, seed one user holding `credits` and an API key with
/// the scrape permission, and build the router around them.
///
/// The HTTP renderer accepts loopback targets so tests can scrape a local page.
pub async fn setup_test_app(credits: i64) -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "scrapepilot_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/scrapepilot_test");
    let pool = retry_connect(&url).await;

    let db = Database::from_pool(pool);
    db.migrate().await.expect("Failed to run migrations");

    let user_id = db
        .accounts()
        .create_user("owner@example.com", credits)
        .await
        .expect("Failed to create user");
    let api_key = db
        .api_keys()
        .issue(user_id, "test", &[Permission::Scrape])
        .await
        .expect("Failed to issue key")
        .key;

    let http = HttpRenderer::new()
        .expect("Failed to build HTTP renderer")
        .allow_private_urls();
    let browser = BrowserRenderer::new(BrowserSession::new(BrowserSettings::default()));
    let service = ScrapeService::new(
        Orchestrator::new(http, browser),
        LlmExtractor::new(Vec::new()),
        db.clone(),
    );

    let state = Arc::new(AppState {
        db: db.clone(),
        service,
        default_timeout_ms: 10_000,
    });

    TestApp {
        router: routes::router(state),
        db,
        user_id,
        api_key,
        _container: container,
    }
}

/// Serve [`TEST_PAGE`] on a random local port and return its URL.
pub async fn spawn_test_page() -> String {
    let app = Router::new().route("/", get(|| async { Html(TEST_PAGE) }));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test page");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/")
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
