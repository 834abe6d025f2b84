/// Smoke-test for `BrowserRenderer`.
///
/// Launches a headless Chromium, renders <https://example.com> with a
/// screenshot, and verifies the capture contains the expected heading.
///
/// Run with:
///   cargo run -p scrapepilot-client --example browser_smoke
use scrapepilot_client::{BrowserRenderer, BrowserSession, BrowserSettings};
use scrapepilot_core::request::ScrapeConfig;
use scrapepilot_core::traits::Renderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let session = BrowserSession::new(BrowserSettings::from_env()?);
    let renderer = BrowserRenderer::new(session.clone());

    let url = "https://example.com";
    println!("Rendering {url} …");
    let config = ScrapeConfig {
        screenshot: true,
        ..Default::default()
    };
    let capture = renderer.render(url, &config).await?;

    // Basic sanity checks
    assert!(
        capture.html.contains("<h1>Example Domain</h1>"),
        "Expected <h1> not found in rendered HTML"
    );
    assert_eq!(capture.metadata.title.as_deref(), Some("Example Domain"));
    assert!(
        capture
            .screenshot
            .as_deref()
            .is_some_and(|s| s.starts_with("data:image/png;base64,")),
        "Screenshot missing"
    );

    println!(
        "OK: HTTP {} in {} ms, {} bytes, final URL {}",
        capture.status_code, capture.timing.load_time_ms, capture.size, capture.final_url
    );

    session.shutdown().await;
    Ok(())
}
