use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use scrapepilot_core::error::AppError;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio::task::JoinHandle;

const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;

/// Launch and per-action settings for the headless browser.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSettings {
    /// Explicit Chrome/Chromium binary. Falls back to well-known locations.
    pub chrome_bin: Option<PathBuf>,
    /// Budget for each individual browser action.
    pub action_timeout: Duration,
    /// Whether `execute` actions may run caller-supplied JavaScript.
    pub allow_scripts: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_bin: None,
            action_timeout: Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS),
            allow_scripts: true,
        }
    }
}

impl BrowserSettings {
    /// Read `CHROME_BIN`, `BROWSER_ACTION_TIMEOUT_MS` and `BROWSER_ALLOW_SCRIPTS`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut settings = Self {
            chrome_bin: lookup("CHROME_BIN")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            ..Default::default()
        };

        if let Some(raw) = lookup("BROWSER_ACTION_TIMEOUT_MS") {
            let ms: u64 = raw.trim().parse().ok().filter(|ms| *ms > 0).ok_or_else(|| {
                AppError::ConfigError(format!(
                    "BROWSER_ACTION_TIMEOUT_MS must be a positive integer, got '{raw}'"
                ))
            })?;
            settings.action_timeout = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup("BROWSER_ALLOW_SCRIPTS") {
            settings.allow_scripts = match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(AppError::ConfigError(format!(
                        "BROWSER_ALLOW_SCRIPTS must be a boolean, got '{raw}'"
                    )));
                }
            };
        }

        Ok(settings)
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
    /// We look for the real binary inside the snap first, then fall back to
    /// well-known system paths. If nothing is found we return `None` and let
    /// `chromiumoxide` do its own lookup.
    pub fn find_chrome_binary(&self) -> Option<PathBuf> {
        if let Some(path) = &self.chrome_bin
            && path.exists()
        {
            return Some(path.clone());
        }

        const CANDIDATES: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

enum SessionState {
    Idle,
    Running {
        browser: Browser,
        handler: JoinHandle<()>,
    },
    Closed,
}

/// Process-wide headless browser handle.
///
/// Idle until the first [`lease`](Self::lease), which launches Chromium
/// exactly once; every later lease reuses the same process. Leases are read
/// guards, so [`shutdown`](Self::shutdown) waits for in-flight renders before
/// closing the process. A closed session never relaunches.
#[derive(Clone)]
pub struct BrowserSession {
    settings: BrowserSettings,
    state: Arc<RwLock<SessionState>>,
}

/// Shared access to the running browser for the duration of one render.
pub struct BrowserLease(OwnedRwLockReadGuard<SessionState, Browser>);

impl Deref for BrowserLease {
    type Target = Browser;

    fn deref(&self) -> &Browser {
        &self.0
    }
}

impl BrowserSession {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            state: Arc::new(RwLock::new(SessionState::Idle)),
        }
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.read().await, SessionState::Running { .. })
    }

    /// Borrow the browser, launching it on first use.
    pub async fn lease(&self) -> Result<BrowserLease, AppError> {
        let guard = self.state.clone().read_owned().await;
        if !matches!(*guard, SessionState::Idle) {
            return into_lease(guard);
        }
        drop(guard);

        let mut state = self.state.clone().write_owned().await;
        // Another caller may have launched while we waited for the write lock.
        if matches!(*state, SessionState::Idle) {
            let (browser, handler) = self.launch().await?;
            *state = SessionState::Running { browser, handler };
        }
        into_lease(state.downgrade())
    }

    /// Close the browser process. Waits for outstanding leases; idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        let previous = std::mem::replace(&mut *state, SessionState::Closed);
        let SessionState::Running {
            mut browser,
            handler,
        } = previous
        else {
            return;
        };

        if let Err(e) = browser.close().await {
            tracing::warn!("Failed to close browser cleanly: {e}");
        }
        if let Err(e) = browser.wait().await {
            tracing::warn!("Failed waiting for browser exit: {e}");
        }
        handler.abort();
        tracing::info!("Browser closed");
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .window_size(1920, 1080);

        if let Some(bin) = self.settings.find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserLaunch(format!("Browser config error: {e}")))?;

        tracing::info!("Launching browser");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserLaunch(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("Browser CDP handler error: {e}");
                    break;
                }
            }
        });

        Ok((browser, handler))
    }
}

fn into_lease(guard: OwnedRwLockReadGuard<SessionState>) -> Result<BrowserLease, AppError> {
    OwnedRwLockReadGuard::try_map(guard, |state| match state {
        SessionState::Running { browser, .. } => Some(browser),
        _ => None,
    })
    .map(BrowserLease)
    .map_err(|_| closed())
}

fn closed() -> AppError {
    AppError::BrowserLaunch("browser session has been shut down".into())
}
