//! Headless browser session management
//!
//! This module owns the lifecycle of browser sessions:
//! - Two-tier launch (full profile, then a minimal fallback profile)
//! - Browser binary discovery
//! - Property masking after every navigation
//! - Best-effort, exactly-once session teardown
//!
//! Every call into the browser is blocking and runs on tokio's blocking pool,
//! so progress reporting on the async side is never starved.

pub mod chrome;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::utils::error::DriverError;

pub use chrome::ChromeLauncher;

/// Well-known browser locations probed when no path is configured
pub const KNOWN_BROWSER_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
    "/snap/bin/chromium",
];

/// Script that hides automation-detectable page properties
pub const MASKING_SCRIPT: &str = r#"(() => {
    try { Object.defineProperty(navigator, 'webdriver', { get: () => undefined }); } catch (e) {}
    try { Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] }); } catch (e) {}
    try { Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] }); } catch (e) {}
    try { window.chrome = window.chrome || { runtime: {} }; } catch (e) {}
    return true;
})()"#;

/// A blocking handle to one browser page
///
/// Implementations must be cheap to share across threads; the session wrapper
/// calls them from the blocking pool.
pub trait BrowserSession: Send + Sync {
    /// Load a URL and wait for the navigation to settle
    fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Current serialized DOM
    fn page_source(&self) -> Result<String, DriverError>;

    /// Evaluate a script in the page, discarding its result
    fn execute_script(&self, script: &str) -> Result<(), DriverError>;

    /// Shut the browser down
    fn quit(&self) -> Result<(), DriverError>;
}

/// Starts browser processes
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser with the given profile
    ///
    /// On error, any process started by this attempt must already be gone.
    fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn BrowserSession>, DriverError>;
}

/// Which launch configuration a session was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaunchMode {
    /// Stealth arguments, spoofed user agent, images disabled
    Full,
    /// Bare headless browser
    Minimal,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Minimal => write!(f, "minimal"),
        }
    }
}

/// Concrete launch parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchProfile {
    pub mode: LaunchMode,
    pub headless: bool,
    pub binary: Option<PathBuf>,
    pub args: Vec<String>,
    pub user_agent: Option<String>,
    pub window_size: Option<(u32, u32)>,
    pub page_load_timeout: Duration,
}

impl LaunchProfile {
    /// Full-feature profile
    pub fn full(config: &DriverConfig, binary: Option<PathBuf>) -> Self {
        let args = [
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--disable-extensions",
            "--disable-logging",
            "--disable-notifications",
            "--disable-features=VizDisplayCompositor",
            "--disable-blink-features=AutomationControlled",
            "--blink-settings=imagesEnabled=false",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            mode: LaunchMode::Full,
            headless: config.headless,
            binary,
            args,
            user_agent: Some(config.user_agent.clone()),
            window_size: Some(config.window_size),
            page_load_timeout: Duration::from_secs(config.page_load_timeout_secs),
        }
    }

    /// Minimal fallback profile
    pub fn minimal(config: &DriverConfig) -> Self {
        Self {
            mode: LaunchMode::Minimal,
            headless: true,
            binary: None,
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
            user_agent: None,
            window_size: None,
            page_load_timeout: Duration::from_secs(config.page_load_timeout_secs),
        }
    }
}

/// Find a browser binary: explicit path, `CHROME_PATH`, then well-known paths
///
/// Returns `None` when nothing is found; the driver library then falls back to
/// its own detection.
pub fn discover_binary(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured browser binary does not exist");
    }

    if let Ok(env_path) = std::env::var("CHROME_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Some(path);
        }
    }

    KNOWN_BROWSER_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Closed,
}

/// Run a blocking browser call on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, DriverError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DriverError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DriverError::Worker(e.to_string()))?
}

/// An open browser session owned by exactly one harvest pass
///
/// Closing is idempotent. A session dropped without an explicit close (error
/// path, cancelled task) is shut down on the blocking pool.
pub struct Session {
    id: Uuid,
    mode: LaunchMode,
    created_at: DateTime<Utc>,
    inner: Arc<dyn BrowserSession>,
    closed: Arc<AtomicBool>,
}

impl Session {
    fn new(mode: LaunchMode, inner: Arc<dyn BrowserSession>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            created_at: Utc::now(),
            inner,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> SessionStatus {
        if self.closed.load(Ordering::SeqCst) {
            SessionStatus::Closed
        } else {
            SessionStatus::Active
        }
    }

    /// Navigate, then mask automation properties (best effort)
    pub async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }

        let inner = Arc::clone(&self.inner);
        let target = url.to_string();
        blocking(move || inner.navigate(&target)).await?;

        let inner = Arc::clone(&self.inner);
        if let Err(e) = blocking(move || inner.execute_script(MASKING_SCRIPT)).await {
            tracing::debug!(session = %self.id, error = %e, "Property masking failed");
        }

        Ok(())
    }

    /// Current page HTML
    pub async fn page_source(&self) -> Result<String, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let inner = Arc::clone(&self.inner);
        blocking(move || inner.page_source()).await
    }

    /// Close the session; failures are logged, never returned
    pub async fn close(self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let id = self.id;
        match blocking(move || inner.quit()).await {
            Ok(()) => tracing::debug!(session = %id, "Browser session closed"),
            Err(e) => tracing::warn!(session = %id, error = %e, "Browser session close failed"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let id = self.id;
        let quit = move || {
            if let Err(e) = inner.quit() {
                tracing::warn!(session = %id, error = %e, "Browser cleanup on drop failed");
            } else {
                tracing::debug!(session = %id, "Browser session closed on drop");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(quit);
            }
            Err(_) => quit(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("created_at", &self.created_at)
            .field("status", &self.status())
            .finish()
    }
}

/// Creates and destroys browser sessions
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    config: DriverConfig,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: DriverConfig) -> Self {
        Self { launcher, config }
    }

    /// Manager backed by a real Chrome/Chromium
    pub fn chrome(config: DriverConfig) -> Self {
        Self::new(Arc::new(ChromeLauncher), config)
    }

    /// Open a session, falling back to the minimal profile if `Full` fails
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Init` when no profile could be launched.
    pub async fn create(&self, mode: LaunchMode) -> Result<Session, DriverError> {
        let mut profiles = Vec::with_capacity(2);
        if mode == LaunchMode::Full {
            let binary = discover_binary(self.config.chrome_path.as_deref());
            match &binary {
                Some(path) => tracing::info!(path = %path.display(), "Using browser binary"),
                None => tracing::info!("No browser binary found, relying on auto-detection"),
            }
            profiles.push(LaunchProfile::full(&self.config, binary));
        }
        profiles.push(LaunchProfile::minimal(&self.config));

        let mut failures = Vec::new();
        for profile in profiles {
            let launcher = Arc::clone(&self.launcher);
            let mode = profile.mode;
            match blocking(move || launcher.launch(&profile)).await {
                Ok(inner) => {
                    let session = Session::new(mode, inner);
                    crate::metrics::record_session(&mode.to_string());
                    tracing::info!(
                        session = %session.id(),
                        mode = %mode,
                        "Browser session created"
                    );
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(mode = %mode, error = %e, "Browser launch failed");
                    failures.push(format!("{mode}: {e}"));
                }
            }
        }

        Err(DriverError::Init(failures.join("; ")))
    }

    /// Close a session (best effort)
    pub async fn close(&self, session: Session) {
        session.close().await;
    }
}
