//! Common test utilities: a scripted browser and fixture pages

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use vipharvest::config::{CrawlerConfig, DriverConfig};
use vipharvest::crawler::PageNavigator;
use vipharvest::driver::{BrowserLauncher, BrowserSession, LaunchProfile, SessionManager};
use vipharvest::harvest::HarvestOrchestrator;
use vipharvest::storage::{LinkStore, SharedLinkStore};
use vipharvest::utils::error::DriverError;

pub const BASE_URL: &str = "https://servers.test";

/// Answers a navigation with page HTML; gets the URL and the navigation index
pub type Responder = dyn Fn(&str, usize) -> Result<String, DriverError> + Send + Sync;

/// In-memory browser page driven by a responder
pub struct ScriptedSession {
    respond: Box<Responder>,
    current: Mutex<String>,
    navigations: AtomicUsize,
    quits: AtomicUsize,
}

impl ScriptedSession {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&str, usize) -> Result<String, DriverError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            current: Mutex::new(String::new()),
            navigations: AtomicUsize::new(0),
            quits: AtomicUsize::new(0),
        })
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }
}

impl BrowserSession for ScriptedSession {
    fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let n = self.navigations.fetch_add(1, Ordering::SeqCst);
        let html = (self.respond)(url, n)?;
        *self.current.lock().unwrap() = html;
        Ok(())
    }

    fn page_source(&self) -> Result<String, DriverError> {
        Ok(self.current.lock().unwrap().clone())
    }

    fn execute_script(&self, _script: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn quit(&self) -> Result<(), DriverError> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out the same scripted session for every launch
pub struct ScriptedLauncher {
    session: Arc<ScriptedSession>,
    fail: bool,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(session: Arc<ScriptedSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            fail: false,
            launches: AtomicUsize::new(0),
        })
    }

    /// A launcher on a machine with no usable browser
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            session: ScriptedSession::new(|_, _| Ok(String::new())),
            fail: true,
            launches: AtomicUsize::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for ScriptedLauncher {
    fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn BrowserSession>, DriverError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DriverError::Launch {
                profile: profile.mode.to_string(),
                reason: "no browser binary".to_string(),
            });
        }
        let session: Arc<dyn BrowserSession> = self.session.clone();
        Ok(session)
    }
}

/// Crawler settings with short waits for tests
pub fn fast_crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        base_url: BASE_URL.to_string(),
        max_candidates: 5,
        listing_wait_secs: 1,
        detail_wait_secs: 1,
        poll_interval_ms: 10,
        listing_max_attempts: 2,
        listing_backoff_ms: 10,
        detail_max_attempts: 2,
        detail_backoff_ms: 10,
        navigations_per_second: 1000,
    }
}

pub fn listing_url(game_id: &str) -> String {
    format!("{BASE_URL}/games/{game_id}")
}

pub fn detail_url(server_id: &str) -> String {
    format!("{BASE_URL}/servers/{server_id}")
}

/// Listing page with one anchor per server id
pub fn listing_page(game_name: &str, server_ids: &[String]) -> String {
    let anchors: String = server_ids
        .iter()
        .map(|id| format!(r#"<li><a href="/servers/{id}">Server {id}</a></li>"#))
        .collect();
    format!(
        r#"<html><head><title>{game_name} servers</title>
<meta property="og:image" content="https://img.test/{game_name}.png"></head>
<body><h1>{game_name}</h1><ul>{anchors}</ul></body></html>"#
    )
}

/// Detail page showing an invite link
pub fn detail_page(title: &str, link: &str) -> String {
    format!(
        r#"<html><head><title>{title}</title></head>
<body><div class="description">Active private server</div>
<input type="text" readonly value="{link}"></body></html>"#
    )
}

/// Detail page that never shows an invite link
pub fn empty_detail_page() -> String {
    "<html><head><title>Loading</title></head><body><p>Please wait</p></body></html>".to_string()
}

pub fn server_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("s{i}")).collect()
}

/// Store backed by a file in a fresh temporary directory
pub fn temp_store() -> (TempDir, SharedLinkStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LinkStore::new(dir.path().join("vip_links.json")).shared();
    (dir, store)
}

pub fn orchestrator(
    launcher: Arc<dyn BrowserLauncher>,
    store: SharedLinkStore,
) -> HarvestOrchestrator {
    let sessions = Arc::new(SessionManager::new(launcher, DriverConfig::default()));
    let navigator = Arc::new(PageNavigator::new(fast_crawler_config()).unwrap());
    HarvestOrchestrator::new(sessions, navigator, store)
}
