//! Chrome/Chromium backend built on `headless_chrome`

use std::ffi::{OsStr, OsString};
use std::sync::{Arc, Mutex};

use headless_chrome::{Browser, LaunchOptions, Tab};

use super::{BrowserLauncher, BrowserSession, LaunchProfile};
use crate::utils::error::DriverError;

/// Launches a local Chrome/Chromium process per session
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

impl BrowserLauncher for ChromeLauncher {
    fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn BrowserSession>, DriverError> {
        let launch_err = |reason: String| DriverError::Launch {
            profile: profile.mode.to_string(),
            reason,
        };

        let args: Vec<OsString> = profile.args.iter().map(OsString::from).collect();
        let arg_refs: Vec<&OsStr> = args.iter().map(OsString::as_os_str).collect();

        let options = LaunchOptions::default_builder()
            .headless(profile.headless)
            .sandbox(false)
            .window_size(profile.window_size)
            .path(profile.binary.clone())
            .args(arg_refs)
            .build()
            .map_err(|e| launch_err(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| launch_err(e.to_string()))?;

        // Dropping `browser` on any error below kills the process.
        let tab = browser.new_tab().map_err(|e| launch_err(e.to_string()))?;
        tab.set_default_timeout(profile.page_load_timeout);

        if let Some(user_agent) = &profile.user_agent {
            tab.set_user_agent(user_agent, Some("en-US,en"), None)
                .map_err(|e| launch_err(e.to_string()))?;
        }

        Ok(Arc::new(ChromeSession {
            browser: Mutex::new(Some(browser)),
            tab,
        }))
    }
}

/// One tab in a dedicated browser process
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
}

fn classify(url: &str, err: &anyhow::Error) -> DriverError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        DriverError::timeout(format!("navigation to {url}"), 0)
    } else if lower.contains("connection")
        || lower.contains("closed")
        || lower.contains("channel")
    {
        DriverError::Transport(message)
    } else {
        DriverError::Navigation {
            url: url.to_string(),
            reason: message,
        }
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| classify(url, &e))
    }

    fn page_source(&self) -> Result<String, DriverError> {
        self.tab
            .get_content()
            .map_err(|e| DriverError::Transport(e.to_string()))
    }

    fn execute_script(&self, script: &str) -> Result<(), DriverError> {
        self.tab
            .evaluate(script, false)
            .map(|_| ())
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    fn quit(&self) -> Result<(), DriverError> {
        let tab_result = self.tab.close(true);

        let browser = self
            .browser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(browser);

        tab_result
            .map(|_| ())
            .map_err(|e| DriverError::Transport(e.to_string()))
    }
}
