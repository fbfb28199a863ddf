//! Configuration management for the vipharvest crawler
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::retry::RetryPolicy;

/// Hard upper bound on candidates processed per pass
pub const MAX_CANDIDATES_CEILING: usize = 7;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Headless browser configuration
    pub driver: DriverConfig,

    /// Aggregator site crawling configuration
    pub crawler: CrawlerConfig,

    /// Batch scheduler configuration
    pub batch: BatchSettings,

    /// Per-user cooldown configuration
    pub cooldown: CooldownConfig,

    /// Link store configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Headless browser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Explicit Chrome/Chromium binary
    pub chrome_path: Option<PathBuf>,

    /// Run without a visible window
    pub headless: bool,

    /// Page load timeout in seconds
    pub page_load_timeout_secs: u64,

    /// User agent presented by the full launch profile
    pub user_agent: String,

    /// Window size for the full launch profile
    pub window_size: (u32, u32),
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            page_load_timeout_secs: 30,
            user_agent: String::from(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
            window_size: (1920, 1080),
        }
    }
}

/// Aggregator site crawling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Aggregator base URL
    pub base_url: String,

    /// Candidates taken from a listing page per pass
    pub max_candidates: usize,

    /// Bounded wait for the first listing anchor, in seconds
    pub listing_wait_secs: u64,

    /// Bounded wait for the invite input on a detail page, in seconds
    pub detail_wait_secs: u64,

    /// DOM polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Attempts for loading a listing page
    pub listing_max_attempts: u32,

    /// Delay between listing attempts in milliseconds
    pub listing_backoff_ms: u64,

    /// Attempts for a detail page after unexpected driver errors
    pub detail_max_attempts: u32,

    /// Delay between detail attempts in milliseconds
    pub detail_backoff_ms: u64,

    /// Page navigations per second
    pub navigations_per_second: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://rbxservers.xyz"),
            max_candidates: 5,
            listing_wait_secs: 20,
            detail_wait_secs: 15,
            poll_interval_ms: 250,
            listing_max_attempts: 3,
            listing_backoff_ms: 3000,
            detail_max_attempts: 2,
            detail_backoff_ms: 2000,
            navigations_per_second: 2,
        }
    }
}

impl CrawlerConfig {
    /// Bounded wait for listing anchors
    #[must_use]
    pub fn listing_wait(&self) -> Duration {
        Duration::from_secs(self.listing_wait_secs)
    }

    /// Bounded wait for the invite input
    #[must_use]
    pub fn detail_wait(&self) -> Duration {
        Duration::from_secs(self.detail_wait_secs)
    }

    /// Interval between DOM polls
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry policy for listing pages
    #[must_use]
    pub fn listing_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.listing_max_attempts,
            Duration::from_millis(self.listing_backoff_ms),
        )
    }

    /// Retry policy for detail pages
    #[must_use]
    pub fn detail_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.detail_max_attempts,
            Duration::from_millis(self.detail_backoff_ms),
        )
    }
}

/// Batch scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Links requested per game per round
    pub per_round_cap: usize,

    /// Pause after every N accepted links
    pub cooldown_every: usize,

    /// Length of that pause in seconds
    pub cooldown_secs: u64,

    /// Hard ceiling on rounds
    pub max_rounds: usize,

    /// Pause between the games of one round in milliseconds
    pub game_pause_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            per_round_cap: 3,
            cooldown_every: 5,
            cooldown_secs: 30,
            max_rounds: 10,
            game_pause_ms: 2000,
        }
    }
}

/// Per-user cooldown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Minutes a user waits between harvests
    pub ttl_minutes: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self { ttl_minutes: 5 }
    }
}

/// Link store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON document path
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vip_links.json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("VIPHARVEST_CHROME_PATH") {
            self.driver.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(headless) = env_parse::<bool>("VIPHARVEST_HEADLESS") {
            self.driver.headless = headless;
        }
        if let Some(secs) = env_parse::<u64>("VIPHARVEST_PAGE_LOAD_TIMEOUT") {
            self.driver.page_load_timeout_secs = secs;
        }
        if let Ok(url) = std::env::var("VIPHARVEST_BASE_URL") {
            self.crawler.base_url = url;
        }
        if let Some(max) = env_parse::<usize>("VIPHARVEST_MAX_CANDIDATES") {
            self.crawler.max_candidates = max;
        }
        if let Some(rate) = env_parse::<u32>("VIPHARVEST_NAVIGATIONS_PER_SECOND") {
            self.crawler.navigations_per_second = rate;
        }
        if let Some(ttl) = env_parse::<u64>("VIPHARVEST_COOLDOWN_MINUTES") {
            self.cooldown.ttl_minutes = ttl;
        }
        if let Some(rounds) = env_parse::<usize>("VIPHARVEST_MAX_ROUNDS") {
            self.batch.max_rounds = rounds;
        }
        if let Ok(path) = std::env::var("VIPHARVEST_STORE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("VIPHARVEST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("VIPHARVEST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.crawler.max_candidates == 0 {
            anyhow::bail!("max_candidates must be greater than 0");
        }

        if self.crawler.max_candidates > MAX_CANDIDATES_CEILING {
            anyhow::bail!("max_candidates must not exceed {MAX_CANDIDATES_CEILING}");
        }

        if self.crawler.navigations_per_second == 0 {
            anyhow::bail!("navigations_per_second must be greater than 0");
        }

        if self.crawler.listing_max_attempts == 0 || self.crawler.detail_max_attempts == 0 {
            anyhow::bail!("retry attempts must be greater than 0");
        }

        if self.crawler.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if self.batch.per_round_cap == 0 || self.batch.cooldown_every == 0 {
            anyhow::bail!("per_round_cap and cooldown_every must be greater than 0");
        }

        if self.batch.max_rounds == 0 {
            anyhow::bail!("max_rounds must be greater than 0");
        }

        url::Url::parse(&self.crawler.base_url)
            .with_context(|| format!("Invalid base_url: {}", self.crawler.base_url))?;

        Ok(())
    }
}
