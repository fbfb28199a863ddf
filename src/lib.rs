//! vipharvest - private-server invite link harvester
//!
//! Drives a headless browser against a server-listing aggregator, extracts
//! private-server invite links, and keeps them deduplicated per user and per
//! game in a single JSON document.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`driver`] - Headless browser sessions with launch fallback
//! - [`crawler`] - Candidate listing and link extraction
//! - [`storage`] - Persistent multi-tenant link store
//! - [`cooldown`] - Per-user rate limiting
//! - [`harvest`] - One harvest pass for one (user, game), cooldown gate
//! - [`scheduler`] - Multi-round batches toward a target count
//! - [`progress`] - Progress snapshots over a watch channel
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities, retry and domain errors
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vipharvest::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = LinkStore::open(&config.storage.path)?.shared();
//!     let orchestrator = HarvestOrchestrator::new(
//!         Arc::new(SessionManager::chrome(config.driver.clone())),
//!         Arc::new(PageNavigator::new(config.crawler.clone())?),
//!         store,
//!     );
//!     let outcome = orchestrator.run("109983668079237", "user-1", 3).await?;
//!     println!("{} new links", outcome.new_links_count);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cooldown;
pub mod crawler;
pub mod driver;
pub mod error;
pub mod harvest;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::cooldown::CooldownRegistry;
    pub use crate::crawler::PageNavigator;
    pub use crate::driver::{LaunchMode, SessionManager};
    pub use crate::error::{DomainError, Error, ErrorCategory, Result};
    pub use crate::harvest::{HarvestError, HarvestGate, HarvestOrchestrator, HarvestOutcome};
    pub use crate::models::{GameBucket, GameMetadata, HarvestStats, LinkRecord, VipLink};
    pub use crate::progress::{ProgressPublisher, ProgressSink, ProgressSnapshot};
    pub use crate::scheduler::{BatchConfig, BatchReport, BatchScheduler};
    pub use crate::storage::{LinkStore, SharedLinkStore};
}

// Direct re-exports for convenience
pub use models::{GameBucket, GameMetadata, HarvestStats, LinkRecord, VipLink};
