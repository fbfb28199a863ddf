//! One harvest pass for one (user, game)
//!
//! A pass acquires a browser session, lists candidates, enriches a new bucket
//! with game metadata, extracts links candidate by candidate, releases the
//! session, and finally commits the new links with a single persist.
//!
//! Only a failed session launch or an unreadable listing page aborts a pass.
//! Individual candidates that fail are counted and skipped.

pub mod category;
mod gate;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::crawler::PageNavigator;
use crate::driver::{LaunchMode, Session, SessionManager};
use crate::models::{GameMetadata, LinkRecord, VipLink};
use crate::progress::ProgressPublisher;
use crate::storage::SharedLinkStore;
use crate::utils::error::{CrawlerError, DriverError};

pub use gate::HarvestGate;

/// Result of a completed pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestOutcome {
    pub new_links_count: usize,
    /// Newly stored links, in discovery order
    pub new_links: Vec<VipLink>,
    pub processed_count: usize,
    pub duration_ms: u64,
    pub game_metadata: GameMetadata,
    /// Whether the final persist succeeded
    pub persisted: bool,
}

/// What a pass had done before it was aborted
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartialHarvest {
    pub processed_count: usize,
    pub duration_ms: u64,
}

/// Why a pass was aborted
#[derive(Error, Debug)]
pub enum HarvestFailure {
    #[error("browser session unavailable: {0}")]
    DriverInit(#[source] DriverError),

    #[error("listing page unreadable: {0}")]
    NoCandidates(#[source] CrawlerError),

    #[error("pass aborted: {0}")]
    Aborted(#[source] CrawlerError),
}

/// A pass that could not run to completion
#[derive(Error, Debug)]
#[error("Harvest of game {game_id} for user {user_id} failed: {reason}")]
pub struct HarvestError {
    pub game_id: String,
    pub user_id: String,
    pub reason: HarvestFailure,
    pub partial: PartialHarvest,
}

/// Links buffered during a pass, not yet committed
struct PassBuffer {
    metadata: GameMetadata,
    records: Vec<LinkRecord>,
    processed: usize,
}

/// Runs harvest passes against a shared link store
pub struct HarvestOrchestrator {
    sessions: Arc<SessionManager>,
    navigator: Arc<PageNavigator>,
    store: SharedLinkStore,
    launch_mode: LaunchMode,
}

impl HarvestOrchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        navigator: Arc<PageNavigator>,
        store: SharedLinkStore,
    ) -> Self {
        Self {
            sessions,
            navigator,
            store,
            launch_mode: LaunchMode::Full,
        }
    }

    /// Start sessions with a different profile (fallback still applies to `Full`)
    pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
        self.launch_mode = mode;
        self
    }

    pub fn store(&self) -> &SharedLinkStore {
        &self.store
    }

    /// Harvest up to `want_count` new links (0 = as many as the candidates give)
    ///
    /// # Errors
    ///
    /// Returns `HarvestError` when no session could be started or the listing
    /// page never rendered a candidate.
    pub async fn run(
        &self,
        game_id: &str,
        user_id: &str,
        want_count: usize,
    ) -> Result<HarvestOutcome, HarvestError> {
        self.run_with_progress(game_id, user_id, want_count, None)
            .await
    }

    /// [`run`](Self::run), reporting each processed candidate to `progress`
    pub async fn run_with_progress(
        &self,
        game_id: &str,
        user_id: &str,
        want_count: usize,
        progress: Option<&ProgressPublisher>,
    ) -> Result<HarvestOutcome, HarvestError> {
        let started = Instant::now();
        tracing::info!(game_id = %game_id, user_id = %user_id, want_count, "Harvest pass starting");

        let abort = |reason: HarvestFailure| {
            let duration_ms = started.elapsed().as_millis() as u64;
            crate::metrics::record_pass("aborted", duration_ms as f64 / 1000.0, 0);
            tracing::warn!(
                game_id = %game_id,
                user_id = %user_id,
                error = %reason,
                "Harvest pass aborted"
            );
            HarvestError {
                game_id: game_id.to_string(),
                user_id: user_id.to_string(),
                reason,
                partial: PartialHarvest {
                    processed_count: 0,
                    duration_ms,
                },
            }
        };

        let session = self
            .sessions
            .create(self.launch_mode)
            .await
            .map_err(|e| abort(HarvestFailure::DriverInit(e)))?;

        let result = self
            .collect(&session, game_id, user_id, want_count, progress)
            .await;

        // Dropping the session on cancellation closes it as well.
        self.sessions.close(session).await;

        let buffer = result.map_err(|e| match e {
            CrawlerError::NoCandidates { .. } => abort(HarvestFailure::NoCandidates(e)),
            other => abort(HarvestFailure::Aborted(other)),
        })?;

        Ok(self.commit(user_id, buffer, started).await)
    }

    async fn collect(
        &self,
        session: &Session,
        game_id: &str,
        user_id: &str,
        want_count: usize,
        progress: Option<&ProgressPublisher>,
    ) -> Result<PassBuffer, CrawlerError> {
        let candidates = self.navigator.list_candidates(session, game_id).await?;

        let existing = self
            .store
            .lock()
            .await
            .bucket(user_id, game_id)
            .map(|bucket| bucket.metadata());
        let metadata = match existing {
            Some(metadata) => metadata,
            None => {
                let mut metadata = self.navigator.read_game_metadata(session, game_id).await;
                metadata.category = category::classify(&metadata.game_name).to_string();
                tracing::info!(
                    game_id = %game_id,
                    name = %metadata.game_name,
                    category = %metadata.category,
                    "Enriched new game bucket"
                );
                metadata
            }
        };

        let mut seen: HashSet<VipLink> = HashSet::new();
        let mut records = Vec::new();
        let mut processed = 0;

        for candidate in &candidates {
            let extracted = self.navigator.extract_link(session, candidate, game_id).await;
            processed += 1;
            if let Some(progress) = progress {
                progress.add_processed(1);
            }

            let Some(record) = extracted else {
                crate::metrics::record_candidate("miss");
                continue;
            };

            let known = self
                .store
                .lock()
                .await
                .contains(user_id, game_id, &record.link);
            if known || !seen.insert(record.link.clone()) {
                crate::metrics::record_candidate("duplicate");
                tracing::debug!(link = %record.link, "Duplicate link skipped");
                continue;
            }

            crate::metrics::record_candidate("new");
            tracing::debug!(
                link = %record.link,
                server_id = %record.server_info.server_id,
                took_ms = record.extraction_duration_ms,
                "Found new link"
            );
            records.push(record);

            if want_count > 0 && records.len() >= want_count {
                tracing::debug!(want_count, "Requested link count reached");
                break;
            }
        }

        Ok(PassBuffer {
            metadata,
            records,
            processed,
        })
    }

    async fn commit(&self, user_id: &str, buffer: PassBuffer, started: Instant) -> HarvestOutcome {
        let PassBuffer {
            metadata,
            records,
            processed,
        } = buffer;
        let game_id = metadata.game_id.clone();

        let mut store = self.store.lock().await;
        let bucket = store.ensure_bucket(user_id, metadata);
        let game_metadata = bucket.metadata();

        let new_links: Vec<VipLink> = records
            .into_iter()
            .filter_map(|record| {
                let link = record.link.clone();
                bucket.insert(record).then_some(link)
            })
            .collect();

        let elapsed = started.elapsed();
        store.record_pass(
            processed as u64,
            new_links.len() as u64,
            elapsed.as_secs_f64(),
        );
        let persisted = store.persist();
        drop(store);

        let duration_ms = elapsed.as_millis() as u64;
        crate::metrics::record_pass("success", elapsed.as_secs_f64(), new_links.len() as u64);
        tracing::info!(
            game_id = %game_id,
            user_id = %user_id,
            new_links = new_links.len(),
            processed,
            duration_ms,
            persisted,
            "Harvest pass complete"
        );

        HarvestOutcome {
            new_links_count: new_links.len(),
            new_links,
            processed_count: processed,
            duration_ms,
            game_metadata,
            persisted,
        }
    }
}
