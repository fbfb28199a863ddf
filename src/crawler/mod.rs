//! Page navigation and link extraction for the aggregator site
//!
//! [`PageNavigator`] drives an open [`Session`]:
//! - lists candidate detail pages for a game
//! - extracts one invite link (plus metadata) from a detail page
//! - reads game metadata from the loaded listing page
//!
//! Navigations are paced by a `governor` rate limiter and every DOM wait is a
//! bounded poll of the serialized page.

pub mod selectors;
pub mod url;

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tokio::time::Instant;

use crate::config::{CrawlerConfig, MAX_CANDIDATES_CEILING};
use crate::driver::Session;
use crate::models::{Candidate, GameMetadata, LinkRecord};
use crate::utils::error::{CrawlerError, DriverError};
use crate::utils::retry::with_retry_if;

type NavigationLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Lists candidates and extracts invite links through a browser session
pub struct PageNavigator {
    config: CrawlerConfig,
    base_url: ::url::Url,
    rate_limiter: Arc<NavigationLimiter>,
}

impl PageNavigator {
    /// Create a navigator for the configured site
    ///
    /// # Errors
    ///
    /// Returns `CrawlerError::InvalidUrl` if `base_url` does not parse
    pub fn new(config: CrawlerConfig) -> Result<Self, CrawlerError> {
        let base_url = ::url::Url::parse(&config.base_url)
            .map_err(|e| CrawlerError::InvalidUrl(format!("{}: {e}", config.base_url)))?;

        let rate = NonZeroU32::new(config.navigations_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

        Ok(Self {
            config,
            base_url,
            rate_limiter,
        })
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    fn candidate_cap(&self) -> usize {
        self.config.max_candidates.clamp(1, MAX_CANDIDATES_CEILING)
    }

    async fn goto(&self, session: &Session, target: &str) -> Result<(), DriverError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!(url = %target, "Navigating");
        session.navigate(target).await
    }

    /// Poll the page until `probe` finds something or `timeout` elapses
    async fn wait_for<T, P>(
        &self,
        session: &Session,
        what: &str,
        timeout: Duration,
        probe: P,
    ) -> Result<T, DriverError>
    where
        P: Fn(&str) -> Option<T>,
    {
        let deadline = Instant::now() + timeout;
        let poll = self.config.poll_interval();

        loop {
            let html = session.page_source().await?;
            if let Some(found) = probe(&html) {
                return Ok(found);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::timeout(what, timeout.as_millis() as u64));
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Ordered, distinct detail pages for a game, capped at `max_candidates`
    ///
    /// # Errors
    ///
    /// - `CrawlerError::NoCandidates` once every listing attempt timed out or failed
    /// - `CrawlerError::InvalidUrl` for a malformed game id
    /// - `CrawlerError::Driver` for unrecoverable session errors
    pub async fn list_candidates(
        &self,
        session: &Session,
        game_id: &str,
    ) -> Result<Vec<Candidate>, CrawlerError> {
        let listing = url::listing_url(&self.base_url, game_id)?;
        let listing = listing.as_str();
        let policy = self.config.listing_retry();
        let wait = self.config.listing_wait();

        let hrefs = with_retry_if(
            &policy,
            |attempt| async move {
                tracing::debug!(game_id = %game_id, attempt = attempt + 1, "Loading listing page");
                self.goto(session, listing).await?;
                self.wait_for(session, "listing anchors", wait, |html| {
                    let hrefs = selectors::candidate_hrefs(html);
                    (!hrefs.is_empty()).then_some(hrefs)
                })
                .await
            },
            DriverError::is_retryable,
        )
        .await
        .map_err(|e| {
            if e.is_retryable() {
                CrawlerError::NoCandidates {
                    game_id: game_id.to_string(),
                    attempts: policy.max_attempts,
                    last_error: e.to_string(),
                }
            } else {
                CrawlerError::Driver(e)
            }
        })?;

        let mut seen = HashSet::new();
        let candidates: Vec<Candidate> = hrefs
            .iter()
            .filter_map(|href| url::resolve(&self.base_url, href))
            .filter(|resolved| seen.insert(resolved.clone()))
            .take(self.candidate_cap())
            .enumerate()
            .map(|(position, url)| Candidate { url, position })
            .collect();

        tracing::info!(
            game_id = %game_id,
            found = hrefs.len(),
            kept = candidates.len(),
            "Listed candidates"
        );

        Ok(candidates)
    }

    /// Extract the invite link from one detail page
    ///
    /// Returns `None` when the page never shows a link within the bound, the
    /// link belongs to another game, or driver errors outlast the retry policy.
    pub async fn extract_link(
        &self,
        session: &Session,
        candidate: &Candidate,
        game_id: &str,
    ) -> Option<LinkRecord> {
        let started = Instant::now();
        let policy = self.config.detail_retry();
        let wait = self.config.detail_wait();
        let source = candidate.url.as_str();

        let outcome = with_retry_if(
            &policy,
            |_| async move {
                self.goto(session, source).await?;
                let found = self
                    .wait_for(session, "invite link input", wait, |html| {
                        selectors::invite_value(html)
                            .map(|link| (link, selectors::server_info(html, source)))
                    })
                    .await;
                match found {
                    Ok(pair) => Ok(Some(pair)),
                    Err(e) if e.is_timeout() => Ok(None),
                    Err(e) => Err(e),
                }
            },
            |e: &DriverError| !matches!(e, DriverError::Closed | DriverError::Worker(_)),
        )
        .await;

        let (link, server_info) = match outcome {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                tracing::debug!(url = %source, "No invite link on page");
                return None;
            }
            Err(e) => {
                tracing::warn!(url = %source, error = %e, "Candidate extraction failed");
                return None;
            }
        };

        if url::targets_other_game(&link, game_id) {
            tracing::debug!(
                url = %source,
                link = %link,
                game_id = %game_id,
                "Link belongs to another game"
            );
            return None;
        }

        Some(LinkRecord {
            link,
            source_url: candidate.url.clone(),
            discovered_at: Utc::now(),
            extraction_duration_ms: started.elapsed().as_millis() as u64,
            server_info,
        })
    }

    /// Game name and image from the listing page currently loaded
    ///
    /// Never fails; unreadable pages yield placeholder metadata.
    pub async fn read_game_metadata(&self, session: &Session, game_id: &str) -> GameMetadata {
        let mut metadata = GameMetadata::placeholder(game_id);

        let html = match session.page_source().await {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!(game_id = %game_id, error = %e, "Could not read listing page");
                return metadata;
            }
        };

        let (name, image) = selectors::game_details(&html);
        if let Some(name) = name {
            metadata.game_name = name;
        }
        metadata.game_image_url = image;
        metadata
    }
}
