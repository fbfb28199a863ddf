//! Multi-round batch harvesting
//!
//! A batch repeats harvest passes over one or two games until the aggregate
//! target is met. It throttles itself with a pause after every
//! `cooldown_every` accepted links and stops early when a whole round yields
//! nothing new. The round count has a hard ceiling.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BatchSettings;
use crate::harvest::HarvestOrchestrator;
use crate::models::VipLink;
use crate::progress::ProgressPublisher;

/// Most games a single batch may cover
pub const MAX_BATCH_GAMES: usize = 2;

/// Runtime parameters of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub per_round_cap: usize,
    pub cooldown_every: usize,
    pub cooldown: Duration,
    pub max_rounds: usize,
    pub game_pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&BatchSettings::default())
    }
}

impl From<&BatchSettings> for BatchConfig {
    fn from(settings: &BatchSettings) -> Self {
        Self {
            per_round_cap: settings.per_round_cap.max(1),
            cooldown_every: settings.cooldown_every.max(1),
            cooldown: Duration::from_secs(settings.cooldown_secs),
            max_rounds: settings.max_rounds,
            game_pause: Duration::from_millis(settings.game_pause_ms),
        }
    }
}

/// One game's pass within a round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundLog {
    pub round: usize,
    pub game_id: String,
    pub requested: usize,
    pub new_links: usize,
    pub processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a finished batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub collected_links: Vec<VipLink>,
    pub rounds_log: Vec<RoundLog>,
    pub rounds_run: usize,
    pub cooldowns_applied: usize,
    pub duration_ms: u64,
    /// `false` only when nothing was collected
    pub success: bool,
}

/// Invalid batch request
#[derive(Error, Debug, PartialEq)]
pub enum BatchError {
    #[error("a batch needs between 1 and {MAX_BATCH_GAMES} games, got {0}")]
    GameCount(usize),

    #[error("target count must be greater than 0")]
    ZeroTarget,

    #[error("invalid batch configuration: {0} must be greater than 0")]
    InvalidConfig(&'static str),
}

/// Drives repeated harvest passes toward an aggregate target
pub struct BatchScheduler {
    orchestrator: Arc<HarvestOrchestrator>,
    config: BatchConfig,
    progress: Option<ProgressPublisher>,
}

impl BatchScheduler {
    pub fn new(orchestrator: Arc<HarvestOrchestrator>, config: BatchConfig) -> Self {
        Self {
            orchestrator,
            config,
            progress: None,
        }
    }

    /// Publish progress while batches run
    pub fn with_progress(mut self, publisher: ProgressPublisher) -> Self {
        self.progress = Some(publisher);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Collect up to `target_count` new links for the user across `game_ids`
    ///
    /// # Errors
    ///
    /// Returns `BatchError` for an empty or oversized game list, a zero
    /// target, or a zero `per_round_cap`/`cooldown_every` in the config.
    /// Failing passes never abort the batch; they are logged in the report.
    pub async fn run_batches(
        &self,
        game_ids: &[String],
        user_id: &str,
        target_count: usize,
    ) -> Result<BatchReport, BatchError> {
        if game_ids.is_empty() || game_ids.len() > MAX_BATCH_GAMES {
            return Err(BatchError::GameCount(game_ids.len()));
        }
        if target_count == 0 {
            return Err(BatchError::ZeroTarget);
        }
        // a zero request would mean "no limit" to the orchestrator
        if self.config.per_round_cap == 0 {
            return Err(BatchError::InvalidConfig("per_round_cap"));
        }
        if self.config.cooldown_every == 0 {
            return Err(BatchError::InvalidConfig("cooldown_every"));
        }

        let started = Instant::now();
        let mut collected: Vec<VipLink> = Vec::new();
        let mut seen: HashSet<VipLink> = HashSet::new();
        let mut rounds_log = Vec::new();
        let mut cooldowns_applied = 0;
        let mut rounds_run = 0;

        tracing::info!(
            user_id = %user_id,
            games = ?game_ids,
            target_count,
            max_rounds = self.config.max_rounds,
            "Batch starting"
        );

        while collected.len() < target_count && rounds_run < self.config.max_rounds {
            rounds_run += 1;
            crate::metrics::record_batch_round();
            let mut round_new = 0;

            for (index, game_id) in game_ids.iter().enumerate() {
                if collected.len() >= target_count {
                    break;
                }
                if index > 0 && !self.config.game_pause.is_zero() {
                    tokio::time::sleep(self.config.game_pause).await;
                }

                let requested = (target_count - collected.len()).min(self.config.per_round_cap);
                let before = collected.len();

                let mut log = RoundLog {
                    round: rounds_run,
                    game_id: game_id.clone(),
                    requested,
                    new_links: 0,
                    processed: 0,
                    error: None,
                };

                match self
                    .orchestrator
                    .run_with_progress(game_id, user_id, requested, self.progress.as_ref())
                    .await
                {
                    Ok(outcome) => {
                        log.processed = outcome.processed_count;
                        for link in outcome.new_links {
                            if collected.len() >= target_count {
                                break;
                            }
                            if seen.insert(link.clone()) {
                                collected.push(link);
                            }
                        }
                        log.new_links = collected.len() - before;
                    }
                    Err(e) => {
                        tracing::warn!(
                            round = rounds_run,
                            game_id = %game_id,
                            error = %e,
                            "Batch pass failed, continuing"
                        );
                        log.processed = e.partial.processed_count;
                        log.error = Some(e.to_string());
                    }
                }

                // each completed pass has already persisted its own links
                round_new += log.new_links;
                rounds_log.push(log);

                if let Some(progress) = &self.progress {
                    progress.set_collected(collected.len() as u64);
                }

                let crossings = collected.len() / self.config.cooldown_every
                    - before / self.config.cooldown_every;
                for _ in 0..crossings {
                    if collected.len() >= target_count {
                        break;
                    }
                    cooldowns_applied += 1;
                    crate::metrics::record_batch_cooldown();
                    if let Some(progress) = &self.progress {
                        progress.add_cooldown();
                    }
                    tracing::info!(
                        collected = collected.len(),
                        pause_secs = self.config.cooldown.as_secs_f64(),
                        "Batch cooldown"
                    );
                    tokio::time::sleep(self.config.cooldown).await;
                }
            }

            tracing::info!(
                round = rounds_run,
                round_new,
                collected = collected.len(),
                target_count,
                "Batch round finished"
            );

            if round_new == 0 {
                tracing::info!(round = rounds_run, "Round yielded nothing new, stopping");
                break;
            }
        }

        let report = BatchReport {
            success: !collected.is_empty(),
            collected_links: collected,
            rounds_log,
            rounds_run,
            cooldowns_applied,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            user_id = %user_id,
            collected = report.collected_links.len(),
            rounds = report.rounds_run,
            cooldowns = report.cooldowns_applied,
            success = report.success,
            "Batch finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let config = BatchConfig::default();
        assert_eq!(config.per_round_cap, 3);
        assert_eq!(config.cooldown_every, 5);
        assert_eq!(config.cooldown, Duration::from_secs(30));
        assert_eq!(config.max_rounds, 10);
        assert_eq!(config.game_pause, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_settings_are_clamped() {
        let settings = BatchSettings {
            per_round_cap: 0,
            cooldown_every: 0,
            ..BatchSettings::default()
        };
        let config = BatchConfig::from(&settings);
        assert_eq!(config.per_round_cap, 1);
        assert_eq!(config.cooldown_every, 1);
    }
}
