//! Cooldown-gated harvest requests
//!
//! A [`HarvestGate`] owns one [`CooldownRegistry`] for as long as it lives, so
//! it only limits callers that keep it around between requests.

use std::sync::Arc;

use crate::cooldown::CooldownRegistry;
use crate::error::Error;
use crate::harvest::{HarvestOrchestrator, HarvestOutcome};

pub struct HarvestGate {
    orchestrator: Arc<HarvestOrchestrator>,
    cooldowns: CooldownRegistry,
    ttl_minutes: u64,
}

impl HarvestGate {
    pub fn new(orchestrator: Arc<HarvestOrchestrator>, ttl_minutes: u64) -> Self {
        Self {
            orchestrator,
            cooldowns: CooldownRegistry::new(),
            ttl_minutes,
        }
    }

    /// Run a pass for the user unless they harvested within the TTL
    ///
    /// The cooldown starts when the request is accepted, so a failed pass
    /// still counts.
    ///
    /// # Errors
    ///
    /// `Error::Cooldown` while the user is still waiting, otherwise whatever
    /// the pass returns.
    pub async fn request(
        &self,
        game_id: &str,
        user_id: &str,
        want_count: usize,
    ) -> Result<HarvestOutcome, Error> {
        if let Some(remaining_secs) = self.cooldowns.check_cooldown(user_id, self.ttl_minutes) {
            tracing::info!(user_id = %user_id, remaining_secs, "Harvest refused, user on cooldown");
            return Err(Error::Cooldown { remaining_secs });
        }
        self.cooldowns.set_cooldown(user_id);

        Ok(self.orchestrator.run(game_id, user_id, want_count).await?)
    }
}
