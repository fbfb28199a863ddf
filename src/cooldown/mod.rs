//! Per-user cooldown gate
//!
//! A user is on cooldown while an entry exists for them and is younger than the
//! caller's TTL. Reads delete expired entries, and every check first sweeps
//! entries older than [`SWEEP_CEILING`], so the map never grows without bound.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Entries older than this are dropped regardless of the TTL asked for
pub const SWEEP_CEILING: Duration = Duration::from_secs(60 * 60);

/// In-memory map of user → last harvest instant
#[derive(Debug, Default)]
pub struct CooldownRegistry {
    entries: Mutex<HashMap<String, Instant>>,
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds left on the user's cooldown, or `None` if they may proceed
    ///
    /// TTLs longer than [`SWEEP_CEILING`] are effectively capped by the sweep.
    pub fn check_cooldown(&self, user_id: &str, ttl_minutes: u64) -> Option<u64> {
        let now = Instant::now();
        let ttl = Duration::from_secs(ttl_minutes.saturating_mul(60));
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let before = entries.len();
        entries.retain(|_, at| now.duration_since(*at) < SWEEP_CEILING);
        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!(swept, "Swept stale cooldown entries");
        }

        let elapsed = now.duration_since(*entries.get(user_id)?);
        if elapsed >= ttl {
            entries.remove(user_id);
            return None;
        }

        Some(ceil_secs(ttl - elapsed))
    }

    /// Start the user's cooldown now
    pub fn set_cooldown(&self, user_id: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), Instant::now());
        tracing::debug!(user_id = %user_id, "Cooldown set");
    }

    /// Number of tracked users (including not-yet-swept expired entries)
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
