// Core data structures for the vipharvest crawler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque private-server invite link
pub type VipLink = String;

/// A detail page discovered on a game's listing page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Absolute detail-page URL
    pub url: String,
    /// Position on the listing page (document order)
    pub position: usize,
}

/// Best-effort metadata scraped from a detail page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub page_title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ServerInfo {
    /// Metadata used when nothing could be read from the page
    pub fn unknown() -> Self {
        Self {
            server_id: "unknown".to_string(),
            page_title: "Unknown".to_string(),
            description: None,
        }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

/// A harvested link together with how and when it was found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub link: VipLink,
    #[serde(default)]
    pub source_url: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub extraction_duration_ms: u64,
    #[serde(default)]
    pub server_info: ServerInfo,
}

impl LinkRecord {
    /// Record for a link with no extraction context (direct saves, tests)
    pub fn bare(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            source_url: String::new(),
            discovered_at: Utc::now(),
            extraction_duration_ms: 0,
            server_info: ServerInfo::unknown(),
        }
    }
}

/// Game-level metadata derived from the listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub game_id: String,
    pub game_name: String,
    pub game_image_url: Option<String>,
    pub category: String,
}

impl GameMetadata {
    /// Placeholder used until the listing page has been read
    pub fn placeholder(game_id: &str) -> Self {
        Self {
            game_id: game_id.to_string(),
            game_name: format!("Game {game_id}"),
            game_image_url: None,
            category: "other".to_string(),
        }
    }
}

/// Harvested links for one (user, game) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameBucket {
    pub game_id: String,
    pub game_name: String,
    #[serde(default)]
    pub game_image_url: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    /// Insertion-ordered, unique
    #[serde(default)]
    pub links: Vec<VipLink>,
    #[serde(default)]
    pub server_details: HashMap<VipLink, LinkRecord>,
}

fn default_category() -> String {
    "other".to_string()
}

impl GameBucket {
    /// Create an empty bucket from game metadata
    pub fn new(metadata: GameMetadata) -> Self {
        Self {
            game_id: metadata.game_id,
            game_name: metadata.game_name,
            game_image_url: metadata.game_image_url,
            category: metadata.category,
            links: Vec::new(),
            server_details: HashMap::new(),
        }
    }

    /// Check whether the link is already stored
    pub fn contains(&self, link: &str) -> bool {
        self.server_details.contains_key(link) || self.links.iter().any(|l| l == link)
    }

    /// Append a record, returning `false` if the link was already present
    pub fn insert(&mut self, record: LinkRecord) -> bool {
        if self.contains(&record.link) {
            return false;
        }
        self.links.push(record.link.clone());
        self.server_details.insert(record.link.clone(), record);
        true
    }

    /// Metadata view of this bucket
    pub fn metadata(&self) -> GameMetadata {
        GameMetadata {
            game_id: self.game_id.clone(),
            game_name: self.game_name.clone(),
            game_image_url: self.game_image_url.clone(),
            category: self.category.clone(),
        }
    }
}

/// Process-wide harvesting counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestStats {
    #[serde(default)]
    pub total_scraped: u64,
    #[serde(default)]
    pub successful_extractions: u64,
    #[serde(default)]
    pub failed_extractions: u64,
    #[serde(default)]
    pub last_scrape_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scrape_duration_seconds: f64,
    #[serde(default)]
    pub throughput_per_minute: f64,
}

impl HarvestStats {
    /// Fold one finished pass into the counters
    pub fn record_pass(&mut self, processed: u64, new_links: u64, elapsed_secs: f64) {
        self.total_scraped += processed;
        self.successful_extractions += new_links;
        self.failed_extractions += processed.saturating_sub(new_links);
        self.last_scrape_time = Some(Utc::now());
        self.scrape_duration_seconds = round2(elapsed_secs);
        self.throughput_per_minute = if elapsed_secs > 0.0 {
            ((processed as f64 / elapsed_secs) * 60.0 * 10.0).round() / 10.0
        } else {
            0.0
        };
    }

    /// Fraction of processed candidates that produced a new link
    pub fn success_rate(&self) -> f64 {
        if self.total_scraped == 0 {
            return 0.0;
        }
        self.successful_extractions as f64 / self.total_scraped as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One entry of a user's usage history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub game_id: String,
    pub link: VipLink,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// A link a user has set aside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub game_id: String,
    pub link: VipLink,
    pub reserved_at: DateTime<Utc>,
}

/// Per-user overview used by presentation code
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserSummary {
    pub user_id: String,
    pub total_games: usize,
    pub total_links: usize,
    pub favorites: usize,
    pub reservations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_insert_is_idempotent() {
        let mut bucket = GameBucket::new(GameMetadata::placeholder("123"));
        assert!(bucket.insert(LinkRecord::bare("https://a")));
        assert!(!bucket.insert(LinkRecord::bare("https://a")));
        assert_eq!(bucket.links, vec!["https://a".to_string()]);
        assert_eq!(bucket.server_details.len(), 1);
    }

    #[test]
    fn test_bucket_preserves_insertion_order() {
        let mut bucket = GameBucket::new(GameMetadata::placeholder("123"));
        for link in ["https://c", "https://a", "https://b"] {
            bucket.insert(LinkRecord::bare(link));
        }
        assert_eq!(bucket.links, vec!["https://c", "https://a", "https://b"]);
    }

    #[test]
    fn test_stats_record_pass() {
        let mut stats = HarvestStats::default();
        stats.record_pass(5, 3, 30.0);
        assert_eq!(stats.total_scraped, 5);
        assert_eq!(stats.successful_extractions, 3);
        assert_eq!(stats.failed_extractions, 2);
        assert_eq!(stats.throughput_per_minute, 10.0);
        assert!(stats.last_scrape_time.is_some());

        stats.record_pass(5, 0, 0.0);
        assert_eq!(stats.total_scraped, 10);
        assert_eq!(stats.failed_extractions, 7);
        assert_eq!(stats.throughput_per_minute, 0.0);
    }

    #[test]
    fn test_success_rate() {
        let mut stats = HarvestStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        stats.record_pass(4, 1, 1.0);
        assert!((stats.success_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_placeholder_metadata() {
        let meta = GameMetadata::placeholder("42");
        assert_eq!(meta.game_name, "Game 42");
        assert_eq!(meta.category, "other");
    }
}
