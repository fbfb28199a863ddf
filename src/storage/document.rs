//! On-disk document layout and the upgrade path from older layouts
//!
//! Three shapes have existed:
//! - current: `links_by_user` (user → game → bucket), tagged with `schema_version`
//! - single-tenant: `links_by_game` (game → bucket)
//! - flat: top-level `links` and `server_details` for one implicit game
//!
//! Anything that is not the current version goes through [`migrate`], which
//! reads fields leniently so timestamps without offsets, float durations and
//! missing keys never abort a load.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{
    GameBucket, GameMetadata, HarvestStats, LinkRecord, Reservation, ServerInfo, UsageEntry,
};
use crate::utils::error::StorageError;

/// Version written by this crate
pub const SCHEMA_VERSION: u32 = 2;

/// Owner of links imported from single-tenant documents
pub const LEGACY_USER: &str = "legacy_migrated";

/// Game that flat documents implicitly belonged to
pub const LEGACY_GAME_ID: &str = "109983668079237";

pub type UserBuckets = BTreeMap<String, BTreeMap<String, GameBucket>>;

/// The whole persisted store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub links_by_user: UserBuckets,
    #[serde(default)]
    pub scraping_stats: HarvestStats,
    #[serde(default)]
    pub usage_history: BTreeMap<String, Vec<UsageEntry>>,
    #[serde(default)]
    pub user_favorites: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub game_categories: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub user_reserved_servers: BTreeMap<String, Vec<Reservation>>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub total_count: usize,
}

impl StoreDocument {
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ..Self::default()
        }
    }
}

/// Parse a document of any known shape into the current layout
///
/// # Errors
///
/// Returns `StorageError::Migration` if the root is not a JSON object, and
/// `StorageError::Json` if a current-version document is malformed.
pub fn migrate(value: Value) -> Result<StoreDocument, StorageError> {
    let Value::Object(root) = value else {
        return Err(StorageError::Migration(
            "document root is not an object".to_string(),
        ));
    };

    let version = root
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if version == u64::from(SCHEMA_VERSION) {
        return Ok(serde_json::from_value(Value::Object(root))?);
    }
    if version > u64::from(SCHEMA_VERSION) {
        return Err(StorageError::Migration(format!(
            "document version {version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    let mut doc = StoreDocument::empty();
    doc.scraping_stats = root.get("scraping_stats").map(lenient_stats).unwrap_or_default();

    if let Some(users) = root.get("links_by_user").and_then(Value::as_object) {
        for (user_id, games) in users {
            let buckets = games
                .as_object()
                .map(|games| lenient_buckets(games))
                .unwrap_or_default();
            doc.links_by_user.insert(user_id.clone(), buckets);
        }
        doc.usage_history = per_user(&root, "usage_history", lenient_usage);
        doc.user_reserved_servers = per_user(&root, "user_reserved_servers", lenient_reservation);
        doc.user_favorites = per_user(&root, "user_favorites", |v| v.as_str().map(str::to_string));
        doc.game_categories = lenient_categories(root.get("game_categories"));
        tracing::info!(users = doc.links_by_user.len(), "Upgraded multi-user document");
    } else if let Some(games) = root.get("links_by_game").and_then(Value::as_object) {
        doc.links_by_user
            .insert(LEGACY_USER.to_string(), lenient_buckets(games));
        tracing::info!(games = games.len(), user = LEGACY_USER, "Migrated single-tenant document");
    } else if root.contains_key("links") || root.contains_key("server_details") {
        let bucket = lenient_bucket(LEGACY_GAME_ID, &Value::Object(root.clone()));
        let mut games = BTreeMap::new();
        games.insert(LEGACY_GAME_ID.to_string(), bucket);
        doc.links_by_user.insert(LEGACY_USER.to_string(), games);
        tracing::info!(game_id = LEGACY_GAME_ID, user = LEGACY_USER, "Migrated flat document");
    }

    for (user_id, games) in &doc.links_by_user {
        let categories = doc.game_categories.entry(user_id.clone()).or_default();
        for (game_id, bucket) in games {
            categories
                .entry(game_id.clone())
                .or_insert_with(|| bucket.category.clone());
        }
    }

    doc.last_updated = root
        .get("last_updated")
        .and_then(parse_timestamp)
        .map(|t| t.to_rfc3339());
    doc.total_count = doc
        .links_by_user
        .values()
        .flat_map(BTreeMap::values)
        .map(|b| b.links.len())
        .sum();

    Ok(doc)
}

/// Accept RFC 3339, ISO timestamps without offset (assumed UTC) and unix seconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            Utc.timestamp_opt(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
                .single()
        }
        _ => None,
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn per_user<T>(
    root: &Map<String, Value>,
    key: &str,
    parse: impl Fn(&Value) -> Option<T>,
) -> BTreeMap<String, Vec<T>> {
    root.get(key)
        .and_then(Value::as_object)
        .map(|users| {
            users
                .iter()
                .map(|(user_id, entries)| {
                    let parsed = entries
                        .as_array()
                        .map(|arr| arr.iter().filter_map(&parse).collect())
                        .unwrap_or_default();
                    (user_id.clone(), parsed)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn lenient_categories(value: Option<&Value>) -> BTreeMap<String, BTreeMap<String, String>> {
    let Some(users) = value.and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    users
        .iter()
        .filter_map(|(user_id, games)| {
            let games = games.as_object()?;
            let map = games
                .iter()
                .filter_map(|(game_id, cat)| Some((game_id.clone(), cat.as_str()?.to_string())))
                .collect();
            Some((user_id.clone(), map))
        })
        .collect()
}

fn lenient_usage(value: &Value) -> Option<UsageEntry> {
    let obj = value.as_object()?;
    Some(UsageEntry {
        game_id: str_field(obj, "game_id")?,
        link: str_field(obj, "link")?,
        action: str_field(obj, "action").unwrap_or_else(|| "unknown".to_string()),
        timestamp: obj
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
    })
}

fn lenient_reservation(value: &Value) -> Option<Reservation> {
    let obj = value.as_object()?;
    Some(Reservation {
        game_id: str_field(obj, "game_id")?,
        link: str_field(obj, "link")?,
        reserved_at: obj
            .get("reserved_at")
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
    })
}

fn lenient_stats(value: &Value) -> HarvestStats {
    let Some(obj) = value.as_object() else {
        return HarvestStats::default();
    };
    let u = |key: &str| obj.get(key).and_then(Value::as_u64).unwrap_or(0);
    let f = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_f64))
            .unwrap_or(0.0)
    };

    HarvestStats {
        total_scraped: u("total_scraped"),
        successful_extractions: u("successful_extractions"),
        failed_extractions: u("failed_extractions"),
        last_scrape_time: obj.get("last_scrape_time").and_then(parse_timestamp),
        scrape_duration_seconds: f(&["scrape_duration_seconds", "scrape_duration"]),
        throughput_per_minute: f(&["throughput_per_minute", "servers_per_minute"]),
    }
}

fn lenient_server_info(value: Option<&Value>) -> ServerInfo {
    let mut info = ServerInfo::unknown();
    if let Some(obj) = value.and_then(Value::as_object) {
        if let Some(id) = str_field(obj, "server_id") {
            info.server_id = id;
        }
        if let Some(title) = str_field(obj, "page_title") {
            info.page_title = title;
        }
        info.description = str_field(obj, "description");
    }
    info
}

fn lenient_record(link: &str, value: Option<&Value>) -> LinkRecord {
    let mut record = LinkRecord::bare(link);
    let Some(obj) = value.and_then(Value::as_object) else {
        return record;
    };

    if let Some(source) = str_field(obj, "source_url") {
        record.source_url = source;
    }
    if let Some(at) = obj.get("discovered_at").and_then(parse_timestamp) {
        record.discovered_at = at;
    }
    record.extraction_duration_ms = obj
        .get("extraction_duration_ms")
        .and_then(Value::as_u64)
        .or_else(|| {
            obj.get("extraction_time")
                .and_then(Value::as_f64)
                .map(|secs| (secs * 1000.0).round() as u64)
        })
        .unwrap_or(0);
    record.server_info = lenient_server_info(obj.get("server_info"));
    record
}

fn lenient_bucket(game_id: &str, value: &Value) -> GameBucket {
    let empty = Map::new();
    let obj = value.as_object().unwrap_or(&empty);
    let placeholder = GameMetadata::placeholder(game_id);

    let mut bucket = GameBucket::new(GameMetadata {
        game_id: game_id.to_string(),
        game_name: str_field(obj, "game_name").unwrap_or(placeholder.game_name),
        game_image_url: str_field(obj, "game_image_url"),
        category: str_field(obj, "category").unwrap_or(placeholder.category),
    });

    let details = obj.get("server_details").and_then(Value::as_object);

    let listed = obj
        .get("links")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for link in listed {
        bucket.insert(lenient_record(link, details.and_then(|d| d.get(link))));
    }

    // details without a matching entry in `links`, in key order
    if let Some(details) = details {
        let mut orphans: Vec<&String> = details.keys().filter(|l| !bucket.contains(l)).collect();
        orphans.sort();
        for link in orphans {
            bucket.insert(lenient_record(link, details.get(link)));
        }
    }

    bucket
}

fn lenient_buckets(games: &Map<String, Value>) -> BTreeMap<String, GameBucket> {
    games
        .iter()
        .map(|(game_id, value)| (game_id.clone(), lenient_bucket(game_id, value)))
        .collect()
}
