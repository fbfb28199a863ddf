//! Link store files on disk: upgrades, rewrites and failures

use std::fs;

use serde_json::{json, Value};
use vipharvest::models::LinkRecord;
use vipharvest::storage::document::{LEGACY_GAME_ID, LEGACY_USER, SCHEMA_VERSION};
use vipharvest::storage::LinkStore;
use vipharvest::utils::error::StorageError;

#[test]
fn test_flat_legacy_file_is_upgraded_on_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vip_links.json");
    let legacy = json!({
        "links": ["https://old/1", "https://old/2"],
        "server_details": {
            "https://old/1": {
                "source_url": "https://servers.test/servers/1",
                "extraction_time": 1.5,
                "discovered_at": "2024-03-01T10:00:00"
            }
        },
        "last_updated": "2024-03-01T10:05:00"
    });
    fs::write(&path, serde_json::to_string_pretty(&legacy).unwrap()).unwrap();

    let mut store = LinkStore::open(&path).unwrap();
    assert_eq!(
        store.get_all(Some(LEGACY_USER), Some(LEGACY_GAME_ID)),
        vec!["https://old/1", "https://old/2"]
    );
    assert!(store.persist());

    let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["schema_version"], json!(SCHEMA_VERSION));
    assert_eq!(written["total_count"], json!(2));
    assert!(written.get("links").is_none());
    assert!(written["links_by_user"][LEGACY_USER][LEGACY_GAME_ID].is_object());

    let reopened = LinkStore::open(&path).unwrap();
    let bucket = reopened.bucket(LEGACY_USER, LEGACY_GAME_ID).unwrap();
    assert_eq!(bucket.server_details["https://old/1"].extraction_duration_ms, 1500);
}

#[test]
fn test_multi_user_file_keeps_user_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vip_links.json");
    let unversioned = json!({
        "links_by_user": {
            "U1": {"123": {"game_name": "Blox Fruits", "category": "rpg", "links": ["https://a"]}}
        },
        "user_favorites": {"U1": ["123"]},
        "user_reserved_servers": {
            "U1": [{"game_id": "123", "link": "https://a", "reserved_at": "2024-03-01T10:00:00Z"}]
        }
    });
    fs::write(&path, unversioned.to_string()).unwrap();

    let store = LinkStore::open(&path).unwrap();

    assert_eq!(store.favorites("U1"), ["123".to_string()]);
    assert_eq!(store.reserved_servers("U1").len(), 1);
    assert_eq!(store.category_of("U1", "123"), "rpg");
    let summary = store.user_summary("U1");
    assert_eq!(summary.total_links, 1);
    assert_eq!(summary.favorites, 1);
}

#[test]
fn test_newer_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vip_links.json");
    fs::write(&path, json!({"schema_version": SCHEMA_VERSION + 1}).to_string()).unwrap();

    let err = LinkStore::open(&path).unwrap_err();
    assert!(matches!(err, StorageError::Migration(_)));
}

#[test]
fn test_corrupt_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vip_links.json");
    fs::write(&path, "{ not json").unwrap();

    assert!(matches!(LinkStore::open(&path), Err(StorageError::Json(_))));
}

#[test]
fn test_persist_failure_reports_false_and_keeps_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    fs::write(&blocker, "").unwrap();

    let mut store = LinkStore::new(blocker.join("vip_links.json"));
    assert!(store.add_link("U1", "123", LinkRecord::bare("https://a")));

    assert!(!store.persist());
    assert_eq!(store.total_count(), 1);
}

#[test]
fn test_persist_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("nested").join("vip_links.json");

    let mut store = LinkStore::new(&path);
    store.add_link("U1", "123", LinkRecord::bare("https://a"));
    assert!(store.persist());
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
}
