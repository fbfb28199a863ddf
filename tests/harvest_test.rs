//! End-to-end harvest passes against a scripted aggregator

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use vipharvest::error::Error;
use vipharvest::harvest::{HarvestFailure, HarvestGate};
use vipharvest::progress::ProgressPublisher;
use vipharvest::storage::LinkStore;
use vipharvest::utils::error::DriverError;

/// Game "123" with five servers: s2 and s4 never show a link
fn scripted_site() -> Arc<ScriptedSession> {
    let listing = listing_page("Blox Fruits", &server_ids(5));
    ScriptedSession::new(move |url, _| {
        let html = if url == listing_url("123") {
            listing.clone()
        } else if url == detail_url("s1") {
            detail_page("Server 1", "https://a")
        } else if url == detail_url("s3") {
            detail_page("Server 3", "https://b")
        } else if url == detail_url("s5") {
            detail_page("Server 5", "https://c")
        } else {
            empty_detail_page()
        };
        Ok(html)
    })
}

#[tokio::test]
async fn test_harvest_collects_and_persists() {
    let (dir, store) = temp_store();
    let session = scripted_site();
    let launcher = ScriptedLauncher::new(session.clone());
    let orchestrator = orchestrator(launcher.clone(), store.clone());

    let outcome = orchestrator.run("123", "U1", 0).await.unwrap();

    assert_eq!(outcome.new_links_count, 3);
    assert_eq!(outcome.new_links, vec!["https://a", "https://b", "https://c"]);
    assert_eq!(outcome.processed_count, 5);
    assert!(outcome.persisted);
    assert_eq!(outcome.game_metadata.game_name, "Blox Fruits");
    assert_eq!(outcome.game_metadata.category, "rpg");

    {
        let store = store.lock().await;
        let bucket = store.bucket("U1", "123").unwrap();
        assert_eq!(bucket.links, vec!["https://a", "https://b", "https://c"]);
        assert_eq!(
            bucket.server_details["https://b"].source_url,
            detail_url("s3")
        );
        assert_eq!(store.stats().total_scraped, 5);
        assert_eq!(store.category_of("U1", "123"), "rpg");
    }

    // session launched once and closed once
    assert_eq!(launcher.launches(), 1);
    assert_eq!(session.quits(), 1);

    let reopened = LinkStore::open(dir.path().join("vip_links.json")).unwrap();
    assert_eq!(reopened.get_all(Some("U1"), Some("123")).len(), 3);
}

#[tokio::test]
async fn test_second_pass_finds_only_duplicates() {
    let (_dir, store) = temp_store();
    let session = scripted_site();
    let orchestrator = orchestrator(ScriptedLauncher::new(session), store.clone());

    orchestrator.run("123", "U1", 0).await.unwrap();
    let again = orchestrator.run("123", "U1", 0).await.unwrap();

    assert_eq!(again.new_links_count, 0);
    assert_eq!(again.processed_count, 5);
    assert_eq!(store.lock().await.total_count(), 3);
}

#[tokio::test]
async fn test_users_are_isolated() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator(ScriptedLauncher::new(scripted_site()), store.clone());

    orchestrator.run("123", "U1", 0).await.unwrap();
    let other = orchestrator.run("123", "U2", 0).await.unwrap();

    assert_eq!(other.new_links_count, 3);
    let store = store.lock().await;
    assert_eq!(store.get_all(Some("U1"), None).len(), 3);
    assert_eq!(store.get_all(Some("U2"), None).len(), 3);
    assert_eq!(store.total_count(), 6);
}

#[tokio::test]
async fn test_want_count_stops_early() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator(ScriptedLauncher::new(scripted_site()), store.clone());

    let outcome = orchestrator.run("123", "U1", 2).await.unwrap();

    assert_eq!(outcome.new_links, vec!["https://a", "https://b"]);
    // s1, s2 (timeout), s3
    assert_eq!(outcome.processed_count, 3);
}

#[tokio::test]
async fn test_progress_counts_processed_candidates() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator(ScriptedLauncher::new(scripted_site()), store);
    let (publisher, rx) = ProgressPublisher::new();

    orchestrator
        .run_with_progress("123", "U1", 0, Some(&publisher))
        .await
        .unwrap();

    assert_eq!(rx.borrow().processed_count, 5);
}

#[tokio::test]
async fn test_launch_failure_aborts_pass() {
    let (_dir, store) = temp_store();
    let launcher = ScriptedLauncher::broken();
    let orchestrator = orchestrator(launcher.clone(), store.clone());

    let err = orchestrator.run("123", "U1", 0).await.unwrap_err();

    assert!(matches!(err.reason, HarvestFailure::DriverInit(DriverError::Init(_))));
    assert_eq!(err.game_id, "123");
    assert_eq!(err.partial.processed_count, 0);
    // full profile, then the minimal fallback
    assert_eq!(launcher.launches(), 2);
    assert_eq!(store.lock().await.total_count(), 0);
}

#[tokio::test]
async fn test_empty_listing_aborts_and_closes_session() {
    let (_dir, store) = temp_store();
    let session = ScriptedSession::new(|_, _| Ok(empty_detail_page()));
    let orchestrator = orchestrator(ScriptedLauncher::new(session.clone()), store.clone());

    let err = orchestrator.run("123", "U1", 0).await.unwrap_err();

    assert!(matches!(err.reason, HarvestFailure::NoCandidates(_)));
    assert_eq!(session.quits(), 1);
    assert!(store.lock().await.bucket("U1", "123").is_none());
}

#[tokio::test]
async fn test_cancelled_pass_closes_session_once() {
    let (_dir, store) = temp_store();
    let listing = listing_page("Blox Fruits", &server_ids(5));
    // detail pages never show a link, so every extraction waits out its timeout
    let session = ScriptedSession::new(move |url, _| {
        if url == listing_url("123") {
            Ok(listing.clone())
        } else {
            Ok(empty_detail_page())
        }
    });
    let orchestrator = orchestrator(ScriptedLauncher::new(session.clone()), store.clone());

    let result = tokio::time::timeout(
        Duration::from_millis(300),
        orchestrator.run("123", "U1", 0),
    )
    .await;
    assert!(result.is_err());

    // the drop guard quits on a blocking task
    for _ in 0..100 {
        if session.quits() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.quits(), 1);
    assert!(store.lock().await.bucket("U1", "123").is_none());
}

#[tokio::test]
async fn test_gate_refuses_user_within_ttl() {
    let (_dir, store) = temp_store();
    let launcher = ScriptedLauncher::new(scripted_site());
    let orchestrator = Arc::new(orchestrator(launcher.clone(), store));
    let gate = HarvestGate::new(orchestrator, 5);

    let first = gate.request("123", "U1", 0).await.unwrap();
    assert_eq!(first.new_links_count, 3);

    match gate.request("123", "U1", 0).await {
        Err(Error::Cooldown { remaining_secs }) => {
            assert!(remaining_secs > 0 && remaining_secs <= 300);
        }
        other => panic!("expected cooldown, got {other:?}"),
    }
    // refused before a browser was started
    assert_eq!(launcher.launches(), 1);

    let other_user = gate.request("123", "U2", 0).await.unwrap();
    assert_eq!(other_user.new_links_count, 3);
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test]
async fn test_gate_counts_failed_passes() {
    let (_dir, store) = temp_store();
    let launcher = ScriptedLauncher::broken();
    let gate = HarvestGate::new(Arc::new(orchestrator(launcher.clone(), store)), 5);

    assert!(matches!(
        gate.request("123", "U1", 0).await,
        Err(Error::Harvest(_))
    ));
    assert!(matches!(
        gate.request("123", "U1", 0).await,
        Err(Error::Cooldown { .. })
    ));
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test]
async fn test_gate_with_zero_ttl_never_blocks() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator(ScriptedLauncher::new(scripted_site()), store);
    let gate = HarvestGate::new(Arc::new(orchestrator), 0);

    gate.request("123", "U1", 0).await.unwrap();
    let again = gate.request("123", "U1", 0).await.unwrap();
    assert_eq!(again.new_links_count, 0);
}
