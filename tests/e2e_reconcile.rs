//! End-to-end reconciliation against a mock feed and a mock aria2 daemon

mod common;

use bangumi_sync::{DownloadStatus, Event, SubscriptionOutcome, SubscriptionStatus};
use common::*;
use std::time::Duration;
use wiremock::MockServer;

#[tokio::test]
async fn test_new_episodes_flow_from_feed_to_aria2() {
    let feeds = MockServer::start().await;
    let aria2 = MockServer::start().await;
    mount_feed(
        &feeds,
        "Frieren",
        rss_feed("Frieren", &[("LoliHouse", 3), ("LoliHouse", 4), ("LoliHouse", 5)]),
    )
    .await;
    mount_add_uri(&aria2, "2089b05ecca3d829").await;
    mount_tell_status(&aria2, "active").await;

    let (engine, _temp_dir) = create_engine(&feeds, Some(format!("{}/jsonrpc", aria2.uri()))).await;
    let followed = engine.follow("Frieren", Some(3)).await.unwrap();
    assert!(followed.is_success(), "{}", followed.message);

    let report = engine.run_cycle(&[]).await.unwrap();

    assert_eq!(
        report.outcome_for("Frieren"),
        Some(&SubscriptionOutcome::Updated {
            name: "Frieren".into(),
            episode: 5,
            enqueued: vec![4, 5],
        })
    );
    assert_eq!(report.dispatch.submitted, 2);
    assert_entry_statuses(
        &engine,
        "Frieren",
        &[(4, DownloadStatus::Downloading), (5, DownloadStatus::Downloading)],
    )
    .await;

    let entries = engine.db.list_entries_for("Frieren").await.unwrap();
    assert_eq!(entries[0].locator, magnet("Frieren", 4));
    assert_eq!(entries[0].dispatch_handle.as_deref(), Some("2089b05ecca3d829"));

    let subscription = engine.db.get_subscription("Frieren").await.unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Updated);
    assert_eq!(subscription.source, SOURCE_ID);

    // The daemon's request carried the secret and the per-episode directory
    let requests = aria2.received_requests().await.unwrap();
    let add_uri: serde_json::Value = requests
        .iter()
        .map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).unwrap())
        .find(|body| body["method"] == "aria2.addUri")
        .unwrap();
    assert_eq!(add_uri["params"][0], "token:s3cret");
    assert!(
        add_uri["params"][2]["dir"]
            .as_str()
            .unwrap()
            .ends_with("Frieren/4")
    );
}

#[tokio::test]
async fn test_completed_transfers_are_recorded_next_cycle() {
    let feeds = MockServer::start().await;
    let aria2 = MockServer::start().await;
    mount_feed(&feeds, "Frieren", rss_feed("Frieren", &[("LoliHouse", 1)])).await;
    mount_add_uri(&aria2, "gid-frieren-01").await;
    mount_tell_status(&aria2, "complete").await;

    let (engine, _temp_dir) = create_engine(&feeds, Some(format!("{}/jsonrpc", aria2.uri()))).await;
    engine.follow("Frieren", Some(0)).await.unwrap();

    engine.run_cycle(&[]).await.unwrap();
    assert_entry_statuses(&engine, "Frieren", &[(1, DownloadStatus::Downloading)]).await;

    let mut events = engine.subscribe();
    let report = engine.run_cycle(&[]).await.unwrap();

    assert!(matches!(
        report.outcome_for("Frieren"),
        Some(SubscriptionOutcome::UpToDate { .. })
    ));
    assert_entry_statuses(&engine, "Frieren", &[(1, DownloadStatus::Downloaded)]).await;
    assert!(
        wait_for_event(&mut events, Duration::from_secs(1), |e| matches!(
            e,
            Event::Downloaded { .. }
        ))
        .await
        .is_some()
    );
}

#[tokio::test]
async fn test_rejected_entries_are_retried_until_accepted() {
    let feeds = MockServer::start().await;
    let aria2 = MockServer::start().await;
    mount_feed(&feeds, "Frieren", rss_feed("Frieren", &[("LoliHouse", 1)])).await;
    mount_add_uri_error(&aria2, "No URI to download.").await;

    let (engine, _temp_dir) = create_engine(&feeds, Some(format!("{}/jsonrpc", aria2.uri()))).await;
    engine.follow("Frieren", Some(0)).await.unwrap();

    let report = engine.run_cycle(&[]).await.unwrap();
    assert_eq!(report.dispatch.rejected, 1);
    let entries = engine.db.list_entries_for("Frieren").await.unwrap();
    assert_eq!(entries[0].status, DownloadStatus::Failed);
    assert_eq!(entries[0].last_error.as_deref(), Some("No URI to download."));

    aria2.reset().await;
    mount_add_uri(&aria2, "gid-retry").await;
    mount_tell_status(&aria2, "active").await;

    let report = engine.run_cycle(&[]).await.unwrap();
    assert_eq!(report.dispatch.retried, 1);
    assert_entry_statuses(&engine, "Frieren", &[(1, DownloadStatus::Downloading)]).await;
}

#[tokio::test]
async fn test_unreachable_aria2_keeps_entries_queued() {
    let feeds = MockServer::start().await;
    mount_feed(&feeds, "Frieren", rss_feed("Frieren", &[("LoliHouse", 1), ("LoliHouse", 2)])).await;

    // Nothing listens on port 1
    let (engine, _temp_dir) =
        create_engine(&feeds, Some("http://127.0.0.1:1/jsonrpc".to_string())).await;
    engine.follow("Frieren", Some(0)).await.unwrap();

    let report = engine.run_cycle(&[]).await.unwrap();

    assert!(matches!(
        report.outcome_for("Frieren"),
        Some(SubscriptionOutcome::Updated { episode: 2, .. })
    ));
    assert_eq!(report.dispatch.submitted, 0);
    assert_entry_statuses(
        &engine,
        "Frieren",
        &[(1, DownloadStatus::NotDownloaded), (2, DownloadStatus::NotDownloaded)],
    )
    .await;
}

#[tokio::test]
async fn test_failing_feed_only_affects_its_subscription() {
    let feeds = MockServer::start().await;
    mount_feed_error(&feeds, "Dungeon Meshi", 503).await;
    mount_feed(&feeds, "Frieren", rss_feed("Frieren", &[("LoliHouse", 7)])).await;

    let (engine, _temp_dir) = create_engine(&feeds, None).await;
    engine.follow("Dungeon Meshi", Some(2)).await.unwrap();
    engine.follow("Frieren", Some(6)).await.unwrap();

    let report = engine.run_cycle(&[]).await.unwrap();

    match report.outcome_for("Dungeon Meshi") {
        Some(SubscriptionOutcome::FetchFailed { reason, .. }) => {
            assert!(reason.contains("503"), "unexpected reason: {reason}")
        }
        other => panic!("expected fetch failure, got {other:?}"),
    }
    assert!(matches!(
        report.outcome_for("Frieren"),
        Some(SubscriptionOutcome::Updated { episode: 7, .. })
    ));

    let dungeon = engine
        .db
        .get_subscription("Dungeon Meshi")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dungeon.episode, 2);
    assert_eq!(dungeon.status, SubscriptionStatus::Following);

    // Without a dispatcher, entries wait for one
    assert_entry_statuses(&engine, "Frieren", &[(7, DownloadStatus::NotDownloaded)]).await;
}

#[tokio::test]
async fn test_follow_without_episode_starts_at_current_release() {
    let feeds = MockServer::start().await;
    mount_feed(
        &feeds,
        "Frieren",
        rss_feed("Frieren", &[("LoliHouse", 10), ("Nekomoe", 11)]),
    )
    .await;

    let (engine, _temp_dir) = create_engine(&feeds, None).await;
    let outcome = engine.follow("Frieren", None).await.unwrap();
    assert!(outcome.is_success(), "{}", outcome.message);

    // Back-catalog is not downloaded
    let report = engine.run_cycle(&[]).await.unwrap();
    assert!(matches!(
        report.outcome_for("Frieren"),
        Some(SubscriptionOutcome::UpToDate { .. })
    ));
    assert_eq!(engine.db.count_entries().await.unwrap(), 0);
}
