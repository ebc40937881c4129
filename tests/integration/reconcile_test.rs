//! Push path and reconciliation against a shared remote tier.

mod helpers;

use std::time::Duration;

use presence_core::types::{Activity, ActivityKind, PresenceSnapshot, PresenceStatus, RecordOrigin};

use helpers::{SharedRemote, TestRelay, test_config};

const ONLINE_PLAYING: &str =
    r#"{"user": {"id": "s1"}, "status": "online", "activities": [{"name": "A", "type": 0}]}"#;

fn idle() -> PresenceSnapshot {
    PresenceSnapshot::new(PresenceStatus::Idle, vec![])
}

#[tokio::test(start_paused = true)]
async fn test_lost_push_update_is_repaired_for_every_instance() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());

    a.push.handle_json(ONLINE_PLAYING).await.unwrap();
    let first = a.reconciler.force_sweep().await;
    assert_eq!(first.subjects_swept, 1);
    assert_eq!(first.mismatches, 0);

    // The gateway saw the user go idle, but the update never reached the cache.
    a.store.update("s1", idle());
    assert_eq!(b.cache.get("s1").await.unwrap().status, PresenceStatus::Online);
    b.cache.invalidate("s1").await;

    let sweep = a.reconciler.force_sweep().await;
    assert_eq!(sweep.mismatches, 1);
    assert_eq!(sweep.repairs_succeeded, 1);

    let repaired = remote.stored("s1").unwrap();
    assert_eq!(repaired.status, PresenceStatus::Idle);
    assert!(repaired.activities.is_empty());
    assert_eq!(repaired.origin, RecordOrigin::Reconciliation);
    assert_eq!(b.cache.get("s1").await.unwrap().status, PresenceStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_repair_blocked_by_outage_is_retried_next_sweep() {
    let remote = SharedRemote::new();
    let relay = TestRelay::with_remote(test_config(), remote.clone());
    relay.push.handle_json(ONLINE_PLAYING).await.unwrap();
    relay.store.update("s1", idle());

    remote.set_down(true);
    let blocked = relay.reconciler.force_sweep().await;
    assert_eq!(blocked.repairs_attempted, 1);
    assert_eq!(blocked.repairs_failed, 1);
    assert_eq!(remote.stored("s1").unwrap().status, PresenceStatus::Online);

    remote.set_down(false);
    let retried = relay.reconciler.force_sweep().await;
    assert_eq!(retried.mismatches, 1);
    assert_eq!(retried.repairs_succeeded, 1);
    assert_eq!(remote.stored("s1").unwrap().status, PresenceStatus::Idle);

    let settled = relay.reconciler.force_sweep().await;
    assert_eq!(settled.mismatches, 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_sweeps_repair_until_stopped() {
    let relay = TestRelay::local(test_config());
    relay.push.handle_json(ONLINE_PLAYING).await.unwrap();

    relay.reconciler.start();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(relay.reconciler.last_metrics().unwrap().subjects_swept, 1);

    relay.store.update(
        "s1",
        PresenceSnapshot::new(
            PresenceStatus::Online,
            vec![Activity::new(ActivityKind::Streaming, "B")],
        ),
    );
    tokio::time::sleep(Duration::from_secs(60)).await;
    let record = relay.cache.get("s1").await.unwrap();
    assert_eq!(record.activities[0].name, "B");
    assert_eq!(record.origin, RecordOrigin::Reconciliation);

    relay.reconciler.stop().await;
    assert!(!relay.reconciler.is_running());
    assert!(relay.ledger.is_empty());

    // After a restart every subject is a first sighting again.
    relay.reconciler.start();
    tokio::time::sleep(Duration::from_millis(1)).await;
    let restarted = relay.reconciler.last_metrics().unwrap();
    assert_eq!(restarted.new_subjects, 1);
    assert_eq!(restarted.mismatches, 0);
    relay.reconciler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_process_shutdown_stops_the_reconciler() {
    let relay = TestRelay::local(test_config());
    relay.reconciler.start();
    assert!(relay.reconciler.is_running());

    relay.shutdown_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!relay.reconciler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_push_overrides_an_earlier_api_fetch() {
    let relay = TestRelay::local(test_config());
    relay.client.fetch_one("s1").await.unwrap();

    relay
        .push
        .handle_json(r#"{"user": {"id": "s1"}, "status": "offline"}"#)
        .await
        .unwrap();

    let record = relay.client.fetch_one("s1").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Offline);
    assert_eq!(relay.transport.calls("s1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_push_without_user_is_rejected() {
    let relay = TestRelay::local(test_config());
    let err = relay
        .push
        .handle_json(r#"{"status": "online"}"#)
        .await
        .unwrap_err();
    assert_eq!(err.kind, presence_core::error::ErrorKind::InvalidRequest);
    assert!(relay.store.is_empty());
}
