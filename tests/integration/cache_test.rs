//! Dual-tier cache behaviour across relay instances sharing one remote tier.

mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use presence_cache::RemoteOutcome;
use presence_core::types::{Activity, ActivityKind, PresenceRecord, PresenceSnapshot, PresenceStatus, RecordOrigin};

use helpers::{SharedRemote, TestRelay, ids, test_config};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn record(id: &str, status: PresenceStatus, secs: i64) -> PresenceRecord {
    PresenceSnapshot::new(status, vec![Activity::new(ActivityKind::Listening, "radio")])
        .into_record(id, RecordOrigin::ApiFetch, at(secs))
}

#[tokio::test(start_paused = true)]
async fn test_write_on_one_instance_is_read_by_another() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());

    let written = record("s1", PresenceStatus::Online, 0);
    let outcome = a.cache.set(&written).await;
    assert!(matches!(outcome.remote, RemoteOutcome::Written));

    assert_eq!(b.cache.get("s1").await, Some(written.clone()));
    assert_eq!(b.cache.get("s1").await, Some(written));
    let stats = b.cache.stats();
    assert_eq!(stats.remote_hits, 1);
    assert_eq!(stats.local_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_newest_record_wins_across_instances() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());

    a.cache.set(&record("s1", PresenceStatus::Idle, 20)).await;
    let late = b.cache.set(&record("s1", PresenceStatus::Online, 10)).await;
    assert!(matches!(late.remote, RemoteOutcome::Skipped));
    assert!(late.is_ok());

    assert_eq!(remote.stored("s1").unwrap().status, PresenceStatus::Idle);
    // The older local copy was dropped, so B picks up the newer remote record.
    assert_eq!(b.cache.get("s1").await.unwrap().status, PresenceStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_remote_outage_degrades_then_recovers() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());
    a.cache.set(&record("s1", PresenceStatus::Online, 0)).await;

    remote.set_down(true);
    tokio::time::advance(Duration::from_secs(301)).await;

    // Expired in-process entry is better than nothing while Redis is down.
    let stale = a.cache.get("s1").await.unwrap();
    assert_eq!(stale.status, PresenceStatus::Online);
    let stats = a.cache.stats();
    assert_eq!(stats.degraded_reads, 1);
    assert!(!stats.remote_available);
    assert!(b.cache.get("s1").await.is_none());

    let during = a.cache.set(&record("s2", PresenceStatus::Idle, 5)).await;
    assert!(during.stored_locally);
    assert!(matches!(during.remote, RemoteOutcome::Failed(_)));

    remote.set_down(false);
    // Redis answered and no longer holds the expired entry.
    assert!(a.cache.get("s1").await.is_none());
    assert!(a.cache.stats().remote_available);

    let after = a.cache.set(&record("s3", PresenceStatus::Online, 6)).await;
    assert!(matches!(after.remote, RemoteOutcome::Written));
    assert!(b.cache.get("s3").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_offline_records_outlive_active_ones() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());

    a.cache
        .set_many(&[
            record("active", PresenceStatus::DoNotDisturb, 0),
            record("gone", PresenceStatus::Offline, 0),
        ])
        .await;

    tokio::time::advance(Duration::from_secs(301)).await;
    assert!(a.cache.get("active").await.is_none());
    assert!(b.cache.get("active").await.is_none());
    assert!(b.cache.get("gone").await.is_some());

    tokio::time::advance(Duration::from_secs(600)).await;
    assert!(a.cache.get("gone").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_batch_read_uses_one_round_trip() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());

    a.cache
        .set_many(&[
            record("s1", PresenceStatus::Online, 0),
            record("s2", PresenceStatus::Idle, 0),
            record("s3", PresenceStatus::Offline, 0),
        ])
        .await;
    assert_eq!(remote.writes.load(Ordering::SeqCst), 1);

    let found = b.cache.get_many(&ids(&["s1", "s2", "s3", "s4", "s1"])).await;
    assert_eq!(found.len(), 3);
    assert!(!found.contains_key("s4"));
    assert_eq!(remote.reads.load(Ordering::SeqCst), 1);

    // Now served in-process.
    b.cache.get_many(&ids(&["s1", "s2", "s3"])).await;
    assert_eq!(remote.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_reaches_every_instance() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());

    a.cache.set(&record("s1", PresenceStatus::Online, 0)).await;
    a.client.invalidate("s1").await;

    assert!(remote.stored("s1").is_none());
    assert!(a.cache.get("s1").await.is_none());
    assert!(b.cache.get("s1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_drops_entries_past_grace() {
    let relay = TestRelay::local(test_config());
    relay.cache.set(&record("s1", PresenceStatus::Online, 0)).await;

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(relay.cache.sweep_expired(), 0);
    assert_eq!(relay.cache.stats().local_entries, 1);

    tokio::time::advance(Duration::from_secs(600)).await;
    assert_eq!(relay.cache.sweep_expired(), 1);
    assert_eq!(relay.cache.stats().local_entries, 0);
}
