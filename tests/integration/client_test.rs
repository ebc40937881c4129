//! Resilient client end to end: cache read-through, shared tier, breaker,
//! rate limits and shutdown.

mod helpers;

use std::time::Duration;

use tokio::time::Instant;

use presence_client::UpstreamResponse;
use presence_core::error::ErrorKind;
use presence_core::types::{PresenceStatus, RecordOrigin};
use presence_resilience::CircuitState;

use helpers::{SharedRemote, TestRelay, ids, presence_body, test_config};

#[tokio::test(start_paused = true)]
async fn test_second_instance_reuses_fetch_from_shared_tier() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());

    let fetched = a.client.fetch_one("s1").await.unwrap();
    assert_eq!(fetched.origin, RecordOrigin::ApiFetch);
    assert_eq!(a.transport.calls("s1"), 1);

    let shared = b.client.fetch_one("s1").await.unwrap();
    assert_eq!(shared, fetched);
    assert_eq!(b.transport.total_calls(), 0);
    assert_eq!(b.client.metrics().counters.cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pushed_update_is_served_without_upstream_call() {
    let relay = TestRelay::local(test_config());
    relay
        .push
        .handle_json(r#"{"user": {"id": "s1"}, "status": "idle", "activities": []}"#)
        .await
        .unwrap();

    let record = relay.client.fetch_one("s1").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Idle);
    assert_eq!(record.origin, RecordOrigin::Push);
    assert_eq!(relay.transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_then_recovers_after_cooldown() {
    let relay = TestRelay::local(test_config());
    relay.transport.script(
        "s1",
        vec![
            UpstreamResponse::new(503, "unavailable"),
            UpstreamResponse::new(502, "bad gateway"),
            UpstreamResponse::new(500, "boom"),
        ],
    );

    let err = relay.client.fetch_one("s1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
    let diagnostics = relay.client.metrics();
    assert_eq!(diagnostics.circuit.state, CircuitState::Open);
    assert_eq!(diagnostics.circuit.opened_count, 1);
    assert_eq!(relay.transport.calls("s1"), 3);

    tokio::time::advance(Duration::from_secs(31)).await;

    let record = relay.client.fetch_one("s2").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
    assert_eq!(relay.client.metrics().circuit.state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_makes_callers_wait_out_the_cooldown() {
    let relay = TestRelay::local(test_config());
    relay.transport.script(
        "s1",
        vec![
            UpstreamResponse::new(503, ""),
            UpstreamResponse::new(503, ""),
            UpstreamResponse::new(503, ""),
        ],
    );
    relay.client.fetch_one("s1").await.unwrap_err();

    let start = Instant::now();
    let record = relay.client.fetch_one("s2").await.unwrap();
    assert_eq!(record.subject_id, "s2");
    // No network attempt was made while the circuit was open.
    assert_eq!(relay.transport.calls("s2"), 1);
    assert!(Instant::now() - start >= Duration::from_secs(29));
    assert!(relay.client.metrics().counters.circuit_rejections >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_response_is_honoured_before_reissue() {
    let relay = TestRelay::local(test_config());
    relay.transport.script(
        "s1",
        vec![UpstreamResponse::new(429, r#"{"retry_after": 0.5}"#).with_retry_after(Duration::from_secs(2))],
    );

    let start = Instant::now();
    let record = relay.client.fetch_one("s1").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
    assert!(Instant::now() - start >= Duration::from_secs(2));
    assert_eq!(relay.transport.calls("s1"), 2);

    let counters = relay.client.metrics().counters;
    assert_eq!(counters.rate_limited, 1);
    assert_eq!(counters.failures, 0);
    // A 429 is not an upstream fault.
    assert_eq!(relay.client.metrics().circuit.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_fetches_only_what_the_shared_tier_lacks() {
    let remote = SharedRemote::new();
    let a = TestRelay::with_remote(test_config(), remote.clone());
    let b = TestRelay::with_remote(test_config(), remote.clone());
    b.transport.set_default_body(presence_body("dnd", None));

    a.client.fetch_batch(&ids(&["s1", "s2"])).await;

    let found = b.client.fetch_batch(&ids(&["s1", "s2", "s3", "s1"])).await;
    assert_eq!(found.len(), 3);
    assert_eq!(found["s1"].status, PresenceStatus::Online);
    assert_eq!(found["s3"].status, PresenceStatus::DoNotDisturb);
    assert_eq!(b.transport.total_calls(), 1);
    assert_eq!(remote.stored("s3").unwrap().status, PresenceStatus::DoNotDisturb);
}

#[tokio::test(start_paused = true)]
async fn test_batch_omits_failures_and_keeps_the_rest() {
    let relay = TestRelay::local(test_config());
    relay
        .transport
        .script("missing", vec![UpstreamResponse::new(404, "{}")]);
    relay
        .transport
        .script("private", vec![UpstreamResponse::new(403, "{}")]);

    let found = relay
        .client
        .fetch_batch(&ids(&["s1", "missing", "private", "s2"]))
        .await;
    assert_eq!(found.len(), 2);
    assert!(found.contains_key("s1") && found.contains_key("s2"));
    assert_eq!(relay.client.metrics().counters.failures, 2);
    assert_eq!(relay.transport.calls("missing"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_a_pending_rate_limit_wait() {
    let mut config = test_config();
    config.rate_limit.capacity = 1;
    config.rate_limit.window_ms = 60_000;
    let relay = TestRelay::local(config);

    relay.client.fetch_one("s1").await.unwrap();

    let (result, _) = tokio::join!(relay.client.fetch_one("s2"), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        relay.shutdown_tx.send(true).unwrap();
    });
    assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
    assert_eq!(relay.transport.calls("s2"), 0);
}
