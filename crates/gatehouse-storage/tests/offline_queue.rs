//! Offline queue behaviour across the store, the drain worker and the
//! in-memory broker.
//!
//! Run with: cargo test --package gatehouse-storage --test offline_queue

use std::time::Duration;

use gatehouse_core::{AuthDecision, BackoffPolicy, CredentialEvent, CredentialId, Direction, ReaderId};
use gatehouse_network::{
    AnyProbe, AuthorizationClient, ConnectivityMonitor, ManualProbe, MemoryTransport,
};
use gatehouse_protocol::{AuthRequest, TopicSet, WireMessage};
use gatehouse_storage::{DrainConfig, DrainWorker, OfflineStore, OfflineStoreConfig};
use proptest::prelude::*;
use tempfile::TempDir;

fn event(uid: &str) -> CredentialEvent {
    CredentialEvent::new(
        CredentialId::new(uid).unwrap(),
        ReaderId::new("in").unwrap(),
        Direction::Entry,
        vec![0xAA],
    )
}

fn granted() -> AuthDecision {
    AuthDecision::local_fallback(true, "Offline access granted", 0)
}

#[tokio::test(start_paused = true)]
async fn test_failed_front_item_is_retried_before_the_rest() {
    let store = OfflineStore::open(
        OfflineStoreConfig::in_memory(10)
            .item_attempts(2)
            .item_backoff(BackoffPolicy::constant(Duration::from_millis(50))),
    )
    .await
    .unwrap();
    for uid in ["E1", "E2", "E3"] {
        store.enqueue(event(uid), granted()).await;
    }

    let (transport, broker, _incoming) = MemoryTransport::new();
    let client =
        AuthorizationClient::with_default_timeout(transport.into(), TopicSet::for_gate("01").unwrap());
    let (_monitor, connectivity) =
        ConnectivityMonitor::new(AnyProbe::Manual(ManualProbe::new(true)), Duration::from_secs(30));
    let worker = DrainWorker::new(store.clone(), client, connectivity, DrainConfig::default());

    broker.fail_next_publishes(1);
    let report = worker.drain_now().await;
    assert_eq!(report.synced, 3);
    assert!(!report.failed);

    let attempts: Vec<(String, bool, u32)> = broker
        .published()
        .into_iter()
        .filter(|m| m.topic == "gate/01/badge")
        .map(|m| {
            let request = AuthRequest::decode(&m.payload).unwrap();
            let sync_attempts = request.offline.map(|o| o.sync_attempts).unwrap_or_default();
            (request.credential_id.to_string(), m.delivered, sync_attempts)
        })
        .collect();
    assert_eq!(
        attempts,
        vec![
            ("E1".to_string(), false, 0),
            ("E1".to_string(), true, 1),
            ("E2".to_string(), true, 0),
            ("E3".to_string(), true, 0),
        ]
    );
    assert_eq!(store.stats().await.failed_sync_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_item_blocks_cycle_and_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");
    let config = OfflineStoreConfig::persisted(&path, 10)
        .item_attempts(2)
        .item_backoff(BackoffPolicy::constant(Duration::from_millis(10)));

    let store = OfflineStore::open(config.clone()).await.unwrap();
    store.enqueue(event("E1"), granted()).await;
    store.enqueue(event("E2"), granted()).await;

    let (transport, broker, _incoming) = MemoryTransport::new();
    let client =
        AuthorizationClient::with_default_timeout(transport.into(), TopicSet::for_gate("01").unwrap());
    let (_monitor, connectivity) =
        ConnectivityMonitor::new(AnyProbe::Manual(ManualProbe::new(true)), Duration::from_secs(30));
    let worker = DrainWorker::new(store.clone(), client, connectivity, DrainConfig::default());

    broker.fail_next_publishes(2);
    let report = worker.drain_now().await;
    assert!(report.failed);
    assert_eq!(report.synced, 0);
    assert_eq!(report.remaining, 2);
    assert!(broker.delivered_on("gate/01/badge").is_empty());

    let reopened = OfflineStore::open(config).await.unwrap();
    let queued = reopened.snapshot().await;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].event().credential_id().as_str(), "E1");
    assert_eq!(queued[0].sync_attempts(), 2);
    assert_eq!(queued[1].sync_attempts(), 0);
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_queue_never_exceeds_bound_and_keeps_newest(
        max_size in 1usize..16,
        count in 0usize..48,
    ) {
        let rt = runtime();
        let (len, ids, evicted) = rt.block_on(async {
            let store = OfflineStore::open(OfflineStoreConfig::in_memory(max_size)).await.unwrap();
            for i in 0..count {
                store.enqueue(event(&format!("{i:04X}")), granted()).await;
                assert!(store.len().await <= max_size);
            }
            let ids: Vec<String> = store
                .snapshot()
                .await
                .iter()
                .map(|q| q.event().credential_id().to_string())
                .collect();
            (store.len().await, ids, store.stats().await.total_evicted)
        });

        let expected_len = count.min(max_size);
        prop_assert_eq!(len, expected_len);
        prop_assert_eq!(evicted as usize, count - expected_len);

        let expected: Vec<String> = (count - expected_len..count)
            .map(|i| format!("{i:04X}"))
            .collect();
        prop_assert_eq!(ids, expected);
    }
}
