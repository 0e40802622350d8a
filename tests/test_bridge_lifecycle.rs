//! Bridge lifecycle with a mock broker and the in-memory store

use esp_mqtt_bridge::bridge::{Bridge, BridgeSettings};
use esp_mqtt_bridge::store::{Store, Table};
use esp_mqtt_bridge::testing::{InMemoryStore, MockTransport};
use esp_mqtt_bridge::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

/// Poll until `check` holds or the deadline passes
async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn started_bridge(store: Arc<InMemoryStore>) -> Bridge<MockTransport, InMemoryStore> {
    let settings = BridgeSettings {
        verify_on_start: false,
        ..BridgeSettings::default()
    };
    let mut bridge = Bridge::new(MockTransport::new(), store, settings);
    bridge.start().await.unwrap();
    bridge
}

#[tokio::test]
async fn test_injected_status_reaches_store() {
    let store = Arc::new(InMemoryStore::new());
    let mut bridge = started_bridge(store.clone()).await;

    assert!(bridge.transport().inject("status/esp42", "1").await);

    let observed = store.clone();
    assert!(
        eventually(|| {
            let observed = observed.clone();
            async move { observed.device("esp42").await.is_some_and(|d| d.online) }
        })
        .await
    );

    let snapshot = bridge.shutdown().await.unwrap();
    assert_eq!(snapshot.messages_received, 1);
    assert_eq!(snapshot.devices_updated, 1);
}

#[tokio::test]
async fn test_task_update_flows_through_bridge() {
    let store = Arc::new(InMemoryStore::new());
    store.add_supervisor(10, "RFID999").await;
    store.add_game(2, true).await;
    store.add_post(100, 10).await;
    store.add_character(50, "RFID123").await;
    store.add_task(1, 100, 2, 50, false).await;

    let mut bridge = started_bridge(store.clone()).await;
    assert!(
        bridge
            .transport()
            .inject("tasks/update", r#"{"c":"RFID123","s":"RFID999"}"#)
            .await
    );

    let observed = store.clone();
    assert!(
        eventually(|| {
            let observed = observed.clone();
            async move { observed.task(1).await.is_some_and(|t| t.solved) }
        })
        .await
    );

    let snapshot = bridge.shutdown().await.unwrap();
    assert_eq!(snapshot.tasks_solved, 1);
    assert_eq!(snapshot.total_failures(), 0);
}

#[tokio::test]
async fn test_bad_messages_do_not_stop_the_bridge() {
    let store = Arc::new(InMemoryStore::new());
    let mut bridge = started_bridge(store.clone()).await;

    let transport = bridge.transport();
    assert!(transport.inject("tasks/update", "not json").await);
    assert!(transport.inject("tasks/update", r#"{"c":"X","s":"Y"}"#).await);
    assert!(transport.inject("unrelated/topic", "1").await);
    assert!(transport.inject("status/esp9", "0").await);

    let observed = store.clone();
    assert!(
        eventually(|| {
            let observed = observed.clone();
            async move { observed.device("esp9").await.is_some() }
        })
        .await
    );

    let snapshot = bridge.shutdown().await.unwrap();
    assert_eq!(snapshot.messages_received, 4);
    assert_eq!(snapshot.decode_failures, 1);
    assert_eq!(snapshot.resolve_failures, 1);
    assert_eq!(snapshot.messages_ignored, 1);
    assert_eq!(snapshot.devices_updated, 1);
}

#[tokio::test]
async fn test_shutdown_finishes_queued_messages() {
    let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(20)));
    let mut bridge = started_bridge(store.clone()).await;

    for i in 0..5 {
        let topic = format!("status/esp{i}");
        assert!(bridge.transport().inject(&topic, "1").await);
    }

    let snapshot = bridge.shutdown().await.unwrap();
    assert_eq!(snapshot.messages_received, 5);
    assert_eq!(store.device_count().await, 5);
    assert_eq!(bridge.transport().disconnect_calls, 1);
}

#[tokio::test]
async fn test_injection_after_shutdown_is_refused() {
    let store = Arc::new(InMemoryStore::new());
    let mut bridge = started_bridge(store.clone()).await;

    bridge.shutdown().await.unwrap();

    assert!(!bridge.transport().is_connected());
    assert!(!bridge.transport().inject("status/esp1", "1").await);
    assert_eq!(store.device_count().await, 0);
}

#[tokio::test]
async fn test_permanent_disconnect_is_reported() {
    let store = Arc::new(InMemoryStore::new());
    let mut bridge = started_bridge(store).await;
    assert!(!bridge.is_permanently_disconnected());

    bridge.transport_mut().mark_permanently_disconnected();

    assert!(bridge.is_permanently_disconnected());
    assert!(bridge.connection_state().is_some());
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_store_outage_at_start_is_logged_not_fatal() {
    let store = Arc::new(InMemoryStore::new());
    store.fail_table(Table::Devices).await;
    let mut bridge = Bridge::new(MockTransport::new(), store.clone(), BridgeSettings::default());

    bridge.start().await.unwrap();
    assert!(store.ping().await.is_err());
    assert!(bridge.transport().is_connected());
    bridge.shutdown().await.unwrap();
}
