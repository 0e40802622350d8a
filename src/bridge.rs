//! Bridge lifecycle
//!
//! Wires a broker [`Transport`] to a [`Dispatcher`] over a bounded channel:
//! start connects and subscribes, shutdown disconnects and lets in-flight
//! handlers finish.

use crate::config::BridgeConfig;
use crate::dispatcher::{BridgeContext, Dispatcher, DRAIN_TIMEOUT};
use crate::error::{BridgeError, BridgeResult};
use crate::events::SUBSCRIPTION_FILTERS;
use crate::observability::{BridgeMetrics, MetricsSnapshot};
use crate::store::Store;
use crate::transport::{mqtt::ConnectionState, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Operator hint logged when the startup store check fails
pub const STORE_UNREACHABLE_HINT: &str =
    "check SUPABASE_URL and that the Kong gateway container is running";

/// Runtime knobs taken from [`BridgeConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub channel_capacity: usize,
    pub verify_on_start: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            verify_on_start: true,
        }
    }
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            channel_capacity: config.bridge.channel_capacity,
            verify_on_start: config.store.verify_on_start,
        }
    }
}

/// A running (or ready to run) bridge
pub struct Bridge<T: Transport, S: Store + 'static> {
    transport: T,
    dispatcher: Arc<Dispatcher<S>>,
    settings: BridgeSettings,
    dispatcher_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl<T: Transport, S: Store + 'static> Bridge<T, S> {
    pub fn new(transport: T, store: Arc<S>, settings: BridgeSettings) -> Self {
        Self {
            transport,
            dispatcher: Arc::new(Dispatcher::new(BridgeContext::new(store))),
            settings,
            dispatcher_handle: None,
            shutdown_tx: None,
        }
    }

    /// Probe the backing store; failure is logged, never fatal
    pub async fn verify_store(&self) -> bool {
        match self.dispatcher.context().store.ping().await {
            Ok(()) => {
                info!("Backing store reachable");
                true
            }
            Err(e) => {
                error!(
                    error = %BridgeError::from(e).operator_message(),
                    hint = STORE_UNREACHABLE_HINT,
                    "CRITICAL: backing store unreachable, writes will fail until it recovers"
                );
                false
            }
        }
    }

    /// Start dispatching, connect and subscribe
    ///
    /// The dispatcher is attached before connecting so retained messages
    /// delivered right after the ConnAck are not lost.
    pub async fn start(&mut self) -> BridgeResult<()> {
        if self.dispatcher_handle.is_some() {
            return Err(BridgeError::internal("Bridge already started"));
        }

        if self.settings.verify_on_start {
            self.verify_store().await;
        }

        let (message_tx, message_rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.transport.set_message_sender(message_tx).await;

        let dispatcher = self.dispatcher.clone();
        self.dispatcher_handle = Some(tokio::spawn(dispatcher.run(message_rx, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);

        let transport = &mut self.transport;
        async {
            transport.connect().await.map_err(BridgeError::transport)?;
            transport
                .subscribe(&SUBSCRIPTION_FILTERS)
                .await
                .map_err(BridgeError::transport)
        }
        .instrument(crate::lifecycle_span!(phase = "connect"))
        .await?;

        info!(
            topics = %SUBSCRIPTION_FILTERS.join(", "),
            "Bridge running"
        );
        Ok(())
    }

    /// Disconnect, finish in-flight messages and report final counters
    pub async fn shutdown(&mut self) -> BridgeResult<MetricsSnapshot> {
        self.stop()
            .instrument(crate::lifecycle_span!(phase = "shutdown"))
            .await
    }

    async fn stop(&mut self) -> BridgeResult<MetricsSnapshot> {
        info!("Bridge shutting down");

        if let Err(e) = self.transport.disconnect().await {
            warn!("Error disconnecting from broker: {}", e);
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.dispatcher_handle.take() {
            let grace = DRAIN_TIMEOUT + Duration::from_secs(1);
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Dispatcher task failed: {}", e),
                Err(_) => warn!("Dispatcher did not stop in time"),
            }
        }

        let snapshot = self.metrics().snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!(metrics = %json, "Bridge stopped"),
            Err(_) => info!(?snapshot, "Bridge stopped"),
        }
        Ok(snapshot)
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.dispatcher.metrics()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.transport.connection_state()
    }

    /// Check if the broker connection is gone for good
    pub fn is_permanently_disconnected(&self) -> bool {
        self.transport.is_permanently_disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;
    use crate::testing::{InMemoryStore, MockTransport, StoreCall};

    #[tokio::test]
    async fn test_start_subscribes_to_bridge_topics() {
        let store = Arc::new(InMemoryStore::new());
        let mut bridge = Bridge::new(MockTransport::new(), store, BridgeSettings::default());

        bridge.start().await.unwrap();

        assert!(bridge.transport().is_connected());
        assert_eq!(
            bridge.transport().get_subscriptions().await,
            vec!["status/+".to_string(), "tasks/update".to_string()]
        );
        bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_when_broker_unreachable() {
        let store = Arc::new(InMemoryStore::new());
        let mut bridge = Bridge::new(MockTransport::with_failure(), store, BridgeSettings::default());

        let err = bridge.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let mut bridge = Bridge::new(MockTransport::new(), store, BridgeSettings::default());

        bridge.start().await.unwrap();
        assert!(bridge.start().await.is_err());
        bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_on_start_pings_store() {
        let store = Arc::new(InMemoryStore::new());
        let mut bridge = Bridge::new(MockTransport::new(), store.clone(), BridgeSettings::default());

        bridge.start().await.unwrap();
        assert_eq!(store.calls().await, vec![StoreCall::Ping]);
        bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_store_is_not_fatal() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_table(Table::Devices).await;
        let mut bridge = Bridge::new(MockTransport::new(), store, BridgeSettings::default());

        assert!(!bridge.verify_store().await);
        assert!(bridge.start().await.is_ok());
        bridge.shutdown().await.unwrap();
    }

    #[test]
    fn test_store_hint_names_what_to_check() {
        assert!(STORE_UNREACHABLE_HINT.contains("SUPABASE_URL"));
        assert!(STORE_UNREACHABLE_HINT.contains("Kong"));
    }

    #[tokio::test]
    async fn test_verify_on_start_can_be_disabled() {
        let store = Arc::new(InMemoryStore::new());
        let settings = BridgeSettings {
            verify_on_start: false,
            ..BridgeSettings::default()
        };
        let mut bridge = Bridge::new(MockTransport::new(), store.clone(), settings);

        bridge.start().await.unwrap();
        assert!(store.calls().await.is_empty());
        bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let store = Arc::new(InMemoryStore::new());
        let mut bridge = Bridge::new(MockTransport::new(), store, BridgeSettings::default());

        let snapshot = bridge.shutdown().await.unwrap();
        assert_eq!(snapshot.messages_received, 0);
    }

    #[test]
    fn test_settings_from_config() {
        let config: BridgeConfig = toml::from_str(
            r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[store]
url = "http://localhost:54321"
verify_on_start = false

[bridge]
channel_capacity = 8
"#,
        )
        .unwrap();

        let settings = BridgeSettings::from(&config);
        assert_eq!(settings.channel_capacity, 8);
        assert!(!settings.verify_on_start);
    }
}
