//! Mock transport for testing
//!
//! Stands in for the MQTT client: records subscriptions and lets a test push
//! broker messages straight into the bridge.

use crate::transport::{mqtt::ConnectionState, mqtt::MqttError, InboundMessage, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub should_fail: bool,
    pub connected: bool,
    pub disconnect_calls: usize,
    permanently_disconnected: bool,
    sender: Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose `connect` always fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Simulate the broker giving up for good
    pub fn mark_permanently_disconnected(&mut self) {
        self.connected = false;
        self.permanently_disconnected = true;
    }

    pub async fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    /// Deliver a message as if the broker had published it
    ///
    /// Returns false when no dispatcher is attached or it has gone away.
    pub async fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.inject_message(InboundMessage::new(topic, payload)).await
    }

    pub async fn inject_message(&self, message: InboundMessage) -> bool {
        let sender = self.sender.lock().await.clone();
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MqttError::ConnectFailed(
                "mock broker refused the connection".to_string(),
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.disconnect_calls += 1;
        // Dropping the sender closes the dispatcher channel like the real client
        self.sender.lock().await.take();
        Ok(())
    }

    async fn subscribe(&mut self, filters: &[&str]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MqttError::NotConnected {
                state: ConnectionState::Connecting,
            });
        }
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.extend(filters.iter().map(|f| f.to_string()));
        Ok(())
    }

    async fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *self.sender.lock().await = Some(sender);
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.permanently_disconnected {
            Some(ConnectionState::PermanentlyDisconnected(
                "mock broker gone".to_string(),
            ))
        } else if self.connected {
            Some(ConnectionState::Connected)
        } else {
            None
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        self.permanently_disconnected
    }
}
