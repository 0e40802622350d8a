//! Broker transport
//!
//! The bridge consumes the broker as a source of `(topic, payload)` pairs.
//! This module defines that contract and the MQTT implementation behind it.

use bytes::Bytes;
use tokio::sync::mpsc;

pub mod mqtt;

/// A message delivered by the broker, not yet decoded
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Payload as text for logging; invalid UTF-8 is replaced
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Transport trait for the broker connection
///
/// Abstracts the broker client so the bridge lifecycle can be exercised
/// against a mock in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and wait for it to acknowledge
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to topic filters; they are re-issued after every reconnect
    async fn subscribe(&mut self, filters: &[&str]) -> Result<(), Self::Error>;

    /// Set the channel inbound messages are forwarded to
    async fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>);

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<mqtt::ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;
}
