//! MQTT broker client
//!
//! Pure decisions live in their own modules, I/O in [`client`]:
//!
//! - [`state`] - connection state machine and errors
//! - [`backoff`] - reconnect delays and the attempt cap
//! - [`options`] - broker URL parsing and rumqttc options
//! - [`inbound`] - classifying rumqttc events, forwarding publishes
//! - [`client`] - the event loop supervisor and subscriptions
//!
//! # Usage
//!
//! ```rust,no_run
//! use esp_mqtt_bridge::config::MqttSection;
//! use esp_mqtt_bridge::transport::mqtt::MqttClient;
//! use esp_mqtt_bridge::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtts://broker.example.com:8883".to_string(),
//!     ..MqttSection::default()
//! };
//!
//! let (tx, _rx) = tokio::sync::mpsc::channel(64);
//! let mut client = MqttClient::new(config)?;
//! client.set_message_sender(tx).await;
//! client.connect().await?;
//! client.subscribe(&["status/+", "tasks/update"]).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod backoff;
pub mod client;
pub mod inbound;
pub mod options;
pub mod state;

pub use backoff::{Backoff, Retry};
pub use client::MqttClient;
pub use inbound::{classify, ForwardError, Forwarder, Incoming};
pub use options::BrokerEndpoint;
pub use state::{ConnectionState, MqttError, Transition};
