//! ESP MQTT Bridge
//!
//! Projects device presence and RFID task completions published over MQTT
//! into a Supabase (PostgREST) database.
//!
//! # Overview
//!
//! - `status/<device_id>` with payload `1` or anything else upserts the
//!   device row as online or offline
//! - `tasks/update` with `{"c": "<character rfid>", "s": "<supervisor rfid>"}`
//!   resolves the RFIDs to internal keys and marks the matching task solved
//!
//! Messages flow Broker -> [`dispatcher::Dispatcher`] -> [`events::decode`]
//! -> [`resolver::Resolver`] -> [`mutator::StateMutator`] -> [`store::Store`].
//! The bridge keeps no state of its own; every failure is confined to the
//! message that caused it.
//!
//! # Quick Start
//!
//! ```rust
//! use esp_mqtt_bridge::dispatcher::{Applied, BridgeContext, Dispatcher, Outcome};
//! use esp_mqtt_bridge::testing::InMemoryStore;
//! use esp_mqtt_bridge::transport::InboundMessage;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryStore::new());
//! let dispatcher = Dispatcher::new(BridgeContext::new(store.clone()));
//!
//! let outcome = dispatcher.handle(&InboundMessage::new("status/esp42", "1")).await;
//! assert!(matches!(outcome, Outcome::Applied(Applied::DeviceStatus { online: true, .. })));
//! assert!(store.device("esp42").await.unwrap().online);
//! # });
//! ```

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod mutator;
pub mod observability;
pub mod resolver;
pub mod store;
pub mod testing;
pub mod transport;

pub use bridge::{Bridge, BridgeSettings};
pub use config::{BridgeConfig, ConfigError};
pub use dispatcher::{BridgeContext, Dispatcher, Outcome};
pub use error::{BridgeError, BridgeResult};
pub use events::{BridgeEvent, DecodeError};
pub use resolver::{ResolveError, Resolver};
pub use store::{PostgrestStore, Store, StoreError};
pub use transport::mqtt::MqttClient;
