//! Testing utilities and mock implementations
//!
//! Lets the bridge run end to end without an MQTT broker or a database.

pub mod memory;
pub mod mocks;

pub use memory::{InMemoryStore, StoreCall, TaskRecord};
pub use mocks::*;
