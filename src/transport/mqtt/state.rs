//! Broker connection state (pure)
//!
//! The supervisor publishes a [`ConnectionState`] on a watch channel; every
//! change goes through [`ConnectionState::apply`].

use std::fmt;
use thiserror::Error;

/// Where the broker connection currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the first ConnAck
    Connecting,
    Connected,
    /// Lost, with the reason reported by rumqttc or the broker
    Disconnected(String),
    /// Backing off before reconnect attempt `n`
    Reconnecting(u32),
    /// The retry budget is spent; nothing will reconnect
    PermanentlyDisconnected(String),
}

/// Something the supervisor observed that moves the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Acknowledged,
    BrokerClosed,
    Failed(String),
    Retrying(u32),
    GaveUp(String),
}

impl ConnectionState {
    /// Next state after `transition` (pure function)
    ///
    /// A permanent disconnect is terminal.
    pub fn apply(&self, transition: Transition) -> ConnectionState {
        if let ConnectionState::PermanentlyDisconnected(reason) = self {
            return ConnectionState::PermanentlyDisconnected(reason.clone());
        }

        match transition {
            Transition::Acknowledged => ConnectionState::Connected,
            Transition::BrokerClosed => {
                ConnectionState::Disconnected("broker closed the connection".to_string())
            }
            Transition::Failed(reason) => ConnectionState::Disconnected(reason),
            Transition::Retrying(attempt) => ConnectionState::Reconnecting(attempt),
            Transition::GaveUp(reason) => ConnectionState::PermanentlyDisconnected(reason),
        }
    }

    /// Subscriptions can only be sent on a live session
    pub fn accepts_subscriptions(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::PermanentlyDisconnected(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected ({reason})"),
            ConnectionState::Reconnecting(attempt) => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::PermanentlyDisconnected(reason) => {
                write!(f, "permanently disconnected ({reason})")
            }
        }
    }
}

/// Broker client errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL '{0}'")]
    InvalidBrokerUrl(String),

    #[error("Broker connection failed: {0}")]
    ConnectFailed(String),

    #[error("Cannot subscribe while {state}")]
    NotConnected { state: ConnectionState },

    #[error("Subscription to '{filter}' failed")]
    SubscribeFailed {
        filter: String,
        #[source]
        source: rumqttc::v5::ClientError,
    },
}
