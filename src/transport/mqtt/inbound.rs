//! What the supervisor does with each rumqttc event
//!
//! [`classify`] is pure; [`Forwarder`] is the only part that touches the
//! dispatcher channel.

use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use thiserror::Error;
use tokio::sync::mpsc;

/// The cases the supervisor distinguishes
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    ConnAck,
    Publish(InboundMessage),
    BrokerDisconnect,
    SubAck { packet_id: u16, reasons: String },
    /// Pings, acks and outgoing packets
    Housekeeping,
}

/// Sort a rumqttc event into [`Incoming`] (pure function)
pub fn classify(event: &Event) -> Incoming {
    let Event::Incoming(packet) = event else {
        return Incoming::Housekeeping;
    };

    match packet {
        Packet::ConnAck(_) => Incoming::ConnAck,
        Packet::Publish(publish) => Incoming::Publish(InboundMessage {
            topic: String::from_utf8_lossy(&publish.topic).into_owned(),
            payload: publish.payload.clone(),
            retain: publish.retain,
        }),
        Packet::Disconnect(_) => Incoming::BrokerDisconnect,
        Packet::SubAck(suback) => Incoming::SubAck {
            packet_id: suback.pkid,
            reasons: format!("{:?}", suback.return_codes),
        },
        _ => Incoming::Housekeeping,
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ForwardError {
    #[error("no dispatcher attached")]
    Detached,
    #[error("dispatcher channel closed")]
    Closed,
}

/// Hands publishes to the dispatcher channel once one is attached
#[derive(Debug, Default)]
pub struct Forwarder {
    sender: Option<mpsc::Sender<InboundMessage>>,
}

impl Forwarder {
    pub fn attach(&mut self, sender: mpsc::Sender<InboundMessage>) {
        self.sender = Some(sender);
    }

    /// Waits for channel capacity, so a slow dispatcher slows the poll loop
    pub async fn forward(&self, message: InboundMessage) -> Result<(), ForwardError> {
        let sender = self.sender.as_ref().ok_or(ForwardError::Detached)?;
        sender.send(message).await.map_err(|_| ForwardError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish};
    use rumqttc::v5::mqttbytes::QoS;

    fn publish(topic: &str, payload: &str, retain: bool) -> Event {
        Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain,
            topic: Bytes::copy_from_slice(topic.as_bytes()),
            pkid: 7,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            properties: None,
        }))
    }

    #[test]
    fn test_classify_session_events() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(classify(&connack), Incoming::ConnAck);

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        assert_eq!(classify(&disconnect), Incoming::BrokerDisconnect);
    }

    #[test]
    fn test_classify_retained_status() {
        assert_eq!(
            classify(&publish("status/esp42", "1", true)),
            Incoming::Publish(InboundMessage {
                topic: "status/esp42".into(),
                payload: Bytes::from_static(b"1"),
                retain: true,
            })
        );
    }

    #[tokio::test]
    async fn test_forwarder_lifecycle() {
        let mut forwarder = Forwarder::default();
        let message = InboundMessage::new("tasks/update", r#"{"c":"A","s":"B"}"#);
        assert_eq!(forwarder.forward(message.clone()).await, Err(ForwardError::Detached));

        let (tx, mut rx) = mpsc::channel(1);
        forwarder.attach(tx);
        forwarder.forward(message.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(message.clone()));

        drop(rx);
        assert_eq!(forwarder.forward(message).await, Err(ForwardError::Closed));
    }
}
