//! MQTT client I/O
//!
//! `connect()` hands the rumqttc event loop to a spawned [`Supervisor`],
//! which polls it, publishes [`ConnectionState`] on a watch channel,
//! re-subscribes after each ConnAck and forwards publishes to the
//! dispatcher.

use super::backoff::{Backoff, Retry};
use super::inbound::{classify, Forwarder, Incoming};
use super::options::mqtt_options;
use super::state::{ConnectionState, MqttError, Transition};
use crate::config::MqttSection;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of rumqttc's outgoing request queue
const REQUEST_QUEUE: usize = 10;

/// Grace period for the supervisor after a disconnect request
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

type Filters = Arc<Mutex<Vec<String>>>;

/// Owns the event loop once connected
struct Supervisor {
    client: AsyncClient,
    state: watch::Sender<ConnectionState>,
    stop: watch::Receiver<bool>,
    backoff: Backoff,
    filters: Filters,
    forwarder: Arc<Mutex<Forwarder>>,
    attempts: u32,
}

/// Broker connection feeding the bridge
pub struct MqttClient {
    config: MqttSection,
    client: AsyncClient,
    /// `EventLoop` is not `Sync`; the lock makes the client shareable
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    supervisor: Option<JoinHandle<()>>,
    state: Option<watch::Receiver<ConnectionState>>,
    stop: Option<watch::Sender<bool>>,
    backoff: Backoff,
    filters: Filters,
    forwarder: Arc<Mutex<Forwarder>>,
}

impl MqttClient {
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        let options = mqtt_options(&config)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE);
        let backoff = Backoff::capped(config.max_reconnect_attempts);

        Ok(Self {
            config,
            client,
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            supervisor: None,
            state: None,
            stop: None,
            backoff,
            filters: Arc::default(),
            forwarder: Arc::default(),
        })
    }

    pub fn broker_url(&self) -> &str {
        &self.config.broker_url
    }

    /// Resolve once the state reaches Connected; transient failures are ridden out
    async fn await_connack(
        mut state: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = async {
            loop {
                match &*state.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectFailed(reason.clone()))
                    }
                    _ => {}
                }
                if state.changed().await.is_err() {
                    return Err(MqttError::ConnectFailed(
                        "supervisor stopped before the broker answered".to_string(),
                    ));
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            MqttError::ConnectFailed(format!("no ConnAck within {}s", timeout.as_secs()))
        })?
    }

    /// Connect and return once the broker has acknowledged the session
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| MqttError::ConnectFailed("already connected once".to_string()))?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);
        self.state = Some(state_rx.clone());
        self.stop = Some(stop_tx);

        info!(broker = %self.config.broker_url, "Connecting to MQTT broker");

        let supervisor = Supervisor {
            client: self.client.clone(),
            state: state_tx,
            stop: stop_rx,
            backoff: self.backoff.clone(),
            filters: self.filters.clone(),
            forwarder: self.forwarder.clone(),
            attempts: 0,
        };
        let span = crate::mqtt_span!(broker = %self.config.broker_url);
        self.supervisor = Some(tokio::spawn(supervisor.run(event_loop).instrument(span)));

        Self::await_connack(state_rx, self.backoff.connect_timeout()).await
    }

    /// Send DISCONNECT and stop the supervisor; a no-op before `connect()`
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(stop) = self.stop.take() else {
            debug!("MQTT client never connected");
            return Ok(());
        };

        if let Err(e) = self.client.try_disconnect() {
            warn!("MQTT disconnect request failed: {}", e);
        }
        let _ = stop.send(true);

        if let Some(handle) = self.supervisor.take() {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("MQTT supervisor ended abnormally: {}", e),
                Err(_) => warn!("MQTT supervisor did not stop in time"),
            }
        }

        // Forwarding stops here so the dispatcher sees its channel close
        *self.forwarder.lock().await = Forwarder::default();
        info!("Disconnected from MQTT broker");
        Ok(())
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Subscribe at QoS 1 and remember the filters for every later ConnAck
    pub async fn subscribe(&mut self, filters: &[&str]) -> Result<(), MqttError> {
        let state = self.connection_state().unwrap_or(ConnectionState::Connecting);
        if !state.accepts_subscriptions() {
            return Err(MqttError::NotConnected { state });
        }

        for filter in filters {
            self.client
                .subscribe(*filter, QoS::AtLeastOnce)
                .await
                .map_err(|source| MqttError::SubscribeFailed {
                    filter: filter.to_string(),
                    source,
                })?;

            let mut known = self.filters.lock().await;
            if !known.iter().any(|f| f == filter) {
                known.push(filter.to_string());
            }
        }

        info!(filters = %filters.join(", "), "Subscribed");
        Ok(())
    }
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        debug!("MQTT supervisor started");

        loop {
            let keep_going = tokio::select! {
                changed = self.stop.changed() => changed.is_ok() && !*self.stop.borrow(),
                polled = event_loop.poll() => match polled {
                    Ok(event) => self.on_incoming(classify(&event)).await,
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        self.transition(Transition::Failed(e.to_string()));
                        self.back_off().await
                    }
                },
            };
            if !keep_going {
                break;
            }
        }

        debug!("MQTT supervisor stopped");
    }

    fn transition(&self, transition: Transition) {
        self.state
            .send_modify(|state| *state = state.apply(transition));
    }

    /// Returns false when the loop should end
    async fn on_incoming(&mut self, incoming: Incoming) -> bool {
        match incoming {
            Incoming::ConnAck => {
                info!("Connected to MQTT broker");
                self.transition(Transition::Acknowledged);
                self.attempts = 0;
                self.resubscribe().await;
                true
            }
            Incoming::Publish(message) => {
                self.forward(message).await;
                true
            }
            Incoming::BrokerDisconnect => {
                warn!("MQTT broker closed the connection");
                self.transition(Transition::BrokerClosed);
                self.back_off().await
            }
            Incoming::SubAck { packet_id, reasons } => {
                debug!(packet_id, reasons = %reasons, "Subscription acknowledged");
                true
            }
            Incoming::Housekeeping => true,
        }
    }

    async fn forward(&self, message: InboundMessage) {
        debug!(topic = %message.topic, retain = message.retain, "MQTT publish received");
        let topic = message.topic.clone();
        if let Err(e) = self.forwarder.lock().await.forward(message).await {
            warn!(topic = %topic, "Dropped MQTT message: {}", e);
        }
    }

    /// Re-issue known filters; the broker may have dropped the session
    async fn resubscribe(&self) {
        let filters = self.filters.lock().await.clone();
        for filter in &filters {
            // try_subscribe: this loop drains the request queue, so awaiting could deadlock
            if let Err(e) = self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                error!(filter = %filter, "Re-subscribe failed: {}", e);
            }
        }
    }

    /// Wait out the backoff delay; false when retrying is over
    async fn back_off(&mut self) -> bool {
        let stopping = *self.stop.borrow();
        match self.backoff.next(self.attempts, stopping) {
            Retry::After { attempt, delay } => {
                self.attempts = attempt;
                self.transition(Transition::Retrying(attempt));
                info!(
                    "Reconnect attempt {}/{} in {}ms",
                    attempt,
                    self.backoff.describe_cap(),
                    delay.as_millis()
                );
                tokio::select! {
                    changed = self.stop.changed() => changed.is_ok() && !*self.stop.borrow(),
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            Retry::ShuttingDown => false,
            Retry::Exhausted { attempts } => {
                let reason = format!("gave up after {attempts} reconnect attempts");
                error!("MQTT connection lost for good: {}", reason);
                self.transition(Transition::GaveUp(reason));
                false
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn subscribe(&mut self, filters: &[&str]) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, filters).await
    }

    async fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.forwarder.lock().await.attach(sender);
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        self.connection_state()
            .is_some_and(|state| state.is_terminal())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(stop) = &self.stop {
            let _ = stop.send(true);
        }
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}
