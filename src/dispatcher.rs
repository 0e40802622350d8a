//! Per-message dispatch
//!
//! Every inbound message walks the same state machine:
//!
//! ```text
//! Received -> Decoded -> Resolved -> Mutated -> Acknowledged
//!     \__________\__________\__________> Failed(stage, error)
//! ```
//!
//! Each message is handled in its own task so a slow lookup for one RFID tap
//! never holds up a device status update behind it. Failures are logged and
//! counted here and go no further: the broker connection and every other
//! in-flight message are unaffected, and nothing is retried.

use crate::error::{display_chain, sanitize_error_message, BridgeError};
use crate::events::{decode, BridgeEvent};
use crate::mutator::StateMutator;
use crate::observability::BridgeMetrics;
use crate::resolver::{ResolveError, Resolver};
use crate::store::Store;
use crate::transport::InboundMessage;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

/// How long shutdown waits for handlers that are still running
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Payloads longer than this are cut in logs
const MAX_LOGGED_PAYLOAD: usize = 256;

/// Everything a handler needs, built once at startup
pub struct BridgeContext<S: Store> {
    pub store: Arc<S>,
    pub resolver: Resolver<S>,
    pub mutator: StateMutator<S>,
    pub metrics: Arc<BridgeMetrics>,
}

impl<S: Store> BridgeContext<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            resolver: Resolver::new(store.clone()),
            mutator: StateMutator::new(store.clone()),
            metrics: Arc::new(BridgeMetrics::new()),
            store,
        }
    }
}

/// The step a message failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Resolve,
    Mutate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Resolve => "resolve",
            Stage::Mutate => "mutate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write that went through
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    DeviceStatus {
        device_id: String,
        online: bool,
    },
    TaskSolved {
        character_rfid: String,
        supervisor_rfid: String,
        /// Task rows the update matched; zero is not a failure
        matched: u64,
    },
}

/// Why a message was dropped
#[derive(Debug)]
pub struct Failure {
    /// Step that raised the error
    pub stage: Stage,
    /// Identifier an operator can trace back to a device or RFID tap
    pub subject: Option<String>,
    pub error: BridgeError,
}

/// Terminal state of one message
#[derive(Debug)]
pub enum Outcome {
    Applied(Applied),
    Ignored,
    Failed(Failure),
}

impl Outcome {
    fn failed(stage: Stage, subject: Option<String>, error: impl Into<BridgeError>) -> Self {
        Outcome::Failed(Failure {
            stage,
            subject,
            error: error.into(),
        })
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Routes decoded events to the resolver and mutator
pub struct Dispatcher<S: Store> {
    context: BridgeContext<S>,
}

impl<S: Store + 'static> Dispatcher<S> {
    pub fn new(context: BridgeContext<S>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &BridgeContext<S> {
        &self.context
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.context.metrics.clone()
    }

    /// Process one message to completion or failure; never panics on bad input
    pub async fn handle(&self, message: &InboundMessage) -> Outcome {
        let started = Instant::now();
        self.context.metrics.message_received();

        debug!(
            topic = %message.topic,
            payload = %loggable_payload(message),
            retain = message.retain,
            "Inbound message"
        );

        let outcome = self.process(message).await;
        self.context
            .metrics
            .record_processing_time(started.elapsed());
        self.acknowledge(message, &outcome);
        outcome
    }

    async fn process(&self, message: &InboundMessage) -> Outcome {
        let event = match decode(&message.topic, &message.payload) {
            Ok(event) => event,
            Err(e) => return Outcome::failed(Stage::Decode, None, e),
        };

        match event {
            BridgeEvent::Unrecognized => Outcome::Ignored,
            BridgeEvent::Status(status) => {
                // The device id is already the primary key; nothing to resolve
                match self
                    .context
                    .mutator
                    .apply_device_status(&status.device_id, status.online)
                    .await
                {
                    Ok(()) => Outcome::Applied(Applied::DeviceStatus {
                        device_id: status.device_id,
                        online: status.online,
                    }),
                    Err(e) => Outcome::failed(Stage::Mutate, Some(status.device_id), e),
                }
            }
            BridgeEvent::TaskUpdate(update) => {
                let resolved = match self.context.resolver.resolve(&update).await {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        let subject = resolve_subject(&e);
                        return Outcome::failed(Stage::Resolve, Some(subject), e);
                    }
                };

                match self.context.mutator.apply_resolved(&resolved).await {
                    Ok(matched) => Outcome::Applied(Applied::TaskSolved {
                        character_rfid: update.character_rfid,
                        supervisor_rfid: update.supervisor_rfid,
                        matched,
                    }),
                    Err(e) => Outcome::failed(
                        Stage::Mutate,
                        Some(format!(
                            "c={} s={}",
                            update.character_rfid, update.supervisor_rfid
                        )),
                        e,
                    ),
                }
            }
        }
    }

    /// Final step for every message: count it and report failures
    fn acknowledge(&self, message: &InboundMessage, outcome: &Outcome) {
        let metrics = &self.context.metrics;
        match outcome {
            Outcome::Ignored => {
                metrics.message_ignored();
                debug!(topic = %message.topic, "Ignoring message on unrecognized topic");
            }
            Outcome::Applied(Applied::DeviceStatus { .. }) => metrics.device_updated(),
            Outcome::Applied(Applied::TaskSolved {
                character_rfid,
                supervisor_rfid,
                matched,
            }) => {
                metrics.task_update_applied(*matched);
                if *matched == 0 {
                    debug!(
                        character = %character_rfid,
                        supervisor = %supervisor_rfid,
                        "Task update matched no rows"
                    );
                } else {
                    info!(
                        character = %character_rfid,
                        supervisor = %supervisor_rfid,
                        matched,
                        "Task marked solved"
                    );
                }
            }
            Outcome::Failed(failure) => {
                match &failure.error {
                    BridgeError::Decode(_) => metrics.decode_failed(),
                    BridgeError::Resolve(_) => metrics.resolve_failed(),
                    _ => metrics.mutate_failed(),
                }
                error!(
                    topic = %message.topic,
                    payload = %loggable_payload(message),
                    stage = %failure.stage,
                    subject = failure.subject.as_deref().unwrap_or("-"),
                    error = %sanitize_error_message(&display_chain(&failure.error)),
                    "Message processing failed"
                );
            }
        }
    }

    /// Handle messages until the channel closes or shutdown is signalled
    ///
    /// Messages already queued when shutdown arrives are still handled;
    /// in-flight handlers get [`DRAIN_TIMEOUT`] to finish.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut in_flight = JoinSet::new();
        info!("Dispatcher started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Dispatcher received shutdown signal");
                        while let Ok(message) = receiver.try_recv() {
                            self.spawn_handler(&mut in_flight, message);
                        }
                        break;
                    }
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.reap(result);
                }
                message = receiver.recv() => match message {
                    Some(message) => self.spawn_handler(&mut in_flight, message),
                    None => {
                        debug!("Dispatcher channel closed");
                        break;
                    }
                }
            }
        }

        self.drain(in_flight).await;
        info!("Dispatcher stopped");
    }

    fn spawn_handler(self: &Arc<Self>, in_flight: &mut JoinSet<()>, message: InboundMessage) {
        let dispatcher = Arc::clone(self);
        let span = crate::event_span!(topic = %message.topic);
        in_flight.spawn(
            async move {
                dispatcher.handle(&message).await;
            }
            .instrument(span),
        );
    }

    fn reap(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                self.context.metrics.handler_panicked();
                error!("Message handler panicked: {}", e);
            }
        }
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }
        debug!(pending = in_flight.len(), "Waiting for in-flight handlers");

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(result) = in_flight.join_next().await {
                self.reap(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                aborted = in_flight.len(),
                "In-flight handlers did not finish in time, aborting"
            );
            in_flight.abort_all();
        }
    }
}

/// The RFID behind a resolution failure (pure function)
fn resolve_subject(error: &ResolveError) -> String {
    match error {
        ResolveError::NotFound { key, .. }
        | ResolveError::Ambiguous { key, .. }
        | ResolveError::Lookup { key, .. } => key.clone(),
        ResolveError::NoActiveGame { .. } => "is_active".to_string(),
    }
}

/// Payload text for logs, cut to a sane length (pure function)
fn loggable_payload(message: &InboundMessage) -> String {
    let text = message.payload_text();
    if text.chars().count() <= MAX_LOGGED_PAYLOAD {
        return text.into_owned();
    }
    let cut: String = text.chars().take(MAX_LOGGED_PAYLOAD).collect();
    format!("{cut}...")
}
