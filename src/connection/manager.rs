//! Connection manager
//!
//! Owns the device link for the lifetime of the process:
//! - opens the WebSocket and keeps one generation of transport alive
//! - probes liveness with a heartbeat and declares silent links dead
//! - schedules exactly one reconnect after any failure
//! - routes inbound frames to the handler registry by `type`
//!
//! All transitions run on a single task; callers talk to it through a
//! command channel and observe it through [`LinkEvent`] broadcasts.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{InboundFrame, InboundMessage, OutboundMessage};

use super::backoff::{ReconnectDelays, ReconnectPolicy};
use super::handlers::{Dispatch, HandlerRegistry};
use super::state::{ConnectionState, HeartbeatVerdict, LinkState};
use super::transport::{Connector, Frame, FrameSink, Link, WsConnector};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Connection manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Device WebSocket endpoint
    pub endpoint: Url,

    /// Time between heartbeat probes
    pub heartbeat_interval: Duration,

    /// Silence after which the link is declared dead
    pub heartbeat_timeout: Duration,

    /// Limit for a single connection attempt
    pub connect_timeout: Duration,

    /// Delay policy between attempts
    pub reconnect: ReconnectPolicy,

    /// Outbound command queue size
    pub command_queue_size: usize,

    /// Link event broadcast capacity
    pub event_capacity: usize,
}

impl ManagerConfig {
    /// Defaults for everything but the endpoint
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            command_queue_size: 32,
            event_capacity: 64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Events and Commands
// ─────────────────────────────────────────────────────────────────

/// Observable link activity
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Connection state changed
    StateChanged(ConnectionState),
    /// A reconnect attempt will start after `delay`
    ReconnectScheduled { delay: Duration },
    /// User-facing outcome of an operation
    Notification { message: String, success: bool },
}

enum ManagerCommand {
    Send(OutboundMessage),
    Stop(oneshot::Sender<()>),
}

/// Signals from a transport, tagged with the generation that produced them
enum TransportEvent {
    Opened { generation: u64, sink: Box<dyn FrameSink> },
    Text { generation: u64, text: String },
    Closed { generation: u64, reason: String },
    Failed { generation: u64, error: Error },
}

// ─────────────────────────────────────────────────────────────────
// Connection Manager
// ─────────────────────────────────────────────────────────────────

/// Handle to the device link
pub struct ConnectionManager {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    handlers: HandlerRegistry,
    state: Arc<RwLock<ConnectionState>>,
    events: broadcast::Sender<LinkEvent>,
    command_tx: Option<mpsc::Sender<ManagerCommand>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager that talks through `connector`
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            connector,
            handlers: HandlerRegistry::new(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            events,
            command_tx: None,
            task: None,
        }
    }

    /// Create a manager for a real WebSocket endpoint
    pub fn websocket(config: ManagerConfig) -> Self {
        Self::new(config, Arc::new(WsConnector))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register a handler for a message type. Takes effect on the next
    /// `start`.
    pub fn on<F>(&mut self, kind: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.handlers.on(kind, handler);
        self
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Current state as last published by the link task
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawn the link task and begin the first connection attempt
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::Internal("connection manager already started".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("connection manager needs a tokio runtime".to_string()))?;

        let queue = self.config.command_queue_size.max(1);
        let (command_tx, command_rx) = mpsc::channel(queue);
        let (transport_tx, transport_rx) = mpsc::channel(queue);

        let link_task = LinkTask {
            link: LinkState::new(Instant::now(), self.config.heartbeat_timeout),
            delays: ReconnectDelays::new(self.config.reconnect.clone()),
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            handlers: self.handlers.clone(),
            shared: Arc::clone(&self.state),
            events: self.events.clone(),
            transport_tx,
            sink: None,
            pump: None,
            heartbeat: None,
        };

        self.task = Some(runtime.spawn(link_task.run(command_rx, transport_rx)));
        self.command_tx = Some(command_tx);
        Ok(())
    }

    /// Send a message if the link is up.
    ///
    /// Nothing is queued for later: while disconnected the message is
    /// dropped, a notification is raised and `NotConnected` returned.
    pub fn send(&self, message: OutboundMessage) -> Result<()> {
        let message_type = message.type_name();
        let state = self.connection_state();

        let command_tx = match (&self.command_tx, state) {
            (Some(tx), ConnectionState::Connected) => tx,
            _ => {
                warn!(message_type, state = %state, "Not connected, message dropped");
                notify(&self.events, "Not connected to device", false);
                return Err(Error::NotConnected {
                    message_type: message_type.to_string(),
                });
            }
        };

        command_tx.try_send(ManagerCommand::Send(message)).map_err(|e| {
            notify(&self.events, format!("Could not send {}", message_type), false);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::Connection("outbound queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::connection_lost("connection manager is not running")
                }
            }
        })
    }

    /// Close the link and cancel any pending reconnect
    pub async fn stop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(ManagerCommand::Stop(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "Link task ended abnormally");
            }
        }
        *self.state.write() = ConnectionState::Disconnected;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn notify(events: &broadcast::Sender<LinkEvent>, message: impl Into<String>, success: bool) {
    // No subscribers is fine
    let _ = events.send(LinkEvent::Notification {
        message: message.into(),
        success,
    });
}

// ─────────────────────────────────────────────────────────────────
// Link Task
// ─────────────────────────────────────────────────────────────────

struct LinkTask {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    handlers: HandlerRegistry,
    shared: Arc<RwLock<ConnectionState>>,
    events: broadcast::Sender<LinkEvent>,
    transport_tx: mpsc::Sender<TransportEvent>,
    link: LinkState,
    delays: ReconnectDelays,
    sink: Option<Box<dyn FrameSink>>,
    pump: Option<JoinHandle<()>>,
    heartbeat: Option<Interval>,
}

impl LinkTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ManagerCommand>,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
    ) {
        info!(endpoint = %self.config.endpoint, "Connection manager started");
        self.connect();

        loop {
            let reconnect_at = self.link.reconnect().deadline();

            tokio::select! {
                Some(event) = transport_rx.recv() => self.on_transport_event(event),

                _ = tick(&mut self.heartbeat) => self.send_heartbeat().await,

                _ = sleep_until(reconnect_at) => {
                    if self.link.reconnect_due(Instant::now()) {
                        self.connect();
                    }
                }

                command = commands.recv() => match command {
                    Some(ManagerCommand::Send(message)) => self.transmit(message).await,
                    Some(ManagerCommand::Stop(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        info!("Connection manager stopped");
    }

    /// Start a new transport generation
    fn connect(&mut self) {
        self.teardown();
        let generation = self.link.begin_connect();
        self.publish_state();

        info!(endpoint = %self.config.endpoint, generation, "Connecting to device");

        self.pump = Some(tokio::spawn(pump(
            Arc::clone(&self.connector),
            self.config.endpoint.clone(),
            self.config.connect_timeout,
            generation,
            self.transport_tx.clone(),
        )));
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { generation, sink } => self.on_open(generation, sink),
            TransportEvent::Text { generation, text } => self.on_message(generation, &text),
            TransportEvent::Closed { generation, reason } => self.transport_lost(generation, &reason),
            TransportEvent::Failed { generation, error } => {
                if !error.is_retryable() {
                    error!(generation, error = %error.format_for_log(), "Unexpected transport failure");
                }
                self.transport_lost(generation, &error.to_string())
            }
        }
    }

    fn on_open(&mut self, generation: u64, sink: Box<dyn FrameSink>) {
        if !self.link.opened(generation, Instant::now()) {
            debug!(generation, "Discarding transport from a superseded attempt");
            close_in_background(sink, self.config.connect_timeout);
            return;
        }

        self.sink = Some(sink);
        self.delays.reset();

        let period = self.config.heartbeat_interval;
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);

        info!(endpoint = %self.config.endpoint, generation, "Connected to device");
        self.publish_state();
    }

    fn on_message(&mut self, generation: u64, raw: &str) {
        // Liveness first: even frames we cannot read prove the peer is there
        if !self.link.message_received(generation, Instant::now()) {
            trace!(generation, "Ignoring frame from stale transport");
            return;
        }

        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "Dropping malformed frame");
                return;
            }
        };

        match self.handlers.dispatch(&frame) {
            Dispatch::Handled(count) => {
                trace!(message_type = %frame.kind, handlers = count, "Message dispatched")
            }
            Dispatch::Unhandled => debug!(message_type = %frame.kind, "No handler for message type"),
            Dispatch::Rejected(e) => {
                warn!(message_type = %frame.kind, error = %e, "Dropping undecodable message")
            }
        }
    }

    async fn send_heartbeat(&mut self) {
        let generation = self.link.generation();

        match self.link.heartbeat_verdict(Instant::now(), self.sink.is_some()) {
            HeartbeatVerdict::TimedOut { silence } => {
                warn!(
                    silence_ms = silence.as_millis() as u64,
                    timeout_ms = self.link.clock().timeout().as_millis() as u64,
                    "Heartbeat timeout, connection presumed dead"
                );
                self.transport_lost(generation, "heartbeat timeout");
            }
            HeartbeatVerdict::NotOpen => {
                debug!("Heartbeat skipped, transport not open");
                self.transport_lost(generation, "transport not open");
            }
            HeartbeatVerdict::Send => {
                let message = OutboundMessage::Heartbeat;
                let result = match message.to_json() {
                    Ok(text) => self.write(message.type_name(), text).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => trace!("Heartbeat sent"),
                    Err(e) => {
                        warn!(error = %e, "Heartbeat send failed");
                        self.transport_lost(generation, "heartbeat send failed");
                    }
                }
            }
        }
    }

    async fn transmit(&mut self, message: OutboundMessage) {
        let message_type = message.type_name();

        if self.sink.is_none() {
            warn!(message_type, "Not connected, message dropped");
            notify(&self.events, "Not connected to device", false);
            return;
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(message_type, error = %e, "Failed to serialize message");
                notify(&self.events, format!("Could not encode {}", message_type), false);
                return;
            }
        };

        let generation = self.link.generation();
        match self.write(message_type, text).await {
            Ok(()) => debug!(message_type, "Message sent"),
            Err(e) => {
                error!(message_type, error = %e, "Send failed");
                notify(&self.events, format!("Error sending {}: {}", message_type, e), false);
                self.transport_lost(generation, "send failed");
            }
        }
    }

    /// Push one text frame; a stalled write counts as a failure
    async fn write(&mut self, message_type: &str, text: String) -> Result<()> {
        let limit = self.config.heartbeat_interval;
        let sink = self.sink.as_mut().ok_or_else(|| Error::NotConnected {
            message_type: message_type.to_string(),
        })?;

        match time::timeout(limit, sink.send_text(text)).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection_lost(format!(
                "sending '{}' stalled for {}ms",
                message_type,
                limit.as_millis()
            ))),
        }
    }

    /// Single funnel for close, error, timeout and send failure
    fn transport_lost(&mut self, generation: u64, reason: &str) {
        let previous = self.link.state();
        if !self.link.transport_lost(generation) {
            debug!(generation, reason, "Ignoring signal from stale transport");
            return;
        }

        self.teardown();
        if previous == ConnectionState::Disconnected {
            debug!(reason, "Transport signal while already disconnected");
        } else {
            warn!(reason, "Disconnected from device");
        }
        self.publish_state();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.link.reconnect().is_pending() {
            debug!("Reconnect already pending");
            return;
        }

        let delay = self.delays.next_delay();
        if self.link.schedule_reconnect(Instant::now(), delay).is_some() {
            info!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
            let _ = self.events.send(LinkEvent::ReconnectScheduled { delay });
        }
    }

    /// Drop the current transport without touching the state machine
    fn teardown(&mut self) {
        self.heartbeat = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(sink) = self.sink.take() {
            close_in_background(sink, self.config.connect_timeout);
        }
    }

    async fn shutdown(&mut self) {
        self.heartbeat = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            match time::timeout(self.config.connect_timeout, sink.close()).await {
                Ok(Ok(())) => debug!("Transport closed"),
                Ok(Err(e)) => debug!(error = %e, "Transport close failed"),
                Err(_) => debug!("Transport close timed out"),
            }
        }
        self.link.stop();
        self.publish_state();
    }

    fn publish_state(&self) {
        let state = self.link.state();
        let changed = {
            let mut shared = self.shared.write();
            let changed = *shared != state;
            *shared = state;
            changed
        };
        if changed {
            debug!(state = %state, "Connection state changed");
            let _ = self.events.send(LinkEvent::StateChanged(state));
        }
    }
}

/// Open one transport and forward everything it produces
async fn pump(
    connector: Arc<dyn Connector>,
    endpoint: Url,
    connect_timeout: Duration,
    generation: u64,
    tx: mpsc::Sender<TransportEvent>,
) {
    let Link { sink, mut stream } = match time::timeout(connect_timeout, connector.connect(&endpoint)).await {
        Ok(Ok(link)) => link,
        Ok(Err(error)) => {
            let _ = tx.send(TransportEvent::Failed { generation, error }).await;
            return;
        }
        Err(_) => {
            let error = Error::ConnectionTimeout {
                url: endpoint.to_string(),
                timeout_ms: connect_timeout.as_millis() as u64,
            };
            let _ = tx.send(TransportEvent::Failed { generation, error }).await;
            return;
        }
    };

    if tx.send(TransportEvent::Opened { generation, sink }).await.is_err() {
        return;
    }

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(Frame::Text(text)) => TransportEvent::Text { generation, text },
            Ok(Frame::Closed(reason)) => TransportEvent::Closed {
                generation,
                reason: reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by device".to_string()),
            },
            Err(Error::ProtocolMalformed { message }) => {
                warn!(generation, detail = %message, "Skipping unreadable frame");
                continue;
            }
            Err(error) => TransportEvent::Failed { generation, error },
        };

        let terminal = !matches!(event, TransportEvent::Text { .. });
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }

    let _ = tx
        .send(TransportEvent::Closed {
            generation,
            reason: "stream ended".to_string(),
        })
        .await;
}

fn close_in_background(mut sink: Box<dyn FrameSink>, limit: Duration) {
    tokio::spawn(async move {
        match time::timeout(limit, sink.close()).await {
            Ok(Ok(())) => trace!("Old transport closed"),
            Ok(Err(e)) => trace!(error = %e, "Old transport close failed"),
            Err(_) => trace!("Old transport close timed out"),
        }
    });
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
