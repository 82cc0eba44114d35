//! Connection orchestrator — owns the transport, protocol, hub and monitor.
//!
//! A background task holds all mutable state; public handles talk to it over
//! a command channel and get deferred results over oneshot channels. One task
//! means one logical thread of control: inbound frames are processed strictly
//! in arrival order and no bookkeeping structure is ever mutated
//! concurrently.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use cable_core::{
    CableError, ClientConfig, Command, Encoder, Identifier, Transport, TransportEvent,
};

use crate::channel::{Channel, ChannelSlot, ChannelState};
use crate::hub::Hub;
use crate::monitor::Monitor;
use crate::protocol::{Protocol, ProtocolEvent};

/// Close/disconnect reason that triggers the token-refresh workflow.
pub const TOKEN_EXPIRED: &str = "token_expired";

/// Top-level connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, never connected.
    Idle,
    /// Transport opening / awaiting the server's welcome.
    Connecting,
    /// Welcomed by the server; channels flow.
    Connected,
    /// Transport lost; reconnect may be scheduled.
    Disconnected,
    /// Terminal. Only re-creation gets out of here.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Commands sent from handles to the background task.
pub(crate) enum Op {
    Connect,
    Subscribe {
        channel: String,
        params: Value,
        ops: mpsc::UnboundedSender<Op>,
        reply: oneshot::Sender<Result<Channel, CableError>>,
    },
    Unsubscribe {
        identifier: Identifier,
    },
    Perform {
        identifier: Identifier,
        action: String,
        payload: Value,
        reply: oneshot::Sender<Result<(), CableError>>,
    },
    Close {
        reason: Option<String>,
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<(ConnectionState, usize)>,
    },
}

/// Internal wake-ups produced by episode-scoped helper tasks. Every event
/// carries the episode it belongs to; events from a torn-down episode are
/// ignored.
enum Internal {
    Transport { episode: u64, event: TransportEvent },
    HeartbeatTick { episode: u64 },
    ReconnectDue { episode: u64 },
    RefreshDone { outcome: Result<Option<String>, CableError> },
}

/// Handle to a running connection. Cheap to clone; dropping every handle
/// (including channel handles) shuts the connection down.
#[derive(Clone)]
pub struct Connection {
    ops: mpsc::UnboundedSender<Op>,
}

impl Connection {
    /// Spawn the connection task over `transport` speaking the configured
    /// dialect. Configuration errors surface immediately; everything else
    /// arrives through deferred results and channel events.
    ///
    /// With `lazy: false` the initial connect is issued right away; with
    /// `lazy: true` it waits for the first subscribe (or an explicit
    /// [`connect`](Connection::connect)).
    pub fn spawn(
        transport: Arc<dyn Transport>,
        encoder: Arc<dyn Encoder>,
        config: ClientConfig,
    ) -> Result<Self, CableError> {
        if config.ping_interval.is_zero() {
            return Err(CableError::Config("ping_interval must be positive".into()));
        }
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let monitor = config.monitor.then(|| {
            Monitor::new(
                config.ping_interval,
                config.max_missing_pings,
                config.max_reconnect_attempts,
                config.reconnect_strategy.clone(),
            )
        });
        let task = ConnectionTask {
            state: ConnectionState::Idle,
            episode: 0,
            transport,
            protocol: Protocol::new(config.protocol, encoder),
            hub: Hub::new(),
            monitor,
            lazy: config.lazy,
            monitoring: config.monitor,
            token_refresher: config.token_refresher,
            ops_rx,
            internal_tx,
            internal_rx,
            refreshing: false,
            forwarder: None,
            writer: None,
            writer_tx: None,
            heartbeat: None,
            reconnect_timer: None,
        };
        let eager = !config.lazy;
        tokio::spawn(task.run());

        let connection = Self { ops: ops_tx };
        if eager {
            connection.connect();
        }
        Ok(connection)
    }

    /// Ask the connection to (re)connect. A no-op while connecting,
    /// connected or closed.
    pub fn connect(&self) {
        let _ = self.ops.send(Op::Connect);
    }

    /// Register a channel for `(channel, params)` and return its handle.
    ///
    /// The handle arrives immediately; the server's confirmation (or
    /// rejection) is the handle's first event. When the connection is not
    /// up yet the wire subscribe is deferred until it is.
    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        params: Value,
    ) -> Result<Channel, CableError> {
        let (reply, outcome) = oneshot::channel();
        self.ops
            .send(Op::Subscribe {
                channel: channel.into(),
                params,
                ops: self.ops.clone(),
                reply,
            })
            .map_err(|_| CableError::Closed)?;
        outcome.await.map_err(|_| CableError::Closed)?
    }

    /// Close for good: cancels any scheduled reconnect, fails in-flight
    /// subscribes, closes every channel — in that order. Idempotent.
    pub async fn close(&self, reason: Option<&str>) {
        let (reply, done) = oneshot::channel();
        if self
            .ops
            .send(Op::Close {
                reason: reason.map(str::to_owned),
                reply,
            })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// Current state (`Closed` once the task is gone).
    pub async fn state(&self) -> ConnectionState {
        self.query().await.map_or(ConnectionState::Closed, |(s, _)| s)
    }

    /// Number of channels currently registered in the hub.
    pub async fn subscription_count(&self) -> usize {
        self.query().await.map_or(0, |(_, n)| n)
    }

    async fn query(&self) -> Option<(ConnectionState, usize)> {
        let (reply, outcome) = oneshot::channel();
        self.ops.send(Op::State { reply }).ok()?;
        outcome.await.ok()
    }
}

/// The background task. All fields are owned here; nothing is shared.
struct ConnectionTask {
    state: ConnectionState,
    /// Bumped on every connect attempt and teardown; helper tasks tag their
    /// events with it so stale wake-ups are dropped.
    episode: u64,
    transport: Arc<dyn Transport>,
    protocol: Protocol,
    hub: Hub,
    monitor: Option<Monitor>,
    lazy: bool,
    monitoring: bool,
    token_refresher: Option<Arc<dyn cable_core::TokenRefresher>>,
    ops_rx: mpsc::UnboundedReceiver<Op>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    refreshing: bool,
    forwarder: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    writer_tx: Option<mpsc::UnboundedSender<String>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                op = self.ops_rx.recv() => match op {
                    Some(op) => {
                        if self.handle_op(op) {
                            return;
                        }
                    }
                    // Every handle dropped: tear down quietly.
                    None => {
                        self.shutdown(None);
                        return;
                    }
                },
                Some(event) = self.internal_rx.recv() => {
                    if self.handle_internal(event) {
                        return;
                    }
                }
            }
        }
    }

    /// Returns `true` when the task should stop (terminal close).
    fn handle_op(&mut self, op: Op) -> bool {
        match op {
            Op::Connect => {
                self.start_connect();
                false
            }
            Op::Subscribe {
                channel,
                params,
                ops,
                reply,
            } => {
                let _ = reply.send(self.do_subscribe(channel, params, ops));
                false
            }
            Op::Unsubscribe { identifier } => {
                self.do_unsubscribe(&identifier);
                false
            }
            Op::Perform {
                identifier,
                action,
                payload,
                reply,
            } => {
                let _ = reply.send(self.do_perform(&identifier, &action, &payload));
                false
            }
            Op::Close { reason, reply } => {
                self.shutdown(reason.as_deref());
                let _ = reply.send(());
                true
            }
            Op::State { reply } => {
                let _ = reply.send((self.state, self.hub.len()));
                false
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) -> bool {
        match event {
            Internal::Transport { episode, event } => {
                if episode != self.episode {
                    return false;
                }
                match event {
                    TransportEvent::Opened => {
                        tracing::debug!("transport open, awaiting welcome");
                        false
                    }
                    TransportEvent::Message(raw) => self.handle_frame(&raw),
                    TransportEvent::Closed { reason } => self.handle_connection_lost(reason, true),
                }
            }
            Internal::HeartbeatTick { episode } => {
                if episode != self.episode || self.state != ConnectionState::Connected {
                    return false;
                }
                let stale = self
                    .monitor
                    .as_ref()
                    .is_some_and(|m| m.is_stale(Instant::now()));
                if stale {
                    tracing::warn!("no heartbeat from server, closing stale connection");
                    self.handle_connection_lost(Some("stale connection".into()), true)
                } else {
                    false
                }
            }
            Internal::ReconnectDue { episode } => {
                if episode == self.episode && self.state == ConnectionState::Disconnected {
                    self.start_connect();
                }
                false
            }
            Internal::RefreshDone { outcome } => {
                self.finish_token_refresh(outcome);
                false
            }
        }
    }

    fn handle_frame(&mut self, raw: &str) -> bool {
        match self.protocol.receive(raw) {
            ProtocolEvent::Connected { restored } => {
                self.complete_handshake(restored);
                false
            }
            ProtocolEvent::Ping { timestamp } => {
                tracing::trace!(?timestamp, "heartbeat");
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.record_ping();
                }
                false
            }
            ProtocolEvent::Disconnected { reason, reconnect } => {
                self.handle_connection_lost(reason, reconnect)
            }
            ProtocolEvent::Confirmed { identifier } => {
                match self.hub.get_mut(&identifier) {
                    Some(slot) => slot.confirm(),
                    // Unsubscribe raced the confirmation; nothing to do.
                    None => {
                        tracing::debug!(identifier = %identifier, "confirmation for removed channel")
                    }
                }
                false
            }
            ProtocolEvent::Rejected { identifier, reason } => {
                if let Some(slot) = self.hub.get_mut(&identifier) {
                    slot.reject(&identifier, reason);
                }
                self.hub.prune_closed();
                false
            }
            ProtocolEvent::Message {
                identifier,
                payload,
            } => {
                self.hub.dispatch(&identifier, payload);
                false
            }
            ProtocolEvent::Ignored => false,
        }
    }

    fn do_subscribe(
        &mut self,
        channel: String,
        params: Value,
        ops: mpsc::UnboundedSender<Op>,
    ) -> Result<Channel, CableError> {
        let identifier = Identifier::derive(&channel, &params)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.hub
            .register(identifier.clone(), ChannelSlot::new(channel, params, events_tx))?;
        tracing::debug!(identifier = %identifier, "channel registered");

        match self.state {
            ConnectionState::Connected => self.issue_subscribe(&identifier),
            ConnectionState::Idle if self.lazy => self.start_connect(),
            // Deferred until the connection (re)establishes.
            _ => {}
        }
        Ok(Channel::new(identifier, ops, events_rx))
    }

    fn do_unsubscribe(&mut self, identifier: &Identifier) {
        let Some(mut slot) = self.hub.remove(identifier) else {
            return;
        };
        slot.close(None);
        let command = self.protocol.unsubscribe(identifier);
        if self.state == ConnectionState::Connected {
            // Best effort; a failure here is indistinguishable from a lost
            // connection and handled there.
            self.send_command(command);
        }
    }

    fn do_perform(
        &mut self,
        identifier: &Identifier,
        action: &str,
        payload: &Value,
    ) -> Result<(), CableError> {
        if self.state != ConnectionState::Connected {
            return Err(CableError::disconnected("not connected"));
        }
        match self.hub.get_mut(identifier).map(|slot| slot.state()) {
            Some(ChannelState::Connected) => {}
            Some(state) => return Err(CableError::disconnected(format!("channel is {state}"))),
            None => return Err(CableError::Closed),
        }
        let command = self.protocol.perform(identifier, action, payload)?;
        self.send_command(command);
        Ok(())
    }

    /// Open the transport for a fresh episode: event forwarder, ordered
    /// writer queue, then the (async) open itself.
    fn start_connect(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Disconnected
        ) {
            tracing::debug!(state = %self.state, "connect ignored");
            return;
        }
        self.cancel_episode_tasks();
        self.episode += 1;
        self.state = ConnectionState::Connecting;
        let episode = self.episode;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let internal = self.internal_tx.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if internal.send(Internal::Transport { episode, event }).is_err() {
                    break;
                }
            }
        }));

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
        let transport = self.transport.clone();
        let internal = self.internal_tx.clone();
        self.writer = Some(tokio::spawn(async move {
            while let Some(raw) = write_rx.recv().await {
                if let Err(err) = transport.send(raw).await {
                    tracing::warn!(error = %err, "transport send failed");
                    let _ = internal.send(Internal::Transport {
                        episode,
                        event: TransportEvent::Closed { reason: None },
                    });
                    break;
                }
            }
        }));
        self.writer_tx = Some(write_tx);

        let transport = self.transport.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tracing::info!(url = %transport.url(), "connecting");
            if let Err(err) = transport.open(event_tx).await {
                tracing::warn!(error = %err, "connect failed");
                let _ = internal.send(Internal::Transport {
                    episode,
                    event: TransportEvent::Closed { reason: None },
                });
            }
        });
    }

    /// The server welcomed us: we are connected. Resubscribe every channel
    /// still registered, in insertion order — unless the dialect restored
    /// the previous session, in which case channels resume in place.
    fn complete_handshake(&mut self, restored: bool) {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = %self.state, "unexpected welcome ignored");
            return;
        }
        self.state = ConnectionState::Connected;
        tracing::info!(restored, "connected");
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.record_connected();
        }
        self.start_heartbeat();

        for identifier in self.hub.identifiers() {
            let state = match self.hub.get_mut(&identifier) {
                Some(slot) => slot.state(),
                None => continue,
            };
            match state {
                ChannelState::Connected | ChannelState::Closed => {}
                ChannelState::Disconnected | ChannelState::Subscribing if restored => {
                    if let Some(slot) = self.hub.get_mut(&identifier) {
                        slot.restore();
                    }
                }
                _ => self.issue_subscribe(&identifier),
            }
        }
    }

    fn issue_subscribe(&mut self, identifier: &Identifier) {
        let (channel, params) = match self.hub.get_mut(identifier) {
            Some(slot) => {
                slot.set_subscribing();
                (slot.channel_name().to_owned(), slot.params().clone())
            }
            None => return,
        };
        match self.protocol.subscribe(&channel, &params) {
            // The outcome is routed back through the hub when the server
            // replies; the deferred continuation is dropped here.
            Ok((_, command, _confirmation)) => self.send_command(command),
            Err(err) => tracing::error!(error = %err, "could not build subscribe command"),
        }
    }

    fn send_command(&mut self, command: Command) {
        let raw = match self.protocol.encode(&command) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode command");
                return;
            }
        };
        match &self.writer_tx {
            Some(writer) => {
                let _ = writer.send(raw);
            }
            None => tracing::debug!("no open transport, command dropped"),
        }
    }

    /// Common path for every way a live connection dies: transport close,
    /// heartbeat staleness, server disconnect frame, failed connect attempt.
    /// Returns `true` when the loss is terminal and the task should stop.
    fn handle_connection_lost(&mut self, reason: Option<String>, recoverable: bool) -> bool {
        self.cancel_episode_tasks();
        self.episode += 1;
        let reason_str = reason.clone().unwrap_or_else(|| "connection lost".into());
        tracing::warn!(reason = %reason_str, recoverable, "connection lost");
        self.protocol.reset(&reason_str);
        self.close_transport();

        if !recoverable {
            return self.fatal_teardown();
        }

        if reason.as_deref() == Some(TOKEN_EXPIRED) && self.token_refresher.is_some() {
            self.state = ConnectionState::Disconnected;
            self.hub.drop_connection_all(true);
            self.begin_token_refresh();
            return false;
        }

        if !self.monitoring {
            self.state = ConnectionState::Disconnected;
            self.hub.drop_connection_all(true);
            return false;
        }

        match self.monitor.as_mut().and_then(Monitor::next_reconnect_delay) {
            Some(delay) => {
                self.state = ConnectionState::Disconnected;
                self.hub.drop_connection_all(true);
                self.arm_reconnect(delay);
                false
            }
            None => {
                tracing::error!("reconnect attempts exhausted, giving up");
                self.fatal_teardown()
            }
        }
    }

    fn fatal_teardown(&mut self) -> bool {
        self.hub.drop_connection_all(false);
        self.state = ConnectionState::Closed;
        tracing::info!("connection closed");
        true
    }

    /// Explicit close: cancel the reconnect timer, fail in-flight
    /// subscribes, close every channel — in that order.
    fn shutdown(&mut self, reason: Option<&str>) {
        self.cancel_episode_tasks();
        self.episode += 1;
        self.protocol.reset(reason.unwrap_or("connection closed"));
        self.hub.close_all();
        self.state = ConnectionState::Closed;
        self.close_transport();
        tracing::info!("connection closed");
    }

    fn arm_reconnect(&mut self, delay: Duration) {
        let attempt = self.monitor.as_ref().map_or(0, Monitor::reconnect_attempts);
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        let episode = self.episode;
        let internal = self.internal_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::ReconnectDue { episode });
        }));
    }

    fn start_heartbeat(&mut self) {
        let Some(monitor) = self.monitor.as_ref() else {
            return;
        };
        let interval = monitor.ping_interval();
        let episode = self.episode;
        let internal = self.internal_tx.clone();
        self.heartbeat = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // the immediate first tick
            loop {
                tick.tick().await;
                if internal.send(Internal::HeartbeatTick { episode }).is_err() {
                    break;
                }
            }
        }));
    }

    fn begin_token_refresh(&mut self) {
        if self.refreshing {
            tracing::debug!("token refresh already in flight, expiry ignored");
            return;
        }
        let Some(refresher) = self.token_refresher.clone() else {
            return;
        };
        self.refreshing = true;
        tracing::info!("token expired, refreshing");
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = refresher.refresh().await;
            let _ = internal.send(Internal::RefreshDone { outcome });
        });
    }

    fn finish_token_refresh(&mut self, outcome: Result<Option<String>, CableError>) {
        self.refreshing = false;
        match outcome {
            Ok(new_url) => {
                if let Some(url) = new_url {
                    self.transport.set_url(url);
                }
                if self.state == ConnectionState::Disconnected {
                    self.start_connect();
                }
            }
            // Swallowed: the connection stays disconnected until the next
            // expiry event re-arms the workflow.
            Err(err) => tracing::warn!(error = %err, "token refresh failed"),
        }
    }

    fn close_transport(&self) {
        let transport = self.transport.clone();
        tokio::spawn(async move { transport.close().await });
    }

    fn cancel_episode_tasks(&mut self) {
        for task in [
            self.forwarder.take(),
            self.writer.take(),
            self.heartbeat.take(),
            self.reconnect_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.writer_tx = None;
    }
}
