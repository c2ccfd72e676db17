//! Connection to the analysis server.
//!
//! [`StreamClient`] is a plain state machine. It never blocks and never reads
//! the clock itself: the owner feeds it [`TransportEvent`]s and the current
//! [`Instant`], and asks it for the next reconnect deadline. The IO lives
//! behind the [`Transport`] trait so the machine can be driven in tests.

mod ws;

use std::time::{Duration, Instant};

use crate::{
    analysis::{parse_payload, AnalysisFrame},
    config::{EngineConfig, ReconnectPolicy},
    Result,
};

pub use ws::WsTransport;

/// Close code sent on a manual disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Ready state of the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for the backoff timer to expire.
    Reconnecting { due: Instant },
}

/// Event reported by a transport. `generation` identifies the connection the
/// event belongs to; events from connections the client has moved past are
/// ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Open,
    Message(String),
    Close(Option<String>),
    Error(String),
}

/// Socket abstraction used by [`StreamClient`].
pub trait Transport {
    /// Starts opening a connection. Completion is reported later through an
    /// `Open` or `Close` event tagged with `generation`. An `Err` means the
    /// connection could not even be constructed.
    fn open(&mut self, url: &str, generation: u64) -> Result<()>;

    /// Sends a text frame on the open connection.
    fn send_text(&mut self, text: &str) -> Result<()>;

    /// Closes the current connection, if any. No further events are expected
    /// for it.
    fn close(&mut self, code: u16, reason: &str);
}

/// Drops frames that arrive closer together than the configured interval.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` and records `now` when enough time has passed since the
    /// last admitted frame.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Reconnecting client for the analysis stream.
#[derive(Debug)]
pub struct StreamClient<T> {
    transport: T,
    url: String,
    device_id: String,
    policy: ReconnectPolicy,
    state: ClientState,
    ready: ConnectionState,
    generation: u64,
    attempts: u32,
    /// Set by a manual disconnect; the next successful open starts a fresh
    /// backoff budget.
    fresh_cycle: bool,
    throttle: FrameThrottle,
    last_timestamp: Option<f64>,
}

impl<T: Transport> StreamClient<T> {
    pub fn new(transport: T, config: &EngineConfig) -> Self {
        Self {
            transport,
            url: config.ws_url.clone(),
            device_id: config.device_id.clone(),
            policy: config.reconnect.clone(),
            state: ClientState::Disconnected,
            ready: ConnectionState::Closed,
            generation: 0,
            attempts: 0,
            fresh_cycle: false,
            throttle: FrameThrottle::new(config.update_interval()),
            last_timestamp: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn ready_state(&self) -> ConnectionState {
        self.ready
    }

    pub fn is_connected(&self) -> bool {
        self.ready == ConnectionState::Open
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Instant at which a pending reconnect should fire.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ClientState::Reconnecting { due } => Some(due),
            _ => None,
        }
    }

    /// Opens a new connection, replacing any current one.
    pub fn connect(&mut self, now: Instant) {
        self.detach();
        self.generation += 1;
        self.last_timestamp = None;
        self.throttle.reset();

        tracing::debug!(url = %self.url, generation = self.generation, "opening analysis stream");
        match self.transport.open(&self.url, self.generation) {
            Ok(()) => {
                self.state = ClientState::Connecting;
                self.ready = ConnectionState::Connecting;
            }
            Err(err) => {
                tracing::debug!(%err, "could not construct transport");
                self.ready = ConnectionState::Closed;
                self.on_unexpected_close(now);
            }
        }
    }

    /// Closes the connection, cancels any pending reconnect and ignores every
    /// event still in flight for the old connection.
    pub fn disconnect(&mut self) {
        if self.state != ClientState::Disconnected || self.ready != ConnectionState::Closed {
            tracing::info!("disconnecting from analysis stream");
        }
        self.detach();
        self.state = ClientState::Disconnected;
        self.fresh_cycle = true;
    }

    /// Manual reconnect: resets the backoff budget and connects immediately.
    pub fn reconnect(&mut self, now: Instant) {
        self.disconnect();
        self.attempts = 0;
        self.connect(now);
    }

    /// Records the active device and forwards it when connected. Never fails.
    pub fn device_changed(&mut self, device_id: &str) {
        self.device_id = device_id.to_string();
        if !self.is_connected() {
            tracing::trace!(device_id, "not connected, device change kept for next open");
            return;
        }
        if let Err(err) = self.transport.send_text(device_id) {
            tracing::debug!(%err, "failed to forward device change");
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Fires a due reconnect.
    pub fn poll(&mut self, now: Instant) {
        if let ClientState::Reconnecting { due } = self.state {
            if now >= due {
                tracing::debug!(attempt = self.attempts, "reconnect timer fired");
                self.connect(now);
            }
        }
    }

    /// Applies one transport event and returns the frames it delivered, if
    /// any survived validation and throttling.
    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        now: Instant,
    ) -> Option<Vec<AnalysisFrame>> {
        if event.generation != self.generation || self.ready == ConnectionState::Closed {
            tracing::trace!(
                generation = event.generation,
                current = self.generation,
                "ignoring event from detached connection"
            );
            return None;
        }

        match event.kind {
            TransportEventKind::Open => {
                self.on_open();
                None
            }
            TransportEventKind::Message(text) => self.on_message(&text, now),
            TransportEventKind::Error(err) => {
                tracing::trace!(%err, "transport error");
                None
            }
            TransportEventKind::Close(reason) => {
                tracing::debug!(?reason, "analysis stream closed");
                self.ready = ConnectionState::Closed;
                self.on_unexpected_close(now);
                None
            }
        }
    }

    fn on_open(&mut self) {
        self.state = ClientState::Connected;
        self.ready = ConnectionState::Open;
        if self.fresh_cycle {
            self.attempts = 0;
            self.fresh_cycle = false;
        }
        tracing::info!(url = %self.url, "connected to analysis stream");

        let device_id = self.device_id.clone();
        if let Err(err) = self.transport.send_text(&device_id) {
            tracing::debug!(%err, "failed to announce device");
        }
    }

    fn on_message(&mut self, text: &str, now: Instant) -> Option<Vec<AnalysisFrame>> {
        if !self.throttle.admit(now) {
            tracing::trace!("frame dropped by throttle");
            return None;
        }

        let frames = match parse_payload(text) {
            Ok(frames) => frames,
            Err(err) => {
                tracing::trace!(%err, "dropping malformed payload");
                return None;
            }
        };

        if let Some(timestamp) = frames.first().and_then(|frame| frame.timestamp) {
            if self.last_timestamp.is_some_and(|last| timestamp <= last) {
                tracing::trace!(timestamp, "dropping stale frame");
                return None;
            }
            self.last_timestamp = Some(timestamp);
        }

        Some(frames)
    }

    fn on_unexpected_close(&mut self, now: Instant) {
        if !self.policy.auto_reconnect {
            self.state = ClientState::Disconnected;
            return;
        }
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.attempts >= self.policy.max_attempts {
            tracing::info!(attempts = self.attempts, "giving up on analysis stream");
            self.state = ClientState::Disconnected;
            return;
        }

        self.attempts += 1;
        let delay = self.policy.delay_for_attempt(self.attempts);
        tracing::debug!(attempt = self.attempts, ?delay, "scheduling reconnect");
        self.state = ClientState::Reconnecting { due: now + delay };
    }

    fn detach(&mut self) {
        if matches!(
            self.ready,
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            self.ready = ConnectionState::Closing;
            self.transport.close(NORMAL_CLOSURE, "Client disconnect");
        }
        self.ready = ConnectionState::Closed;
        // Bumping the generation orphans every event of the old connection.
        self.generation += 1;
        if let ClientState::Reconnecting { .. } = self.state {
            self.state = ClientState::Disconnected;
        }
    }
}
