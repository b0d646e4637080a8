//! Per-instance WebSocket connection.
//!
//! A [`Connection`] is a handle to a session task that owns the socket. The
//! task connects, performs the subscribe handshake, decodes inbound frames
//! and reconnects with linear backoff after the socket closes. Commands go
//! in over a channel; [`ConnectionEvent`]s come out over another, in session
//! order.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veado_core::SafeParser;
use veado_core::config::{ClientConfig, ConnectionConfig};
use veado_types::{Instance, Request};

use crate::protocol::{ProtocolEvent, decode_frame};
use crate::transport::{self, Inbound, WsStream};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Reconnecting,
}

/// Linear backoff: attempt `k` waits `base_delay * k`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            base_delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Saturates at [`Duration::MAX`].
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Number of the next attempt, or `None` once `attempts` made so far
    /// reaches the maximum.
    #[must_use]
    pub fn next_attempt(&self, attempts: u32) -> Option<u32> {
        attempts
            .checked_add(1)
            .filter(|_| attempts < self.max_attempts)
    }
}

/// Everything a session needs besides the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Label sent as the `n` query parameter
    pub name: String,
    pub listener_token: String,
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    /// Settings for `instance_id` with the default connection name.
    #[must_use]
    pub fn from_config(config: &ClientConfig, instance_id: &str) -> Self {
        Self {
            name: config.connection_name(instance_id),
            listener_token: config.listener_token.clone(),
            policy: ReconnectPolicy::from_config(&config.connection_config),
            connect_timeout: config.connection_config.connection_timeout(),
        }
    }
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub instance_id: String,
    pub uri: String,
    pub state: ConnectionState,
    pub is_connected: bool,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub instance_id: String,
    /// Serial of the emitting connection, see [`Connection::serial`]
    pub serial: u64,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEventKind {
    StateChanged(ConnectionState),
    Connected,
    Disconnected { code: Option<u16>, reason: String },
    Protocol(ProtocolEvent),
    Error(String),
    ReconnectScheduled { attempt: u32, delay: Duration },
    ReconnectExhausted { attempts: u32 },
}

#[derive(Debug)]
enum Command {
    Send(String),
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, message: String) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
    }
}

/// Handle to one instance's session task. Dropping it closes the session.
#[derive(Debug)]
pub struct Connection {
    instance_id: String,
    uri: String,
    serial: u64,
    max_attempts: u32,
    listener_token: String,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Start a session for `instance`. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(
        instance: &Instance,
        settings: ConnectionSettings,
        parser: Arc<SafeParser>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let uri = transport::build_uri(&instance.server, &settings.name);
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            attempts: AtomicU32::new(0),
            last_error: Mutex::new(None),
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = Session {
            instance_id: instance.id.clone(),
            uri: uri.clone(),
            serial,
            listener_token: settings.listener_token.clone(),
            policy: settings.policy,
            connect_timeout: settings.connect_timeout,
            parser,
            shared: Arc::clone(&shared),
            commands: command_rx,
            events,
            cancel: cancel.clone(),
            close: None,
        };
        info!("[{}] Connecting to {}", instance.id, uri);
        let task = tokio::spawn(session.run());

        Self {
            instance_id: instance.id.clone(),
            uri,
            serial,
            max_attempts: settings.policy.max_attempts,
            listener_token: settings.listener_token,
            shared,
            commands,
            cancel,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Process-unique id distinguishing this connection from earlier ones
    /// for the same instance.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        let state = self.state();
        ConnectionInfo {
            instance_id: self.instance_id.clone(),
            uri: self.uri.clone(),
            state,
            is_connected: state == ConnectionState::Open,
            reconnect_attempts: self.reconnect_attempts(),
            last_error: self.shared.last_error(),
        }
    }

    /// Queue a request on the open socket. Returns `false` without sending
    /// when the connection is not open.
    pub fn send(&self, request: &Request) -> bool {
        if !self.is_connected() {
            debug!("[{}] Not connected, dropping {:?}", self.instance_id, request.event);
            return false;
        }
        match request.to_json() {
            Ok(json) => self.commands.send(Command::Send(json)).is_ok(),
            Err(e) => {
                warn!("[{}] Failed to serialize request: {}", self.instance_id, e);
                false
            }
        }
    }

    pub fn set_avatar_state(&self, state: &str) -> bool {
        self.send(&Request::set_state(state))
    }

    pub fn request_thumbnail(&self, state: &str, width: Option<u32>, height: Option<u32>) -> bool {
        self.send(&Request::thumbnail(state, width, height))
    }

    pub fn request_instance_info(&self) -> bool {
        self.send(&Request::instance_info())
    }

    pub fn request_node_list(&self) -> bool {
        self.send(&Request::node_list())
    }

    pub fn request_state_list(&self) -> bool {
        self.send(&Request::list_states())
    }

    pub fn request_state_peek(&self) -> bool {
        self.send(&Request::peek_state())
    }

    pub fn start_listener(&self) -> bool {
        self.send(&Request::listen(self.listener_token.as_str()))
    }

    pub fn stop_listener(&self) -> bool {
        self.send(&Request::unlisten(self.listener_token.as_str()))
    }

    /// Stop the session. An open socket is unsubscribed and closed; a
    /// pending reconnect is abandoned. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        info!("[{}] Closing connection", self.instance_id);
        self.shared.attempts.store(self.max_attempts, Ordering::SeqCst);
        self.cancel.cancel();
        true
    }

    /// Wait for the session task to finish. Only returns once the session
    /// ends, so call [`close`](Self::close) first.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("[{}] Session task failed: {}", self.instance_id, e);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How an open session ended
enum SessionEnd {
    Cancelled,
    Closed { code: Option<u16>, reason: String },
}

struct Session {
    instance_id: String,
    uri: String,
    serial: u64,
    listener_token: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    parser: Arc<SafeParser>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
    /// Close frame seen on the current socket
    close: Option<(Option<u16>, String)>,
}

impl Session {
    fn emit(&self, kind: ConnectionEventKind) {
        let _ = self.events.send(ConnectionEvent {
            instance_id: self.instance_id.clone(),
            serial: self.serial,
            kind,
        });
    }

    fn transition(&self, state: ConnectionState) {
        if self.shared.state() != state {
            debug!("[{}] {:?}", self.instance_id, state);
            self.shared.set_state(state);
            self.emit(ConnectionEventKind::StateChanged(state));
        }
    }

    fn report_error(&self, message: String) {
        warn!("[{}] {}", self.instance_id, message);
        self.shared.set_last_error(message.clone());
        self.emit(ConnectionEventKind::Error(message));
    }

    async fn run(mut self) {
        loop {
            self.transition(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = transport::connect(&self.uri, self.connect_timeout) => result,
            };

            match connected {
                Ok(ws) => {
                    self.discard_pending();
                    self.shared.attempts.store(0, Ordering::SeqCst);
                    self.transition(ConnectionState::Open);
                    info!("[{}] Connected", self.instance_id);
                    self.emit(ConnectionEventKind::Connected);

                    let end = self.run_open(ws).await;
                    if matches!(end, SessionEnd::Closed { .. }) {
                        self.transition(ConnectionState::Reconnecting);
                    }
                    self.discard_pending();

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed { code, reason } => {
                            info!(
                                "[{}] Disconnected (code: {:?}, reason: {:?})",
                                self.instance_id, code, reason
                            );
                            self.emit(ConnectionEventKind::Disconnected { code, reason });
                        }
                    }
                }
                Err(e) => self.report_error(format!("Connection failed: {e}")),
            }

            let attempts = self.shared.attempts.load(Ordering::SeqCst);
            let Some(attempt) = self.policy.next_attempt(attempts) else {
                warn!(
                    "[{}] Giving up after {} reconnect attempts",
                    self.instance_id, attempts
                );
                self.emit(ConnectionEventKind::ReconnectExhausted { attempts });
                break;
            };
            self.shared.attempts.store(attempt, Ordering::SeqCst);
            let delay = self.policy.delay_for(attempt);
            self.transition(ConnectionState::Reconnecting);
            info!(
                "[{}] Reconnecting in {:?} (attempt {}/{})",
                self.instance_id, delay, attempt, self.policy.max_attempts
            );
            self.emit(ConnectionEventKind::ReconnectScheduled { attempt, delay });

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        if self.cancel.is_cancelled() {
            self.shared
                .attempts
                .store(self.policy.max_attempts, Ordering::SeqCst);
        }
        self.transition(ConnectionState::Disconnected);
    }

    async fn run_open(&mut self, mut ws: WsStream) -> SessionEnd {
        self.close = None;

        let handshake = [
            Request::list_states(),
            Request::peek_state(),
            Request::listen(self.listener_token.as_str()),
        ];
        for request in &handshake {
            if let Err(e) = self.write(&mut ws, request).await {
                self.report_error(e);
                return SessionEnd::Closed {
                    code: None,
                    reason: "handshake failed".to_string(),
                };
            }
        }

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.transition(ConnectionState::Closing);
                    let unlisten = Request::unlisten(self.listener_token.as_str());
                    if let Err(e) = self.write(&mut ws, &unlisten).await {
                        debug!("[{}] Unlisten not sent: {}", self.instance_id, e);
                    }
                    if let Err(e) = ws.close(None).await {
                        debug!("[{}] Close handshake failed: {}", self.instance_id, e);
                    }
                    return SessionEnd::Cancelled;
                }
                Some(command) = self.commands.recv() => match command {
                    Command::Send(json) => {
                        debug!("[{}] -> {}", self.instance_id, json);
                        if let Err(e) = ws.send(Message::text(json)).await {
                            self.report_error(format!("Send failed: {e}"));
                        }
                    }
                },
                message = ws.next() => match message {
                    Some(Ok(message)) => match Inbound::from(message) {
                        Inbound::Text(text) => self.handle_text(&text),
                        Inbound::Close { code, reason } => self.close = Some((code, reason)),
                        Inbound::Ignored => {}
                    },
                    Some(Err(e)) => {
                        self.report_error(format!("Transport error: {e}"));
                        return self.closed();
                    }
                    None => return self.closed(),
                },
            }
        }
    }

    /// Drop requests queued for a socket that is gone.
    fn discard_pending(&mut self) {
        let mut dropped = 0;
        while self.commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                "[{}] Dropped {} request(s) queued after the socket closed",
                self.instance_id, dropped
            );
        }
    }

    fn closed(&mut self) -> SessionEnd {
        let (code, reason) = self.close.take().unwrap_or_default();
        SessionEnd::Closed { code, reason }
    }

    async fn write(&self, ws: &mut WsStream, request: &Request) -> Result<(), String> {
        let json = request.to_json().map_err(|e| e.to_string())?;
        debug!("[{}] -> {}", self.instance_id, json);
        ws.send(Message::text(json))
            .await
            .map_err(|e| format!("Send failed: {e}"))
    }

    fn handle_text(&self, text: &str) {
        debug!("[{}] <- {}", self.instance_id, text);
        match decode_frame(text, &self.parser) {
            Ok(frame) => {
                for event in frame.route() {
                    self.emit(ConnectionEventKind::Protocol(event));
                }
            }
            Err(e) => debug!("[{}] Ignoring frame: {}", self.instance_id, e),
        }
    }
}
