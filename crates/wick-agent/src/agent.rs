//! The resilient outbound session to the hub.
//!
//! One agent maintains one WebSocket connection for one device id:
//! connect, reconnect after a fixed delay, emit heartbeats, forward
//! queued status updates, and dispatch inbound commands to the handler.
//! Commands are applied strictly in order; the next frame is not read
//! until the handler completes. Network, decode-fatal and protocol
//! errors all collapse to "connection lost": log, mark disconnected,
//! reconnect. Malformed frames are logged and skipped without touching
//! the session.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wick_core::{CommandPayload, StatusPayload, WireMessage};

use crate::config::AgentConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Status updates queued while connected before sends start failing.
const STATUS_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Where the agent is in its connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Receives commands from the hub. The contract is always asynchronous;
/// a synchronous handler lifts trivially by completing immediately.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Called once per established connection, before any frames are
    /// read. The usual reaction is pushing a full status snapshot.
    async fn on_connect(&self, _status: &StatusSender) {}

    /// Called for every command frame, one at a time, in arrival order.
    async fn on_command(&self, command: CommandPayload, status: &StatusSender);
}

/// Clonable handle for emitting status updates through the agent's
/// session. Fire-and-forget: updates are dropped with a warning while
/// disconnected, never queued for later delivery.
#[derive(Clone)]
pub struct StatusSender {
    state: Arc<AtomicU8>,
    tx: mpsc::Sender<StatusPayload>,
}

impl StatusSender {
    pub(crate) fn new(state: Arc<AtomicU8>, tx: mpsc::Sender<StatusPayload>) -> Self {
        Self { state, tx }
    }

    pub fn is_connected(&self) -> bool {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed)) == ConnectionState::Connected
    }

    pub fn send(&self, status: StatusPayload) {
        if !self.is_connected() {
            warn!("cannot send status, not connected to hub");
            return;
        }
        if self.tx.try_send(status).is_err() {
            warn!("status queue full, dropping update");
        }
    }
}

pub struct ClientAgent {
    config: AgentConfig,
    handler: Arc<dyn CommandHandler>,
    state: Arc<AtomicU8>,
    status: StatusSender,
    status_rx: mpsc::Receiver<StatusPayload>,
    shutdown: CancellationToken,
}

impl ClientAgent {
    pub fn new(config: AgentConfig, handler: Arc<dyn CommandHandler>) -> Self {
        let state = Arc::new(AtomicU8::new(ConnectionState::Disconnected.as_u8()));
        let (tx, status_rx) = mpsc::channel(STATUS_QUEUE);
        let status = StatusSender::new(Arc::clone(&state), tx);
        Self {
            config,
            handler,
            state,
            status,
            status_rx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle for pushing status updates through this agent.
    pub fn status_sender(&self) -> StatusSender {
        self.status.clone()
    }

    /// Cancelling this token stops [`ClientAgent::run`]; it returns only
    /// after the session is torn down, so no background work survives.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    /// One connection attempt.
    async fn connect(&self, url: &str) -> Result<WsStream, AgentError> {
        debug!(url, "connecting to hub");
        let (ws, _) = connect_async(url).await?;
        Ok(ws)
    }

    /// Outer loop: connect, drive the session until it dies, sleep the
    /// fixed reconnect delay, repeat. Runs until the shutdown token
    /// fires.
    pub async fn run(mut self) {
        let url = format!(
            "{}/ws/device/{}",
            self.config.hub_url.trim_end_matches('/'),
            self.config.device_id
        );
        info!(url = %url, device_id = %self.config.device_id, "agent starting");

        while !self.shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);
            match self.connect(&url).await {
                Ok(ws) => {
                    info!("connected to hub");
                    // Anything queued while away is stale now.
                    while self.status_rx.try_recv().is_ok() {}
                    self.set_state(ConnectionState::Connected);
                    self.handler.on_connect(&self.status).await;
                    self.drive_session(ws).await;
                    self.set_state(ConnectionState::Disconnected);
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    info!(
                        delay_secs = self.config.reconnect_delay.as_secs(),
                        "connection lost, reconnecting"
                    );
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(
                        error = %e,
                        delay_secs = self.config.reconnect_delay.as_secs(),
                        "failed to connect to hub"
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("agent stopped");
    }

    /// Single loop over the live session: inbound frames, the status
    /// queue, the heartbeat timer and the shutdown token. One loop per
    /// connection means no stray heartbeat or receive task can outlive
    /// an attempt.
    async fn drive_session(&mut self, ws: WsStream) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let handler = Arc::clone(&self.handler);
        let status = self.status.clone();
        let shutdown = self.shutdown.clone();
        let status_rx = &mut self.status_rx;
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await; // consume the immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    debug!("heartbeat");
                    if !send_frame(&mut ws_tx, &WireMessage::Heartbeat).await {
                        break;
                    }
                }
                payload = status_rx.recv() => {
                    // The agent holds a sender, so the queue never closes.
                    let Some(payload) = payload else { break };
                    if !send_frame(&mut ws_tx, &WireMessage::Status(payload)).await {
                        break;
                    }
                }
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(handler.as_ref(), &status, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("hub closed the session");
                        break;
                    }
                    Some(Ok(_)) => {} // pings/pongs handled by tungstenite
                    Some(Err(e)) => {
                        warn!(error = %e, "session read error");
                        break;
                    }
                },
            }
        }
    }
}

/// Write one frame; `false` means the connection is gone. Encode
/// failures are logged and swallowed, they are not a transport problem.
async fn send_frame(ws_tx: &mut SplitSink<WsStream, Message>, message: &WireMessage) -> bool {
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "failed to encode frame");
            return true;
        }
    };
    match ws_tx.send(Message::Text(frame.into())).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "session write failed");
            false
        }
    }
}

/// Route one inbound frame. Only command frames reach the handler; the
/// await here is what serializes command application.
async fn dispatch(handler: &dyn CommandHandler, status: &StatusSender, raw: &str) {
    match WireMessage::decode(raw) {
        Ok(WireMessage::Command(command)) => {
            debug!(?command, "command received");
            handler.on_command(command, status).await;
        }
        Ok(other) => {
            warn!(?other, "ignoring unexpected frame from hub");
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
        }
    }
}
