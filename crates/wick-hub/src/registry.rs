//! Authoritative registry of device sessions and last-known state.
//!
//! All device-state mutation goes through one registry-wide lock; the lock
//! is never held across an await. Outbound writes go into a bounded
//! per-session queue drained by that session's writer task, so the
//! registry never blocks on device I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wick_core::{CommandPayload, DeviceState, StatusPayload, WireMessage};

/// Errors surfaced to command dispatchers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("device '{0}' is not connected")]
    NotConnected(String),
    #[error("failed to deliver command to '{0}': {1}")]
    SendFailed(String, String),
}

/// Hub-side view of one live session, handed to the connection task.
pub struct DeviceSession {
    /// Identifies this session among successive sessions for the same id,
    /// so a superseded session's teardown cannot disconnect its
    /// replacement.
    pub epoch: u64,
    /// Outbound frames queued by the registry (commands, closes).
    pub outbound: mpsc::Receiver<String>,
    /// Fired when the registry closes this session (replacement or
    /// shutdown).
    pub closed: CancellationToken,
}

struct SessionHandle {
    epoch: u64,
    tx: mpsc::Sender<String>,
    closer: CancellationToken,
}

struct DeviceEntry {
    state: DeviceState,
    session: Option<SessionHandle>,
}

/// Event pushed to passive observer sessions on every state transition.
#[derive(Serialize)]
struct StateEvent<'a> {
    r#type: &'static str,
    #[serde(flatten)]
    state: &'a DeviceState,
}

pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceEntry>>,
    observers: DashMap<String, mpsc::Sender<String>>,
    epoch_counter: AtomicU64,
    max_send_queue: usize,
}

impl DeviceRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            observers: DashMap::new(),
            epoch_counter: AtomicU64::new(0),
            max_send_queue,
        }
    }

    /// Accept a new session for `id`.
    ///
    /// A fresh state is created on first connect; on reconnect the
    /// preserved `program`/`speed`/`direction`/`color` survive. If a live
    /// session already exists for the id it is closed here, before the
    /// new one is installed.
    pub fn connect(&self, id: &str) -> DeviceSession {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let closer = CancellationToken::new();
        let epoch = self.epoch_counter.fetch_add(1, Ordering::Relaxed) + 1;

        let (snapshot, total) = {
            let mut devices = self.devices.write();
            let entry = devices
                .entry(id.to_string())
                .or_insert_with(|| DeviceEntry {
                    state: DeviceState::new(id),
                    session: None,
                });
            if let Some(old) = entry.session.take() {
                warn!(device_id = id, "replacing live session");
                old.closer.cancel();
            }
            entry.session = Some(SessionHandle {
                epoch,
                tx,
                closer: closer.clone(),
            });
            entry.state.connected = true;
            entry.state.last_seen = Utc::now();
            let snapshot = entry.state.clone();
            let total = devices.values().filter(|e| e.session.is_some()).count();
            (snapshot, total)
        };

        info!(device_id = id, total, "device connected");
        self.broadcast_state(&snapshot);

        DeviceSession {
            epoch,
            outbound: rx,
            closed: closer,
        }
    }

    /// Remove the session for `id` and mark it disconnected. Idempotent;
    /// unknown ids are a no-op.
    pub fn disconnect(&self, id: &str) {
        self.disconnect_inner(id, None);
    }

    /// Epoch-guarded disconnect used by session teardown: does nothing if
    /// the session has already been replaced by a newer one.
    pub fn disconnect_session(&self, id: &str, epoch: u64) {
        self.disconnect_inner(id, Some(epoch));
    }

    fn disconnect_inner(&self, id: &str, epoch: Option<u64>) {
        let snapshot = {
            let mut devices = self.devices.write();
            let Some(entry) = devices.get_mut(id) else {
                return;
            };
            match (&entry.session, epoch) {
                (Some(session), Some(e)) if session.epoch != e => return,
                (None, Some(_)) => return,
                _ => {}
            }
            if let Some(session) = entry.session.take() {
                session.closer.cancel();
            }
            if !entry.state.connected {
                return;
            }
            entry.state.connected = false;
            entry.state.last_seen = Utc::now();
            entry.state.clone()
        };

        info!(device_id = id, "device disconnected");
        self.broadcast_state(&snapshot);
    }

    /// Merge a partial update into an existing state.
    ///
    /// `program`, `random` and `speed` apply only when supplied;
    /// `direction` and `color` are always overwritten, including with an
    /// explicit absence, so a device can actively clear them. Unknown ids
    /// are logged and ignored.
    pub fn update_state(&self, id: &str, update: &StatusPayload) {
        let snapshot = {
            let mut devices = self.devices.write();
            let Some(entry) = devices.get_mut(id) else {
                warn!(device_id = id, "state update for unknown device");
                return;
            };
            let state = &mut entry.state;
            if let Some(program) = &update.program {
                state.program = Some(program.clone());
            }
            if let Some(random) = update.random {
                state.random = Some(random);
            }
            if let Some(speed) = update.speed {
                state.speed = Some(speed);
            }
            state.direction = update.direction;
            state.color = update.color.clone();
            state.last_seen = Utc::now();
            state.clone()
        };

        debug!(device_id = id, "state updated");
        self.broadcast_state(&snapshot);
    }

    /// Refresh `last_seen` only. No-op for unknown ids.
    pub fn update_heartbeat(&self, id: &str) {
        let mut devices = self.devices.write();
        if let Some(entry) = devices.get_mut(id) {
            entry.state.last_seen = Utc::now();
        }
    }

    /// Dispatch a command to a connected device and optimistically mirror
    /// its fields into local state. The mirror happens only after the
    /// frame is queued; a failed send leaves state untouched.
    pub fn send_command(&self, id: &str, command: &CommandPayload) -> Result<(), RegistryError> {
        let tx = {
            let devices = self.devices.read();
            devices
                .get(id)
                .and_then(|entry| entry.session.as_ref())
                .map(|session| session.tx.clone())
        }
        .ok_or_else(|| RegistryError::NotConnected(id.to_string()))?;

        let frame = WireMessage::Command(command.clone())
            .encode()
            .map_err(|e| RegistryError::SendFailed(id.to_string(), e.to_string()))?;
        tx.try_send(frame)
            .map_err(|e| RegistryError::SendFailed(id.to_string(), e.to_string()))?;

        debug!(device_id = id, "command dispatched");
        self.update_state(id, &command.to_update());
        Ok(())
    }

    pub fn get_state(&self, id: &str) -> Option<DeviceState> {
        self.devices.read().get(id).map(|entry| entry.state.clone())
    }

    /// Snapshot of every tracked device, connected or recently gone.
    pub fn list_states(&self) -> Vec<DeviceState> {
        let mut states: Vec<DeviceState> = self
            .devices
            .read()
            .values()
            .map(|entry| entry.state.clone())
            .collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    /// Number of devices with a live session.
    pub fn connected_count(&self) -> usize {
        self.devices
            .read()
            .values()
            .filter(|entry| entry.session.is_some())
            .count()
    }

    // ─── Observers ───────────────────────────────────────────────────────

    /// Register a passive observer session; it receives a JSON event for
    /// every device state transition.
    pub fn register_observer(&self) -> (String, mpsc::Receiver<String>) {
        let id = format!("observer_{}", Uuid::now_v7());
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.observers.insert(id.clone(), tx);
        info!(observer_id = %id, "observer connected");
        (id, rx)
    }

    pub fn unregister_observer(&self, id: &str) {
        if self.observers.remove(id).is_some() {
            info!(observer_id = id, "observer disconnected");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Best-effort fan-out to every observer. A failed send disconnects
    /// only that observer and never aborts the broadcast.
    pub fn broadcast(&self, message: &str) {
        let mut dead = Vec::new();
        for entry in self.observers.iter() {
            if entry.value().try_send(message.to_string()).is_err() {
                dead.push(entry.key().clone());
            }
        }
        for id in dead {
            self.observers.remove(&id);
            info!(observer_id = %id, "dropping unresponsive observer");
        }
    }

    fn broadcast_state(&self, state: &DeviceState) {
        if self.observers.is_empty() {
            return;
        }
        if let Some(json) = encode_state_event(state) {
            self.broadcast(&json);
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Remove states that are disconnected and have not been seen for
    /// strictly longer than `timeout`. Returns how many were removed.
    pub fn reap_stale(&self, timeout: Duration) -> usize {
        let now = Utc::now();
        let horizon = chrono::Duration::seconds(timeout.as_secs() as i64);
        let mut devices = self.devices.write();
        let stale: Vec<String> = devices
            .iter()
            .filter(|(_, entry)| {
                !entry.state.connected
                    && now.signed_duration_since(entry.state.last_seen) > horizon
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            devices.remove(id);
            info!(device_id = %id, "removing stale state");
        }
        stale.len()
    }

    /// Close every live session and clear all registry state. Best-effort
    /// per session; used on shutdown.
    pub fn disconnect_all(&self) {
        let mut devices = self.devices.write();
        for (id, entry) in devices.iter_mut() {
            if let Some(session) = entry.session.take() {
                debug!(device_id = %id, "closing session");
                session.closer.cancel();
            }
        }
        devices.clear();
        self.observers.clear();
        info!("all sessions closed");
    }
}

/// JSON event describing one device's current state, as sent to
/// observers.
pub(crate) fn encode_state_event(state: &DeviceState) -> Option<String> {
    serde_json::to_string(&StateEvent {
        r#type: "device_state",
        state,
    })
    .ok()
}

/// Background task removing stale disconnected states on a fixed
/// interval, for the process lifetime. Cancelling the token stops it.
pub fn start_reaper(
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.reap_stale(timeout);
                    if removed > 0 {
                        info!(removed, "stale state sweep");
                    }
                }
            }
        }
    })
}
