//! Per-connection WebSocket loops.
//!
//! Each device connection runs a reader (decode inbound frames, feed the
//! registry) and a writer (drain the registry's outbound queue). A bad
//! frame never terminates the session; only transport errors and closes
//! do.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use wick_core::WireMessage;

use crate::registry::DeviceRegistry;

/// Drive one device session until the socket closes or the registry
/// replaces it.
pub async fn run_device_session(socket: WebSocket, device_id: String, registry: Arc<DeviceRegistry>) {
    let mut session = registry.connect(&device_id);
    let epoch = session.epoch;
    let closed = session.closed.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = device_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = closed.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
                frame = session.outbound.recv() => match frame {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            debug!(device_id = %writer_id, "session write failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(WsMessage::Text(text)) => handle_frame(&registry, &device_id, text.as_str()),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {} // pings/pongs handled by axum
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "session read error");
                break;
            }
        }
    }

    registry.disconnect_session(&device_id, epoch);
    let _ = writer.await;
}

fn handle_frame(registry: &DeviceRegistry, device_id: &str, raw: &str) {
    match WireMessage::decode(raw) {
        Ok(WireMessage::Status(status)) => {
            debug!(device_id, "status received");
            registry.update_state(device_id, &status);
        }
        Ok(WireMessage::Heartbeat) => registry.update_heartbeat(device_id),
        Ok(WireMessage::Command(_)) => {
            warn!(device_id, "ignoring command frame sent by a device");
        }
        Err(e) => {
            warn!(device_id, error = %e, "dropping malformed frame");
        }
    }
}

/// Drive one observer session: push the current snapshots, then forward
/// state events until either side goes away.
pub async fn run_observer_session(socket: WebSocket, registry: Arc<DeviceRegistry>) {
    let (observer_id, mut events) = registry.register_observer();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Seed the observer with everything currently known.
    for state in registry.list_states() {
        let Some(json) = crate::registry::encode_state_event(&state) else {
            continue;
        };
        if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
            registry.unregister_observer(&observer_id);
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(text) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {} // observers have nothing to say
                Some(Err(e)) => {
                    info!(observer_id = %observer_id, error = %e, "observer read error");
                    break;
                }
            },
        }
    }

    registry.unregister_observer(&observer_id);
}
