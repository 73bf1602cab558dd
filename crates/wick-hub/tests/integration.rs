//! End-to-end tests driving the hub over real HTTP and WebSocket
//! connections.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use wick_core::{CommandPayload, WireMessage};
use wick_hub::{start, HubConfig, HubHandle};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot_hub() -> HubHandle {
    start(HubConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..Default::default()
    })
    .await
    .unwrap()
}

async fn connect_device(port: u16, id: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/device/{id}"))
        .await
        .unwrap();
    ws
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within timeout");
}

#[tokio::test]
async fn device_lifecycle_is_visible_over_rest() {
    let hub = boot_hub().await;
    let port = hub.port;
    let client = reqwest::Client::new();

    let mut ws = connect_device(port, "c1").await;
    {
        let registry = hub.registry.clone();
        wait_until(move || registry.connected_count() == 1).await;
    }

    let devices: Value = client
        .get(format!("http://127.0.0.1:{port}/devices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(devices.as_array().unwrap().len(), 1);
    assert_eq!(devices[0]["id"], "c1");
    assert_eq!(devices[0]["connected"], true);

    let health: Value = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "running");
    assert_eq!(health["connected_devices"], 1);

    ws.close(None).await.unwrap();
    {
        let registry = hub.registry.clone();
        wait_until(move || registry.connected_count() == 0).await;
    }

    // Disconnected state is retained for the reaper, not dropped
    let state: Value = client
        .get(format!("http://127.0.0.1:{port}/devices/c1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["connected"], false);

    hub.shutdown().await;
}

#[tokio::test]
async fn command_round_trip_updates_hub_state() {
    let hub = boot_hub().await;
    let port = hub.port;
    let client = reqwest::Client::new();

    let mut ws = connect_device(port, "c1").await;
    {
        let registry = hub.registry.clone();
        wait_until(move || registry.connected_count() == 1).await;
    }

    let response = client
        .post(format!("http://127.0.0.1:{port}/devices/c1/command"))
        .json(&json!({"program": "wave", "speed": 20}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // The device receives the command frame
    let frame = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    match WireMessage::decode(text.as_str()).unwrap() {
        WireMessage::Command(cmd) => {
            assert_eq!(cmd.program.as_deref(), Some("wave"));
            assert_eq!(cmd.speed, Some(20));
        }
        other => panic!("expected command, got {other:?}"),
    }

    // The device confirms with a status; the hub merges it
    ws.send(Message::Text(
        r#"{"type":"status","program":"wave","speed":20,"random":false}"#.into(),
    ))
    .await
    .unwrap();
    {
        let registry = hub.registry.clone();
        wait_until(move || {
            registry.get_state("c1").is_some_and(|s| {
                s.program.as_deref() == Some("wave")
                    && s.speed == Some(20)
                    && s.random == Some(false)
            })
        })
        .await;
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn command_error_paths() {
    let hub = boot_hub().await;
    let port = hub.port;
    let client = reqwest::Client::new();

    // Never-seen device
    let response = client
        .post(format!("http://127.0.0.1:{port}/devices/ghost/command"))
        .json(&json!({"program": "wave"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(
        client
            .get(format!("http://127.0.0.1:{port}/devices/ghost"))
            .send()
            .await
            .unwrap()
            .status(),
        404
    );

    // Out-of-range speed is rejected before dispatch
    let _ws = connect_device(port, "c1").await;
    {
        let registry = hub.registry.clone();
        wait_until(move || registry.connected_count() == 1).await;
    }
    for speed in [0, 101] {
        let response = client
            .post(format!("http://127.0.0.1:{port}/devices/c1/command"))
            .json(&json!({"speed": speed}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }
    assert!(hub.registry.get_state("c1").unwrap().speed.is_none());

    hub.shutdown().await;
}

#[tokio::test]
async fn heartbeat_refreshes_last_seen() {
    let hub = boot_hub().await;
    let port = hub.port;

    let mut ws = connect_device(port, "c1").await;
    {
        let registry = hub.registry.clone();
        wait_until(move || registry.connected_count() == 1).await;
    }
    let before = hub.registry.get_state("c1").unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    ws.send(Message::Text(r#"{"type":"heartbeat"}"#.into()))
        .await
        .unwrap();
    {
        let registry = hub.registry.clone();
        let last_seen = before.last_seen;
        wait_until(move || {
            registry
                .get_state("c1")
                .is_some_and(|s| s.last_seen > last_seen)
        })
        .await;
    }
    // Liveness only: no other field changed
    let after = hub.registry.get_state("c1").unwrap();
    assert_eq!(after.program, before.program);
    assert_eq!(after.speed, before.speed);

    hub.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_session() {
    let hub = boot_hub().await;
    let port = hub.port;

    let mut ws = connect_device(port, "c1").await;
    {
        let registry = hub.registry.clone();
        wait_until(move || registry.connected_count() == 1).await;
    }

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"telemetry","volts":12}"#.into()))
        .await
        .unwrap();
    ws.send(Message::Text(r#"{"type":"status","program":"cop"}"#.into()))
        .await
        .unwrap();

    // The good frame after the bad ones still lands
    {
        let registry = hub.registry.clone();
        wait_until(move || {
            registry
                .get_state("c1")
                .is_some_and(|s| s.connected && s.program.as_deref() == Some("cop"))
        })
        .await;
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn observer_sees_state_transitions() {
    let hub = boot_hub().await;
    let port = hub.port;

    let (mut observer, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/observer"))
        .await
        .unwrap();
    let _ws = connect_device(port, "c1").await;

    let frame = timeout(TIMEOUT, observer.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    let event: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(event["type"], "device_state");
    assert_eq!(event["id"], "c1");
    assert_eq!(event["connected"], true);

    hub.shutdown().await;
}

#[tokio::test]
async fn second_connection_replaces_the_first() {
    let hub = boot_hub().await;
    let port = hub.port;

    let mut first = connect_device(port, "c1").await;
    {
        let registry = hub.registry.clone();
        wait_until(move || registry.connected_count() == 1).await;
    }
    let mut second = connect_device(port, "c1").await;

    // The hub closes the superseded socket
    let closed = timeout(TIMEOUT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "old session was not closed");

    // The replacement stays connected and receives commands
    assert_eq!(hub.registry.connected_count(), 1);
    hub.registry
        .send_command(
            "c1",
            &CommandPayload {
                program: Some("cop".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let frame = timeout(TIMEOUT, second.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    match WireMessage::decode(text.as_str()).unwrap() {
        WireMessage::Command(cmd) => assert_eq!(cmd.program.as_deref(), Some("cop")),
        other => panic!("expected command, got {other:?}"),
    }

    hub.shutdown().await;
}
