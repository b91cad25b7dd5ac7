//! Integration tests for the sync channel: real sockets on loopback,
//! ephemeral ports, both roles exercised against each other.

use std::time::Duration;
use tandem_channel::{SyncChannel, SyncConfig};
use tandem_protocol::{EditorSource, EditorState, SyncAction};
use tokio::time::timeout;

fn listener_config() -> SyncConfig {
    SyncConfig {
        port: 0,
        retry_interval: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(200),
        ..Default::default()
    }
}

fn connector_config(port: u16) -> SyncConfig {
    SyncConfig {
        port,
        retry_interval: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(200),
        ..Default::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn test_states_flow_both_directions() {
    let (listener, mut listener_rx) = SyncChannel::listen(listener_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (connector, mut connector_rx) = SyncChannel::connect(connector_config(port));
    wait_until(|| connector.is_connected() && listener.is_connected(), "connection").await;

    connector.send(&EditorState::navigate(
        "/repo/src/lib.rs",
        42,
        8,
        EditorSource::Vscode,
        true,
    ));
    let received = timeout(Duration::from_secs(2), listener_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.action, SyncAction::Navigate);
    assert_eq!(received.line, 42);
    assert_eq!(received.source, EditorSource::Vscode);

    listener.send(&EditorState::open(
        "/repo/src/lib.rs",
        0,
        0,
        EditorSource::Jetbrains,
        true,
    ));
    let received = timeout(Duration::from_secs(2), connector_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.action, SyncAction::Open);
    assert_eq!(received.source, EditorSource::Jetbrains);

    listener.shutdown();
    connector.shutdown();
}

#[tokio::test]
async fn test_send_order_is_preserved() {
    let (listener, mut listener_rx) = SyncChannel::listen(listener_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (connector, _connector_rx) = SyncChannel::connect(connector_config(port));
    wait_until(|| connector.is_connected(), "connection").await;

    for line in 0..20 {
        connector.send(&EditorState::navigate(
            "/repo/a.rs",
            line,
            0,
            EditorSource::Vscode,
            true,
        ));
    }

    for expected_line in 0..20 {
        let received = timeout(Duration::from_secs(2), listener_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.line, expected_line);
    }

    listener.shutdown();
    connector.shutdown();
}

#[tokio::test]
async fn test_connector_reconnects_after_listener_restart() {
    let (listener, mut listener_rx) = SyncChannel::listen(listener_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (connector, _connector_rx) = SyncChannel::connect(connector_config(port));
    wait_until(|| connector.is_connected(), "initial connection").await;

    connector.send(&EditorState::open("/a.rs", 0, 0, EditorSource::Vscode, true));
    timeout(Duration::from_secs(2), listener_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // Kill the listener mid-session.
    listener.shutdown();
    wait_until(|| !connector.is_connected(), "disconnect").await;

    // Bring a fresh listener up on the same port; the connector's retry
    // loop should find it within its backoff interval.
    let mut config = listener_config();
    config.port = port;
    let (revived, mut revived_rx) = SyncChannel::listen(config).await.unwrap();
    wait_until(|| connector.is_connected(), "reconnection").await;

    connector.send(&EditorState::navigate(
        "/a.rs",
        7,
        1,
        EditorSource::Vscode,
        true,
    ));
    let received = timeout(Duration::from_secs(2), revived_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.line, 7);

    revived.shutdown();
    connector.shutdown();
}

#[tokio::test]
async fn test_new_connection_replaces_previous_peer() {
    let (listener, mut listener_rx) = SyncChannel::listen(listener_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // First peer: a bare WebSocket client that will not reconnect when
    // the listener replaces it.
    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let (stale, _) = tokio_tungstenite::client_async(format!("ws://127.0.0.1:{port}"), stream)
        .await
        .unwrap();
    wait_until(|| listener.is_connected(), "first connection").await;

    let (second, mut second_rx) = SyncChannel::connect(connector_config(port));
    wait_until(|| second.is_connected(), "second connection").await;

    // Replacement closes the stale connection; once the stale peer sees
    // its close frame the new peer owns the slot.
    use futures_util::StreamExt;
    let mut stale = stale;
    timeout(Duration::from_secs(5), async {
        loop {
            match stale.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) | None => break,
                _ => {}
            }
        }
    })
    .await
    .expect("stale peer never saw its close frame");

    // The listener's sends must now reach the replacement peer.
    listener.send(&EditorState::open(
        "/b.rs",
        0,
        0,
        EditorSource::Jetbrains,
        true,
    ));
    let received = timeout(Duration::from_secs(2), second_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.file_path, "/b.rs");

    // And the replacement's sends still arrive.
    second.send(&EditorState::navigate(
        "/b.rs",
        3,
        0,
        EditorSource::Vscode,
        true,
    ));
    let received = timeout(Duration::from_secs(2), listener_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.line, 3);

    drop(stale);
    listener.shutdown();
    second.shutdown();
}

#[tokio::test]
async fn test_malformed_frame_is_skipped_without_closing() {
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    let (listener, mut listener_rx) = SyncChannel::listen(listener_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let (mut ws, _) = tokio_tungstenite::client_async(format!("ws://127.0.0.1:{port}"), stream)
        .await
        .unwrap();

    ws.send(Message::Text("this is not an editor state".into()))
        .await
        .unwrap();
    ws.send(Message::Text(
        r#"{"action":"SCROLL","filePath":"/c.rs","line":0,"column":0,"source":"VSCODE","isActive":true,"timestamp":"1","visibleRangeStart":9,"visibleRangeEnd":2}"#.into(),
    ))
    .await
    .unwrap();

    let valid = EditorState::navigate("/c.rs", 5, 0, EditorSource::Vscode, true);
    ws.send(Message::Text(valid.encode().unwrap().into()))
        .await
        .unwrap();

    // Only the valid record comes through; the garbage and the
    // invariant-violating record are dropped and the connection survives.
    let received = timeout(Duration::from_secs(2), listener_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.line, 5);
    assert!(listener.is_connected());

    listener.shutdown();
}

#[tokio::test]
async fn test_send_without_peer_is_dropped() {
    let (connector, _rx) = SyncChannel::connect(connector_config(1));
    assert!(!connector.is_connected());
    // Nothing listening on port 1; the send must be a silent no-op.
    connector.send(&EditorState::open("/a.rs", 0, 0, EditorSource::Vscode, true));
    connector.shutdown();
}

#[tokio::test]
async fn test_unresponsive_peer_is_dropped_by_heartbeat() {
    let mut config = listener_config();
    config.heartbeat_interval = Duration::from_millis(50);
    config.missed_pong_limit = 2;

    let (listener, _listener_rx) = SyncChannel::listen(config).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Complete the handshake but never read, so pings are never answered.
    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let (ws, _) = tokio_tungstenite::client_async(format!("ws://127.0.0.1:{port}"), stream)
        .await
        .unwrap();

    wait_until(|| listener.is_connected(), "connection").await;
    wait_until(|| !listener.is_connected(), "heartbeat cutoff").await;

    drop(ws);
    listener.shutdown();
}

#[tokio::test]
async fn test_status_watch_tracks_connection() {
    let (listener, _listener_rx) = SyncChannel::listen(listener_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (connector, _rx) = SyncChannel::connect(connector_config(port));
    let mut status = connector.status();
    assert!(!*status.borrow());

    timeout(Duration::from_secs(5), status.wait_for(|connected| *connected))
        .await
        .unwrap()
        .unwrap();

    listener.shutdown();
    wait_until(|| !connector.is_connected(), "disconnect").await;
    assert!(!*connector.status().borrow());

    connector.shutdown();
}
