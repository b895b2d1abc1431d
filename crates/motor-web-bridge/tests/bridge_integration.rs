//! Integration tests for the full bridge: real WebSocket clients on one
//! side, a fake TCP motor device on the other.
//!
//! # Purpose
//!
//! These tests exercise the bridge through its *public* surface the same way
//! production traffic does:
//!
//! - A `tokio_tungstenite` client connects to the served WebSocket port and
//!   speaks the dashboard protocol (`INIT_CONNECTION` envelope, raw command
//!   lines).
//! - A plain `TcpListener` plays the motor device, reading newline-framed
//!   commands and writing newline-framed telemetry.
//!
//! Covered end to end:
//!
//! - The auth gate: a wrong token closes the client with code 1008.
//! - The happy path: envelope → device session → command relay → telemetry.
//! - Fan-out: two dashboards observe the same frames in the same order.
//! - Graceful shutdown: clients are notified, then closed with 1001, and a
//!   pending reconnection attempt is cancelled instead of firing later.
//! - Direct mode: the first command frame bootstraps the device session.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use motor_web_bridge::application::{SessionBridge, SessionState};
use motor_web_bridge::domain::{BridgeConfig, DeviceEndpoint};
use motor_web_bridge::infrastructure::{bind_server, serve};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TICK: Duration = Duration::from_secs(2);

// ── Harness ───────────────────────────────────────────────────────────────────

/// A bridge serving on an ephemeral port, plus the handles tests need.
struct Harness {
    ws_url: String,
    session: Arc<SessionBridge>,
    running: Arc<AtomicBool>,
}

impl Harness {
    /// Binds the bridge on 127.0.0.1:0 and starts the accept loop.
    async fn start(mut config: BridgeConfig) -> Self {
        config.ws_bind_addr = "127.0.0.1:0".parse().unwrap();
        let session = SessionBridge::new(Arc::new(config));
        let listener = bind_server(&session).await.unwrap();
        let ws_url = format!("ws://{}", listener.local_addr().unwrap());

        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(serve(
            listener,
            Arc::clone(&session),
            Arc::clone(&running),
        ));

        Self {
            ws_url,
            session,
            running,
        }
    }

    async fn connect_client(&self) -> WsClient {
        let (ws, _response) = timeout(TICK, connect_async(self.ws_url.as_str()))
            .await
            .expect("connect timed out")
            .expect("WebSocket handshake failed");
        ws
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Starts a fake device listener on an ephemeral port and returns it with
/// the endpoint the bridge should dial.
async fn fake_device() -> (TcpListener, DeviceEndpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = DeviceEndpoint {
        host: addr.ip(),
        port: addr.port(),
    };
    (listener, endpoint)
}

/// Receives the next text frame, panicking on anything else.
async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let msg = timeout(TICK, ws.next())
            .await
            .expect("receive timed out")
            .expect("stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Receives frames until a close frame arrives, returning its code.
async fn next_close_code(ws: &mut WsClient) -> u16 {
    loop {
        let msg = timeout(TICK, ws.next())
            .await
            .expect("receive timed out")
            .expect("stream ended")
            .expect("WebSocket error");
        if let Message::Close(frame) = msg {
            return frame.expect("close frame carried no code").code.into();
        }
    }
}

fn init_envelope(device_ip: &str, token: &str) -> Message {
    Message::Text(format!(
        r#"{{"type":"INIT_CONNECTION","deviceIp":"{device_ip}","authToken":"{token}"}}"#
    ))
}

// ── Auth gate ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_wrong_token_closes_client_with_1008() {
    // Arrange
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    // Act
    ws.send(init_envelope("127.0.0.1", "wrong")).await.unwrap();

    // Assert: policy-violation close, and no device session was started
    assert_eq!(next_close_code(&mut ws).await, 1008);
    assert_eq!(harness.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_envelope_rejected_when_no_token_configured() {
    // No configured secret means no envelope can authenticate at all.
    let harness = Harness::start(BridgeConfig::default()).await;
    let mut ws = harness.connect_client().await;

    ws.send(init_envelope("127.0.0.1", "anything")).await.unwrap();

    assert_eq!(next_close_code(&mut ws).await, 1008);
}

#[tokio::test]
async fn test_malformed_envelope_gets_error_event_not_close() {
    // Arrange
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    // Act: claims to be an envelope but lacks authToken
    ws.send(Message::Text(
        r#"{"type":"INIT_CONNECTION","deviceIp":"127.0.0.1"}"#.to_string(),
    ))
    .await
    .unwrap();

    // Assert: an error event on this client, and the connection stays open
    let frame = next_text(&mut ws).await;
    assert!(frame.contains(r#""type":"error""#));
    assert_eq!(harness.session.state(), SessionState::AwaitingAuth);
}

// ── Happy path ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_envelope_bridges_relays_commands_and_telemetry() {
    // Arrange: fake device; the bridge dials the envelope host on the
    // configured device port
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    // Act: authenticate
    ws.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    let (device_read, mut device_write) = device_side.into_split();

    // Assert: the dashboard learns the session is up
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act: relay a command; the device must see the exact encoded line
    ws.send(Message::Text("ANGLE:90".to_string())).await.unwrap();
    let mut device_lines = BufReader::new(device_read).lines();
    let line = timeout(TICK, device_lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("ANGLE:90"));

    // Act: the device emits telemetry; the dashboard receives the decoded,
    // rounded measurement object
    device_write
        .write_all(b"{\"distance\":12.345,\"speed\":40}\n")
        .await
        .unwrap();
    assert_eq!(next_text(&mut ws).await, r#"{"distance":12.35,"speed":40}"#);
}

#[tokio::test]
async fn test_invalid_command_is_rejected_to_sender_only() {
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    ws.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Out-of-range angle: rejected before anything reaches the device
    ws.send(Message::Text("ANGLE:361".to_string())).await.unwrap();
    let frame = next_text(&mut ws).await;
    assert!(frame.contains(r#""type":"error""#));
    assert!(frame.contains("361"));

    // A valid command still goes through afterwards
    ws.send(Message::Text("START".to_string())).await.unwrap();
    let mut device_lines = BufReader::new(device_side).lines();
    let line = timeout(TICK, device_lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("START"));
}

#[tokio::test]
async fn test_binary_frame_with_utf8_payload_is_relayed_like_text() {
    // Some WebSocket clients ship text payloads in binary frames; the
    // bridge must treat them identically to text frames.
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    ws.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act: the command travels in a binary frame
    ws.send(Message::Binary(b"START".to_vec())).await.unwrap();

    // Assert: the device sees the same encoded line a text frame produces
    let mut device_lines = BufReader::new(device_side).lines();
    let line = timeout(TICK, device_lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("START"));
}

#[tokio::test]
async fn test_non_utf8_binary_frame_is_skipped_not_fatal() {
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    ws.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act: garbage bytes that cannot decode as UTF-8
    ws.send(Message::Binary(vec![0xff, 0xfe, 0x80])).await.unwrap();

    // Assert: the frame is dropped and the connection survives — a
    // follow-up command still reaches the device
    ws.send(Message::Text("STOP".to_string())).await.unwrap();
    let mut device_lines = BufReader::new(device_side).lines();
    let line = timeout(TICK, device_lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("STOP"));
}

#[tokio::test]
async fn test_wrong_token_while_bridging_is_not_acknowledged() {
    // Arrange: client A establishes the session
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws_a = harness.connect_client().await;

    ws_a.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    let (_device_read, mut device_write) = device_side.into_split();
    assert_eq!(
        next_text(&mut ws_a).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act: client B joins with a wrong token while the session is bridging
    let mut ws_b = harness.connect_client().await;
    ws_b.send(init_envelope("127.0.0.1", "wrong")).await.unwrap();

    // Assert: B gets the unauthorized close, never a success notification
    assert_eq!(next_close_code(&mut ws_b).await, 1008);

    // …and the running session is untouched: A still receives telemetry
    device_write.write_all(b"{\"angle\":42}\n").await.unwrap();
    assert_eq!(next_text(&mut ws_a).await, r#"{"angle":42}"#);
}

// ── Fan-out ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_dashboards_see_telemetry_in_same_order() {
    // Arrange: two clients attached before the session starts
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws_a = harness.connect_client().await;
    let mut ws_b = harness.connect_client().await;

    ws_a.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    let (_device_read, mut device_write) = device_side.into_split();

    assert_eq!(
        next_text(&mut ws_a).await,
        r#"{"type":"connectionEstablished"}"#
    );
    assert_eq!(
        next_text(&mut ws_b).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act: a burst of samples
    for n in 0..5 {
        let line = format!("{{\"angle\":{n}}}\n");
        device_write.write_all(line.as_bytes()).await.unwrap();
    }

    // Assert: both dashboards observe the full burst in arrival order
    for n in 0..5 {
        let expected = format!(r#"{{"angle":{n}}}"#);
        assert_eq!(next_text(&mut ws_a).await, expected);
        assert_eq!(next_text(&mut ws_b).await, expected);
    }
}

#[tokio::test]
async fn test_late_dashboard_receives_window_replay() {
    // Arrange: session bridging, telemetry already flowing
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws_a = harness.connect_client().await;

    ws_a.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    let (_device_read, mut device_write) = device_side.into_split();
    assert_eq!(
        next_text(&mut ws_a).await,
        r#"{"type":"connectionEstablished"}"#
    );

    device_write.write_all(b"{\"angle\":7}\n").await.unwrap();
    assert_eq!(next_text(&mut ws_a).await, r#"{"angle":7}"#);

    // Act: a second dashboard attaches after the sample arrived
    let mut ws_b = harness.connect_client().await;

    // Assert: it starts with the retained window, not a blank chart
    assert_eq!(next_text(&mut ws_b).await, r#"{"angle":7}"#);
}

// ── Shutdown & reconnection ───────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_notifies_dashboards_then_closes_1001() {
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    ws.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let _device_side = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act
    harness.session.shutdown();

    // Assert: the notification precedes the close frame
    assert_eq!(next_text(&mut ws).await, r#"{"type":"deviceSessionEnded"}"#);
    assert_eq!(next_close_code(&mut ws).await, 1001);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_reconnection() {
    // Arrange: a reconnect delay far longer than the test, so only
    // cancellation can bring the session down promptly
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        reconnect_delay: Duration::from_secs(600),
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    ws.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act: the device goes away; the supervisor enters its retry wait
    drop(device_side);
    drop(device);
    let lost = next_text(&mut ws).await;
    assert!(lost.contains(r#""type":"connectionLost""#));

    harness.session.shutdown();

    // Assert: clients are closed and the session reaches Closed well within
    // the 600-second delay, proving the pending attempt was cancelled
    assert_eq!(next_close_code(&mut ws).await, 1001);
    let deadline = tokio::time::Instant::now() + TICK;
    while harness.session.state() != SessionState::Closed {
        assert!(tokio::time::Instant::now() < deadline, "session never closed");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_device_drop_and_recovery_reach_dashboards() {
    // Arrange: a fast retry so the test observes a full drop/recover cycle
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        auth_token: Some("s3cret".to_string()),
        device_endpoint: endpoint,
        reconnect_delay: Duration::from_millis(50),
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    ws.send(init_envelope("127.0.0.1", "s3cret")).await.unwrap();
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );

    // Act: drop the device connection; the listener stays up so the next
    // dial succeeds
    drop(device_side);
    let lost = next_text(&mut ws).await;
    assert!(lost.contains(r#""type":"connectionLost""#));

    let _ = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );
}

// ── Direct mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_direct_mode_first_command_bootstraps_session() {
    // Arrange: no token, no envelope; the configured endpoint is dialed on
    // the first command frame
    let (device, endpoint) = fake_device().await;
    let harness = Harness::start(BridgeConfig {
        device_endpoint: endpoint,
        direct_mode: true,
        ..BridgeConfig::default()
    })
    .await;
    let mut ws = harness.connect_client().await;

    // Act
    ws.send(Message::Text("START".to_string())).await.unwrap();

    // Assert: the device session comes up and the queued command arrives
    let (device_side, _) = timeout(TICK, device.accept()).await.unwrap().unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"connectionEstablished"}"#
    );
    let mut device_lines = BufReader::new(device_side).lines();
    let line = timeout(TICK, device_lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("START"));
}
