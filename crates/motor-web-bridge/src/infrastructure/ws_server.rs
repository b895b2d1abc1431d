//! WebSocket server: accept loop and per-client task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket session.
//! 4. Classifying client frames: `INIT_CONNECTION` envelopes establish the
//!    device session (via the application layer's auth gate), everything
//!    else is command pass-through.
//! 5. Running a forwarder task per client that drains the session's fan-out
//!    channel, so telemetry and lifecycle events reach every dashboard in
//!    device-arrival order.
//! 6. Gracefully shutting down when the `running` flag is cleared.
//!
//! # Scalability
//!
//! Each browser client runs in its own Tokio task.  The accept loop never
//! blocks: it accepts a connection and immediately spawns a task for it
//! before accepting the next one.  All clients observe the *same* device
//! session; the session bridge, not this module, decides who may start one.
//!
//! # Portability
//!
//! Uses only `tokio::net` APIs which are portable across Windows, Linux, and
//! macOS.  Shutdown is triggered by a shared `AtomicBool` that is set by a
//! Ctrl+C signal handler (see `main.rs`), which is also cross-platform.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::application::{Outbound, SessionBridge, SessionState};
use crate::domain::config::DeviceEndpoint;
use crate::domain::messages::{
    classify, BridgeEvent, ClientMessage, ControlEnvelope, CLOSE_UNAUTHORIZED,
};
use crate::infrastructure::reconnect;

/// Shared handle to one client's WebSocket write half.
///
/// The read loop (errors, the unauthorized close) and the forwarder task
/// (fan-out frames) both write to the same sink, so it lives behind an
/// async-aware mutex.
type ClientSink = Arc<tokio::sync::Mutex<SplitSink<WebSocketStream<TcpStream>, WsMessage>>>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the WebSocket TCP listener.
///
/// Split out from [`serve`] so tests can bind port 0 and read the ephemeral
/// port back before the accept loop starts.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, missing
/// permission to bind).
pub async fn bind_server(session: &SessionBridge) -> anyhow::Result<TcpListener> {
    let bind_addr = session.config().ws_bind_addr;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;
    info!("WebSocket bridge listening on {bind_addr}");
    Ok(listener)
}

/// Runs the accept loop until `running` is set to `false`.
///
/// Each accepted connection is handed off to a dedicated Tokio task so that
/// one slow client never blocks others.
pub async fn serve(listener: TcpListener, session: Arc<SessionBridge>, running: Arc<AtomicBool>) {
    loop {
        // Check the shutdown flag before each accept attempt.
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Use a short timeout on `accept()` so the loop can periodically
        // check the `running` flag even when no browsers are connecting.
        let accept_result = timeout(Duration::from_millis(200), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, peer_addr))) => {
                info!("new browser connection from {peer_addr}");
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    handle_client(stream, peer_addr, session).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file
                // descriptors).  Log it and keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {
                // Timeout: no new connection in the last 200 ms.  Loop back
                // to check the `running` flag.
            }
        }
    }
}

/// Binds and serves in one call; the production entry point used by `main`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(session: Arc<SessionBridge>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = bind_server(&session).await?;
    serve(listener, session, running).await;
    Ok(())
}

// ── Per-client handler ────────────────────────────────────────────────────────

/// Top-level handler for a single browser client; wraps [`run_client`] and
/// logs the outcome.  Entry point for each per-client Tokio task.
async fn handle_client(raw_stream: TcpStream, peer_addr: SocketAddr, session: Arc<SessionBridge>) {
    match run_client(raw_stream, peer_addr, session).await {
        Ok(()) => info!("client {peer_addr} disconnected"),
        Err(e) => warn!("client {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one browser client connection.
///
/// 1. Completes the WebSocket HTTP upgrade handshake.
/// 2. Spawns a forwarder task draining the session's fan-out channel into
///    this client's sink (after replaying the telemetry window, so a
///    freshly attached dashboard starts with a populated chart).
/// 3. Reads client frames until the connection ends or the session closes
///    this client deliberately (unauthorized, shutdown).
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.
async fn run_client(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    session: Arc<SessionBridge>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    debug!("WebSocket session established: {peer_addr}");

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx: ClientSink = Arc::new(tokio::sync::Mutex::new(ws_tx));

    // Subscribe before replaying the window so no sample falls between the
    // backlog and the live stream.  A sample landing during the handoff can
    // appear twice; the chart tolerates a duplicated point, not a gap.
    let events = session.subscribe();
    let backlog: Vec<String> = session
        .snapshot()
        .iter()
        .filter_map(|sample| serde_json::to_string(&sample.update()).ok())
        .collect();

    let forwarder = tokio::spawn(forward_outbound(
        events,
        backlog,
        Arc::clone(&ws_tx),
        peer_addr,
    ));

    // ── Client read loop ──────────────────────────────────────────────────────
    loop {
        let ws_msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("client {peer_addr}: WebSocket closed normally");
                break;
            }
            Some(Err(e)) => {
                warn!("client {peer_addr}: WebSocket error: {e}");
                break;
            }
            None => {
                debug!("client {peer_addr}: stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(text) => {
                if !process_client_text(&session, peer_addr, &text, &ws_tx).await {
                    break;
                }
            }

            WsMessage::Binary(bytes) => {
                // Some WebSocket clients send text payloads in binary
                // frames; accept them when they decode as UTF-8.
                match String::from_utf8(bytes) {
                    Ok(text) => {
                        if !process_client_text(&session, peer_addr, &text, &ws_tx).await {
                            break;
                        }
                    }
                    Err(_) => {
                        warn!("client {peer_addr}: non-UTF-8 binary frame (ignored)");
                    }
                }
            }

            WsMessage::Ping(data) => {
                // tokio-tungstenite replies with the Pong automatically.
                debug!("client {peer_addr}: WebSocket ping ({} bytes)", data.len());
            }

            WsMessage::Pong(_) => {
                debug!("client {peer_addr}: WebSocket pong received");
            }

            WsMessage::Close(_) => {
                debug!("client {peer_addr}: WebSocket Close frame received");
                break;
            }

            WsMessage::Frame(_) => {
                debug!("client {peer_addr}: raw frame (ignored)");
            }
        }
    }

    forwarder.abort();
    Ok(())
}

/// Drains the session's fan-out channel into one client's sink.
///
/// Frames preserve broadcast order; a `Close` item sends the close frame and
/// ends the task (the read loop then observes the closed socket).
async fn forward_outbound(
    mut events: tokio::sync::broadcast::Receiver<Outbound>,
    backlog: Vec<String>,
    ws_tx: ClientSink,
    peer_addr: SocketAddr,
) {
    for json in backlog {
        let mut sink = ws_tx.lock().await;
        if sink.send(WsMessage::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        match events.recv().await {
            Ok(Outbound::Frame(json)) => {
                let mut sink = ws_tx.lock().await;
                if sink.send(WsMessage::Text(json)).await.is_err() {
                    debug!("client {peer_addr}: send failed (client disconnected)");
                    return;
                }
            }
            Ok(Outbound::Close { code, reason }) => {
                send_close(&ws_tx, code, &reason).await;
                return;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                // A stalled dashboard loses the oldest frames rather than
                // stalling the device read path.
                warn!("client {peer_addr}: fell behind, {skipped} frames dropped");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

// ── Frame processing ──────────────────────────────────────────────────────────

/// Processes one client text frame.  Returns `false` when the connection
/// must close (the unauthorized case).
async fn process_client_text(
    session: &Arc<SessionBridge>,
    peer_addr: SocketAddr,
    text: &str,
    ws_tx: &ClientSink,
) -> bool {
    session.note_client_message();

    let message = match classify(text) {
        Ok(message) => message,
        Err(malformed) => {
            warn!("client {peer_addr}: {malformed}");
            send_event(
                ws_tx,
                &BridgeEvent::Error {
                    message: malformed.to_string(),
                },
            )
            .await;
            return true;
        }
    };

    match message {
        ClientMessage::Envelope(ControlEnvelope::InitConnection {
            device_ip,
            auth_token,
        }) => handle_init_connection(session, peer_addr, &device_ip, &auth_token, ws_tx).await,
        ClientMessage::Command(raw) => {
            handle_command(session, peer_addr, &raw, ws_tx).await;
            true
        }
    }
}

/// Handles an `INIT_CONNECTION` envelope: auth gate, endpoint resolution,
/// device session start.  Returns `false` when the client must be closed.
async fn handle_init_connection(
    session: &Arc<SessionBridge>,
    peer_addr: SocketAddr,
    device_ip: &str,
    auth_token: &str,
    ws_tx: &ClientSink,
) -> bool {
    // The gate comes first, always: a wrong token is never acknowledged,
    // even when a session is already running.
    if session.verify_token(auth_token).is_err() {
        session.auth_failed();
        send_close(ws_tx, CLOSE_UNAUTHORIZED, "Unauthorized").await;
        return false;
    }

    // Authenticated later clients join the already-running session; their
    // envelope is acknowledged but starts nothing new.
    if session.state() == SessionState::Bridging {
        debug!("client {peer_addr}: device session already bridging; envelope ignored");
        send_event(ws_tx, &BridgeEvent::ConnectionEstablished).await;
        return true;
    }

    let host = match device_ip.parse() {
        Ok(host) => host,
        Err(_) => {
            warn!("client {peer_addr}: invalid deviceIp {device_ip:?}");
            send_event(
                ws_tx,
                &BridgeEvent::Error {
                    message: format!("invalid deviceIp: {device_ip}"),
                },
            )
            .await;
            return true;
        }
    };

    let endpoint = session.config().endpoint_for(host);
    start_device_session(session, endpoint);
    true
}

/// Handles a command pass-through frame.
async fn handle_command(
    session: &Arc<SessionBridge>,
    peer_addr: SocketAddr,
    raw: &str,
    ws_tx: &ClientSink,
) {
    // Direct mode: the first command bootstraps the device session against
    // the configured endpoint, no envelope or token needed.
    if session.config().direct_mode && session.state() == SessionState::AwaitingAuth {
        start_device_session(session, session.config().device_endpoint);
    }

    match session.relay_command(raw) {
        Ok(command) => debug!("client {peer_addr}: relayed {command}"),
        Err(e) => {
            debug!("client {peer_addr}: command rejected: {e}");
            // Rejections go to the offending client only, never broadcast.
            send_event(
                ws_tx,
                &BridgeEvent::Error {
                    message: e.to_string(),
                },
            )
            .await;
        }
    }
}

/// Installs the command channel and spawns the device supervisor, unless a
/// session is already running (the loser of the race starts nothing).
fn start_device_session(session: &Arc<SessionBridge>, endpoint: DeviceEndpoint) {
    let (tx, rx) = SessionBridge::command_queue();
    if session.try_install_device_channel(tx) {
        tokio::spawn(reconnect::supervise(Arc::clone(session), endpoint, rx));
    } else {
        debug!("device session already running; not starting another");
    }
}

// ── Sink helpers ──────────────────────────────────────────────────────────────

/// Sends a lifecycle event to one client only (broadcast events go through
/// the session's fan-out channel instead).
async fn send_event(ws_tx: &ClientSink, event: &BridgeEvent) {
    let mut sink = ws_tx.lock().await;
    if sink.send(WsMessage::Text(event.to_json())).await.is_err() {
        debug!("event send failed (client disconnected)");
    }
}

/// Sends a close frame with the given code and reason.
async fn send_close(ws_tx: &ClientSink, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    let mut sink = ws_tx.lock().await;
    if sink.send(WsMessage::Close(Some(frame))).await.is_err() {
        debug!("close send failed (client already gone)");
    }
}
