//! Device connection supervisor: dial, pump, reconnect.
//!
//! Exactly one supervisor task runs per device session.  It owns the device
//! connection for the session's whole lifetime, which is what makes the
//! reconnection guarantees structural rather than checked:
//!
//! - **At most one outstanding connection attempt.**  The supervisor is a
//!   single sequential loop; it cannot dial twice concurrently.
//! - **Fixed retry delay, no backoff, no cap.**  Every failure is followed
//!   by the same configured delay.  The device is an embedded appliance that
//!   either comes back or doesn't; escalating delays would only slow the
//!   recovery the operator is waiting for.
//! - **Shutdown cancels a pending attempt.**  The delay races the shutdown
//!   watch in a `select!`, so a session closed mid-wait never dials again.
//! - **State is read fresh at retry time.**  The loop re-checks
//!   [`SessionBridge::is_shutting_down`] before every dial instead of
//!   trusting a value captured when the retry was scheduled.
//!
//! While connected, the supervisor runs the *pump*: a reader task feeding
//! device lines into the session, and a writer loop draining the command
//! queue.  All device writes flow through the one writer loop, so commands
//! from concurrent clients can never interleave.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use motor_core::Command;

use crate::application::SessionBridge;
use crate::domain::config::DeviceEndpoint;
use crate::infrastructure::device_conn::{write_command_line, DeviceConnection};

/// Why the pump stopped.
enum PumpEnd {
    /// Explicit shutdown; the supervisor must not reconnect.
    Shutdown,
    /// The session dropped its command sender; treated like shutdown.
    CommandChannelClosed,
    /// The device transport failed; the supervisor schedules a reconnect.
    Transport(String),
}

/// Runs the device session until explicit shutdown.
///
/// Dials `endpoint`, pumps telemetry and commands while connected, and on
/// any transport failure waits the configured delay and dials again.  The
/// loop exits only when the session's shutdown signal fires (or the command
/// channel vanishes), and finishes by tearing the session down via
/// [`SessionBridge::device_session_closed`].
///
/// Spawn exactly one of these per established session; the session's
/// `try_install_device_channel` gate enforces that callers do.
pub async fn supervise(
    session: Arc<SessionBridge>,
    endpoint: DeviceEndpoint,
    mut commands: mpsc::Receiver<Command>,
) {
    let delay = session.config().reconnect_delay;
    let mut shutdown = session.shutdown_signal();

    info!(session = %session.id(), %endpoint, "device supervisor started");

    loop {
        // Fresh read: a shutdown that happened while we were waiting or
        // pumping must stop the loop before the next dial.
        if session.is_shutting_down() {
            break;
        }

        match DeviceConnection::connect(endpoint).await {
            Ok(conn) => {
                session.mark_bridging(endpoint);
                match pump(conn, &session, &mut commands, &mut shutdown).await {
                    PumpEnd::Shutdown => break,
                    PumpEnd::CommandChannelClosed => {
                        // The session's sender vanished without a shutdown
                        // signal; nothing can relay commands any more.
                        session.fail_session("internal command channel closed");
                        break;
                    }
                    PumpEnd::Transport(reason) => session.mark_device_error(&reason),
                }
            }
            Err(e) => session.mark_device_error(&e.to_string()),
        }

        if session.is_shutting_down() {
            break;
        }

        debug!(session = %session.id(), "retrying device connection in {delay:?}");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(session = %session.id(), "shutdown cancelled pending reconnection");
                    break;
                }
            }
        }
    }

    session.device_session_closed();
    info!(session = %session.id(), "device supervisor stopped");
}

/// Pumps one live connection until it breaks, the command channel closes,
/// or shutdown fires.
async fn pump(
    conn: DeviceConnection,
    session: &Arc<SessionBridge>,
    commands: &mut mpsc::Receiver<Command>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> PumpEnd {
    let (reader, mut write_half) = conn.into_split();

    // The reader runs in its own task so a stalled `next_line` never blocks
    // command writes.  It resolves with the reason the read side ended.
    let reader_session = Arc::clone(session);
    let mut reader_task = tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => reader_session.ingest_device_line(&line),
                Ok(None) => return "device closed the connection".to_string(),
                Err(e) => return format!("device read failed: {e}"),
            }
        }
    });

    loop {
        tokio::select! {
            ended = &mut reader_task => {
                let reason = ended.unwrap_or_else(|_| "device reader task failed".to_string());
                return PumpEnd::Transport(reason);
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    reader_task.abort();
                    close_write_half(&mut write_half).await;
                    return PumpEnd::Shutdown;
                }
            }

            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(command) => {
                        debug!(session = %session.id(), %command, "writing command to device");
                        if let Err(e) = write_command_line(&mut write_half, &command).await {
                            warn!(session = %session.id(), "{e}");
                            reader_task.abort();
                            return PumpEnd::Transport(e.to_string());
                        }
                    }
                    None => {
                        reader_task.abort();
                        close_write_half(&mut write_half).await;
                        return PumpEnd::CommandChannelClosed;
                    }
                }
            }
        }
    }
}

/// Best-effort graceful TCP close; the socket is released on drop anyway.
async fn close_write_half(write_half: &mut OwnedWriteHalf) {
    let _ = write_half.shutdown().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
