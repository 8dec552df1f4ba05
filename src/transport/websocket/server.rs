//! WebSocket accept loop.
//!
//! # Connection Flow
//!
//! 1. Listener binds to the configured `ip:port`
//! 2. Peer opens a TCP connection
//! 3. HTTP upgrade; requests for other paths are answered with 404
//! 4. Channel gets a generated ID and its event loop starts

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::transport::core::DriverCore;

use super::connection::spawn_channel;

// ============================================================================
// Constants
// ============================================================================

/// Poll period of the shutdown flag while waiting for connections.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Bind
// ============================================================================

/// Binds the listener and returns it with its actual address.
///
/// # Errors
///
/// Returns [`Error::Io`] if binding fails.
pub(crate) async fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    debug!(%local_addr, "WebSocket server bound");

    Ok((listener, local_addr))
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Accepts connections until `shutdown` is set.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    core: Arc<DriverCore>,
    path: Arc<str>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Accept loop started");

    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("Accept loop shutting down");
            break;
        }

        // Accept with timeout to allow checking shutdown flag
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                let core = Arc::clone(&core);
                let path = Arc::clone(&path);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, core, &path).await {
                        warn!(error = %e, ?addr, "Connection handling failed");
                    }
                });
            }
            Ok(Err(e)) => {
                error!(error = %e, "Accept failed");
            }
            Err(_) => continue,
        }
    }

    debug!("Accept loop terminated");
}

/// Upgrades one TCP connection and registers it as a channel.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    core: Arc<DriverCore>,
    path: &str,
) -> Result<()> {
    debug!(?addr, "New TCP connection");

    if !core.is_running() {
        return Err(Error::NotRunning);
    }

    let check_path = |request: &Request, response: Response| {
        let requested = request.uri().path();
        if path_matches(path, requested) {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some(format!("unknown path: {requested}")));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path)
        .await
        .map_err(|e| Error::driver(format!("WebSocket upgrade failed: {e}")))?;

    let channel_id = ChannelId::generate();
    info!(channel_id = %channel_id, ?addr, "WebSocket connection established");

    let _closed = spawn_channel(ws_stream, channel_id, core);
    Ok(())
}

/// Returns `true` if the request path is served.
///
/// A configured path of `/` serves every path.
fn path_matches(expected: &str, requested: &str) -> bool {
    expected == "/" || expected.trim_end_matches('/') == requested.trim_end_matches('/')
}

// ============================================================================
// Tests
// ============================================================================
