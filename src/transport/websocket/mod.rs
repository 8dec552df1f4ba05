//! WebSocket driver.
//!
//! [`WebSocketDriver`] carries JSON text frames over `tokio-tungstenite`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   accept (ip:port/path)   ┌────────────────────┐
//! │  WS clients  │──────────────────────────►│                    │
//! └──────────────┘                           │  WebSocketDriver   │
//! ┌──────────────┐   connect (rotating URLs) │  (DriverCore)      │
//! │  WS servers  │◄──────────────────────────│                    │
//! └──────────────┘                           └────────────────────┘
//! ```
//!
//! Every channel, inbound or outbound, runs the same event loop: frames in,
//! writes out, idle timer → ping → `TIMEOUT_ALERT_ON`, pong →
//! `TIMEOUT_ALERT_OFF`, close after `max_timeouts` missed heartbeats.
//! Outbound channels reconnect automatically when they drop.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Channel handle and event loop |
//! | `server` | Accept loop and HTTP upgrade |

// ============================================================================
// Submodules
// ============================================================================

mod connection;
mod server;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{CodecRegistry, WireType};

use super::client::{ClientConnector, ClosedSignal, ConnectionManager};
use super::core::DriverCore;
use super::driver::NetworkDriver;
use super::options::NetworkOptions;

// ============================================================================
// WebSocketDriver
// ============================================================================

/// WebSocket [`NetworkDriver`].
pub struct WebSocketDriver {
    core: Arc<DriverCore>,
    connections: ConnectionManager,
    /// Shutdown flag of the running accept loop.
    shutdown: Mutex<Option<Arc<AtomicBool>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl fmt::Debug for WebSocketDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketDriver")
            .field("core", &self.core)
            .field("local_addr", &*self.local_addr.lock())
            .finish_non_exhaustive()
    }
}

impl WebSocketDriver {
    /// Creates a driver with the JSON text codec.
    #[must_use]
    pub fn new(options: NetworkOptions) -> Self {
        Self::with_codecs(options, CodecRegistry::json())
    }

    /// Creates a driver with custom codecs.
    ///
    /// The registry must hold a text codec.
    #[must_use]
    pub fn with_codecs(options: NetworkOptions, codecs: CodecRegistry) -> Self {
        let max_reconnect = options.max_timeouts;
        let reconnect_interval = options.reconnect_interval;
        let core = Arc::new(DriverCore::new(options, WireType::Text, codecs));

        let connector = Arc::new(WebSocketConnector {
            core: Arc::clone(&core),
        });

        Self {
            core,
            connections: ConnectionManager::new(connector, max_reconnect, reconnect_interval),
            shutdown: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Returns the bound server address while running.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Returns the URL clients connect to while running.
    ///
    /// Format: `ws://{ip}:{port}{path}`
    #[must_use]
    pub fn ws_url(&self) -> Option<String> {
        self.local_addr()
            .map(|addr| format!("ws://{addr}{}", self.core.options().path))
    }
}

#[async_trait]
impl NetworkDriver for WebSocketDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn connections(&self) -> Option<&ConnectionManager> {
        Some(&self.connections)
    }

    async fn start(&self) -> Result<()> {
        self.initialize()?;

        if self.core.is_running() {
            return Ok(());
        }

        let options = self.core.options();
        if options.accept_clients {
            let (listener, local_addr) = server::bind(options.bind_addr()).await?;
            let shutdown = Arc::new(AtomicBool::new(false));

            tokio::spawn(server::accept_loop(
                listener,
                Arc::clone(&self.core),
                Arc::from(options.path.as_str()),
                Arc::clone(&shutdown),
            ));

            *self.shutdown.lock() = Some(shutdown);
            *self.local_addr.lock() = Some(local_addr);
            info!(%local_addr, path = %options.path, "WebSocket driver listening");
        }

        self.core.set_running(true);
        info!("WebSocket driver started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.core.set_running(false) {
            return Ok(());
        }

        if let Some(shutdown) = self.shutdown.lock().take() {
            shutdown.store(true, Ordering::Release);
        }
        *self.local_addr.lock() = None;

        self.connections.shutdown();
        self.core.close_all();

        info!("WebSocket driver stopped");
        Ok(())
    }
}

// ============================================================================
// WebSocketConnector
// ============================================================================

struct WebSocketConnector {
    core: Arc<DriverCore>,
}

#[async_trait]
impl ClientConnector for WebSocketConnector {
    async fn connect(&self, channel_id: &ChannelId, url: &Url) -> Result<ClosedSignal> {
        if !self.core.is_running() {
            return Err(Error::NotRunning);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(connection::spawn_channel(
            ws_stream,
            channel_id.clone(),
            Arc::clone(&self.core),
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
