//! In-process loopback driver.
//!
//! [`MemoryDriver`] runs the full driver contract without sockets. Each
//! channel is paired with a [`MemoryPeer`] that plays the remote end: it
//! injects inbound messages, reads what the gateway sends, and can simulate
//! heartbeat timeouts and drops.
//!
//! Outbound connections accept `memory://` URLs; the peer of a connected
//! channel is collected with [`MemoryDriver::take_peer`].
//!
//! # Example
//!
//! ```ignore
//! let driver = Arc::new(MemoryDriver::new(NetworkOptions::new()));
//! driver.start().await?;
//!
//! let mut peer = driver.open_channel("c1")?;
//! peer.send(&NetworkMessage::new("login"))?;
//! let reply = peer.recv().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{CodecRegistry, NetworkEventType, NetworkMessage, WireFrame, WireType};

use super::channel::{ChannelHandle, HandleId, WriteCallback};
use super::client::{ClientConnector, ClosedSignal, ConnectionManager};
use super::core::DriverCore;
use super::driver::NetworkDriver;
use super::options::NetworkOptions;

// ============================================================================
// Constants
// ============================================================================

/// URL scheme accepted for outbound memory connections.
pub const MEMORY_SCHEME: &str = "memory";

// ============================================================================
// Types
// ============================================================================

type PeerSlot = DashMap<ChannelId, MemoryPeer, FxBuildHasher>;

// ============================================================================
// MemoryHandle
// ============================================================================

/// Driver side of a loopback channel.
struct MemoryHandle {
    channel_id: ChannelId,
    core: Weak<DriverCore>,
    outbound: mpsc::UnboundedSender<WireFrame>,
    pings: mpsc::UnboundedSender<()>,
    closed: Mutex<Option<oneshot::Sender<()>>>,
}

impl ChannelHandle for MemoryHandle {
    fn write(&self, frame: WireFrame, on_complete: Option<WriteCallback>) -> Result<()> {
        let result = self
            .outbound
            .send(frame)
            .map_err(|_| Error::driver(format!("peer of {} is gone", self.channel_id)));

        match on_complete {
            Some(callback) => {
                callback(result);
                Ok(())
            }
            None => result,
        }
    }

    fn ping(&self) -> Result<()> {
        self.pings
            .send(())
            .map_err(|_| Error::driver(format!("peer of {} is gone", self.channel_id)))
    }

    fn close(&self) -> Result<()> {
        let Some(closed) = self.closed.lock().take() else {
            return Ok(());
        };

        if let Some(core) = self.core.upgrade() {
            core.channel_inactive(&self.channel_id, HandleId::of(std::ptr::from_ref(self)));
            core.notify(&self.channel_id, NetworkEventType::Unregistered);
        }

        let _ = closed.send(());
        Ok(())
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Remote end of a loopback channel.
pub struct MemoryPeer {
    channel_id: ChannelId,
    core: Arc<DriverCore>,
    handle: Weak<MemoryHandle>,
    outbound: mpsc::UnboundedReceiver<WireFrame>,
    pings: mpsc::UnboundedReceiver<()>,
}

impl fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPeer")
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

impl MemoryPeer {
    /// Returns the channel ID.
    #[inline]
    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Delivers a message to the gateway as if it arrived on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the message cannot be encoded.
    pub fn send(&self, message: &NetworkMessage) -> Result<()> {
        let frame = self.core.codecs().serialize(self.core.wire_type(), message)?;
        self.send_frame(frame);
        Ok(())
    }

    /// Delivers a raw frame to the gateway.
    pub fn send_frame(&self, frame: WireFrame) {
        self.core.handle_frame(&self.channel_id, frame);
    }

    /// Waits for the next message sent by the gateway.
    ///
    /// # Errors
    ///
    /// - [`Error::Driver`] if the channel is closed
    /// - [`Error::Codec`] if the frame does not decode
    pub async fn recv(&mut self) -> Result<NetworkMessage> {
        let frame = self
            .outbound
            .recv()
            .await
            .ok_or_else(|| Error::driver(format!("channel {} closed", self.channel_id)))?;
        self.core.codecs().deserialize(frame)
    }

    /// Returns the next sent message without waiting.
    pub fn try_recv(&mut self) -> Option<Result<NetworkMessage>> {
        let frame = self.outbound.try_recv().ok()?;
        Some(self.core.codecs().deserialize(frame))
    }

    /// Returns the number of heartbeat pings received so far.
    pub fn drain_pings(&mut self) -> usize {
        let mut count = 0;
        while self.pings.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    /// Fires the channel's idle timer.
    pub fn idle(&self) {
        self.core.idle_timeout(&self.channel_id);
    }

    /// Answers a heartbeat ping.
    pub fn pong(&self) {
        self.core.pong_received(&self.channel_id);
    }

    /// Drops this peer's connection from the remote side.
    ///
    /// A channel that replaced this one under the same ID stays open.
    pub fn disconnect(self) {
        if let Some(handle) = self.handle.upgrade() {
            let _ = handle.close();
        }
    }
}

// ============================================================================
// MemoryDriver
// ============================================================================

/// Loopback [`NetworkDriver`].
pub struct MemoryDriver {
    core: Arc<DriverCore>,
    connections: ConnectionManager,
    peers: Arc<PeerSlot>,
}

impl fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("core", &self.core)
            .field("pending_peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new(NetworkOptions::new())
    }
}

impl MemoryDriver {
    /// Creates a driver carrying JSON text frames.
    #[must_use]
    pub fn new(options: NetworkOptions) -> Self {
        Self::with_codecs(options, WireType::Text, CodecRegistry::json())
    }

    /// Creates a driver with a custom wire type and codecs.
    #[must_use]
    pub fn with_codecs(options: NetworkOptions, wire_type: WireType, codecs: CodecRegistry) -> Self {
        let max_reconnect = options.max_timeouts;
        let reconnect_interval = options.reconnect_interval;
        let core = Arc::new(DriverCore::new(options, wire_type, codecs));
        let peers: Arc<PeerSlot> = Arc::new(DashMap::with_hasher(FxBuildHasher));

        let connector = Arc::new(MemoryConnector {
            core: Arc::clone(&core),
            peers: Arc::clone(&peers),
        });

        Self {
            core,
            connections: ConnectionManager::new(connector, max_reconnect, reconnect_interval),
            peers,
        }
    }

    /// Opens an inbound channel and returns its remote end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] if the driver is stopped.
    pub fn open_channel(&self, channel_id: impl Into<ChannelId>) -> Result<MemoryPeer> {
        if !self.core.is_running() {
            return Err(Error::NotRunning);
        }
        let (peer, _closed) = open(&self.core, channel_id.into());
        Ok(peer)
    }

    /// Takes the remote end of an outbound channel once it connected.
    #[must_use]
    pub fn take_peer(&self, channel_id: &ChannelId) -> Option<MemoryPeer> {
        self.peers.remove(channel_id).map(|(_, peer)| peer)
    }
}

#[async_trait]
impl NetworkDriver for MemoryDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn connections(&self) -> Option<&ConnectionManager> {
        Some(&self.connections)
    }

    async fn start(&self) -> Result<()> {
        self.initialize()?;
        if !self.core.set_running(true) {
            info!("Memory driver started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.core.set_running(false) {
            self.connections.shutdown();
            self.core.close_all();
            self.peers.clear();
            info!("Memory driver stopped");
        }
        Ok(())
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

struct MemoryConnector {
    core: Arc<DriverCore>,
    peers: Arc<PeerSlot>,
}

#[async_trait]
impl ClientConnector for MemoryConnector {
    async fn connect(&self, channel_id: &ChannelId, url: &Url) -> Result<ClosedSignal> {
        if !self.core.is_running() {
            return Err(Error::NotRunning);
        }
        if url.scheme() != MEMORY_SCHEME {
            return Err(Error::driver(format!("unsupported scheme: {}", url.scheme())));
        }

        let (peer, closed) = open(&self.core, channel_id.clone());
        self.peers.insert(channel_id.clone(), peer);
        Ok(closed)
    }
}

/// Creates a loopback pair and activates the channel.
fn open(core: &Arc<DriverCore>, channel_id: ChannelId) -> (MemoryPeer, ClosedSignal) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (ping_tx, ping_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    let handle = Arc::new(MemoryHandle {
        channel_id: channel_id.clone(),
        core: Arc::downgrade(core),
        outbound: outbound_tx,
        pings: ping_tx,
        closed: Mutex::new(Some(closed_tx)),
    });

    let own_handle = Arc::downgrade(&handle);

    core.notify(&channel_id, NetworkEventType::Registered);
    core.channel_active(&channel_id, handle);
    debug!(channel_id = %channel_id, "Loopback channel opened");

    let peer = MemoryPeer {
        channel_id,
        core: Arc::clone(core),
        handle: own_handle,
        outbound: outbound_rx,
        pings: ping_rx,
    };

    (peer, closed_rx)
}

// ============================================================================
// Tests
// ============================================================================
