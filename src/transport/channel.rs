//! Channel registry.
//!
//! Tracks every live channel of one driver together with its heartbeat-miss
//! counter and inbound message sequence.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::WireFrame;

// ============================================================================
// Types
// ============================================================================

/// Completion callback for a channel write.
///
/// Runs once the transport accepted or failed the frame.
pub type WriteCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Identity of one [`ChannelHandle`] allocation.
///
/// Tells a channel apart from a later channel registered under the same ID.
/// The handle must stay allocated while its identity is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

impl HandleId {
    /// Returns the identity of the handle behind a pointer.
    #[inline]
    #[must_use]
    pub fn of<H: ?Sized>(handle: *const H) -> Self {
        Self(handle.cast::<()>() as usize)
    }
}

// ============================================================================
// ChannelHandle
// ============================================================================

/// Driver-owned handle to the transport behind a channel.
///
/// All methods queue work for the channel's I/O task and return immediately.
pub trait ChannelHandle: Send + Sync {
    /// Queues a frame for writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`] if the I/O task is gone.
    fn write(&self, frame: WireFrame, on_complete: Option<WriteCallback>) -> Result<()>;

    /// Queues a heartbeat ping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`] if the I/O task is gone.
    fn ping(&self) -> Result<()>;

    /// Requests the channel close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`] if the I/O task is gone.
    fn close(&self) -> Result<()>;
}

// ============================================================================
// Channel
// ============================================================================

/// One live logical endpoint.
pub struct Channel {
    id: ChannelId,
    handle: Arc<dyn ChannelHandle>,
    reconnect_counter: AtomicU32,
    message_sequence: AtomicU64,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("reconnect_counter", &self.reconnect_counter)
            .field("message_sequence", &self.message_sequence)
            .finish_non_exhaustive()
    }
}

impl Channel {
    fn new(id: ChannelId, handle: Arc<dyn ChannelHandle>) -> Self {
        Self {
            id,
            handle,
            reconnect_counter: AtomicU32::new(0),
            message_sequence: AtomicU64::new(0),
        }
    }

    /// Returns the channel ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Returns the transport handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn ChannelHandle> {
        &self.handle
    }

    /// Returns the identity of the transport handle.
    #[inline]
    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        HandleId::of(Arc::as_ptr(&self.handle))
    }

    /// Returns the current heartbeat-miss count.
    #[inline]
    #[must_use]
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_counter.load(Ordering::Acquire)
    }

    /// Returns the last assigned inbound sequence number.
    #[inline]
    #[must_use]
    pub fn message_sequence(&self) -> u64 {
        self.message_sequence.load(Ordering::Acquire)
    }
}

// ============================================================================
// ChannelRegistry
// ============================================================================

/// Concurrent map of live channels.
///
/// Exactly one [`Channel`] exists per ID; activating an ID that is already
/// present replaces the old entry and restarts its counters.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<Channel>, FxBuildHasher>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the channel entry.
    ///
    /// Returns the replaced channel, if any.
    pub fn on_active(
        &self,
        channel_id: ChannelId,
        handle: Arc<dyn ChannelHandle>,
    ) -> Option<Arc<Channel>> {
        let channel = Arc::new(Channel::new(channel_id.clone(), handle));
        let previous = self.channels.insert(channel_id, channel);

        if let Some(ref old) = previous {
            debug!(channel_id = %old.id(), "Channel replaced");
        }

        previous
    }

    /// Removes the channel entry if `handle` still serves it.
    ///
    /// A late close of a replaced channel leaves the replacement in place.
    pub fn on_inactive(&self, channel_id: &ChannelId, handle: HandleId) -> Option<Arc<Channel>> {
        let removed = self
            .channels
            .remove_if(channel_id, |_, channel| channel.handle_id() == handle)
            .map(|(_, channel)| channel);

        if removed.is_none() && self.channels.contains_key(channel_id) {
            debug!(channel_id = %channel_id, "Stale close ignored, channel was replaced");
        }

        removed
    }

    /// Returns the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if the ID is unknown.
    pub fn get(&self, channel_id: &ChannelId) -> Result<Arc<Channel>> {
        self.channels
            .get(channel_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::channel_not_found(channel_id))
    }

    /// Returns `true` if the channel is live.
    #[inline]
    #[must_use]
    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.channels.contains_key(channel_id)
    }

    /// Returns the IDs of all live channels.
    #[must_use]
    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns a snapshot of all live channels.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the number of live channels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` if no channel is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Increments and returns the inbound sequence, starting at 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if the ID is unknown.
    pub fn next_message_sequence(&self, channel_id: &ChannelId) -> Result<u64> {
        let channel = self.get(channel_id)?;
        Ok(channel.message_sequence.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Increments and returns the heartbeat-miss counter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if the ID is unknown.
    pub fn next_reconnect_count(&self, channel_id: &ChannelId) -> Result<u32> {
        let channel = self.get(channel_id)?;
        Ok(channel.reconnect_counter.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Zeroes the heartbeat-miss counter, returning its previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if the ID is unknown.
    pub fn reset_reconnect_count(&self, channel_id: &ChannelId) -> Result<u32> {
        let channel = self.get(channel_id)?;
        Ok(channel.reconnect_counter.swap(0, Ordering::AcqRel))
    }

    /// Removes every entry, returning the removed channels.
    pub fn drain(&self) -> Vec<Arc<Channel>> {
        let ids = self.ids();
        ids.iter()
            .filter_map(|id| self.channels.remove(id).map(|(_, channel)| channel))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
