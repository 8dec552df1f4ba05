//! Driver abstraction.
//!
//! The router talks to the transport only through [`NetworkDriver`], and the
//! driver talks back only through [`NetworkListener`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{NetworkEvent, NetworkMessage, WireType};

use super::client::{ClientConnection, ConnectionManager};
use super::core::DriverCore;

// ============================================================================
// Callbacks
// ============================================================================

/// Receives driver events.
///
/// Calls arrive on the channel's I/O task, in delivery order per channel.
pub trait NetworkListener: Send + Sync {
    /// A channel changed lifecycle state.
    fn on_network_event(&self, event: NetworkEvent);

    /// A decoded and stamped inbound message.
    fn on_network_message(&self, message: NetworkMessage);
}

/// Outcome of an outbound message.
pub trait DeliveryStatus: Send + Sync {
    /// The transport accepted the message.
    fn success(&self, channel_id: &ChannelId, message: &NetworkMessage) {
        let _ = (channel_id, message);
    }

    /// The message was rejected or could not be written.
    fn error(&self, channel_id: &ChannelId, message: &NetworkMessage, cause: &Error) {
        let _ = (channel_id, message, cause);
    }
}

/// Outcome of a connect or close request.
pub trait ConnectionStatus: Send + Sync {
    /// The operation succeeded.
    fn success(&self, channel_id: &ChannelId) {
        let _ = channel_id;
    }

    /// The operation failed.
    fn error(&self, channel_id: &ChannelId, cause: &Error) {
        let _ = (channel_id, cause);
    }
}

// ============================================================================
// NetworkDriver
// ============================================================================

/// Protocol-specific transport.
///
/// Implementors provide the [`DriverCore`], lifecycle and optionally a
/// [`ConnectionManager`]; everything else has a default that delegates to
/// the core.
#[async_trait]
pub trait NetworkDriver: Send + Sync + 'static {
    /// Returns the protocol-agnostic driver state.
    fn core(&self) -> &DriverCore;

    /// Returns the outbound connection manager, if supported.
    fn connections(&self) -> Option<&ConnectionManager> {
        None
    }

    /// Starts accepting and serving channels.
    async fn start(&self) -> Result<()>;

    /// Stops the driver and closes every channel.
    async fn stop(&self) -> Result<()>;

    /// Validates configuration before the first start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    fn initialize(&self) -> Result<()> {
        self.core().options().validate()
    }

    /// Returns `true` between `start` and `stop`.
    fn is_running(&self) -> bool {
        self.core().is_running()
    }

    /// Wire type carried by this driver.
    fn wire_type(&self) -> WireType {
        self.core().wire_type()
    }

    /// Installs the listener receiving events and messages.
    fn set_listener(&self, listener: Weak<dyn NetworkListener>) {
        self.core().set_listener(listener);
    }

    /// Registers interest in an event.
    fn subscribe(&self, event: &str) {
        self.core().subscribe(event);
    }

    /// Withdraws interest in an event.
    fn unsubscribe(&self, event: &str) {
        self.core().unsubscribe(event);
    }

    /// Sends a message to one channel.
    ///
    /// # Errors
    ///
    /// See [`DriverCore::send`].
    fn send(&self, channel_id: &ChannelId, message: &NetworkMessage) -> Result<()> {
        self.core().send(channel_id, message, None)
    }

    /// Sends a message and reports the outcome.
    ///
    /// # Errors
    ///
    /// See [`DriverCore::send`].
    fn send_with_status(
        &self,
        channel_id: &ChannelId,
        message: &NetworkMessage,
        status: Arc<dyn DeliveryStatus>,
    ) -> Result<()> {
        self.core().send(channel_id, message, Some(status))
    }

    /// Sends a message to every live channel.
    ///
    /// # Errors
    ///
    /// See [`DriverCore::broadcast`].
    fn broadcast(&self, message: &NetworkMessage) -> Result<()> {
        self.core().broadcast(message)
    }

    /// Starts maintaining an outbound connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Driver`] if the driver has no client side
    /// - [`Error::DuplicateConnection`] if the channel is already tracked
    fn connect_to(
        &self,
        connection: ClientConnection,
        status: Option<Arc<dyn ConnectionStatus>>,
    ) -> Result<()> {
        match self.connections() {
            Some(manager) => manager.connect(connection, status),
            None => {
                let err = Error::driver("driver does not support outbound connections");
                if let Some(status) = status {
                    status.error(connection.channel_id(), &err);
                }
                Err(err)
            }
        }
    }

    /// Stops maintaining an outbound connection and closes its channel.
    ///
    /// Returns `true` if a connection intent was tracked.
    fn disconnect(&self, channel_id: &ChannelId) -> bool {
        let tracked = self
            .connections()
            .is_some_and(|manager| manager.disconnect(channel_id));

        if self.core().channels().contains(channel_id) {
            let _ = self.core().close_channel(channel_id, None);
        }

        tracked
    }

    /// Returns `true` if the channel is live.
    fn exists_channel(&self, channel_id: &ChannelId) -> bool {
        self.core().channels().contains(channel_id)
    }

    /// Returns the IDs of all live channels.
    fn available_channels(&self) -> Vec<ChannelId> {
        self.core().channels().ids()
    }

    /// Closes one channel.
    ///
    /// # Errors
    ///
    /// See [`DriverCore::close_channel`].
    fn close_channel(
        &self,
        channel_id: &ChannelId,
        status: Option<Arc<dyn ConnectionStatus>>,
    ) -> Result<()> {
        self.core().close_channel(channel_id, status)
    }
}
