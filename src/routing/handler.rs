//! Application message handlers.

use crate::error::Result;
use crate::protocol::NetworkMessage;

use super::session::ClientSession;

/// Processes inbound messages of one event.
///
/// Handlers run inline on the channel's I/O task. A handler that blocks
/// stalls further inbound processing of that channel.
pub trait MessageHandler: Send + Sync {
    /// Handles one message.
    ///
    /// # Errors
    ///
    /// Errors are logged by the router and never reach the driver.
    fn on_message(&self, message: NetworkMessage, session: &ClientSession) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(NetworkMessage, &ClientSession) -> Result<()> + Send + Sync,
{
    fn on_message(&self, message: NetworkMessage, session: &ClientSession) -> Result<()> {
        self(message, session)
    }
}
