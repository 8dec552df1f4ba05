//! WebSocket channel and event loop.
//!
//! Each channel spawns one tokio task that handles:
//!
//! - Incoming frames (decoded and forwarded through the driver core)
//! - Outgoing writes, pings and close requests from the handle
//! - The idle timer driving heartbeats
//!
//! Inbound frames of one channel are processed in arrival order on this task.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{NetworkEventType, WireFrame};
use crate::transport::channel::{ChannelHandle, HandleId, WriteCallback};
use crate::transport::client::ClosedSignal;
use crate::transport::core::DriverCore;

// ============================================================================
// ChannelCommand
// ============================================================================

/// Internal commands for the event loop.
enum ChannelCommand {
    /// Write one frame.
    Write {
        frame: WireFrame,
        on_complete: Option<WriteCallback>,
    },
    /// Send a heartbeat ping.
    Ping,
    /// Close the connection.
    Close,
}

// ============================================================================
// WebSocketHandle
// ============================================================================

/// Handle to a WebSocket channel's event loop.
struct WebSocketHandle {
    channel_id: ChannelId,
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl WebSocketHandle {
    fn command(&self, command: ChannelCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::driver(format!("channel {} is closed", self.channel_id)))
    }
}

impl ChannelHandle for WebSocketHandle {
    fn write(&self, frame: WireFrame, on_complete: Option<WriteCallback>) -> Result<()> {
        self.command(ChannelCommand::Write { frame, on_complete })
    }

    fn ping(&self) -> Result<()> {
        self.command(ChannelCommand::Ping)
    }

    fn close(&self) -> Result<()> {
        self.command(ChannelCommand::Close)
    }
}

// ============================================================================
// Spawn
// ============================================================================

/// Registers a connected stream as a channel and spawns its event loop.
///
/// Returns a signal that fires once the channel is gone.
pub(crate) fn spawn_channel<S>(
    ws_stream: WebSocketStream<S>,
    channel_id: ChannelId,
    core: Arc<DriverCore>,
) -> ClosedSignal
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    let handle = Arc::new(WebSocketHandle {
        channel_id: channel_id.clone(),
        command_tx,
    });

    // Pins the handle's allocation so its identity stays unique.
    let own_handle: Weak<WebSocketHandle> = Arc::downgrade(&handle);

    core.notify(&channel_id, NetworkEventType::Registered);
    core.channel_active(&channel_id, handle);

    tokio::spawn(async move {
        run_event_loop(ws_stream, &channel_id, command_rx, &core).await;

        core.channel_inactive(&channel_id, HandleId::of(own_handle.as_ptr()));
        core.notify(&channel_id, NetworkEventType::Unregistered);
        let _ = closed_tx.send(());

        debug!(channel_id = %channel_id, "Event loop terminated");
    });

    closed_rx
}

// ============================================================================
// Event Loop
// ============================================================================

async fn run_event_loop<S>(
    ws_stream: WebSocketStream<S>,
    channel_id: &ChannelId,
    mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    core: &DriverCore,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let idle_time = core.options().idle_time;
    let mut idle = interval_at(Instant::now() + idle_time, idle_time);
    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Incoming frames from the peer
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        idle.reset();
                        core.handle_frame(channel_id, WireFrame::Text(text.as_str().to_owned()));
                    }

                    Some(Ok(Message::Binary(bytes))) => {
                        idle.reset();
                        core.handle_frame(channel_id, WireFrame::Binary(bytes.to_vec()));
                    }

                    Some(Ok(Message::Pong(_))) => {
                        idle.reset();
                        core.pong_received(channel_id);
                    }

                    Some(Ok(Message::Ping(_))) => {
                        idle.reset();
                        trace!(channel_id = %channel_id, "Ping received");
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!(channel_id = %channel_id, "WebSocket closed by remote");
                        break;
                    }

                    Some(Ok(Message::Frame(_))) => {}

                    Some(Err(e)) => {
                        error!(channel_id = %channel_id, error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!(channel_id = %channel_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            // Commands from the handle
            command = command_rx.recv() => {
                match command {
                    Some(ChannelCommand::Write { frame, on_complete }) => {
                        let result = ws_write.send(to_message(frame)).await.map_err(Error::from);

                        match (on_complete, result) {
                            (Some(callback), result) => callback(result),
                            (None, Err(e)) => {
                                warn!(channel_id = %channel_id, error = %e, "Write failed");
                            }
                            (None, Ok(())) => {}
                        }
                    }

                    Some(ChannelCommand::Ping) => {
                        if let Err(e) = ws_write.send(Message::Ping(Vec::<u8>::new().into())).await {
                            warn!(channel_id = %channel_id, error = %e, "Ping failed");
                        }
                    }

                    Some(ChannelCommand::Close) => {
                        debug!(channel_id = %channel_id, "Close command received");
                        let _ = ws_write.close().await;
                        break;
                    }

                    None => {
                        debug!(channel_id = %channel_id, "Command channel closed");
                        break;
                    }
                }
            }

            // Idle timer
            _ = idle.tick() => {
                core.idle_timeout(channel_id);
            }
        }
    }
}

/// Converts a wire frame into a WebSocket message.
fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_message_text() {
        let message = to_message(WireFrame::Text("{}".into()));
        assert!(matches!(message, Message::Text(ref t) if t.as_str() == "{}"));
    }

    #[test]
    fn test_to_message_binary() {
        let message = to_message(WireFrame::Binary(vec![1, 2, 3]));
        assert!(matches!(message, Message::Binary(ref b) if b[..] == [1, 2, 3]));
    }

    #[test]
    fn test_handle_after_loop_gone() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        drop(command_rx);

        let handle = WebSocketHandle {
            channel_id: ChannelId::from("c1"),
            command_tx,
        };

        assert!(matches!(handle.ping(), Err(Error::Driver { .. })));
        assert!(handle.close().is_err());
        assert!(handle.write(WireFrame::Text("x".into()), None).is_err());
    }
}
