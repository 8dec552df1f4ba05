//! Error types for the event gateway.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use event_gateway::{NetworkMessage, Result};
//!
//! fn reply(session: &ClientSession) -> Result<()> {
//!     session.send(NetworkMessage::new("pong"))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Channel | [`Error::ChannelNotFound`], [`Error::DuplicateConnection`] |
//! | Routing | [`Error::DuplicateHandler`], [`Error::UnknownSender`], [`Error::NoHandler`] |
//! | Authentication | [`Error::NotAuthenticated`], [`Error::InvalidTransition`] |
//! | Filtering | [`Error::FilteredMessage`], [`Error::Filter`] |
//! | Application | [`Error::Handler`] |
//! | Transport | [`Error::Codec`], [`Error::Driver`], [`Error::NotRunning`] |
//! | Configuration | [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ChannelId;
use crate::protocol::Direction;
use crate::routing::AuthenticationStatus;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Channel not found in the registry.
    ///
    /// Returned by send and sequence operations on an unknown channel.
    #[error("Channel not found: {channel_id}")]
    ChannelNotFound {
        /// The missing channel ID.
        channel_id: ChannelId,
    },

    /// An outbound connection intent already exists for this channel.
    #[error("Connection already exists for channel: {channel_id}")]
    DuplicateConnection {
        /// The duplicated channel ID.
        channel_id: ChannelId,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// A handler is already bound to this event.
    #[error("There is already a handler for event '{event}'")]
    DuplicateHandler {
        /// The event with an existing binding.
        event: String,
    },

    /// Message sender has no session in this origin.
    #[error("Unknown message sender: channel={channel_id}, event={event}")]
    UnknownSender {
        /// Channel that sent the message.
        channel_id: ChannelId,
        /// Event carried by the message.
        event: String,
    },

    /// No handler is bound to the message event.
    #[error("No handler for event '{event}' (channel={channel_id})")]
    NoHandler {
        /// Channel that sent the message.
        channel_id: ChannelId,
        /// Event without a handler.
        event: String,
    },

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Sender is not authenticated for this event.
    #[error("Client not authenticated: channel={channel_id}, status={status}, event={event}")]
    NotAuthenticated {
        /// Channel that sent the message.
        channel_id: ChannelId,
        /// Session status at the time of the check.
        status: AuthenticationStatus,
        /// Rejected event.
        event: String,
    },

    /// Authentication status change outside the allowed state machine.
    #[error("Invalid authentication transition for {channel_id}: {from} -> {to}")]
    InvalidTransition {
        /// Channel whose session was targeted.
        channel_id: ChannelId,
        /// Current status.
        from: AuthenticationStatus,
        /// Requested status.
        to: AuthenticationStatus,
    },

    // ========================================================================
    // Filtering Errors
    // ========================================================================
    /// Filter chain vetoed the message.
    #[error("Filters reject this message: event={event}, channel={channel_id}, direction={direction}")]
    FilteredMessage {
        /// Event of the vetoed message.
        event: String,
        /// Channel the message came from or was going to.
        channel_id: ChannelId,
        /// Request (inbound) or response (outbound).
        direction: Direction,
    },

    /// A filter failed while processing a message.
    #[error("Filter error: {message}")]
    Filter {
        /// Description of the filter failure.
        message: String,
    },

    // ========================================================================
    // Application Errors
    // ========================================================================
    /// A message handler failed.
    #[error("Handler error: {message}")]
    Handler {
        /// Description of the handler failure.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Message serialization or deserialization failed.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// Transport-level failure.
    #[error("Driver error: {message}")]
    Driver {
        /// Description of the driver failure.
        message: String,
    },

    /// Operation requires a running driver.
    #[error("Driver is not running")]
    NotRunning,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a channel not found error.
    #[inline]
    pub fn channel_not_found(channel_id: impl Into<ChannelId>) -> Self {
        Self::ChannelNotFound {
            channel_id: channel_id.into(),
        }
    }

    /// Creates a duplicate connection error.
    #[inline]
    pub fn duplicate_connection(channel_id: impl Into<ChannelId>) -> Self {
        Self::DuplicateConnection {
            channel_id: channel_id.into(),
        }
    }

    /// Creates a duplicate handler error.
    #[inline]
    pub fn duplicate_handler(event: impl Into<String>) -> Self {
        Self::DuplicateHandler {
            event: event.into(),
        }
    }

    /// Creates an unknown sender error.
    #[inline]
    pub fn unknown_sender(channel_id: impl Into<ChannelId>, event: impl Into<String>) -> Self {
        Self::UnknownSender {
            channel_id: channel_id.into(),
            event: event.into(),
        }
    }

    /// Creates a no handler error.
    #[inline]
    pub fn no_handler(channel_id: impl Into<ChannelId>, event: impl Into<String>) -> Self {
        Self::NoHandler {
            channel_id: channel_id.into(),
            event: event.into(),
        }
    }

    /// Creates a not authenticated error.
    #[inline]
    pub fn not_authenticated(
        channel_id: impl Into<ChannelId>,
        status: AuthenticationStatus,
        event: impl Into<String>,
    ) -> Self {
        Self::NotAuthenticated {
            channel_id: channel_id.into(),
            status,
            event: event.into(),
        }
    }

    /// Creates an invalid transition error.
    #[inline]
    pub fn invalid_transition(
        channel_id: impl Into<ChannelId>,
        from: AuthenticationStatus,
        to: AuthenticationStatus,
    ) -> Self {
        Self::InvalidTransition {
            channel_id: channel_id.into(),
            from,
            to,
        }
    }

    /// Creates a filtered message error.
    #[inline]
    pub fn filtered_message(
        event: impl Into<String>,
        channel_id: impl Into<ChannelId>,
        direction: Direction,
    ) -> Self {
        Self::FilteredMessage {
            event: event.into(),
            channel_id: channel_id.into(),
            direction,
        }
    }

    /// Creates a filter error.
    #[inline]
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter {
            message: message.into(),
        }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    #[inline]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a driver error.
    #[inline]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error is terminal for a single inbound message.
    ///
    /// These errors are logged and dropped; they never stop the router.
    #[inline]
    #[must_use]
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::UnknownSender { .. }
                | Self::NoHandler { .. }
                | Self::NotAuthenticated { .. }
                | Self::FilteredMessage { .. }
                | Self::Codec { .. }
        )
    }

    /// Returns `true` if this is a connection or transport error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotFound { .. }
                | Self::Driver { .. }
                | Self::NotRunning
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the message was vetoed by a filter.
    #[inline]
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        matches!(self, Self::FilteredMessage { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
