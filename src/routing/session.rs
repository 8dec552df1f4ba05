//! Origins, authentication status and the session view.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::NetworkMessage;
use crate::transport::DeliveryStatus;

use super::router::{MessageRouter, RouterInner};

// ============================================================================
// Origin
// ============================================================================

/// Routing domain.
///
/// Each origin owns its router, sessions, handlers and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// End-user facing channels.
    Client,
    /// Administration channels.
    Admin,
    /// Inter-service bus channels.
    Bus,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("CLIENT"),
            Self::Admin => f.write_str("ADMIN"),
            Self::Bus => f.write_str("BUS"),
        }
    }
}

// ============================================================================
// AuthenticationStatus
// ============================================================================

/// Authentication state of a session.
///
/// ```text
/// LOGGED_OUT ──► PROCESS_LOGGING ──► LOGGED_IN
///     ▲                 │                │
///     └─────────────────┴────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationStatus {
    /// Not authenticated.
    LoggedOut,
    /// Login handshake in progress.
    ProcessLogging,
    /// Fully authenticated.
    LoggedIn,
}

impl AuthenticationStatus {
    /// Returns `true` if `next` is a legal successor of this status.
    ///
    /// Setting the same status again is legal and has no effect.
    #[inline]
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::LoggedOut)
                | (Self::LoggedOut, Self::ProcessLogging)
                | (Self::ProcessLogging, Self::ProcessLogging)
                | (Self::ProcessLogging, Self::LoggedIn)
                | (Self::LoggedIn, Self::LoggedIn)
        )
    }
}

impl fmt::Display for AuthenticationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("LOGGED_OUT"),
            Self::ProcessLogging => f.write_str("PROCESS_LOGGING"),
            Self::LoggedIn => f.write_str("LOGGED_IN"),
        }
    }
}

// ============================================================================
// ClientSession
// ============================================================================

/// Snapshot of a session handed to handlers, filters and listeners.
///
/// The status is the one observed when the view was taken. Sending through
/// the view goes back through the owning router's outbound path.
#[derive(Clone)]
pub struct ClientSession {
    channel_id: ChannelId,
    origin: Origin,
    status: AuthenticationStatus,
    router: Weak<RouterInner>,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("channel_id", &self.channel_id)
            .field("origin", &self.origin)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Creates a view not attached to any router.
    ///
    /// Sending through it fails with [`Error::NotRunning`].
    #[must_use]
    pub fn detached(
        channel_id: impl Into<ChannelId>,
        origin: Origin,
        status: AuthenticationStatus,
    ) -> Self {
        Self::attached(channel_id.into(), origin, status, Weak::new())
    }

    pub(crate) fn attached(
        channel_id: ChannelId,
        origin: Origin,
        status: AuthenticationStatus,
        router: Weak<RouterInner>,
    ) -> Self {
        Self {
            channel_id,
            origin,
            status,
            router,
        }
    }

    /// Returns the channel ID.
    #[inline]
    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Returns the origin.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns the status observed when the view was taken.
    #[inline]
    #[must_use]
    pub fn status(&self) -> AuthenticationStatus {
        self.status
    }

    /// Returns `true` if the session was logged in.
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status == AuthenticationStatus::LoggedIn
    }

    /// Sends a message to this session's channel.
    ///
    /// # Errors
    ///
    /// See [`MessageRouter::send`]; [`Error::NotRunning`] if the router is
    /// gone.
    pub fn send(&self, message: NetworkMessage) -> Result<()> {
        self.router()?.send(self, message)
    }

    /// Sends a message and reports the outcome.
    ///
    /// # Errors
    ///
    /// See [`MessageRouter::send_with_status`].
    pub fn send_with_status(
        &self,
        message: NetworkMessage,
        status: Arc<dyn DeliveryStatus>,
    ) -> Result<()> {
        self.router()?.send_with_status(self, message, status)
    }

    fn router(&self) -> Result<MessageRouter> {
        self.router
            .upgrade()
            .map(MessageRouter::from_inner)
            .ok_or(Error::NotRunning)
    }
}

// ============================================================================
// Tests
// ============================================================================
