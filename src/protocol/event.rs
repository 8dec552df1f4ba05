//! Low-level network events raised by drivers.
//!
//! | Event | Raised when |
//! |-------|-------------|
//! | `REGISTERED` | channel attached to its I/O task |
//! | `UNREGISTERED` | channel detached from its I/O task |
//! | `ACTIVE` | channel connected and ready |
//! | `INACTIVE` | channel no longer connected |
//! | `TIMEOUT_ALERT_ON` | idle timer fired, ping sent |
//! | `TIMEOUT_ALERT_OFF` | pong received after an alert |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::ChannelId;

// ============================================================================
// NetworkEventType
// ============================================================================

/// Channel lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkEventType {
    /// Channel registered with its I/O task.
    Registered,
    /// Channel deregistered from its I/O task.
    Unregistered,
    /// Channel connected and ready.
    Active,
    /// Channel left the active state.
    Inactive,
    /// Idle timer fired.
    TimeoutAlertOn,
    /// Peer answered the ping.
    TimeoutAlertOff,
}

impl fmt::Display for NetworkEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "REGISTERED",
            Self::Unregistered => "UNREGISTERED",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::TimeoutAlertOn => "TIMEOUT_ALERT_ON",
            Self::TimeoutAlertOff => "TIMEOUT_ALERT_OFF",
        };
        f.write_str(name)
    }
}

// ============================================================================
// NetworkEvent
// ============================================================================

/// A lifecycle signal for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    /// Channel the event refers to.
    pub channel_id: ChannelId,
    /// Kind of event.
    pub event_type: NetworkEventType,
}

impl NetworkEvent {
    /// Creates a new network event.
    #[inline]
    #[must_use]
    pub fn new(channel_id: impl Into<ChannelId>, event_type: NetworkEventType) -> Self {
        Self {
            channel_id: channel_id.into(),
            event_type,
        }
    }

    /// Returns `true` for [`NetworkEventType::Active`].
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.event_type == NetworkEventType::Active
    }

    /// Returns `true` for [`NetworkEventType::Inactive`].
    #[inline]
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        self.event_type == NetworkEventType::Inactive
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.channel_id, self.event_type)
    }
}

// ============================================================================
// Tests
// ============================================================================
