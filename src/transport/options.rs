//! Network driver configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use event_gateway::NetworkOptions;
//!
//! let options = NetworkOptions::new()
//!     .with_port(8080)
//!     .with_path("/ws")
//!     .with_idle_time(Duration::from_secs(30));
//!
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (all interfaces).
pub const DEFAULT_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default missed-heartbeat budget and per-URL reconnect budget.
pub const DEFAULT_MAX_TIMEOUTS: u32 = 3;

/// Default idle time before a heartbeat ping.
pub const DEFAULT_IDLE_TIME: Duration = Duration::from_secs(10);

/// Default delay before an automatic reconnect attempt.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// NetworkOptions
// ============================================================================

/// Configuration shared by network drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    /// Accept inbound connections.
    pub accept_clients: bool,

    /// Bind address for the server side.
    pub ip: IpAddr,

    /// Bind port (0 lets the OS choose).
    pub port: u16,

    /// Request path for path-based transports.
    pub path: String,

    /// Missed heartbeats before a channel is closed.
    ///
    /// Also the number of attempts per URL before an outbound connection
    /// rotates to the next candidate.
    pub max_timeouts: u32,

    /// Idle time before a heartbeat ping is sent.
    pub idle_time: Duration,

    /// Delay between automatic reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl NetworkOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            accept_clients: true,
            ip: DEFAULT_IP,
            port: 0,
            path: "/".to_string(),
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
            idle_time: DEFAULT_IDLE_TIME,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }

    /// Creates options for a driver that only makes outbound connections.
    #[inline]
    #[must_use]
    pub fn client_only() -> Self {
        Self {
            accept_clients: false,
            ..Self::new()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl NetworkOptions {
    /// Enables or disables the server side.
    #[inline]
    #[must_use]
    pub fn with_accept_clients(mut self, accept: bool) -> Self {
        self.accept_clients = accept;
        self
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    /// Sets the bind port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the request path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the missed-heartbeat budget.
    #[inline]
    #[must_use]
    pub fn with_max_timeouts(mut self, max: u32) -> Self {
        self.max_timeouts = max;
        self
    }

    /// Sets the idle time before a heartbeat ping.
    #[inline]
    #[must_use]
    pub fn with_idle_time(mut self, idle: Duration) -> Self {
        self.idle_time = idle;
        self
    }

    /// Sets the delay between automatic reconnect attempts.
    #[inline]
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl NetworkOptions {
    /// Returns the server bind address.
    #[inline]
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_timeouts == 0 {
            return Err(Error::config("max_timeouts must be greater than zero"));
        }
        if self.idle_time.is_zero() {
            return Err(Error::config("idle_time must be greater than zero"));
        }
        if !self.path.starts_with('/') {
            return Err(Error::config(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
