//! Event Gateway - protocol-agnostic event routing engine.
//!
//! This library sits between a network transport and application handlers.
//! It tracks channel lifecycles, gates every inbound message on the
//! sender's authentication status, runs per-event filter chains in both
//! directions and dispatches messages to handlers, all scoped per
//! [`Origin`].
//!
//! # Architecture
//!
//! ```text
//!                 ┌─────────────────────── Gateway ───────────────────────┐
//!                 │                                                       │
//!  ┌─────────┐    │  ┌──────────────┐   ┌──────────┐   ┌──────────────┐   │
//!  │ peers   │◄──►│  │ NetworkDriver│◄─►│ Message  │◄─►│ handlers     │   │
//!  └─────────┘    │  │ (per origin) │   │ Router   │   │ (per event)  │   │
//!                 │  └──────────────┘   └──────────┘   └──────────────┘   │
//!                 │                     gate + filters                    │
//!                 └───────────────────────────────────────────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - The router never sees a socket: drivers implement [`NetworkDriver`]
//!   and report back through [`NetworkListener`]
//! - Authentication is a state machine per session; only `LOGGED_IN`
//!   sessions, or `PROCESS_LOGGING` sessions sending login events, reach
//!   handlers
//! - Per-message failures are logged and contained
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use event_gateway::{
//!     ClientSession, Gateway, NetworkMessage, NetworkOptions, Origin, Result, WebSocketDriver,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let driver = Arc::new(WebSocketDriver::new(NetworkOptions::new().with_port(9000)));
//!
//!     let gateway = Gateway::builder()
//!         .origin_with_default_auth(Origin::Client, driver)
//!         .build()?;
//!
//!     if let Some(router) = gateway.router(Origin::Client) {
//!         router.add_handler("echo", |message: NetworkMessage, session: &ClientSession| {
//!             session.send(message)
//!         })?;
//!     }
//!
//!     gateway.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     gateway.stop().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`gateway`] | [`Gateway`] context and builder |
//! | [`identifiers`] | Channel identifier |
//! | [`protocol`] | Messages, events and codecs |
//! | [`routing`] | Router, authentication gate, filters, handlers |
//! | [`transport`] | Driver abstraction, memory and WebSocket drivers |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Gateway context.
pub mod gateway;

/// Channel identifier.
pub mod identifiers;

/// Messages, lifecycle events and codecs.
pub mod protocol;

/// Routing engine.
pub mod routing;

/// Transport layer.
///
/// Drivers, channel registry and outbound connection management.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Gateway types
pub use gateway::{Gateway, GatewayBuilder};

// Identifier types
pub use identifiers::ChannelId;

// Protocol types
pub use protocol::{
    CodecRegistry, Direction, JsonBinaryCodec, JsonCodec, MessageCodec, NetworkEvent,
    NetworkEventType, NetworkMessage, WireFrame, WireType,
};

// Routing types
pub use routing::{
    AuthNetworkService, AuthenticationGate, AuthenticationService, AuthenticationStatus,
    AuthenticationStatusListener, ClientSession, DefaultAuthenticationService, FilterChain,
    FilterDescriptor, MessageFilter, MessageHandler, MessageRouter, Origin,
};

// Transport types
pub use transport::{
    ClientConnection, ConnectionManager, ConnectionStatus, DeliveryStatus, DriverCore,
    MemoryDriver, MemoryPeer, NetworkDriver, NetworkListener, NetworkOptions, WebSocketDriver,
};
