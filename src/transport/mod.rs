//! Transport layer.
//!
//! This module decouples the routing engine from any wire protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  NetworkDriver   ┌──────────────────────────────────┐
//! │ MessageRouter │ ───────────────► │ Driver                           │
//! │               │ ◄─────────────── │  ├─ DriverCore (channels, codecs)│
//! └───────────────┘  NetworkListener │  ├─ ConnectionManager (outbound) │
//!                                    │  └─ I/O tasks (one per channel)  │
//!                                    └──────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Channel handle trait and channel registry |
//! | `client` | Outbound connection intents and manager |
//! | `core` | Protocol-agnostic driver state |
//! | `driver` | Driver, listener and status traits |
//! | `memory` | In-process loopback driver |
//! | `options` | Driver configuration |
//! | `websocket` | WebSocket driver |

// ============================================================================
// Submodules
// ============================================================================

/// Channel handle trait and registry.
pub mod channel;

/// Outbound connection management.
pub mod client;

/// Protocol-agnostic driver state.
pub mod core;

/// Driver abstraction.
pub mod driver;

/// In-process loopback driver.
pub mod memory;

/// Driver configuration.
pub mod options;

/// WebSocket driver.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, ChannelHandle, ChannelRegistry, HandleId, WriteCallback};
pub use client::{ClientConnection, ClientConnector, ClosedSignal, ConnectionManager};
pub use core::DriverCore;
pub use driver::{ConnectionStatus, DeliveryStatus, NetworkDriver, NetworkListener};
pub use memory::{MemoryDriver, MemoryPeer};
pub use options::NetworkOptions;
pub use websocket::WebSocketDriver;
