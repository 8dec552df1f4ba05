//! Message model and wire codecs.
//!
//! This module defines what travels through the gateway, independent of the
//! transport that carries it.
//!
//! # Overview
//!
//! | Type | Purpose |
//! |------|---------|
//! | `NetworkMessage` | Event-keyed envelope with payload and context |
//! | `NetworkEvent` | Channel lifecycle signal raised by drivers |
//! | `WireFrame` | Serialized unit handed to/from a driver |
//! | `MessageCodec` | Message ↔ frame conversion for one wire type |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Codec trait, JSON codecs and codec registry |
//! | `event` | Network event types |
//! | `message` | Message envelope and context keys |

// ============================================================================
// Submodules
// ============================================================================

/// Codec trait, JSON codecs and codec registry.
pub mod codec;

/// Network lifecycle events.
pub mod event;

/// Message envelope.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{CodecRegistry, JsonBinaryCodec, JsonCodec, MessageCodec, WireFrame, WireType};
pub use event::{NetworkEvent, NetworkEventType};
pub use message::{CHANNEL_MESSAGE_SEQUENCE, Direction, EVENT_MESSAGE_SEQUENCE, NetworkMessage};
