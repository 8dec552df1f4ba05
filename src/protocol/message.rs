//! Network message envelope.
//!
//! A [`NetworkMessage`] carries one application payload keyed by an event
//! name. The driver stamps the source channel and sequence numbers into the
//! message context before the router sees it.
//!
//! # Format
//!
//! ```json
//! {
//!   "event": "chat.say",
//!   "payload": { ... },
//!   "source": "optional",
//!   "target": "optional"
//! }
//! ```
//!
//! The source channel and context are local metadata and never leave the
//! process.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

// ============================================================================
// Constants
// ============================================================================

/// Context key of the per-channel inbound sequence number.
pub const CHANNEL_MESSAGE_SEQUENCE: &str = "CHANNEL_MESSAGE_SEQUENCE";

/// Context key of the per-event inbound sequence number.
pub const EVENT_MESSAGE_SEQUENCE: &str = "EVENT_MESSAGE_SEQUENCE";

// ============================================================================
// Direction
// ============================================================================

/// Direction a message travels through the filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Inbound, before handler dispatch.
    Request,
    /// Outbound, before the driver write.
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

// ============================================================================
// NetworkMessage
// ============================================================================

/// Envelope carrying one application payload.
///
/// The event name is fixed at construction; filters may change the payload
/// and the context but never the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMessage {
    /// Application protocol action.
    event: String,

    /// Opaque payload.
    #[serde(default)]
    payload: Value,

    /// Optional logical source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,

    /// Optional logical target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,

    /// Channel the message arrived on (inbound only).
    #[serde(skip)]
    channel_id: Option<ChannelId>,

    /// Derived metadata.
    #[serde(skip)]
    context: FxHashMap<String, Value>,
}

// ============================================================================
// NetworkMessage - Constructors
// ============================================================================

impl NetworkMessage {
    /// Creates a message with an empty (`null`) payload.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>) -> Self {
        Self::from_value(event, Value::Null)
    }

    /// Creates a message from a raw JSON payload.
    #[must_use]
    pub fn from_value(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            source: None,
            target: None,
            channel_id: None,
            context: FxHashMap::default(),
        }
    }

    /// Creates a message from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the payload cannot be represented as JSON.
    pub fn with_payload<T: Serialize>(event: impl Into<String>, payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload)
            .map_err(|e| Error::codec(format!("payload serialization failed: {e}")))?;
        Ok(Self::from_value(event, value))
    }

    /// Sets the logical source.
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the logical target.
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

// ============================================================================
// NetworkMessage - Accessors
// ============================================================================

impl NetworkMessage {
    /// Returns the event name.
    #[inline]
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns the raw payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the payload for in-place mutation.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut Value {
        &mut self.payload
    }

    /// Replaces the payload.
    #[inline]
    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    /// Decodes the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload).map_err(|e| {
            Error::codec(format!(
                "payload of event '{}' does not match {}: {e}",
                self.event,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Returns the logical source, if any.
    #[inline]
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Returns the logical target, if any.
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Returns the channel the message arrived on.
    #[inline]
    #[must_use]
    pub fn channel_id(&self) -> Option<&ChannelId> {
        self.channel_id.as_ref()
    }

    /// Stamps the source channel.
    #[inline]
    pub(crate) fn set_channel_id(&mut self, channel_id: ChannelId) {
        self.channel_id = Some(channel_id);
    }
}

// ============================================================================
// NetworkMessage - Context
// ============================================================================

impl NetworkMessage {
    /// Stores a context value, returning the previous one.
    pub fn put_context(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.context.insert(key.into(), value.into())
    }

    /// Returns a context value.
    #[inline]
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Returns the whole context.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &FxHashMap<String, Value> {
        &self.context
    }

    /// Returns the per-channel inbound sequence number.
    #[inline]
    #[must_use]
    pub fn channel_sequence(&self) -> Option<u64> {
        self.context_value(CHANNEL_MESSAGE_SEQUENCE)
            .and_then(Value::as_u64)
    }

    /// Returns the per-event inbound sequence number.
    #[inline]
    #[must_use]
    pub fn event_sequence(&self) -> Option<u64> {
        self.context_value(EVENT_MESSAGE_SEQUENCE)
            .and_then(Value::as_u64)
    }
}

// ============================================================================
// Tests
// ============================================================================
