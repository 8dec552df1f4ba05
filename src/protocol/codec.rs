//! Message codecs.
//!
//! A codec turns a [`NetworkMessage`] into the driver's wire representation
//! and back. Drivers declare the [`WireType`] they carry; the
//! [`CodecRegistry`] picks the codec registered for that type.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{Error, Result};

use super::NetworkMessage;

// ============================================================================
// WireType / WireFrame
// ============================================================================

/// Kind of frame a driver carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    /// UTF-8 text frames.
    Text,
    /// Raw byte frames.
    Binary,
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

/// One serialized message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl WireFrame {
    /// Returns the wire type of this frame.
    #[inline]
    #[must_use]
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Text(_) => WireType::Text,
            Self::Binary(_) => WireType::Binary,
        }
    }

    /// Returns the frame length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the frame is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// MessageCodec
// ============================================================================

/// Serializes messages to and from one wire type.
///
/// Implementations must satisfy `deserialize(serialize(m))` == `m` on the
/// event and payload.
pub trait MessageCodec: Send + Sync {
    /// Encodes a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the message cannot be encoded.
    fn serialize(&self, message: &NetworkMessage) -> Result<WireFrame>;

    /// Decodes a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the frame is malformed or of the wrong type.
    fn deserialize(&self, frame: WireFrame) -> Result<NetworkMessage>;

    /// Wire type this codec handles.
    fn wire_type(&self) -> WireType;
}

// ============================================================================
// JsonCodec
// ============================================================================

/// JSON over text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn serialize(&self, message: &NetworkMessage) -> Result<WireFrame> {
        serde_json::to_string(message)
            .map(WireFrame::Text)
            .map_err(|e| Error::codec(format!("json serialization failed: {e}")))
    }

    fn deserialize(&self, frame: WireFrame) -> Result<NetworkMessage> {
        let WireFrame::Text(text) = frame else {
            return Err(Error::codec("json codec expects a text frame"));
        };
        decode_json(text.as_bytes())
    }

    fn wire_type(&self) -> WireType {
        WireType::Text
    }
}

// ============================================================================
// JsonBinaryCodec
// ============================================================================

/// JSON over binary frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBinaryCodec;

impl MessageCodec for JsonBinaryCodec {
    fn serialize(&self, message: &NetworkMessage) -> Result<WireFrame> {
        serde_json::to_vec(message)
            .map(WireFrame::Binary)
            .map_err(|e| Error::codec(format!("json serialization failed: {e}")))
    }

    fn deserialize(&self, frame: WireFrame) -> Result<NetworkMessage> {
        let WireFrame::Binary(bytes) = frame else {
            return Err(Error::codec("binary json codec expects a binary frame"));
        };
        decode_json(&bytes)
    }

    fn wire_type(&self) -> WireType {
        WireType::Binary
    }
}

/// Shared JSON decoding with envelope validation.
fn decode_json(bytes: &[u8]) -> Result<NetworkMessage> {
    let message: NetworkMessage = serde_json::from_slice(bytes)
        .map_err(|e| Error::codec(format!("json deserialization failed: {e}")))?;

    if message.event().is_empty() {
        return Err(Error::codec("message has an empty event"));
    }

    Ok(message)
}

// ============================================================================
// CodecRegistry
// ============================================================================

/// Codecs keyed by wire type.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: FxHashMap<WireType, Arc<dyn MessageCodec>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("wire_types", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CodecRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the JSON text and binary codecs.
    #[must_use]
    pub fn json() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(JsonBinaryCodec));
        registry
    }

    /// Registers a codec.
    ///
    /// The first codec registered for a wire type wins; later ones are
    /// ignored with a warning.
    pub fn register(&mut self, codec: Arc<dyn MessageCodec>) -> &mut Self {
        let wire_type = codec.wire_type();
        if self.codecs.contains_key(&wire_type) {
            warn!(%wire_type, "Codec already registered for wire type");
        } else {
            self.codecs.insert(wire_type, codec);
        }
        self
    }

    /// Returns the codec for a wire type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if no codec is registered.
    pub fn get(&self, wire_type: WireType) -> Result<&Arc<dyn MessageCodec>> {
        self.codecs
            .get(&wire_type)
            .ok_or_else(|| Error::codec(format!("codec not found for {wire_type} frames")))
    }

    /// Encodes a message for the given wire type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if no codec matches or encoding fails.
    pub fn serialize(&self, wire_type: WireType, message: &NetworkMessage) -> Result<WireFrame> {
        self.get(wire_type)?.serialize(message)
    }

    /// Decodes a frame with the codec matching its wire type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if no codec matches or decoding fails.
    pub fn deserialize(&self, frame: WireFrame) -> Result<NetworkMessage> {
        self.get(frame.wire_type())?.deserialize(frame)
    }

    /// Returns `true` if no codec is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
