//! Type-safe identifiers.
//!
//! Channel ids are opaque strings chosen by the driver (a peer address, a
//! logical peer name for outbound connections, or a generated UUID). The
//! newtype keeps them from being mixed with event names, which are plain
//! strings too.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ChannelId
// ============================================================================

/// Identifier of one logical network endpoint.
///
/// Cheap to clone (shared string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    /// Creates a channel ID from any string.
    #[inline]
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Generates a unique channel ID for an accepted connection.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    #[inline]
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ChannelId {
    #[inline]
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<&ChannelId> for ChannelId {
    #[inline]
    fn from(id: &ChannelId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for ChannelId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChannelId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashSet;

    #[test]
    fn test_display_matches_input() {
        let id = ChannelId::new("127.0.0.1:9000");
        assert_eq!(id.to_string(), "127.0.0.1:9000");
        assert_eq!(id.as_str(), "127.0.0.1:9000");
    }

    #[test]
    fn test_generate_is_unique() {
        let a = ChannelId::generate();
        let b = ChannelId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_borrow_lookup() {
        let mut set = FxHashSet::default();
        set.insert(ChannelId::from("c1"));
        assert!(set.contains("c1"));
    }

    #[test]
    fn test_serde_transparent() {
        let id = ChannelId::from("c1");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"c1\"");
        let back: ChannelId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
