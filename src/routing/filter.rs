//! Message filters and the per-event filter chain.
//!
//! Filters run in ascending priority order. Registration order breaks ties.
//!
//! # Snapshot Model
//!
//! Each event maps to an immutable `Arc<[FilterDescriptor]>`. Registration
//! builds a new sorted slice and swaps it in; a pass clones the `Arc` and
//! iterates without holding any lock. A registration racing a pass is seen
//! by the next pass.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::protocol::{Direction, NetworkMessage};

use super::session::ClientSession;

// ============================================================================
// MessageFilter
// ============================================================================

/// Inspects, rewrites or vetoes messages of one event.
///
/// Filters are shared across channels and must be safe to call
/// concurrently.
pub trait MessageFilter: Send + Sync {
    /// Inbound pass. `Ok(false)` stops the message before the handler.
    ///
    /// # Errors
    ///
    /// An error rejects the message and is passed to [`Self::on_error`].
    fn filter_request(&self, message: &mut NetworkMessage, session: &ClientSession) -> Result<bool> {
        let _ = (message, session);
        Ok(true)
    }

    /// Outbound pass. `Ok(false)` stops the message before the driver.
    ///
    /// # Errors
    ///
    /// An error rejects the message and is passed to [`Self::on_error`].
    fn filter_response(
        &self,
        message: &mut NetworkMessage,
        session: &ClientSession,
    ) -> Result<bool> {
        let _ = (message, session);
        Ok(true)
    }

    /// Called when one of the passes failed.
    ///
    /// # Errors
    ///
    /// Errors are logged and otherwise ignored.
    fn on_error(&self, message: &NetworkMessage, session: &ClientSession, cause: &Error) -> Result<()> {
        let _ = (message, session, cause);
        Ok(())
    }
}

// ============================================================================
// FilterDescriptor
// ============================================================================

/// A filter bound to an event with a priority.
#[derive(Clone)]
pub struct FilterDescriptor {
    priority: i32,
    event: String,
    filter: Arc<dyn MessageFilter>,
    /// Payload type the filter expects, for diagnostics.
    payload_type: Option<&'static str>,
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDescriptor")
            .field("priority", &self.priority)
            .field("event", &self.event)
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}

impl FilterDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(event: impl Into<String>, priority: i32, filter: Arc<dyn MessageFilter>) -> Self {
        Self {
            priority,
            event: event.into(),
            filter,
            payload_type: None,
        }
    }

    /// Declares the payload type the filter reads.
    #[inline]
    #[must_use]
    pub fn with_payload_type<T: ?Sized>(mut self) -> Self {
        self.payload_type = Some(std::any::type_name::<T>());
        self
    }

    /// Returns the priority. Lower runs first.
    #[inline]
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the event.
    #[inline]
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns the filter.
    #[inline]
    #[must_use]
    pub fn filter(&self) -> &Arc<dyn MessageFilter> {
        &self.filter
    }

    /// Returns the declared payload type name.
    #[inline]
    #[must_use]
    pub fn payload_type(&self) -> Option<&'static str> {
        self.payload_type
    }
}

// ============================================================================
// FilterChain
// ============================================================================

/// Per-event ordered filter lists of one origin.
#[derive(Default)]
pub struct FilterChain {
    filters: RwLock<FxHashMap<String, Arc<[FilterDescriptor]>>>,
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters = self.filters.read();
        f.debug_struct("FilterChain")
            .field("events", &filters.len())
            .field("filters", &filters.values().map(|l| l.len()).sum::<usize>())
            .finish()
    }
}

impl FilterChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a filter.
    pub fn add(&self, descriptor: FilterDescriptor) {
        let mut filters = self.filters.write();

        let mut list: Vec<FilterDescriptor> = filters
            .get(descriptor.event())
            .map(|current| current.to_vec())
            .unwrap_or_default();

        debug!(
            event = %descriptor.event(),
            priority = descriptor.priority(),
            "Filter registered"
        );

        let event = descriptor.event.clone();
        list.push(descriptor);
        list.sort_by_key(FilterDescriptor::priority);
        filters.insert(event, list.into());
    }

    /// Unregisters a filter from an event.
    ///
    /// Returns `true` if it was registered.
    pub fn remove(&self, event: &str, filter: &Arc<dyn MessageFilter>) -> bool {
        let mut filters = self.filters.write();

        let Some(current) = filters.get(event) else {
            return false;
        };

        let list: Vec<FilterDescriptor> = current
            .iter()
            .filter(|d| !Arc::ptr_eq(&d.filter, filter))
            .cloned()
            .collect();

        if list.len() == current.len() {
            return false;
        }

        if list.is_empty() {
            filters.remove(event);
        } else {
            filters.insert(event.to_string(), list.into());
        }
        true
    }

    /// Returns the current snapshot for an event.
    #[must_use]
    pub fn filters_for(&self, event: &str) -> Option<Arc<[FilterDescriptor]>> {
        self.filters.read().get(event).cloned()
    }

    /// Returns `true` if no filter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }

    /// Runs the chain for the message's event.
    ///
    /// Returns `false` on the first veto or failure. An event without
    /// filters passes.
    pub fn run(
        &self,
        message: &mut NetworkMessage,
        session: &ClientSession,
        direction: Direction,
    ) -> bool {
        let Some(list) = self.filters_for(message.event()) else {
            return true;
        };

        for descriptor in list.iter() {
            let outcome = match direction {
                Direction::Request => descriptor.filter.filter_request(message, session),
                Direction::Response => descriptor.filter.filter_response(message, session),
            };

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        event = %message.event(),
                        channel_id = %session.channel_id(),
                        %direction,
                        priority = descriptor.priority,
                        "Filter vetoed message"
                    );
                    return false;
                }
                Err(cause) => {
                    warn!(
                        event = %message.event(),
                        channel_id = %session.channel_id(),
                        %direction,
                        priority = descriptor.priority,
                        payload_type = descriptor.payload_type,
                        error = %cause,
                        "Filter failed"
                    );
                    if let Err(e) = descriptor.filter.on_error(message, session, &cause) {
                        error!(
                            event = %message.event(),
                            channel_id = %session.channel_id(),
                            error = %e,
                            "Filter error hook failed"
                        );
                    }
                    return false;
                }
            }
        }

        true
    }
}

// ============================================================================
// Tests
// ============================================================================
