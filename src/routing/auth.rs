//! Authentication gate and services.
//!
//! The [`AuthenticationGate`] owns the session table of one origin and is the
//! single checkpoint deciding whether an inbound event may reach a handler.
//! Status changes are driven by the origin's [`AuthenticationService`]
//! through the narrow [`AuthNetworkService`] handle.
//!
//! # Gate Rule
//!
//! | Status | Protocol event | Other event |
//! |--------|----------------|-------------|
//! | `LOGGED_OUT` | deny | deny |
//! | `PROCESS_LOGGING` | allow | deny |
//! | `LOGGED_IN` | allow | allow |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use rustc_hash::{FxBuildHasher, FxHashSet};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{NetworkEvent, NetworkEventType, NetworkMessage};

use super::router::{MessageRouter, RouterInner};
use super::session::{AuthenticationStatus, ClientSession, Origin};

// ============================================================================
// AuthenticationStatusListener
// ============================================================================

/// Observer of session status changes.
pub trait AuthenticationStatusListener: Send + Sync {
    /// Called after a session changed status.
    ///
    /// Errors are logged and never reach the gate's caller.
    fn on_status_changed(
        &self,
        session: &ClientSession,
        previous: AuthenticationStatus,
    ) -> Result<()>;
}

impl<F> AuthenticationStatusListener for F
where
    F: Fn(&ClientSession, AuthenticationStatus) -> Result<()> + Send + Sync,
{
    fn on_status_changed(
        &self,
        session: &ClientSession,
        previous: AuthenticationStatus,
    ) -> Result<()> {
        self(session, previous)
    }
}

// ============================================================================
// AuthenticationService
// ============================================================================

/// Decides when sessions of one origin log in and out.
pub trait AuthenticationService: Send + Sync {
    /// Events allowed while a session is `PROCESS_LOGGING`.
    fn protocol_events(&self) -> FxHashSet<String> {
        FxHashSet::default()
    }

    /// Called once when the gateway starts, before drivers start.
    ///
    /// # Errors
    ///
    /// An error aborts gateway start.
    fn initialize(&self, network: &AuthNetworkService) -> Result<()> {
        let _ = network;
        Ok(())
    }

    /// Called on channel `ACTIVE` and `INACTIVE`.
    ///
    /// After `INACTIVE` the router forces `LOGGED_OUT` regardless of what
    /// the service does.
    ///
    /// # Errors
    ///
    /// Errors are logged by the router.
    fn on_network_event(&self, event: &NetworkEvent, network: &AuthNetworkService) -> Result<()>;
}

/// Accepts every channel as soon as it connects.
///
/// On `ACTIVE` the session walks `LOGGED_OUT → PROCESS_LOGGING → LOGGED_IN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAuthenticationService;

impl AuthenticationService for DefaultAuthenticationService {
    fn on_network_event(&self, event: &NetworkEvent, network: &AuthNetworkService) -> Result<()> {
        if event.event_type == NetworkEventType::Active {
            network.set_status(&event.channel_id, AuthenticationStatus::ProcessLogging)?;
            network.set_status(&event.channel_id, AuthenticationStatus::LoggedIn)?;
        }
        Ok(())
    }
}

// ============================================================================
// AuthNetworkService
// ============================================================================

/// Handle given to an [`AuthenticationService`].
///
/// Exposes only what a login flow needs: status changes, session lookup and
/// sending to a channel.
#[derive(Clone)]
pub struct AuthNetworkService {
    origin: Origin,
    router: Weak<RouterInner>,
}

impl fmt::Debug for AuthNetworkService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthNetworkService")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl AuthNetworkService {
    pub(crate) fn new(origin: Origin, router: Weak<RouterInner>) -> Self {
        Self { origin, router }
    }

    /// Returns the origin served.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Changes a session's status.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] for an illegal change
    /// - [`Error::NotRunning`] if the router is gone
    pub fn set_status(&self, channel_id: &ChannelId, status: AuthenticationStatus) -> Result<()> {
        self.router()?.gate().set_status(channel_id, status)
    }

    /// Returns a session's current status.
    #[must_use]
    pub fn status(&self, channel_id: &ChannelId) -> Option<AuthenticationStatus> {
        self.router().ok()?.gate().status(channel_id)
    }

    /// Returns a view of a session.
    #[must_use]
    pub fn session(&self, channel_id: &ChannelId) -> Option<ClientSession> {
        self.router().ok()?.gate().session(channel_id)
    }

    /// Sends a message to a channel with a session, e.g. a login challenge.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelNotFound`] if the channel has no session
    /// - see [`MessageRouter::send`]
    pub fn send(&self, channel_id: &ChannelId, message: NetworkMessage) -> Result<()> {
        let session = self
            .session(channel_id)
            .ok_or_else(|| Error::channel_not_found(channel_id))?;
        self.router()?.send(&session, message)
    }

    fn router(&self) -> Result<MessageRouter> {
        self.router
            .upgrade()
            .map(MessageRouter::from_inner)
            .ok_or(Error::NotRunning)
    }
}

// ============================================================================
// AuthenticationGate
// ============================================================================

/// Session table and gate of one origin.
pub struct AuthenticationGate {
    origin: Origin,
    sessions: DashMap<ChannelId, AuthenticationStatus, FxBuildHasher>,
    protocol_events: FxHashSet<String>,
    listeners: RwLock<Vec<Arc<dyn AuthenticationStatusListener>>>,
    router: Weak<RouterInner>,
}

impl fmt::Debug for AuthenticationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationGate")
            .field("origin", &self.origin)
            .field("sessions", &self.sessions.len())
            .field("protocol_events", &self.protocol_events)
            .finish_non_exhaustive()
    }
}

impl AuthenticationGate {
    pub(crate) fn new(
        origin: Origin,
        protocol_events: FxHashSet<String>,
        router: Weak<RouterInner>,
    ) -> Self {
        Self {
            origin,
            sessions: DashMap::with_hasher(FxBuildHasher),
            protocol_events,
            listeners: RwLock::new(Vec::new()),
            router,
        }
    }

    /// Returns the events allowed during login.
    #[inline]
    #[must_use]
    pub fn protocol_events(&self) -> &FxHashSet<String> {
        &self.protocol_events
    }

    /// Opens a fresh `LOGGED_OUT` session.
    ///
    /// A session left by an earlier channel under the same id is logged out
    /// first, with listeners notified, so a new connection never inherits
    /// its status.
    pub fn open_session(&self, channel_id: &ChannelId) {
        if let Some(stale) = self.status(channel_id)
            && stale != AuthenticationStatus::LoggedOut
        {
            debug!(
                origin = %self.origin,
                channel_id = %channel_id,
                status = %stale,
                "Replacing stale session"
            );
            if let Err(e) = self.set_status(channel_id, AuthenticationStatus::LoggedOut) {
                error!(origin = %self.origin, channel_id = %channel_id, error = %e, "Stale logout failed");
            }
        }

        self.sessions
            .insert(channel_id.clone(), AuthenticationStatus::LoggedOut);
        debug!(origin = %self.origin, channel_id = %channel_id, "Session opened");
    }

    /// Changes a session's status and notifies listeners.
    ///
    /// Setting the current status again does nothing. `LOGGED_OUT` removes
    /// the session after listeners ran.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for an illegal change.
    pub fn set_status(&self, channel_id: &ChannelId, status: AuthenticationStatus) -> Result<()> {
        let previous = match self.sessions.entry(channel_id.clone()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if current == status {
                    if status == AuthenticationStatus::LoggedOut {
                        entry.remove();
                    }
                    return Ok(());
                }
                if !current.can_transition_to(status) {
                    return Err(Error::invalid_transition(channel_id, current, status));
                }
                entry.insert(status);
                current
            }
            Entry::Vacant(slot) => {
                if status == AuthenticationStatus::LoggedOut {
                    return Ok(());
                }
                if !AuthenticationStatus::LoggedOut.can_transition_to(status) {
                    return Err(Error::invalid_transition(
                        channel_id,
                        AuthenticationStatus::LoggedOut,
                        status,
                    ));
                }
                slot.insert(status);
                AuthenticationStatus::LoggedOut
            }
        };

        info!(
            origin = %self.origin,
            channel_id = %channel_id,
            from = %previous,
            to = %status,
            "Authentication status changed"
        );

        self.broadcast(channel_id, status, previous);

        if status == AuthenticationStatus::LoggedOut {
            self.sessions
                .remove_if(channel_id, |_, current| *current == AuthenticationStatus::LoggedOut);
        }

        Ok(())
    }

    /// Returns a session's current status.
    #[must_use]
    pub fn status(&self, channel_id: &ChannelId) -> Option<AuthenticationStatus> {
        self.sessions.get(channel_id).map(|entry| *entry.value())
    }

    /// Returns a view of a session.
    #[must_use]
    pub fn session(&self, channel_id: &ChannelId) -> Option<ClientSession> {
        self.status(channel_id)
            .map(|status| self.view(channel_id.clone(), status))
    }

    /// Returns views of all sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<ClientSession> {
        self.sessions
            .iter()
            .map(|entry| self.view(entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Returns the number of sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there is no session.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns `true` if a session with `status` may process `event`.
    #[inline]
    #[must_use]
    pub fn is_allowed(&self, status: AuthenticationStatus, event: &str) -> bool {
        match status {
            AuthenticationStatus::LoggedIn => true,
            AuthenticationStatus::ProcessLogging => self.protocol_events.contains(event),
            AuthenticationStatus::LoggedOut => false,
        }
    }

    /// Returns `true` if the channel's session may process `event`.
    ///
    /// Unknown channels are denied.
    #[must_use]
    pub fn is_allowed_to_process(&self, channel_id: &ChannelId, event: &str) -> bool {
        self.status(channel_id)
            .is_some_and(|status| self.is_allowed(status, event))
    }

    /// Adds a status listener.
    pub fn add_listener(&self, listener: Arc<dyn AuthenticationStatusListener>) {
        self.listeners.write().push(listener);
    }

    /// Removes a status listener.
    ///
    /// Returns `true` if it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn AuthenticationStatusListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn view(&self, channel_id: ChannelId, status: AuthenticationStatus) -> ClientSession {
        ClientSession::attached(channel_id, self.origin, status, self.router.clone())
    }

    fn broadcast(
        &self,
        channel_id: &ChannelId,
        status: AuthenticationStatus,
        previous: AuthenticationStatus,
    ) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }

        let session = self.view(channel_id.clone(), status);
        for listener in listeners {
            if let Err(e) = listener.on_status_changed(&session, previous) {
                error!(
                    origin = %self.origin,
                    channel_id = %channel_id,
                    status = %status,
                    error = %e,
                    "Authentication status listener failed"
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use proptest::prelude::*;

    use AuthenticationStatus::{LoggedIn, LoggedOut, ProcessLogging};

    fn gate(protocol: &[&str]) -> AuthenticationGate {
        AuthenticationGate::new(
            Origin::Client,
            protocol.iter().map(|e| (*e).to_string()).collect(),
            Weak::new(),
        )
    }

    fn c1() -> ChannelId {
        ChannelId::from("c1")
    }

    #[test]
    fn test_open_session_is_logged_out() {
        let gate = gate(&[]);
        gate.open_session(&c1());
        assert_eq!(gate.status(&c1()), Some(LoggedOut));
        assert!(!gate.is_allowed_to_process(&c1(), "chat"));
    }

    #[test]
    fn test_login_walk() {
        let gate = gate(&["login"]);
        gate.open_session(&c1());

        gate.set_status(&c1(), ProcessLogging).expect("process");
        assert!(gate.is_allowed_to_process(&c1(), "login"));
        assert!(!gate.is_allowed_to_process(&c1(), "chat"));

        gate.set_status(&c1(), LoggedIn).expect("login");
        assert!(gate.is_allowed_to_process(&c1(), "chat"));
    }

    #[test]
    fn test_logout_removes_session() {
        let gate = gate(&[]);
        gate.set_status(&c1(), ProcessLogging).expect("process");
        gate.set_status(&c1(), LoggedOut).expect("logout");
        assert_eq!(gate.status(&c1()), None);
        assert!(gate.is_empty());
    }

    #[test]
    fn test_logout_of_fresh_session_removes_it() {
        let gate = gate(&[]);
        gate.open_session(&c1());
        gate.set_status(&c1(), LoggedOut).expect("logout");
        assert!(gate.is_empty());
    }

    #[test]
    fn test_skip_to_logged_in_rejected() {
        let gate = gate(&[]);
        gate.open_session(&c1());
        let result = gate.set_status(&c1(), LoggedIn);
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(gate.status(&c1()), Some(LoggedOut));
    }

    #[test]
    fn test_reopen_resets_status_and_notifies() {
        let gate = gate(&[]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        gate.add_listener(Arc::new(
            move |session: &ClientSession, previous: AuthenticationStatus| -> Result<()> {
                record.lock().push((previous, session.status()));
                Ok(())
            },
        ));

        gate.open_session(&c1());
        gate.set_status(&c1(), ProcessLogging).expect("process");
        gate.set_status(&c1(), LoggedIn).expect("login");

        gate.open_session(&c1());
        assert_eq!(gate.status(&c1()), Some(LoggedOut));
        assert!(!gate.is_allowed_to_process(&c1(), "chat"));
        assert_eq!(seen.lock().last(), Some(&(LoggedIn, LoggedOut)));

        gate.set_status(&c1(), ProcessLogging).expect("fresh login");
    }

    #[test]
    fn test_unknown_channel_denied() {
        let gate = gate(&["login"]);
        assert!(!gate.is_allowed_to_process(&ChannelId::from("ghost"), "login"));
    }

    #[test]
    fn test_listeners_notified_and_errors_swallowed() {
        let gate = gate(&[]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let record = Arc::clone(&seen);
        gate.add_listener(Arc::new(
            move |session: &ClientSession, previous: AuthenticationStatus| -> Result<()> {
                record.lock().push((previous, session.status()));
                Ok(())
            },
        ));
        gate.add_listener(Arc::new(
            |_session: &ClientSession, _previous: AuthenticationStatus| -> Result<()> {
                Err(Error::handler("listener broke"))
            },
        ));

        gate.set_status(&c1(), ProcessLogging).expect("process");
        gate.set_status(&c1(), LoggedIn).expect("login");
        gate.set_status(&c1(), LoggedIn).expect("same status");
        gate.set_status(&c1(), LoggedOut).expect("logout");

        assert_eq!(
            *seen.lock(),
            vec![
                (LoggedOut, ProcessLogging),
                (ProcessLogging, LoggedIn),
                (LoggedIn, LoggedOut),
            ]
        );
    }

    #[test]
    fn test_remove_listener() {
        let gate = gate(&[]);
        let listener: Arc<dyn AuthenticationStatusListener> =
            Arc::new(|_: &ClientSession, _: AuthenticationStatus| -> Result<()> { Ok(()) });

        gate.add_listener(Arc::clone(&listener));
        assert!(gate.remove_listener(&listener));
        assert!(!gate.remove_listener(&listener));
    }

    fn status_strategy() -> impl Strategy<Value = AuthenticationStatus> {
        prop_oneof![Just(LoggedOut), Just(ProcessLogging), Just(LoggedIn)]
    }

    proptest! {
        #[test]
        fn prop_only_legal_transitions_observed(
            requests in prop::collection::vec(status_strategy(), 1..40),
        ) {
            let gate = gate(&["login"]);
            let observed = Arc::new(Mutex::new(Vec::new()));
            let record = Arc::clone(&observed);
            gate.add_listener(Arc::new(
                move |session: &ClientSession, previous: AuthenticationStatus| -> Result<()> {
                    record.lock().push((previous, session.status()));
                    Ok(())
                },
            ));

            gate.open_session(&c1());
            for status in requests {
                let _ = gate.set_status(&c1(), status);
            }

            for (from, to) in observed.lock().iter() {
                prop_assert!(from.can_transition_to(*to));
                prop_assert_ne!(from, to);
            }
        }

        #[test]
        fn prop_logged_out_never_allowed(event in "[a-z]{1,12}") {
            let gate = gate(&["login"]);
            prop_assert!(!gate.is_allowed(LoggedOut, &event));
            prop_assert_eq!(gate.is_allowed(ProcessLogging, &event), event == "login");
            prop_assert!(gate.is_allowed(LoggedIn, &event));
        }
    }
}
