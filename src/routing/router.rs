//! Per-origin message router.
//!
//! A [`MessageRouter`] binds one driver, one authentication service, the
//! session gate, the filter chain and the handler table of one origin.
//!
//! # Inbound Pipeline
//!
//! ```text
//! driver ─► session? ─► handler? ─► gate ─► request filters ─► handler
//!              │            │         │            │
//!        UnknownSender  NoHandler  NotAuth.  FilteredMessage
//! ```
//!
//! Every rejection ends the message, is logged, and leaves the channel and
//! the router running.
//!
//! # Outbound Pipeline
//!
//! ```text
//! send ─► response filters ─► driver.send ─► DeliveryStatus
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rustc_hash::FxBuildHasher;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{Direction, NetworkEvent, NetworkEventType, NetworkMessage};
use crate::transport::{DeliveryStatus, NetworkDriver, NetworkListener};

use super::auth::{
    AuthNetworkService, AuthenticationGate, AuthenticationService, AuthenticationStatusListener,
};
use super::filter::{FilterChain, FilterDescriptor, MessageFilter};
use super::handler::MessageHandler;
use super::session::{AuthenticationStatus, ClientSession, Origin};

// ============================================================================
// Types
// ============================================================================

type HandlerMap = DashMap<String, Arc<dyn MessageHandler>, FxBuildHasher>;

// ============================================================================
// MessageRouter
// ============================================================================

/// Routes messages of one origin.
///
/// Cheap to clone; all clones share the same state. The router installs
/// itself as the driver's listener on creation.
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

/// Shared router state.
pub(crate) struct RouterInner {
    origin: Origin,
    driver: Arc<dyn NetworkDriver>,
    auth_service: Arc<dyn AuthenticationService>,
    gate: AuthenticationGate,
    filters: FilterChain,
    handlers: HandlerMap,
    this: Weak<RouterInner>,
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("origin", &self.inner.origin)
            .field("sessions", &self.inner.gate.len())
            .field("handlers", &self.inner.handlers.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// MessageRouter - Construction
// ============================================================================

impl MessageRouter {
    /// Creates a router and attaches it to the driver.
    #[must_use]
    pub fn new(
        origin: Origin,
        driver: Arc<dyn NetworkDriver>,
        auth_service: Arc<dyn AuthenticationService>,
    ) -> Self {
        let protocol_events = auth_service.protocol_events();

        let inner = Arc::new_cyclic(|this: &Weak<RouterInner>| RouterInner {
            origin,
            driver: Arc::clone(&driver),
            auth_service,
            gate: AuthenticationGate::new(origin, protocol_events, this.clone()),
            filters: FilterChain::new(),
            handlers: DashMap::with_hasher(FxBuildHasher),
            this: this.clone(),
        });

        let listener: Weak<RouterInner> = Arc::downgrade(&inner);
        driver.set_listener(listener);

        debug!(%origin, "Router attached to driver");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<RouterInner>) -> Self {
        Self { inner }
    }
}

// ============================================================================
// MessageRouter - Accessors
// ============================================================================

impl MessageRouter {
    /// Returns the origin served.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.inner.origin
    }

    /// Returns the driver.
    #[inline]
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn NetworkDriver> {
        &self.inner.driver
    }

    /// Returns the authentication service.
    #[inline]
    #[must_use]
    pub fn auth_service(&self) -> &Arc<dyn AuthenticationService> {
        &self.inner.auth_service
    }

    /// Returns the session gate.
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &AuthenticationGate {
        &self.inner.gate
    }

    /// Returns the filter chain.
    #[inline]
    #[must_use]
    pub fn filters(&self) -> &FilterChain {
        &self.inner.filters
    }

    /// Returns the handle given to the authentication service.
    #[must_use]
    pub fn authentication(&self) -> AuthNetworkService {
        self.inner.network()
    }

    /// Returns a view of a session.
    #[must_use]
    pub fn session(&self, channel_id: &ChannelId) -> Option<ClientSession> {
        self.inner.gate.session(channel_id)
    }

    /// Returns views of all sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<ClientSession> {
        self.inner.gate.sessions()
    }
}

// ============================================================================
// MessageRouter - Registration
// ============================================================================

impl MessageRouter {
    /// Binds a handler to an event and subscribes the driver to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if the event is already bound;
    /// the existing binding is kept.
    pub fn add_handler<H>(&self, event: impl Into<String>, handler: H) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        let event = event.into();

        match self.inner.handlers.entry(event.clone()) {
            Entry::Occupied(_) => Err(Error::duplicate_handler(event)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(handler));
                self.inner.driver.subscribe(&event);
                info!(origin = %self.inner.origin, event = %event, "Handler registered");
                Ok(())
            }
        }
    }

    /// Unbinds an event's handler and withdraws interest.
    ///
    /// Returns `true` if a handler was bound.
    pub fn remove_handler(&self, event: &str) -> bool {
        if self.inner.handlers.remove(event).is_none() {
            return false;
        }

        self.inner.driver.unsubscribe(event);
        info!(origin = %self.inner.origin, event, "Handler removed");
        true
    }

    /// Returns `true` if the event has a handler.
    #[must_use]
    pub fn has_handler(&self, event: &str) -> bool {
        self.inner.handlers.contains_key(event)
    }

    /// Adds a filter for an event. Lower priorities run first.
    pub fn add_filter(&self, event: impl Into<String>, priority: i32, filter: Arc<dyn MessageFilter>) {
        self.inner
            .filters
            .add(FilterDescriptor::new(event, priority, filter));
    }

    /// Removes a filter from an event.
    ///
    /// Returns `true` if it was registered.
    pub fn remove_filter(&self, event: &str, filter: &Arc<dyn MessageFilter>) -> bool {
        self.inner.filters.remove(event, filter)
    }

    /// Adds a session status listener.
    pub fn add_authentication_status_listener(
        &self,
        listener: Arc<dyn AuthenticationStatusListener>,
    ) {
        self.inner.gate.add_listener(listener);
    }

    /// Removes a session status listener.
    ///
    /// Returns `true` if it was registered.
    pub fn remove_authentication_status_listener(
        &self,
        listener: &Arc<dyn AuthenticationStatusListener>,
    ) -> bool {
        self.inner.gate.remove_listener(listener)
    }
}

// ============================================================================
// MessageRouter - Outbound
// ============================================================================

impl MessageRouter {
    /// Sends a message to a session's channel.
    ///
    /// # Errors
    ///
    /// - [`Error::FilteredMessage`] if a response filter vetoed it
    /// - any error of [`NetworkDriver::send`]
    pub fn send(&self, session: &ClientSession, message: NetworkMessage) -> Result<()> {
        self.inner.deliver(session, message, None)
    }

    /// Sends a message and reports the outcome through `status`.
    ///
    /// A filter veto is reported as [`Error::FilteredMessage`] and no I/O
    /// happens.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`]; every error is also passed to `status`.
    pub fn send_with_status(
        &self,
        session: &ClientSession,
        message: NetworkMessage,
        status: Arc<dyn DeliveryStatus>,
    ) -> Result<()> {
        self.inner.deliver(session, message, Some(status))
    }

    /// Sends a message to every logged-in session.
    ///
    /// Response filters run once per session. Returns the number of
    /// sessions the message was handed to.
    pub fn broadcast(&self, message: &NetworkMessage) -> usize {
        let mut delivered = 0;

        for session in self.inner.gate.sessions() {
            if !session.is_authenticated() {
                continue;
            }

            match self.inner.deliver(&session, message.clone(), None) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    origin = %self.inner.origin,
                    channel_id = %session.channel_id(),
                    event = message.event(),
                    error = %e,
                    "Broadcast skipped session"
                ),
            }
        }

        delivered
    }
}

// ============================================================================
// MessageRouter - Inbound
// ============================================================================

impl MessageRouter {
    /// Runs one inbound message through the pipeline.
    ///
    /// The driver calls this for every stamped message; it is public so
    /// embedders and tests can inject messages directly.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSender`] if the channel has no session
    /// - [`Error::NoHandler`] if the event is not bound
    /// - [`Error::NotAuthenticated`] if the gate denies the event
    /// - [`Error::FilteredMessage`] if a request filter vetoed it
    /// - any error returned by the handler
    pub fn dispatch(&self, channel_id: &ChannelId, message: NetworkMessage) -> Result<()> {
        self.inner.dispatch(channel_id, message)
    }
}

// ============================================================================
// RouterInner
// ============================================================================

impl RouterInner {
    fn network(&self) -> AuthNetworkService {
        AuthNetworkService::new(self.origin, self.this.clone())
    }

    fn deliver(
        &self,
        session: &ClientSession,
        mut message: NetworkMessage,
        status: Option<Arc<dyn DeliveryStatus>>,
    ) -> Result<()> {
        let channel_id = session.channel_id();

        if !self.filters.run(&mut message, session, Direction::Response) {
            let err = Error::filtered_message(message.event(), channel_id, Direction::Response);
            debug!(
                origin = %self.origin,
                channel_id = %channel_id,
                event = message.event(),
                "Outbound message filtered"
            );
            if let Some(status) = status {
                status.error(channel_id, &message, &err);
            }
            return Err(err);
        }

        match status {
            Some(status) => self.driver.send_with_status(channel_id, &message, status),
            None => self.driver.send(channel_id, &message),
        }
    }

    fn dispatch(&self, channel_id: &ChannelId, mut message: NetworkMessage) -> Result<()> {
        let session = self
            .gate
            .session(channel_id)
            .ok_or_else(|| Error::unknown_sender(channel_id, message.event()))?;

        let handler = self
            .handlers
            .get(message.event())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::no_handler(channel_id, message.event()))?;

        if !self.gate.is_allowed(session.status(), message.event()) {
            return Err(Error::not_authenticated(
                channel_id,
                session.status(),
                message.event(),
            ));
        }

        if !self.filters.run(&mut message, &session, Direction::Request) {
            return Err(Error::filtered_message(
                message.event(),
                channel_id,
                Direction::Request,
            ));
        }

        trace!(
            origin = %self.origin,
            channel_id = %channel_id,
            event = message.event(),
            "Dispatching message"
        );
        handler.on_message(message, &session)
    }

    fn call_auth_service(&self, event: &NetworkEvent) {
        if let Err(e) = self.auth_service.on_network_event(event, &self.network()) {
            error!(
                origin = %self.origin,
                channel_id = %event.channel_id,
                event_type = %event.event_type,
                error = %e,
                "Authentication service failed"
            );
        }
    }
}

impl NetworkListener for RouterInner {
    fn on_network_event(&self, event: NetworkEvent) {
        match event.event_type {
            NetworkEventType::Active => {
                self.gate.open_session(&event.channel_id);
                self.call_auth_service(&event);
            }
            NetworkEventType::Inactive => {
                self.call_auth_service(&event);
                if let Err(e) = self
                    .gate
                    .set_status(&event.channel_id, AuthenticationStatus::LoggedOut)
                {
                    error!(
                        origin = %self.origin,
                        channel_id = %event.channel_id,
                        error = %e,
                        "Forced logout failed"
                    );
                }
            }
            NetworkEventType::TimeoutAlertOn | NetworkEventType::TimeoutAlertOff => {
                debug!(
                    origin = %self.origin,
                    channel_id = %event.channel_id,
                    event_type = %event.event_type,
                    "Heartbeat alert"
                );
            }
            NetworkEventType::Registered | NetworkEventType::Unregistered => {
                trace!(
                    origin = %self.origin,
                    channel_id = %event.channel_id,
                    event_type = %event.event_type,
                    "Channel registration changed"
                );
            }
        }
    }

    fn on_network_message(&self, message: NetworkMessage) {
        let Some(channel_id) = message.channel_id().cloned() else {
            warn!(origin = %self.origin, event = message.event(), "Message without channel, dropping");
            return;
        };
        let event = message.event().to_string();

        match self.dispatch(&channel_id, message) {
            Ok(()) => {}
            Err(e) if e.is_per_message() => warn!(
                origin = %self.origin,
                channel_id = %channel_id,
                event = %event,
                status = ?self.gate.status(&channel_id),
                error = %e,
                "Message rejected"
            ),
            Err(e) => error!(
                origin = %self.origin,
                channel_id = %channel_id,
                event = %event,
                status = ?self.gate.status(&channel_id),
                error = %e,
                "Handler failed"
            ),
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
    use rustc_hash::FxHashSet;

    use crate::routing::DefaultAuthenticationService;
    use crate::transport::{MemoryDriver, MemoryPeer, NetworkOptions};

    use AuthenticationStatus::{LoggedIn, LoggedOut, ProcessLogging};

    /// Moves new channels to `PROCESS_LOGGING` and waits for `login`.
    struct Handshake;

    impl AuthenticationService for Handshake {
        fn protocol_events(&self) -> FxHashSet<String> {
            ["login".to_string()].into_iter().collect()
        }

        fn on_network_event(&self, event: &NetworkEvent, network: &AuthNetworkService) -> Result<()> {
            if event.is_active() {
                network.set_status(&event.channel_id, ProcessLogging)?;
            }
            Ok(())
        }
    }

    type Seen = Arc<Mutex<Vec<(String, Option<u64>)>>>;

    fn recording(seen: &Seen) -> impl MessageHandler + 'static {
        let seen = Arc::clone(seen);
        move |message: NetworkMessage, _session: &ClientSession| -> Result<()> {
            seen.lock()
                .push((message.event().to_string(), message.channel_sequence()));
            Ok(())
        }
    }

    async fn setup(
        auth: Arc<dyn AuthenticationService>,
    ) -> (MessageRouter, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new(NetworkOptions::new()));
        let router = MessageRouter::new(Origin::Client, driver.clone(), auth);
        driver.start().await.expect("start");
        (router, driver)
    }

    fn c1() -> ChannelId {
        ChannelId::from("c1")
    }

    #[tokio::test]
    async fn test_login_scenario() {
        let (router, driver) = setup(Arc::new(Handshake)).await;
        let seen: Seen = Arc::default();
        router.add_handler("login", recording(&seen)).expect("login");
        router.add_handler("chat", recording(&seen)).expect("chat");

        let peer = driver.open_channel("c1").expect("open");
        assert_eq!(router.session(&c1()).map(|s| s.status()), Some(ProcessLogging));

        peer.send(&NetworkMessage::new("login")).expect("send");
        assert_eq!(seen.lock().len(), 1);

        let rejected = router.dispatch(&c1(), NetworkMessage::new("chat"));
        assert!(matches!(
            rejected,
            Err(Error::NotAuthenticated { status: ProcessLogging, .. })
        ));
        peer.send(&NetworkMessage::new("chat")).expect("send");
        assert_eq!(seen.lock().len(), 1);

        router
            .authentication()
            .set_status(&c1(), LoggedIn)
            .expect("login");
        peer.send(&NetworkMessage::new("chat")).expect("send");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, "chat");
        // The rejected chat still consumed a channel sequence number.
        assert_eq!(seen[1].1, Some(3));
    }

    #[tokio::test]
    async fn test_logged_out_reaches_nothing() {
        struct Manual;
        impl AuthenticationService for Manual {
            fn on_network_event(&self, _: &NetworkEvent, _: &AuthNetworkService) -> Result<()> {
                Ok(())
            }
        }

        let (router, driver) = setup(Arc::new(Manual)).await;
        let seen: Seen = Arc::default();
        router.add_handler("chat", recording(&seen)).expect("chat");

        let _peer = driver.open_channel("c1").expect("open");
        assert_eq!(router.session(&c1()).map(|s| s.status()), Some(LoggedOut));

        assert!(matches!(
            router.dispatch(&c1(), NetworkMessage::new("chat")),
            Err(Error::NotAuthenticated { status: LoggedOut, .. })
        ));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_replacing_channel_starts_unauthenticated() {
        let (router, driver) = setup(Arc::new(Handshake)).await;
        let seen: Seen = Arc::default();
        router.add_handler("chat", recording(&seen)).expect("chat");

        let _first = driver.open_channel("c1").expect("open");
        router
            .authentication()
            .set_status(&c1(), LoggedIn)
            .expect("login");

        let second = driver.open_channel("c1").expect("reopen");
        assert_eq!(router.session(&c1()).map(|s| s.status()), Some(ProcessLogging));

        second.send(&NetworkMessage::new("chat")).expect("send");
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_sender_and_no_handler() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        router
            .add_handler("chat", |_: NetworkMessage, _: &ClientSession| -> Result<()> { Ok(()) })
            .expect("chat");

        assert!(matches!(
            router.dispatch(&ChannelId::from("ghost"), NetworkMessage::new("chat")),
            Err(Error::UnknownSender { .. })
        ));

        let _peer = driver.open_channel("c1").expect("open");
        assert!(matches!(
            router.dispatch(&c1(), NetworkMessage::new("missing")),
            Err(Error::NoHandler { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_handler_keeps_first() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        let first: Seen = Arc::default();
        let second: Seen = Arc::default();

        router.add_handler("chat", recording(&first)).expect("first");
        assert!(matches!(
            router.add_handler("chat", recording(&second)),
            Err(Error::DuplicateHandler { .. })
        ));

        let peer = driver.open_channel("c1").expect("open");
        peer.send(&NetworkMessage::new("chat")).expect("send");
        assert_eq!(first.lock().len(), 1);
        assert!(second.lock().is_empty());
    }

    #[tokio::test]
    async fn test_remove_handler_withdraws_interest() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        router
            .add_handler("chat", |_: NetworkMessage, _: &ClientSession| -> Result<()> { Ok(()) })
            .expect("chat");
        assert!(driver.core().is_subscribed("chat"));

        assert!(router.remove_handler("chat"));
        assert!(!router.remove_handler("chat"));
        assert!(!driver.core().is_subscribed("chat"));
        assert!(!router.has_handler("chat"));
    }

    #[tokio::test]
    async fn test_handler_replies_through_session() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        router
            .add_handler("ping", |message: NetworkMessage, session: &ClientSession| -> Result<()> {
                session.send(NetworkMessage::from_value("pong", message.payload().clone()))
            })
            .expect("ping");

        let mut peer = driver.open_channel("c1").expect("open");
        peer.send(&NetworkMessage::from_value("ping", serde_json::json!(7)))
            .expect("send");

        let reply = peer.recv().await.expect("reply");
        assert_eq!(reply.event(), "pong");
        assert_eq!(reply.payload(), &serde_json::json!(7));
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        let seen: Seen = Arc::default();
        router
            .add_handler("boom", |_: NetworkMessage, _: &ClientSession| -> Result<()> {
                Err(Error::handler("exploded"))
            })
            .expect("boom");
        router.add_handler("chat", recording(&seen)).expect("chat");

        let peer = driver.open_channel("c1").expect("open");
        peer.send(&NetworkMessage::new("boom")).expect("send");
        peer.send(&NetworkMessage::new("chat")).expect("send");
        assert_eq!(seen.lock().len(), 1);
    }

    struct Veto;

    impl MessageFilter for Veto {
        fn filter_request(&self, _: &mut NetworkMessage, _: &ClientSession) -> Result<bool> {
            Ok(false)
        }

        fn filter_response(&self, _: &mut NetworkMessage, _: &ClientSession) -> Result<bool> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct Outcomes {
        successes: Mutex<u32>,
        errors: Mutex<Vec<String>>,
    }

    impl DeliveryStatus for Outcomes {
        fn success(&self, _: &ChannelId, _: &NetworkMessage) {
            *self.successes.lock() += 1;
        }

        fn error(&self, _: &ChannelId, _: &NetworkMessage, cause: &Error) {
            self.errors.lock().push(cause.to_string());
        }
    }

    #[tokio::test]
    async fn test_inbound_filter_veto() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        let seen: Seen = Arc::default();
        router.add_handler("chat", recording(&seen)).expect("chat");
        router.add_filter("chat", 0, Arc::new(Veto));

        let _peer = driver.open_channel("c1").expect("open");
        let result = router.dispatch(&c1(), NetworkMessage::new("chat"));
        assert!(matches!(
            result,
            Err(Error::FilteredMessage { direction: Direction::Request, .. })
        ));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_outbound_filter_veto_reports_and_skips_io() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        let mut peer = driver.open_channel("c1").expect("open");
        let session = router.session(&c1()).expect("session");

        let outcomes = Arc::new(Outcomes::default());
        session
            .send_with_status(NetworkMessage::new("news"), outcomes.clone())
            .expect("unfiltered send");
        assert_eq!(*outcomes.successes.lock(), 1);

        let veto: Arc<dyn MessageFilter> = Arc::new(Veto);
        router.add_filter("news", 0, Arc::clone(&veto));
        let result = session.send_with_status(NetworkMessage::new("news"), outcomes.clone());
        assert!(matches!(result, Err(Error::FilteredMessage { .. })));
        assert_eq!(outcomes.errors.lock().len(), 1);

        assert!(peer.try_recv().is_some());
        assert!(peer.try_recv().is_none());

        assert!(router.remove_filter("news", &veto));
    }

    #[tokio::test]
    async fn test_broadcast_only_logged_in() {
        let (router, driver) = setup(Arc::new(Handshake)).await;
        let mut waiting = driver.open_channel("c1").expect("open");
        let mut ready = driver.open_channel("c2").expect("open");
        router
            .authentication()
            .set_status(&ChannelId::from("c2"), LoggedIn)
            .expect("login");

        let delivered = router.broadcast(&NetworkMessage::new("news"));
        assert_eq!(delivered, 1);
        assert!(ready.try_recv().is_some());
        assert!(waiting.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_inactive_forces_logout() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&transitions);
        router.add_authentication_status_listener(Arc::new(
            move |session: &ClientSession, previous: AuthenticationStatus| -> Result<()> {
                record.lock().push((previous, session.status()));
                Ok(())
            },
        ));

        let peer: MemoryPeer = driver.open_channel("c1").expect("open");
        assert_eq!(router.session(&c1()).map(|s| s.status()), Some(LoggedIn));

        peer.disconnect();
        assert!(router.session(&c1()).is_none());
        assert_eq!(
            *transitions.lock(),
            vec![
                (LoggedOut, ProcessLogging),
                (ProcessLogging, LoggedIn),
                (LoggedIn, LoggedOut),
            ]
        );
    }

    #[tokio::test]
    async fn test_router_dropped_detaches_sessions() {
        let (router, driver) = setup(Arc::new(DefaultAuthenticationService)).await;
        let _peer = driver.open_channel("c1").expect("open");
        let session = router.session(&c1()).expect("session");

        drop(router);
        assert!(matches!(
            session.send(NetworkMessage::new("x")),
            Err(Error::NotRunning)
        ));
    }
}
