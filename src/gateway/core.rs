//! Gateway context and lifecycle.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::protocol::NetworkMessage;
use crate::routing::{ClientSession, MessageRouter, Origin};
use crate::transport::DeliveryStatus;

use super::builder::GatewayBuilder;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the gateway.
struct GatewayInner {
    /// Routers keyed by origin. Ordered so start and stop are deterministic.
    routers: BTreeMap<Origin, MessageRouter>,

    running: AtomicBool,
}

// ============================================================================
// Gateway
// ============================================================================

/// Routing context of a process.
///
/// Cheap to clone; all clones share the same routers.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("origins", &self.origins())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Gateway - Public API
// ============================================================================

impl Gateway {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub(crate) fn new(routers: BTreeMap<Origin, MessageRouter>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                routers,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the router of an origin.
    #[inline]
    #[must_use]
    pub fn router(&self, origin: Origin) -> Option<&MessageRouter> {
        self.inner.routers.get(&origin)
    }

    /// Returns all routers in origin order.
    pub fn routers(&self) -> impl Iterator<Item = &MessageRouter> {
        self.inner.routers.values()
    }

    /// Returns the configured origins.
    #[must_use]
    pub fn origins(&self) -> Vec<Origin> {
        self.inner.routers.keys().copied().collect()
    }

    /// Returns `true` between [`start`](Self::start) and [`stop`](Self::stop).
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Initializes every authentication service, then starts every driver.
    ///
    /// If a driver fails to start, the drivers already started are stopped
    /// again.
    ///
    /// # Errors
    ///
    /// Returns the first initialization or start error.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for router in self.routers() {
            if let Err(e) = router.auth_service().initialize(&router.authentication()) {
                error!(origin = %router.origin(), error = %e, "Authentication service failed to initialize");
                self.inner.running.store(false, Ordering::Release);
                return Err(e);
            }
            debug!(origin = %router.origin(), "Authentication service initialized");
        }

        let mut started: Vec<&MessageRouter> = Vec::with_capacity(self.inner.routers.len());
        for router in self.routers() {
            if let Err(e) = router.driver().start().await {
                error!(origin = %router.origin(), error = %e, "Driver failed to start");
                for router in started {
                    if let Err(e) = router.driver().stop().await {
                        debug!(origin = %router.origin(), error = %e, "Rollback stop failed");
                    }
                }
                self.inner.running.store(false, Ordering::Release);
                return Err(e);
            }
            started.push(router);
        }

        info!(origins = ?self.origins(), "Gateway started");
        Ok(())
    }

    /// Stops every driver.
    ///
    /// All drivers are asked to stop even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first stop error.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        for router in self.routers() {
            if let Err(e) = router.driver().stop().await {
                error!(origin = %router.origin(), error = %e, "Driver failed to stop");
                first_error.get_or_insert(e);
            }
        }

        info!("Gateway stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Sends a message through the router of the session's origin.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the origin is not configured
    /// - see [`MessageRouter::send`]
    pub fn send_message(&self, session: &ClientSession, message: NetworkMessage) -> Result<()> {
        self.origin_router(session.origin())?.send(session, message)
    }

    /// Sends a message and reports the outcome.
    ///
    /// # Errors
    ///
    /// See [`Self::send_message`].
    pub fn send_message_with_status(
        &self,
        session: &ClientSession,
        message: NetworkMessage,
        status: Arc<dyn DeliveryStatus>,
    ) -> Result<()> {
        self.origin_router(session.origin())?
            .send_with_status(session, message, status)
    }

    fn origin_router(&self, origin: Origin) -> Result<&MessageRouter> {
        self.router(origin)
            .ok_or_else(|| Error::config(format!("origin {origin} is not configured")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::ChannelId;
    use crate::protocol::NetworkEvent;
    use crate::routing::{AuthNetworkService, AuthenticationService, AuthenticationStatus};
    use crate::transport::{MemoryDriver, NetworkDriver, NetworkOptions};

    struct FailingInit;

    impl AuthenticationService for FailingInit {
        fn initialize(&self, _network: &AuthNetworkService) -> Result<()> {
            Err(Error::config("no credentials store"))
        }

        fn on_network_event(&self, _: &NetworkEvent, _: &AuthNetworkService) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_drivers() {
        let client = Arc::new(MemoryDriver::default());
        let admin = Arc::new(MemoryDriver::default());

        let gateway = Gateway::builder()
            .origin_with_default_auth(Origin::Client, client.clone())
            .origin_with_default_auth(Origin::Admin, admin.clone())
            .build()
            .expect("build");

        assert_eq!(gateway.origins(), vec![Origin::Client, Origin::Admin]);

        gateway.start().await.expect("start");
        assert!(gateway.is_running());
        assert!(client.is_running());
        assert!(admin.is_running());

        gateway.stop().await.expect("stop");
        assert!(!gateway.is_running());
        assert!(!client.is_running());
        assert!(!admin.is_running());
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_drivers_stopped() {
        let driver = Arc::new(MemoryDriver::default());
        let gateway = Gateway::builder()
            .origin(Origin::Bus, driver.clone(), Arc::new(FailingInit))
            .build()
            .expect("build");

        assert!(matches!(gateway.start().await, Err(Error::Config { .. })));
        assert!(!gateway.is_running());
        assert!(!driver.is_running());
    }

    #[tokio::test]
    async fn test_failed_driver_start_rolls_back() {
        let good = Arc::new(MemoryDriver::default());
        let bad = Arc::new(MemoryDriver::new(NetworkOptions::new().with_max_timeouts(0)));

        let gateway = Gateway::builder()
            .origin_with_default_auth(Origin::Client, good.clone())
            .origin_with_default_auth(Origin::Admin, bad)
            .build()
            .expect("build");

        assert!(gateway.start().await.is_err());
        assert!(!good.is_running());
        assert!(!gateway.is_running());
    }

    #[tokio::test]
    async fn test_send_message_routes_by_origin() {
        let client = Arc::new(MemoryDriver::default());
        let gateway = Gateway::builder()
            .origin_with_default_auth(Origin::Client, client.clone())
            .build()
            .expect("build");
        gateway.start().await.expect("start");

        let mut peer = client.open_channel("c1").expect("open");
        let session = gateway
            .router(Origin::Client)
            .and_then(|router| router.session(&ChannelId::from("c1")))
            .expect("session");

        gateway
            .send_message(&session, NetworkMessage::new("welcome"))
            .expect("send");
        assert_eq!(peer.recv().await.expect("recv").event(), "welcome");

        let stray = ClientSession::detached("c1", Origin::Bus, AuthenticationStatus::LoggedIn);
        assert!(matches!(
            gateway.send_message(&stray, NetworkMessage::new("welcome")),
            Err(Error::Config { .. })
        ));

        gateway.stop().await.expect("stop");
    }
}
