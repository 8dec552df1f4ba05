//! Builder for the gateway context.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::routing::{
    AuthenticationService, DefaultAuthenticationService, MessageRouter, Origin,
};
use crate::transport::NetworkDriver;

use super::core::Gateway;

// ============================================================================
// GatewayBuilder
// ============================================================================

struct OriginConfig {
    origin: Origin,
    driver: Arc<dyn NetworkDriver>,
    auth_service: Arc<dyn AuthenticationService>,
}

/// Builder for a [`Gateway`].
///
/// Use [`Gateway::builder()`] to create one.
#[derive(Default)]
pub struct GatewayBuilder {
    origins: Vec<OriginConfig>,
}

impl fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origins: Vec<Origin> = self.origins.iter().map(|c| c.origin).collect();
        f.debug_struct("GatewayBuilder")
            .field("origins", &origins)
            .finish()
    }
}

impl GatewayBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures an origin.
    ///
    /// # Arguments
    ///
    /// * `origin` - Routing domain
    /// * `driver` - Transport serving the origin
    /// * `auth_service` - Decides when sessions log in
    #[must_use]
    pub fn origin(
        mut self,
        origin: Origin,
        driver: Arc<dyn NetworkDriver>,
        auth_service: Arc<dyn AuthenticationService>,
    ) -> Self {
        self.origins.push(OriginConfig {
            origin,
            driver,
            auth_service,
        });
        self
    }

    /// Configures an origin that logs in every channel on connect.
    #[must_use]
    pub fn origin_with_default_auth(self, origin: Origin, driver: Arc<dyn NetworkDriver>) -> Self {
        self.origin(origin, driver, Arc::new(DefaultAuthenticationService))
    }

    /// Builds the gateway and attaches one router per origin to its driver.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no origin is configured
    /// - [`Error::Config`] if an origin is configured twice
    pub fn build(self) -> Result<Gateway> {
        self.validate()?;

        let routers: BTreeMap<Origin, MessageRouter> = self
            .origins
            .into_iter()
            .map(|config| {
                debug!(origin = %config.origin, "Creating router");
                let router = MessageRouter::new(config.origin, config.driver, config.auth_service);
                (config.origin, router)
            })
            .collect();

        Ok(Gateway::new(routers))
    }

    /// Validates the origin configuration.
    fn validate(&self) -> Result<()> {
        if self.origins.is_empty() {
            return Err(Error::config(
                "At least one origin is required. Use .origin() to add one.\n\
                 Example: Gateway::builder().origin_with_default_auth(Origin::Client, driver)",
            ));
        }

        for (i, config) in self.origins.iter().enumerate() {
            if self.origins[..i].iter().any(|c| c.origin == config.origin) {
                return Err(Error::config(format!(
                    "Origin {} is configured more than once",
                    config.origin
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
