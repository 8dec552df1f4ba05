//! Gateway context.
//!
//! The [`Gateway`] is built once at startup and owns one
//! [`MessageRouter`](crate::routing::MessageRouter) per configured origin.
//! It is passed explicitly to whatever needs it; there is no global
//! instance.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Gateway`] | Origin routers and lifecycle |
//! | [`GatewayBuilder`] | Origin configuration |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use event_gateway::{
//!     ClientSession, Gateway, NetworkMessage, NetworkOptions, Origin, Result, WebSocketDriver,
//! };
//!
//! # async fn example() -> Result<()> {
//! let driver = Arc::new(WebSocketDriver::new(NetworkOptions::new().with_port(9000)));
//!
//! let gateway = Gateway::builder()
//!     .origin_with_default_auth(Origin::Client, driver)
//!     .build()?;
//!
//! if let Some(router) = gateway.router(Origin::Client) {
//!     router.add_handler("echo", |message: NetworkMessage, session: &ClientSession| {
//!         session.send(message)
//!     })?;
//! }
//!
//! gateway.start().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Origin configuration builder.
pub mod builder;

/// Gateway context.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::GatewayBuilder;
pub use core::Gateway;
