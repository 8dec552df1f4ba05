//! Routing engine.
//!
//! One [`MessageRouter`] per [`Origin`] decides what happens to every
//! message between the driver and the application.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `auth` | Session gate, authentication services and listeners |
//! | `filter` | Per-event filter chain |
//! | `handler` | Application handler trait |
//! | `router` | Inbound and outbound pipelines |
//! | `session` | Origins, status state machine, session view |

// ============================================================================
// Submodules
// ============================================================================

/// Session gate and authentication services.
pub mod auth;

/// Message filters.
pub mod filter;

/// Message handlers.
pub mod handler;

/// Message router.
pub mod router;

/// Sessions and origins.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::{
    AuthNetworkService, AuthenticationGate, AuthenticationService, AuthenticationStatusListener,
    DefaultAuthenticationService,
};
pub use filter::{FilterChain, FilterDescriptor, MessageFilter};
pub use handler::MessageHandler;
pub use router::MessageRouter;
pub use session::{AuthenticationStatus, ClientSession, Origin};
