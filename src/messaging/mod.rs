//! Correlated requests and duplex ports.
//!
//! Both channels address a logical recipient (an owner) rather than a
//! specific context, because the context behind an owner changes whenever
//! its background worker restarts. [`RecipientResolver`] turns an owner into
//! the best currently reachable endpoint.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlator` | Request/response correlation with timeouts |
//! | `ports` | Port multiplexer |
//! | `resolver` | Owner → live endpoint resolution |

// ============================================================================
// Submodules
// ============================================================================

/// Request/response correlation.
pub mod correlator;

/// Duplex port multiplexer.
pub mod ports;

/// Recipient resolution.
pub mod resolver;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlator::Correlator;
pub use ports::{PortMultiplexer, PortSide};
pub use resolver::RecipientResolver;
