//! Transport endpoints.
//!
//! This module models the execution contexts the router talks to.
//! The router never owns a context: collaborators create [`Endpoint`]s,
//! hand clones to the router, and call [`Endpoint::destroy`] when the
//! context goes away.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   Transport::send(channel, payload)   ┌─────────────────┐
//! │     Router      │──────────────────────────────────────►│  Frame / Worker │
//! │                 │                                       │  context        │
//! │  on_message()   │◄──────────────────────────────────────│                 │
//! └─────────────────┘   (collaborator forwards inbound)     └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | In-process transport backed by an mpsc channel |
//! | `endpoint` | `Endpoint` sum type and `Transport` trait |
//! | `lifeline` | Explicit destruction notifications |

// ============================================================================
// Submodules
// ============================================================================

/// In-process mpsc transport.
pub mod channel;

/// Endpoint sum type and transport capability.
pub mod endpoint;

/// Destruction notifications.
pub mod lifeline;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelTransport, Delivery};
pub use endpoint::{Endpoint, EndpointKind, FrameEndpoint, Transport, WorkerEndpoint};
pub use lifeline::{Lifeline, WatchId};
