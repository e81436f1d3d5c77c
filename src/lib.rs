//! Extension router - Message routing and channel lifecycle core.
//!
//! This library routes typed requests, broadcast events, and long-lived
//! duplex ports between isolated extension contexts, and bridges them to
//! out-of-process native helper programs.
//!
//! # Architecture
//!
//! The router sits between a privileged host and the contexts it serves:
//!
//! - **Host (embedder)**: implements [`Host`], creates [`Endpoint`]s, forwards
//!   inbound calls to [`Router::on_message`], reports worker transitions
//! - **Contexts (frames, workers)**: receive named messages through their
//!   [`Transport`]
//!
//! Key design principles:
//!
//! - Contexts are addressed by owner, and re-resolved whenever a worker
//!   restarts
//! - Destruction is signalled explicitly, and registries prune synchronously
//! - Requests nobody answers resolve with "no response", not an error
//! - Locks are never held across an `.await`
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use extension_router::{ChannelTransport, Endpoint, OwnerId, Router, SessionId};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> extension_router::Result<()> {
//!     let router = Router::builder().host(Arc::new(MyHost)).build()?;
//!
//!     // A popup frame belonging to extension "abc"
//!     let (transport, mut inbox) = ChannelTransport::new();
//!     let popup = Endpoint::frame(Some(OwnerId::new("abc")), SessionId::default(), transport);
//!
//!     router
//!         .on_message(&popup, None, "router.addListener", vec![json!("tabs.onCreated")])
//!         .await?;
//!     router.broadcast_event("tabs.onCreated", vec![json!({ "id": 7 })]).await;
//!
//!     let delivery = inbox.recv().await.expect("event");
//!     println!("{}: {}", delivery.channel, delivery.payload);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | [`Host`] collaborator trait |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`messaging`] | Request correlation and port multiplexing |
//! | [`native`] | Native helper bridge |
//! | [`protocol`] | Wire channel names and payloads |
//! | [`router`] | [`Router`], handlers, listeners, options |
//! | [`transport`] | [`Endpoint`] sum type and [`Transport`] trait |
//! | [`worker`] | Worker lifecycle tracking |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Host collaborator interface.
pub mod host;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Correlated requests and duplex ports.
pub mod messaging;

/// Native helper bridge.
///
/// Descriptor lookup, process spawning, and length-prefixed JSON framing.
pub mod native;

/// Wire channel names and payload types.
pub mod protocol;

/// Router entry point.
///
/// Use [`Router::builder()`] to create a configured router.
pub mod router;

/// Transport endpoints.
pub mod transport;

/// Worker lifecycle tracking.
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, HelperFailure, Result};

// Host
pub use host::Host;

// Identifier types
pub use identifiers::{
    ConnectionId, EndpointId, OwnerId, PortId, RequestId, SessionId, WorkerInstanceId,
};

// Messaging types
pub use messaging::{Correlator, PortMultiplexer, PortSide, RecipientResolver};

// Native helper types
pub use native::{
    ConnectionState, HostDescriptor, HostLookup, NativeBridge, NativeConnection, NativeEvent,
    SearchLocation,
};

// Protocol types
pub use protocol::SenderInfo;

// Router types
pub use router::{
    HandlerEvent, HandlerOptions, ListenerTarget, Router, RouterBuilder, RouterOptions,
    RouterStats,
};

// Transport types
pub use transport::{ChannelTransport, Delivery, Endpoint, EndpointKind, Transport};

// Worker types
pub use worker::{
    Uninstall, WorkerHook, WorkerInstance, WorkerStatus, WorkerTracker, WorkerTransition,
};
