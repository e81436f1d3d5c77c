//! Router, handler registry, and listener registry.
//!
//! # Example
//!
//! ```ignore
//! use extension_router::{HandlerOptions, Router};
//! use serde_json::json;
//!
//! let router = Router::builder().host(host).build()?;
//!
//! router.handle(
//!     "tabs.query",
//!     |event, _args| async move { Ok(json!({ "caller": event.caller })) },
//!     HandlerOptions::new().with_permission("tabs"),
//! );
//!
//! let result = router
//!     .on_message(&endpoint, Some("abc"), "tabs.query", vec![])
//!     .await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent router construction |
//! | `core` | [`Router`] entry point and built-in handlers |
//! | `handlers` | Handler records and argument helpers |
//! | `listeners` | Broadcast listener registry |
//! | `options` | [`RouterOptions`] |

// ============================================================================
// Submodules
// ============================================================================

/// Router builder.
pub mod builder;

/// Router core.
pub mod core;

/// Handler registration.
pub mod handlers;

/// Listener registry.
pub mod listeners;

/// Router options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::RouterBuilder;
pub use core::{Router, RouterStats};
pub use handlers::{HandlerEvent, HandlerFn, HandlerFuture, HandlerOptions, optional_arg, required_arg};
pub use listeners::{Listener, ListenerRegistry, ListenerTarget};
pub use options::RouterOptions;
