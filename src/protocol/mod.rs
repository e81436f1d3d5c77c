//! Wire message types.
//!
//! This module defines the channel names and payloads exchanged between the
//! router and the contexts it serves.
//!
//! # Protocol Overview
//!
//! | Channel | Direction | Purpose |
//! |---------|-----------|---------|
//! | `runtime.request` | Router → Context | Correlated request |
//! | `runtime.reply` | Context → Router | Reply to a correlated request (handler) |
//! | `port.connect` | Router → Context | New port addressed to this context |
//! | `port.message` | Router → Context | Message on an open port |
//! | `port.disconnect` | Router → Context | Port closed by the other side |
//! | `native.message` | Router → Context | Message from a native helper |
//! | `native.disconnect` | Router → Context | Native helper connection closed |
//! | `<eventName>` | Router → Context | Broadcast event, payload is the argument array |
//!
//! # Handler Naming
//!
//! Built-in handlers follow `module.methodName` format:
//!
//! - `router.addListener`
//! - `runtime.sendMessage`
//! - `port.postMessage`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `native` | Native helper notifications |
//! | `port` | Port notifications |
//! | `request` | Correlated request and reply envelopes |

// ============================================================================
// Submodules
// ============================================================================

/// Native helper notification payloads.
pub mod native;

/// Port notification payloads.
pub mod port;

/// Correlated request and reply envelopes.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use native::{NativeDisconnect, NativeMessage};
pub use port::{PortConnect, PortDisconnect, PortMessage};
pub use request::{ReplyEnvelope, RequestEnvelope, SenderInfo};

// ============================================================================
// Outbound Channels
// ============================================================================

/// Correlated request delivered to a context.
pub const CHANNEL_REQUEST: &str = "runtime.request";

/// New port addressed to a context.
pub const CHANNEL_PORT_CONNECT: &str = "port.connect";

/// Message on an open port.
pub const CHANNEL_PORT_MESSAGE: &str = "port.message";

/// Port closed by the other side.
pub const CHANNEL_PORT_DISCONNECT: &str = "port.disconnect";

/// Message from a native helper.
pub const CHANNEL_NATIVE_MESSAGE: &str = "native.message";

/// Native helper connection closed.
pub const CHANNEL_NATIVE_DISCONNECT: &str = "native.disconnect";

// ============================================================================
// Built-in Handlers
// ============================================================================

/// Built-in handler names registered by the router.
pub mod handlers {
    /// Register a broadcast listener for the calling context.
    pub const ADD_LISTENER: &str = "router.addListener";
    /// Remove a broadcast listener.
    pub const REMOVE_LISTENER: &str = "router.removeListener";
    /// Send a correlated request to an owner's contexts.
    pub const SEND_MESSAGE: &str = "runtime.sendMessage";
    /// Shared reply channel for correlated requests.
    pub const REPLY: &str = "runtime.reply";
    /// Open a port.
    pub const CONNECT: &str = "runtime.connect";
    /// Post on a port.
    pub const PORT_POST_MESSAGE: &str = "port.postMessage";
    /// Close a port.
    pub const PORT_DISCONNECT: &str = "port.disconnect";
    /// Open a native helper connection.
    pub const CONNECT_NATIVE: &str = "runtime.connectNative";
    /// One-shot native helper exchange.
    pub const SEND_NATIVE_MESSAGE: &str = "runtime.sendNativeMessage";
    /// Post to a native helper connection.
    pub const NATIVE_POST_MESSAGE: &str = "native.postMessage";
    /// Close a native helper connection.
    pub const NATIVE_DISCONNECT: &str = "native.disconnect";
}

/// Permission required for native helper access.
pub const NATIVE_MESSAGING_PERMISSION: &str = "nativeMessaging";
