//! Error types for the extension router.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use extension_router::{Error, Result};
//!
//! async fn example(router: &Router, endpoint: &Endpoint) -> Result<()> {
//!     let value = router
//!         .on_message(endpoint, Some("abc"), "tabs.query", vec![])
//!         .await?;
//!     println!("{value}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Caller | [`Error::UnknownHandler`], [`Error::RemoteNotAllowed`], [`Error::UnknownCaller`], [`Error::PermissionDenied`], [`Error::DuplicateHandler`] |
//! | Delivery | [`Error::DeliveryFailed`], [`Error::EndpointDestroyed`] |
//! | Channels | [`Error::PortNotFound`], [`Error::ConnectionNotFound`], [`Error::ConnectionClosed`], [`Error::TooManyPendingRequests`] |
//! | Native helpers | [`Error::HelperUnavailable`] |
//! | Protocol | [`Error::InvalidArgument`], [`Error::Protocol`], [`Error::Handler`], [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::{ConnectionId, EndpointId, OwnerId, PortId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// HelperFailure
// ============================================================================

/// Why a native helper could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperFailure {
    /// Host name does not match the allowed pattern.
    InvalidName,
    /// No structurally valid descriptor found in any search location.
    NotFound,
    /// Descriptor does not list the requesting origin.
    Disallowed,
    /// Declared executable is missing or not a regular file.
    MissingExecutable,
    /// Process could not be started.
    SpawnFailed(String),
    /// Process exited or the pipe broke.
    Exited(String),
}

impl fmt::Display for HelperFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => f.write_str("invalid native host name"),
            Self::NotFound => f.write_str("specified native messaging host not found"),
            Self::Disallowed => f.write_str("access to the native messaging host is forbidden"),
            Self::MissingExecutable => f.write_str("native host executable not found"),
            Self::SpawnFailed(message) => write!(f, "failed to start native host: {message}"),
            Self::Exited(message) => write!(f, "native host has exited: {message}"),
        }
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when router configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// No handler registered under this name.
    #[error("Unknown handler: {name}")]
    UnknownHandler {
        /// Handler name that was requested.
        name: String,
    },

    /// Call crossed an isolation domain and the handler refuses remote calls.
    #[error("Remote calls not allowed for handler: {name}")]
    RemoteNotAllowed {
        /// Handler name that was requested.
        name: String,
    },

    /// Handler requires a caller context and none could be resolved.
    #[error("Unknown caller: {}", caller.as_deref().unwrap_or("<none>"))]
    UnknownCaller {
        /// Caller id supplied with the message, if any.
        caller: Option<String>,
    },

    /// Caller lacks the permission the handler requires.
    #[error("Permission denied: {owner} lacks '{permission}'")]
    PermissionDenied {
        /// Owner that made the call.
        owner: OwnerId,
        /// Missing permission.
        permission: String,
    },

    /// Handler name was registered more than once.
    #[error("Handler registered more than once: {name}")]
    DuplicateHandler {
        /// Conflicting handler name.
        name: String,
    },

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// A single recipient could not be reached.
    #[error("Delivery to {endpoint} failed: {message}")]
    DeliveryFailed {
        /// Endpoint that could not be reached.
        endpoint: EndpointId,
        /// Description of the failure.
        message: String,
    },

    /// Endpoint has already been destroyed.
    #[error("Endpoint destroyed: {endpoint}")]
    EndpointDestroyed {
        /// The destroyed endpoint.
        endpoint: EndpointId,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Port does not exist or is already closed.
    #[error("Port not found: {port_id}")]
    PortNotFound {
        /// The missing port ID.
        port_id: PortId,
    },

    /// Native connection does not exist.
    #[error("Native connection not found: {connection_id}")]
    ConnectionNotFound {
        /// The missing connection ID.
        connection_id: ConnectionId,
    },

    /// Native connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Too many correlated requests waiting for replies.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPendingRequests {
        /// Current pending count.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // Native Helper Errors
    // ========================================================================
    /// Native helper could not be resolved, spawned, or kept alive.
    #[error("Native host '{application}' unavailable: {reason}")]
    HelperUnavailable {
        /// Host name requested.
        application: String,
        /// Why the helper is unavailable.
        reason: HelperFailure,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Invalid argument passed to a handler.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Protocol violation or malformed frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Error raised by a registered handler.
    #[error("{message}")]
    Handler {
        /// Message reported back to the caller.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unknown handler error.
    #[inline]
    pub fn unknown_handler(name: impl Into<String>) -> Self {
        Self::UnknownHandler { name: name.into() }
    }

    /// Creates a remote-not-allowed error.
    #[inline]
    pub fn remote_not_allowed(name: impl Into<String>) -> Self {
        Self::RemoteNotAllowed { name: name.into() }
    }

    /// Creates an unknown caller error.
    #[inline]
    pub fn unknown_caller(caller: Option<&str>) -> Self {
        Self::UnknownCaller {
            caller: caller.map(str::to_string),
        }
    }

    /// Creates a permission denied error.
    #[inline]
    pub fn permission_denied(owner: OwnerId, permission: impl Into<String>) -> Self {
        Self::PermissionDenied {
            owner,
            permission: permission.into(),
        }
    }

    /// Creates a duplicate handler error.
    #[inline]
    pub fn duplicate_handler(name: impl Into<String>) -> Self {
        Self::DuplicateHandler { name: name.into() }
    }

    /// Creates a delivery failed error.
    #[inline]
    pub fn delivery_failed(endpoint: EndpointId, message: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            endpoint,
            message: message.into(),
        }
    }

    /// Creates a helper unavailable error.
    #[inline]
    pub fn helper_unavailable(application: impl Into<String>, reason: HelperFailure) -> Self {
        Self::HelperUnavailable {
            application: application.into(),
            reason,
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the call was rejected before reaching a handler.
    ///
    /// These are surfaced to the caller as-is and never retried.
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownHandler { .. }
                | Self::RemoteNotAllowed { .. }
                | Self::UnknownCaller { .. }
                | Self::PermissionDenied { .. }
                | Self::DuplicateHandler { .. }
        )
    }

    /// Returns `true` if this error concerns an unreachable recipient.
    #[inline]
    #[must_use]
    pub fn is_delivery_error(&self) -> bool {
        matches!(
            self,
            Self::DeliveryFailed { .. } | Self::EndpointDestroyed { .. }
        )
    }

    /// Returns `true` if this error came from the native helper channel.
    #[inline]
    #[must_use]
    pub fn is_helper_error(&self) -> bool {
        matches!(
            self,
            Self::HelperUnavailable { .. } | Self::ConnectionClosed | Self::ConnectionNotFound { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
