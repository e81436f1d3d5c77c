//! Handler registration and dispatch records.
//!
//! Every name maps to exactly one handler. Registering a name twice leaves
//! the slot conflicted: the conflict is logged at registration and reported
//! as [`Error::DuplicateHandler`] whenever the name is invoked.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::identifiers::{OwnerId, SessionId};
use crate::protocol::SenderInfo;
use crate::transport::{Endpoint, EndpointKind};

// ============================================================================
// Types
// ============================================================================

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value>>;

/// Type-erased handler callback.
pub type HandlerFn = Arc<dyn Fn(HandlerEvent, Vec<Value>) -> HandlerFuture + Send + Sync>;

// ============================================================================
// HandlerOptions
// ============================================================================

/// Access rules checked before a handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Accept calls from endpoints in another session.
    pub allow_remote: bool,
    /// Require the caller to resolve to a known owner.
    pub requires_caller_context: bool,
    /// Permission the caller must hold.
    pub required_permission: Option<String>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            allow_remote: false,
            requires_caller_context: true,
            required_permission: None,
        }
    }
}

impl HandlerOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts calls from other sessions.
    #[inline]
    #[must_use]
    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    /// Sets whether a known caller is required.
    #[inline]
    #[must_use]
    pub fn with_caller_context(mut self, required: bool) -> Self {
        self.requires_caller_context = required;
        self
    }

    /// Requires `permission` from the caller.
    #[inline]
    #[must_use]
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }
}

// ============================================================================
// HandlerEvent
// ============================================================================

/// Normalized description of the call a handler is serving.
#[derive(Debug, Clone)]
pub struct HandlerEvent {
    /// Endpoint the call arrived from.
    pub endpoint: Endpoint,
    /// Resolved caller, if any.
    pub caller: Option<OwnerId>,
    /// Session of the calling endpoint.
    pub session: SessionId,
}

impl HandlerEvent {
    /// Creates an event for a call from `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint, caller: Option<OwnerId>) -> Self {
        let session = endpoint.session();
        Self {
            endpoint,
            caller,
            session,
        }
    }

    /// Returns the calling context kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EndpointKind {
        self.endpoint.kind()
    }

    /// Describes the caller for outbound requests and ports.
    #[must_use]
    pub fn sender_info(&self) -> SenderInfo {
        let mut sender = SenderInfo::from_endpoint(&self.endpoint);
        if let Some(caller) = &self.caller {
            sender.owner = Some(caller.clone());
        }
        sender
    }

    /// Returns the caller or fails with [`Error::UnknownCaller`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCaller`] if the call carries no caller.
    pub fn require_caller(&self) -> Result<&OwnerId> {
        self.caller.as_ref().ok_or_else(|| Error::unknown_caller(None))
    }
}

// ============================================================================
// Argument Helpers
// ============================================================================

/// Deserializes the argument at `index`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if it is missing or has the wrong shape.
pub fn required_arg<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> Result<T> {
    let value = args
        .get(index)
        .ok_or_else(|| Error::invalid_argument(format!("missing argument '{name}'")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| Error::invalid_argument(format!("invalid argument '{name}': {e}")))
}

/// Deserializes the argument at `index`, treating missing or `null` as `None`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if it is present with the wrong shape.
pub fn optional_arg<T: DeserializeOwned>(
    args: &[Value],
    index: usize,
    name: &str,
) -> Result<Option<T>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required_arg(args, index, name).map(Some),
    }
}

// ============================================================================
// HandlerRegistry
// ============================================================================

enum Slot {
    Registered {
        handler: HandlerFn,
        options: HandlerOptions,
    },
    Conflicted,
}

/// Name → handler table.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    slots: RwLock<FxHashMap<String, Slot>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.slots.read().len())
            .finish()
    }
}

impl HandlerRegistry {
    /// Registers `callback` under `name`.
    ///
    /// Returns `false` if the name was already taken; the slot then
    /// becomes conflicted.
    pub fn register<F, Fut>(&self, name: &str, callback: F, options: HandlerOptions) -> bool
    where
        F: Fn(HandlerEvent, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |event, args| callback(event, args).boxed());

        let mut slots = self.slots.write();
        if slots.contains_key(name) {
            error!(handler = name, "Handler registered twice");
            slots.insert(name.to_string(), Slot::Conflicted);
            return false;
        }

        slots.insert(name.to_string(), Slot::Registered { handler, options });
        trace!(handler = name, "Handler registered");
        true
    }

    /// Looks up a handler for invocation.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownHandler`] if nothing is registered
    /// - [`Error::DuplicateHandler`] if the name was registered twice
    pub fn lookup(&self, name: &str) -> Result<(HandlerFn, HandlerOptions)> {
        match self.slots.read().get(name) {
            None => Err(Error::unknown_handler(name)),
            Some(Slot::Conflicted) => Err(Error::duplicate_handler(name)),
            Some(Slot::Registered { handler, options }) => {
                Ok((Arc::clone(handler), options.clone()))
            }
        }
    }

    /// Returns the number of registered names, conflicted ones included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
