//! Native helper bridge.
//!
//! Connects extension contexts to out-of-process helper programs that speak
//! length-prefixed JSON over stdio.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Per-helper state machine and I/O |
//! | `framing` | `[u32 LE][JSON]` codec |
//! | `manifest` | Descriptor lookup |
//! | `process` | Child process ownership |
//!
//! # Ownership
//!
//! Every bridged connection belongs to the endpoint that opened it. Helper
//! messages go to that endpoint on `native.message`; the end of the
//! connection is reported once on `native.disconnect`. Destroying the owner
//! endpoint destroys the connection.

// ============================================================================
// Submodules
// ============================================================================

/// Per-helper connection.
pub mod connection;

/// Wire framing.
pub mod framing;

/// Descriptor lookup.
pub mod manifest;

mod process;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionState, NativeConnection, NativeEvent};
pub use manifest::{HostDescriptor, HostLookup, SearchLocation};

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, HelperFailure, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{
    CHANNEL_NATIVE_DISCONNECT, CHANNEL_NATIVE_MESSAGE, NativeDisconnect, NativeMessage,
};
use crate::transport::{Endpoint, WatchId};

// ============================================================================
// NativeBridge
// ============================================================================

struct BridgedConnection {
    connection: Arc<NativeConnection>,
    owner: Endpoint,
    watch: Option<WatchId>,
}

/// Table of helper connections owned by endpoints.
pub struct NativeBridge {
    lookup: Arc<HostLookup>,
    connections: Mutex<FxHashMap<ConnectionId, BridgedConnection>>,
}

impl fmt::Debug for NativeBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBridge")
            .field("lookup", &self.lookup)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl NativeBridge {
    /// Creates a bridge resolving helpers through `lookup`.
    #[must_use]
    pub fn new(lookup: HostLookup) -> Arc<Self> {
        Arc::new(Self {
            lookup: Arc::new(lookup),
            connections: Mutex::new(FxHashMap::default()),
        })
    }

    /// Opens a connection to `application` owned by `owner`.
    ///
    /// Resolution and spawning happen in the background; failures arrive as
    /// `native.disconnect` carrying the error. Must be called within a tokio
    /// runtime.
    pub fn connect(self: &Arc<Self>, application: &str, origin: &str, owner: &Endpoint) -> ConnectionId {
        let connection = NativeConnection::new(application, origin);
        let id = connection.id();
        let events = connection.subscribe();

        self.connections.lock().insert(
            id,
            BridgedConnection {
                connection: Arc::clone(&connection),
                owner: owner.clone(),
                watch: None,
            },
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let watch = owner.on_destroyed(move || {
            if let Some(bridge) = weak.upgrade() {
                bridge.destroy(id);
            }
        });
        if let Some(entry) = self.connections.lock().get_mut(&id) {
            entry.watch = watch;
        }

        tokio::spawn(forward_events(Arc::downgrade(self), id, owner.clone(), events));
        connection.start(Arc::clone(&self.lookup));

        debug!(connection = %id, application, origin, "Native connection opened");
        id
    }

    /// Returns a connection by ID.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<NativeConnection>> {
        self.connections
            .lock()
            .get(&id)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Sends `message` on a connection owned by `from`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if the connection is unknown or
    ///   owned by another endpoint
    /// - [`Error::ConnectionClosed`] if it is closing
    pub fn post(&self, id: ConnectionId, from: &Endpoint, message: Value) -> Result<()> {
        let connection = self.owned(id, from)?;
        connection.post(message)
    }

    /// Destroys a connection owned by `from`.
    ///
    /// Returns `false` if it was unknown, foreign, or already closed.
    pub fn disconnect(&self, id: ConnectionId, from: &Endpoint) -> bool {
        match self.owned(id, from) {
            Ok(connection) => connection.destroy(),
            Err(_) => false,
        }
    }

    /// Destroys a connection regardless of owner.
    pub fn destroy(&self, id: ConnectionId) -> bool {
        self.get(id).is_some_and(|connection| connection.destroy())
    }

    /// Destroys every connection.
    pub fn destroy_all(&self) {
        let connections: Vec<Arc<NativeConnection>> = self
            .connections
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.connection))
            .collect();
        for connection in connections {
            connection.destroy();
        }
    }

    /// One-shot exchange: connect, send `message`, await the first reply,
    /// then tear down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HelperUnavailable`] if the helper cannot be reached
    /// or exits before replying.
    pub async fn send_native_message(&self, application: &str, origin: &str, message: Value) -> Result<Value> {
        let connection = NativeConnection::new(application, origin);
        let mut events = connection.subscribe();
        connection.post(message)?;
        connection.start(Arc::clone(&self.lookup));

        let outcome = match events.recv().await {
            Some(NativeEvent::Message(reply)) => Ok(reply),
            Some(NativeEvent::Disconnected(Some(reason))) => Err(Error::helper_unavailable(application, reason)),
            Some(NativeEvent::Disconnected(None)) | None => Err(Error::helper_unavailable(
                application,
                HelperFailure::Exited("closed before replying".to_string()),
            )),
        };

        connection.destroy();
        outcome
    }

    /// Returns the number of live bridged connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn owned(&self, id: ConnectionId, from: &Endpoint) -> Result<Arc<NativeConnection>> {
        let connections = self.connections.lock();
        connections
            .get(&id)
            .filter(|entry| entry.owner.same_as(from))
            .map(|entry| Arc::clone(&entry.connection))
            .ok_or(Error::ConnectionNotFound { connection_id: id })
    }

    fn remove(&self, id: ConnectionId) {
        let entry = self.connections.lock().remove(&id);
        if let Some(BridgedConnection {
            owner,
            watch: Some(watch),
            ..
        }) = entry
        {
            owner.cancel_watch(watch);
        }
    }
}

/// Relays connection events to the owning endpoint.
async fn forward_events(
    bridge: Weak<NativeBridge>,
    id: ConnectionId,
    owner: Endpoint,
    mut events: mpsc::UnboundedReceiver<NativeEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            NativeEvent::Message(message) => {
                let payload = NativeMessage {
                    connection_id: id,
                    message,
                };
                let sent = serde_json::to_value(payload)
                    .map_err(Error::from)
                    .and_then(|value| owner.send(CHANNEL_NATIVE_MESSAGE, value));
                if let Err(e) = sent {
                    debug!(connection = %id, error = %e, "Native message undeliverable");
                }
            }
            NativeEvent::Disconnected(failure) => {
                if let Some(bridge) = bridge.upgrade() {
                    bridge.remove(id);
                }
                if owner.is_alive() {
                    let notice = NativeDisconnect {
                        connection_id: id,
                        error: failure.map(|f| f.to_string()),
                    };
                    if let Ok(value) = serde_json::to_value(notice) {
                        let _ = owner.send(CHANNEL_NATIVE_DISCONNECT, value);
                    }
                }
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
