//! Endpoint sum type and transport capability.
//!
//! An [`Endpoint`] is either a privileged frame or a background worker.
//! Both share one capability surface (`send`, `is_alive`, `kind`), so the
//! router resolves the variant once at its boundary and never type-checks
//! contexts afterwards.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::{EndpointId, OwnerId, SessionId, WorkerInstanceId};

use super::lifeline::{Lifeline, WatchId};

// ============================================================================
// Transport
// ============================================================================

/// Outbound half of an execution context.
///
/// Implemented by collaborators (IPC bridges, in-process channels).
/// Messages sent through one transport must arrive in send order.
pub trait Transport: Send + Sync {
    /// Sends a named message with a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the context can no longer receive messages.
    fn send(&self, channel: &str, payload: Value) -> Result<()>;

    /// Returns `false` once the underlying context is gone.
    fn is_alive(&self) -> bool {
        true
    }
}

// ============================================================================
// EndpointKind
// ============================================================================

/// Kind of execution context behind an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Page-like frame (privileged or sandboxed).
    Frame,
    /// Background worker.
    Worker,
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared by every clone of one endpoint.
struct EndpointShared {
    id: EndpointId,
    owner: Option<OwnerId>,
    session: SessionId,
    transport: Arc<dyn Transport>,
    lifeline: Lifeline,
}

// ============================================================================
// Variants
// ============================================================================

/// A frame context. Frames may or may not belong to an extension.
#[derive(Clone)]
pub struct FrameEndpoint {
    shared: Arc<EndpointShared>,
}

/// A background worker instance. Workers always belong to an extension.
#[derive(Clone)]
pub struct WorkerEndpoint {
    shared: Arc<EndpointShared>,
    instance: WorkerInstanceId,
}

impl WorkerEndpoint {
    /// Returns the worker instance this endpoint is bound to.
    #[inline]
    #[must_use]
    pub fn instance(&self) -> WorkerInstanceId {
        self.instance
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Addressable execution context.
///
/// Cloning is cheap; clones share identity and liveness.
#[derive(Clone)]
pub enum Endpoint {
    /// Page-like frame.
    Frame(FrameEndpoint),
    /// Background worker instance.
    Worker(WorkerEndpoint),
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared();
        f.debug_struct("Endpoint")
            .field("id", &shared.id)
            .field("kind", &self.kind())
            .field("owner", &shared.owner)
            .field("session", &shared.session)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Endpoint - Constructors
// ============================================================================

impl Endpoint {
    /// Creates a frame endpoint.
    #[must_use]
    pub fn frame(
        owner: Option<OwnerId>,
        session: SessionId,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::Frame(FrameEndpoint {
            shared: Self::new_shared(owner, session, transport),
        })
    }

    /// Creates a worker endpoint bound to one worker instance.
    #[must_use]
    pub fn worker(
        owner: OwnerId,
        instance: WorkerInstanceId,
        session: SessionId,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::Worker(WorkerEndpoint {
            shared: Self::new_shared(Some(owner), session, transport),
            instance,
        })
    }

    fn new_shared(
        owner: Option<OwnerId>,
        session: SessionId,
        transport: Arc<dyn Transport>,
    ) -> Arc<EndpointShared> {
        Arc::new(EndpointShared {
            id: EndpointId::next(),
            owner,
            session,
            transport,
            lifeline: Lifeline::new(),
        })
    }
}

// ============================================================================
// Endpoint - Accessors
// ============================================================================

impl Endpoint {
    #[inline]
    fn shared(&self) -> &EndpointShared {
        match self {
            Self::Frame(frame) => &frame.shared,
            Self::Worker(worker) => &worker.shared,
        }
    }

    /// Returns the endpoint identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.shared().id
    }

    /// Returns the context kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Frame(_) => EndpointKind::Frame,
            Self::Worker(_) => EndpointKind::Worker,
        }
    }

    /// Returns the owning extension, if any.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> Option<&OwnerId> {
        self.shared().owner.as_ref()
    }

    /// Returns the isolation domain.
    #[inline]
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.shared().session
    }

    /// Returns the worker instance for worker endpoints.
    #[inline]
    #[must_use]
    pub fn worker_instance(&self) -> Option<WorkerInstanceId> {
        match self {
            Self::Frame(_) => None,
            Self::Worker(worker) => Some(worker.instance),
        }
    }

    /// Returns `true` if both handles refer to the same context.
    #[inline]
    #[must_use]
    pub fn same_as(&self, other: &Endpoint) -> bool {
        self.id() == other.id()
    }
}

// ============================================================================
// Endpoint - Capability
// ============================================================================

impl Endpoint {
    /// Returns `true` while the context can receive messages.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let shared = self.shared();
        !shared.lifeline.is_destroyed() && shared.transport.is_alive()
    }

    /// Sends a named message to the context.
    ///
    /// # Errors
    ///
    /// - [`Error::EndpointDestroyed`] if the endpoint was destroyed
    /// - [`Error::DeliveryFailed`] if the transport rejects the message
    pub fn send(&self, channel: &str, payload: Value) -> Result<()> {
        let shared = self.shared();
        if shared.lifeline.is_destroyed() {
            return Err(Error::EndpointDestroyed {
                endpoint: shared.id,
            });
        }

        shared
            .transport
            .send(channel, payload)
            .map_err(|e| Error::delivery_failed(shared.id, e.to_string()))?;

        trace!(endpoint = %shared.id, channel, "Message sent");
        Ok(())
    }

    /// Marks the context as gone and notifies every watcher.
    ///
    /// Called by the collaborator that owns the context. Returns `false`
    /// if the endpoint was already destroyed.
    pub fn destroy(&self) -> bool {
        let destroyed = self.shared().lifeline.destroy();
        if destroyed {
            trace!(endpoint = %self.id(), "Endpoint destroyed");
        }
        destroyed
    }

    /// Subscribes to destruction of this endpoint.
    ///
    /// Runs immediately and returns `None` if already destroyed.
    pub fn on_destroyed(&self, watcher: impl FnOnce() + Send + 'static) -> Option<WatchId> {
        self.shared().lifeline.watch(watcher)
    }

    /// Cancels a destruction subscription.
    pub fn cancel_watch(&self, id: WatchId) {
        self.shared().lifeline.unwatch(id);
    }
}

// ============================================================================
// Tests
// ============================================================================
