//! Owner → live endpoint resolution.
//!
//! Preference order:
//!
//! 1. the most recent live worker instance known to the tracker,
//! 2. a worker started (or resumed) through the host,
//! 3. any already-live context the host knows for the owner.
//!
//! The sending context is never its own recipient: a worker messaging its
//! own owner skips straight to the owner's live contexts.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, trace};

use crate::host::Host;
use crate::identifiers::OwnerId;
use crate::router::RouterOptions;
use crate::transport::Endpoint;
use crate::worker::WorkerTracker;

// ============================================================================
// RecipientResolver
// ============================================================================

/// Resolves owners to reachable endpoints.
pub struct RecipientResolver {
    host: Arc<dyn Host>,
    workers: Arc<WorkerTracker>,
    options: RouterOptions,
}

impl RecipientResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(host: Arc<dyn Host>, workers: Arc<WorkerTracker>, options: RouterOptions) -> Self {
        Self {
            host,
            workers,
            options,
        }
    }

    /// Returns the owner's worker, starting it if necessary.
    pub async fn wake_worker(&self, owner: &OwnerId) -> Option<Endpoint> {
        if let Some(endpoint) = self.workers.active_worker(owner) {
            trace!(%owner, endpoint = %endpoint.id(), "Using active worker");
            return Some(endpoint);
        }

        let scope = self.options.scope_for(owner);
        match self.host.start_worker(&scope).await {
            Ok(endpoint) if endpoint.is_alive() => {
                trace!(%owner, endpoint = %endpoint.id(), "Worker started");
                Some(endpoint)
            }
            Ok(endpoint) => {
                debug!(%owner, endpoint = %endpoint.id(), "Started worker is not alive");
                None
            }
            Err(e) => {
                debug!(%owner, error = %e, "Worker start failed");
                None
            }
        }
    }

    /// Returns the best reachable endpoint for `owner`, other than `sender`.
    pub async fn resolve(&self, owner: &OwnerId, sender: Option<&Endpoint>) -> Option<Endpoint> {
        let is_sender = |endpoint: &Endpoint| sender.is_some_and(|s| s.same_as(endpoint));

        match self.wake_worker(owner).await {
            Some(endpoint) if !is_sender(&endpoint) => return Some(endpoint),
            Some(endpoint) => trace!(%owner, endpoint = %endpoint.id(), "Skipping sender worker"),
            None => {}
        }

        let fallback = self
            .host
            .find_live_context(owner)
            .filter(|endpoint| endpoint.is_alive() && !is_sender(endpoint));

        if fallback.is_none() {
            debug!(%owner, "No reachable context");
        }
        fallback
    }
}

// ============================================================================
// Tests
// ============================================================================
