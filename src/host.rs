//! Host collaborator interface.
//!
//! The router makes no policy decisions of its own. Owner registration,
//! permission grants, and worker startup all belong to the embedding
//! application, which implements [`Host`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::OwnerId;
use crate::transport::Endpoint;

// ============================================================================
// Host
// ============================================================================

/// Callbacks the router makes into its embedding application.
#[async_trait]
pub trait Host: Send + Sync {
    /// Returns `true` if `owner` is a loaded extension.
    fn is_known_owner(&self, owner: &OwnerId) -> bool;

    /// Returns `true` if `owner` declares `permission`.
    fn has_permission(&self, owner: &OwnerId, permission: &str) -> bool;

    /// Starts (or resumes) the background worker registered for `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if no worker is registered or it fails to start.
    async fn start_worker(&self, scope: &str) -> Result<Endpoint>;

    /// Returns an already-live context belonging to `owner`, if any.
    fn find_live_context(&self, owner: &OwnerId) -> Option<Endpoint>;
}
