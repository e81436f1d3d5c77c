//! Builder pattern for router configuration.
//!
//! Provides a fluent API for configuring and creating [`Router`] instances.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use extension_router::Router;
//!
//! let router = Router::builder()
//!     .host(host)
//!     .request_timeout(Duration::from_secs(10))
//!     .native_search_path("/etc/opt/chrome/native-messaging-hosts")
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::identifiers::SessionId;
use crate::native::SearchLocation;

use super::core::Router;
use super::options::RouterOptions;

// ============================================================================
// RouterBuilder
// ============================================================================

/// Builder for configuring a [`Router`] instance.
///
/// Use [`Router::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct RouterBuilder {
    /// Embedding application.
    host: Option<Arc<dyn Host>>,
    /// Router options.
    options: RouterOptions,
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("host", &self.host.is_some())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// RouterBuilder Implementation
// ============================================================================

impl RouterBuilder {
    /// Creates a new router builder with default options and no host.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the embedding application.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: RouterOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the router's own session.
    #[inline]
    #[must_use]
    pub fn session(mut self, session: SessionId) -> Self {
        self.options = self.options.with_session(session);
        self
    }

    /// Sets the correlated request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_request_timeout(timeout);
        self
    }

    /// Sets the pending request cap.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.options = self.options.with_max_pending_requests(max);
        self
    }

    /// Sets the stale-port sweep interval.
    #[inline]
    #[must_use]
    pub fn port_sweep_interval(mut self, interval: Duration) -> Self {
        self.options = self.options.with_port_sweep_interval(interval);
        self
    }

    /// Sets the extension URL scheme.
    #[inline]
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.options = self.options.with_scheme(scheme);
        self
    }

    /// Appends a directory to the native helper search path.
    ///
    /// The first call replaces the platform defaults.
    #[inline]
    #[must_use]
    pub fn native_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options
            .native_search_locations
            .get_or_insert_with(Vec::new)
            .push(SearchLocation::Directory(path.into()));
        self
    }

    /// Builds the router with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no host is set
    /// - [`Error::Config`] if the options are invalid
    pub fn build(self) -> Result<Router> {
        let host = self.host.ok_or_else(|| {
            Error::config(
                "A host is required. Use .host() to set it.\n\
                 Example: Router::builder().host(Arc::new(MyHost))",
            )
        })?;

        Router::new(host, self.options)
    }
}

// ============================================================================
// Tests
// ============================================================================
