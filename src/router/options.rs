//! Router configuration options.
//!
//! Provides a type-safe interface for the router's timeouts, limits, and
//! naming scheme.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use extension_router::RouterOptions;
//!
//! let options = RouterOptions::new()
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_scheme("moz-extension");
//!
//! assert_eq!(options.scope_for(&"abc".into()), "moz-extension://abc/");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{OwnerId, SessionId};
use crate::native::SearchLocation;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for correlated requests (30s).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending correlated requests before rejecting new ones.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// Interval of the stale-port sweep (60s).
pub const DEFAULT_PORT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default URL scheme for extension scopes and origins.
pub const DEFAULT_SCHEME: &str = "chrome-extension";

// ============================================================================
// RouterOptions
// ============================================================================

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
    /// Isolation domain the router itself belongs to.
    pub session: SessionId,

    /// How long a correlated request waits before resolving with no response.
    pub request_timeout: Duration,

    /// Cap on concurrently pending correlated requests.
    pub max_pending_requests: usize,

    /// Interval of the stale-port sweep.
    pub port_sweep_interval: Duration,

    /// Scheme used to build worker scopes and helper origins.
    pub scheme: String,

    /// Native helper descriptor search locations, in priority order.
    ///
    /// `None` uses the platform defaults.
    pub native_search_locations: Option<Vec<SearchLocation>>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RouterOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: SessionId::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            port_sweep_interval: DEFAULT_PORT_SWEEP_INTERVAL,
            scheme: DEFAULT_SCHEME.to_string(),
            native_search_locations: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RouterOptions {
    /// Sets the router's own session.
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// Sets the correlated request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the pending request cap.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Sets the stale-port sweep interval.
    #[inline]
    #[must_use]
    pub fn with_port_sweep_interval(mut self, interval: Duration) -> Self {
        self.port_sweep_interval = interval;
        self
    }

    /// Sets the extension URL scheme.
    #[inline]
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Searches the given directories for native helper descriptors.
    #[inline]
    #[must_use]
    pub fn with_native_search_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.native_search_locations = Some(paths.into_iter().map(SearchLocation::Directory).collect());
        self
    }

    /// Sets the native helper search locations.
    #[inline]
    #[must_use]
    pub fn with_native_search_locations(mut self, locations: Vec<SearchLocation>) -> Self {
        self.native_search_locations = Some(locations);
        self
    }
}

// ============================================================================
// Scopes
// ============================================================================

impl RouterOptions {
    /// Returns the prefix shared by every extension scope.
    #[inline]
    #[must_use]
    pub fn scope_prefix(&self) -> String {
        format!("{}://", self.scheme)
    }

    /// Returns the worker scope (and helper origin) for `owner`.
    #[inline]
    #[must_use]
    pub fn scope_for(&self, owner: &OwnerId) -> String {
        format!("{}://{}/", self.scheme, owner)
    }

    /// Extracts the owner from a worker scope.
    ///
    /// Returns `None` for scopes outside this router's scheme.
    #[must_use]
    pub fn owner_of_scope(&self, scope: &str) -> Option<OwnerId> {
        let url = Url::parse(scope).ok()?;
        if url.scheme() != self.scheme {
            return None;
        }
        url.host_str()
            .filter(|host| !host.is_empty())
            .map(OwnerId::new)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl RouterOptions {
    /// Checks the options for values the router cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero timeout, zero pending cap, zero
    /// sweep interval, or a scheme that does not form valid scope URLs.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::config("request timeout must be non-zero"));
        }
        if self.max_pending_requests == 0 {
            return Err(Error::config("max pending requests must be non-zero"));
        }
        if self.port_sweep_interval.is_zero() {
            return Err(Error::config("port sweep interval must be non-zero"));
        }

        let sample = self.scope_for(&OwnerId::new("sample"));
        if self.owner_of_scope(&sample).is_none() {
            return Err(Error::config(format!("invalid scheme: {}", self.scheme)));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RouterOptions::new();
        assert_eq!(options.request_timeout.as_secs(), 30);
        assert_eq!(options.max_pending_requests, 100);
        assert_eq!(options.port_sweep_interval.as_secs(), 60);
        assert_eq!(options.scheme, "chrome-extension");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_scope_round_trip() {
        let options = RouterOptions::new();
        let owner = OwnerId::new("abcdefghijklmnop");
        let scope = options.scope_for(&owner);
        assert_eq!(scope, "chrome-extension://abcdefghijklmnop/");
        assert_eq!(options.owner_of_scope(&scope), Some(owner));
    }

    #[test]
    fn test_foreign_scope_is_ignored() {
        let options = RouterOptions::new();
        assert!(options.owner_of_scope("https://example.com/").is_none());
        assert!(options.owner_of_scope("not a url").is_none());
    }

    #[test]
    fn test_custom_scheme() {
        let options = RouterOptions::new().with_scheme("moz-extension");
        assert_eq!(options.scope_prefix(), "moz-extension://");
        assert!(options.owner_of_scope("chrome-extension://abc/").is_none());
        assert_eq!(
            options.owner_of_scope("moz-extension://abc/"),
            Some(OwnerId::new("abc"))
        );
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let options = RouterOptions::new().with_request_timeout(Duration::ZERO);
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let options = RouterOptions::new().with_scheme("not a scheme");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_native_search_paths() {
        let options = RouterOptions::new().with_native_search_paths([PathBuf::from("/tmp/hosts")]);
        assert_eq!(
            options.native_search_locations,
            Some(vec![SearchLocation::Directory(PathBuf::from("/tmp/hosts"))])
        );
    }
}
