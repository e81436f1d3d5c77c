//! Native helper descriptor lookup.
//!
//! A helper named `com.example.host` is described by `com.example.host.json`
//! in one of an ordered list of directories:
//!
//! ```json
//! {
//!   "name": "com.example.host",
//!   "description": "Example host",
//!   "path": "/opt/example/host",
//!   "type": "stdio",
//!   "allowed_origins": ["chrome-extension://abc/"]
//! }
//! ```
//!
//! The first structurally valid descriptor wins; malformed ones are skipped.
//! A relative `path` is resolved against the descriptor's directory.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::HelperFailure;

// ============================================================================
// Constants
// ============================================================================

/// Only supported descriptor type.
pub const STDIO_TYPE: &str = "stdio";

static HOST_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\w+(\.\w+)*$").unwrap_or_else(|e| unreachable!("host name pattern: {e}"))
});

// ============================================================================
// Types
// ============================================================================

/// Where descriptors are searched.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SearchLocation {
    /// Directory holding `<name>.json` files.
    Directory(PathBuf),
}

/// Parsed helper descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostDescriptor {
    /// Host name; must equal the requested application.
    pub name: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Executable path, absolute or relative to the descriptor.
    pub path: PathBuf,
    /// Transport type, always `stdio`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Origins permitted to launch the helper.
    pub allowed_origins: Vec<String>,
}

/// A descriptor that passed every check.
#[derive(Debug, Clone)]
pub struct ResolvedHost {
    /// Descriptor as found on disk.
    pub descriptor: HostDescriptor,
    /// Absolute executable path.
    pub executable: PathBuf,
    /// Descriptor file the host was read from.
    pub source: PathBuf,
}

// ============================================================================
// HostLookup
// ============================================================================

/// Ordered descriptor search.
#[derive(Debug, Clone)]
pub struct HostLookup {
    locations: Vec<SearchLocation>,
}

impl HostLookup {
    /// Searches `locations` in order.
    #[must_use]
    pub fn new(locations: Vec<SearchLocation>) -> Self {
        Self { locations }
    }

    /// Uses the per-user location, then the system-wide one.
    #[must_use]
    pub fn platform_default() -> Self {
        let mut locations = Vec::new();

        if let Some(config) = dirs::config_dir() {
            locations.push(SearchLocation::Directory(config.join(user_hosts_dir())));
        }
        if let Some(system) = system_hosts_dir() {
            locations.push(SearchLocation::Directory(system));
        }

        Self { locations }
    }

    /// Returns the search locations.
    #[inline]
    #[must_use]
    pub fn locations(&self) -> &[SearchLocation] {
        &self.locations
    }

    /// Returns `true` if `name` is a syntactically valid host name.
    #[must_use]
    pub fn is_valid_name(name: &str) -> bool {
        HOST_NAME.is_match(name)
    }

    /// Finds and checks the descriptor for `name` on behalf of `origin`.
    ///
    /// # Errors
    ///
    /// - [`HelperFailure::InvalidName`] for malformed names
    /// - [`HelperFailure::NotFound`] if no valid descriptor exists
    /// - [`HelperFailure::Disallowed`] if `origin` is not allowed
    /// - [`HelperFailure::MissingExecutable`] if `path` is not a regular file
    pub async fn resolve(&self, name: &str, origin: &str) -> Result<ResolvedHost, HelperFailure> {
        if !Self::is_valid_name(name) {
            return Err(HelperFailure::InvalidName);
        }

        let (descriptor, source) = self.find(name).await.ok_or(HelperFailure::NotFound)?;

        if !descriptor.allowed_origins.iter().any(|allowed| allowed == origin) {
            debug!(host = name, origin, "Origin not allowed by descriptor");
            return Err(HelperFailure::Disallowed);
        }

        let executable = match source.parent() {
            Some(dir) if descriptor.path.is_relative() => dir.join(&descriptor.path),
            _ => descriptor.path.clone(),
        };

        let is_file = tokio::fs::metadata(&executable)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            warn!(host = name, path = %executable.display(), "Native host executable missing");
            return Err(HelperFailure::MissingExecutable);
        }

        Ok(ResolvedHost {
            descriptor,
            executable,
            source,
        })
    }

    /// Returns the first structurally valid descriptor for `name`.
    async fn find(&self, name: &str) -> Option<(HostDescriptor, PathBuf)> {
        for location in &self.locations {
            let SearchLocation::Directory(dir) = location;
            let candidate = dir.join(format!("{name}.json"));
            if let Some(descriptor) = read_descriptor(&candidate, name).await {
                trace!(host = name, path = %candidate.display(), "Descriptor found");
                return Some((descriptor, candidate));
            }
        }
        debug!(host = name, "No descriptor found");
        None
    }
}

/// Reads a descriptor, returning `None` if absent or invalid.
async fn read_descriptor(path: &Path, name: &str) -> Option<HostDescriptor> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;

    let descriptor: HostDescriptor = match serde_json::from_str(&contents) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping malformed descriptor");
            return None;
        }
    };

    if descriptor.name != name || descriptor.kind != STDIO_TYPE {
        warn!(path = %path.display(), "Skipping descriptor with wrong name or type");
        return None;
    }
    Some(descriptor)
}

// ============================================================================
// Platform Paths
// ============================================================================

#[cfg(target_os = "macos")]
fn user_hosts_dir() -> &'static str {
    "Google/Chrome/NativeMessagingHosts"
}

#[cfg(not(target_os = "macos"))]
fn user_hosts_dir() -> &'static str {
    "google-chrome/NativeMessagingHosts"
}

#[cfg(target_os = "macos")]
fn system_hosts_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/Library/Google/Chrome/NativeMessagingHosts"))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn system_hosts_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/opt/chrome/native-messaging-hosts"))
}

#[cfg(not(unix))]
fn system_hosts_dir() -> Option<PathBuf> {
    None
}

// ============================================================================
// Tests
// ============================================================================
