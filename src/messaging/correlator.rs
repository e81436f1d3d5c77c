//! Request/response correlation.
//!
//! Each request gets a fresh [`RequestId`] and a pending slot. The slot is
//! resolved by the first of:
//!
//! - a reply carrying the same ID (via [`Correlator::resolve`]),
//! - the request timeout (30s by default).
//!
//! A timeout resolves the caller with `None` ("no response"), the same
//! observable outcome as a recipient that never answers. Replies that arrive
//! after the timeout lost the race and are dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{CHANNEL_REQUEST, RequestEnvelope, SenderInfo};
use crate::transport::Endpoint;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to reply channels.
type PendingMap = FxHashMap<RequestId, oneshot::Sender<Value>>;

// ============================================================================
// Correlator
// ============================================================================

/// Matches outbound requests to their replies.
pub struct Correlator {
    pending: Mutex<PendingMap>,
    request_timeout: Duration,
    max_pending: usize,
    timed_out: AtomicU64,
}

impl Correlator {
    /// Creates a correlator.
    #[must_use]
    pub fn new(request_timeout: Duration, max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(PendingMap::default()),
            request_timeout,
            max_pending,
            timed_out: AtomicU64::new(0),
        }
    }

    /// Sends `payload` to `endpoint` and waits for the correlated reply.
    ///
    /// Returns `Ok(None)` when nobody answers in time or the endpoint
    /// cannot be reached.
    ///
    /// # Errors
    ///
    /// - [`Error::TooManyPendingRequests`] if the pending cap is reached
    /// - [`Error::Json`] if the envelope cannot be serialized
    pub async fn request(
        &self,
        endpoint: &Endpoint,
        payload: Value,
        sender: SenderInfo,
    ) -> Result<Option<Value>> {
        let id = RequestId::generate();
        let envelope = serde_json::to_value(RequestEnvelope {
            id,
            payload,
            sender,
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();

        // Register before sending so an immediate reply finds its slot
        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.max_pending {
                warn!(
                    pending = pending.len(),
                    max = self.max_pending,
                    "Too many pending requests"
                );
                return Err(Error::TooManyPendingRequests {
                    pending: pending.len(),
                    max: self.max_pending,
                });
            }
            pending.insert(id, reply_tx);
        }

        if let Err(e) = endpoint.send(CHANNEL_REQUEST, envelope) {
            self.pending.lock().remove(&id);
            debug!(request_id = %id, error = %e, "Request undeliverable");
            return Ok(None);
        }

        trace!(request_id = %id, endpoint = %endpoint.id(), "Request sent");

        match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => {
                debug!(request_id = %id, "Request abandoned");
                Ok(None)
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_id = %id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Request timed out"
                );
                Ok(None)
            }
        }
    }

    /// Resolves a pending request.
    ///
    /// Returns `false` for unknown or already-resolved IDs.
    pub fn resolve(&self, id: RequestId, reply: Value) -> bool {
        let slot = self.pending.lock().remove(&id);
        match slot {
            Some(tx) => {
                let _ = tx.send(reply);
                trace!(request_id = %id, "Request resolved");
                true
            }
            None => {
                trace!(request_id = %id, "Reply for unknown request dropped");
                false
            }
        }
    }

    /// Resolves every pending request with no response.
    pub fn fail_all(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        let count = pending.len();
        drop(pending);

        if count > 0 {
            debug!(count, "Abandoned pending requests");
        }
    }

    /// Returns the number of requests awaiting replies.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns how many requests have timed out so far.
    #[inline]
    #[must_use]
    pub fn timed_out_count(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================
