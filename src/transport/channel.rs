//! In-process transport backed by an unbounded mpsc channel.
//!
//! Used for contexts living in the same process and for tests. The
//! receiving side owns the context; dropping the receiver makes the
//! transport report itself dead.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::endpoint::Transport;

// ============================================================================
// Delivery
// ============================================================================

/// One message delivered to an in-process context.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel name.
    pub channel: String,
    /// JSON payload.
    pub payload: Value,
}

// ============================================================================
// ChannelTransport
// ============================================================================

/// Transport that pushes deliveries into an mpsc channel.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver for its deliveries.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, channel: &str, payload: Value) -> Result<()> {
        self.tx
            .send(Delivery {
                channel: channel.to_string(),
                payload,
            })
            .map_err(|_| Error::protocol("receiving context dropped"))
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================
