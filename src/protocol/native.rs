//! Native helper notification payloads.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::ConnectionId;

// ============================================================================
// NativeMessage
// ============================================================================

/// Sent on `native.message` to the context that owns the connection.
///
/// # Format
///
/// ```json
/// { "connectionId": 3, "message": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeMessage {
    /// Connection the message arrived on.
    pub connection_id: ConnectionId,
    /// Decoded JSON frame.
    pub message: Value,
}

// ============================================================================
// NativeDisconnect
// ============================================================================

/// Sent once on `native.disconnect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeDisconnect {
    /// Connection that closed.
    pub connection_id: ConnectionId,
    /// Reason when the connection failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
