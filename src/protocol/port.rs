//! Port notification payloads.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::PortId;

use super::request::SenderInfo;

// ============================================================================
// PortConnect
// ============================================================================

/// Sent on `port.connect` to the responder of a new port.
///
/// # Format
///
/// ```json
/// { "portId": "uuid", "name": "chan", "sender": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConnect {
    /// Port the receiver should attach to.
    pub port_id: PortId,
    /// Name given by the initiator.
    pub name: String,
    /// Initiating context.
    pub sender: SenderInfo,
}

// ============================================================================
// PortMessage
// ============================================================================

/// Sent on `port.message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMessage {
    /// Port the message travels on.
    pub port_id: PortId,
    /// Message payload.
    pub message: Value,
}

// ============================================================================
// PortDisconnect
// ============================================================================

/// Sent on `port.disconnect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDisconnect {
    /// Port that closed.
    pub port_id: PortId,
    /// Error text when the port closed abnormally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
