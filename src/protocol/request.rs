//! Correlated request and reply envelopes.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{EndpointId, OwnerId, RequestId};
use crate::transport::{Endpoint, EndpointKind};

// ============================================================================
// SenderInfo
// ============================================================================

/// Describes the context that originated a request or port.
///
/// # Format
///
/// ```json
/// { "id": "abc", "endpointId": 4, "kind": "frame" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    /// Owning extension, if any.
    #[serde(rename = "id", skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerId>,

    /// Sending endpoint.
    pub endpoint_id: EndpointId,

    /// Sending context kind.
    pub kind: EndpointKind,
}

impl SenderInfo {
    /// Describes an endpoint.
    #[must_use]
    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            owner: endpoint.owner().cloned(),
            endpoint_id: endpoint.id(),
            kind: endpoint.kind(),
        }
    }
}

// ============================================================================
// RequestEnvelope
// ============================================================================

/// Correlated request delivered on `runtime.request`.
///
/// # Format
///
/// ```json
/// { "id": "uuid", "payload": { ... }, "sender": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation ID to echo back in the reply.
    pub id: RequestId,

    /// Request payload.
    pub payload: Value,

    /// Who sent it.
    pub sender: SenderInfo,
}

// ============================================================================
// ReplyEnvelope
// ============================================================================

/// Reply routed back through the `runtime.reply` handler.
///
/// # Format
///
/// ```json
/// { "id": "uuid", "result": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Reply value.
    #[serde(default)]
    pub result: Value,
}

// ============================================================================
// Tests
// ============================================================================
