use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

/// Correlates a call packet with its eventual response. Allocated by the
/// calling side from a per-channel monotonic counter and echoed verbatim by
/// the responder.
pub type CorrelationId = u64;

/// One unit on the wire.
///
/// The tagged representation is the protocol: `{"type": "event" | "call" |
/// "response", ...}`. A response carries either `result` or `error`, never
/// both; absent optional keys are omitted entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    /// Fire-and-forget named event.
    Event {
        /// Event name, as published on the peer's event bus.
        event: String,
        /// Event payload.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Invocation of a procedure registered on the peer.
    Call {
        /// Correlation id the response must echo.
        id: CorrelationId,
        /// Name of the registered function.
        name: String,
        /// Argument list passed to the handler.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Settlement of an earlier call, success or failure.
    Response {
        /// Correlation id of the call being settled.
        id: CorrelationId,
        /// Present on success. A handler that returns nothing meaningful
        /// serializes as an absent key, decoded as `Value::Null`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Present on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
}

impl Packet {
    pub(crate) fn response(id: CorrelationId, result: Value) -> Self {
        Packet::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub(crate) fn response_error(id: CorrelationId, error: RemoteError) -> Self {
        Packet::Response {
            id,
            result: None,
            error: Some(error),
        }
    }
}
