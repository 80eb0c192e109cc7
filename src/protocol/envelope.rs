//! Host↔browser envelope.
//!
//! Every frame on the browser channel carries exactly one [`Envelope`],
//! serialized as JSON and discriminated by `type`.
//!
//! | Type | Direction | Fields |
//! |------|-----------|--------|
//! | `call` | Host → Browser | `id`, `name`, `args` |
//! | `result` | Browser → Host | `id`, `payload` |
//! | `error` | Browser → Host | `id`, `payload` (with `isError: true`) |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::CallId;

use super::ToolResult;

// ============================================================================
// Envelope
// ============================================================================

/// A framed message on the browser channel.
///
/// # Format
///
/// ```json
/// { "id": 7, "type": "call", "name": "navigate", "args": { "url": "https://example.com" } }
/// { "id": 7, "type": "result", "payload": { "content": [...], "isError": false } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Tool invocation.
    Call {
        /// Correlation ID.
        id: CallId,
        /// Registered tool name.
        name: String,
        /// Tool arguments.
        #[serde(default)]
        args: Value,
    },

    /// Successful tool outcome.
    Result {
        /// Correlation ID of the originating call.
        id: CallId,
        /// Tool output.
        payload: ToolResult,
    },

    /// Failed dispatch or handler.
    Error {
        /// Correlation ID of the originating call.
        id: CallId,
        /// Error output.
        payload: ToolResult,
    },
}

impl Envelope {
    /// Creates a call envelope.
    #[inline]
    #[must_use]
    pub fn call(id: CallId, name: impl Into<String>, args: Value) -> Self {
        Self::Call {
            id,
            name: name.into(),
            args,
        }
    }

    /// Creates a result envelope.
    #[inline]
    #[must_use]
    pub fn result(id: CallId, payload: ToolResult) -> Self {
        Self::Result { id, payload }
    }

    /// Creates an error envelope with a single message block.
    #[inline]
    #[must_use]
    pub fn error(id: CallId, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            payload: ToolResult::error(message),
        }
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CallId {
        match self {
            Self::Call { id, .. } | Self::Result { id, .. } | Self::Error { id, .. } => *id,
        }
    }

    /// Returns the wire `type` tag.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
        }
    }

    /// Serializes to the JSON payload of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the payload is not an envelope.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
