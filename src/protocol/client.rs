//! Client-facing request and response records.
//!
//! Records are newline-delimited JSON exchanged with the external
//! automation client.
//!
//! # Format
//!
//! Request:
//! ```json
//! { "id": "1", "method": "navigate", "params": { "url": "https://example.com" } }
//! ```
//!
//! Success:
//! ```json
//! { "id": "1", "result": { "content": [...], "isError": false } }
//! ```
//!
//! Error:
//! ```json
//! { "id": "2", "error": { "isError": true, "code": "unknown_tool", "message": "..." } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

// ============================================================================
// ClientRequest
// ============================================================================

/// A tool request from the external client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Client-chosen ID, echoed back verbatim (string or number).
    pub id: Value,

    /// Tool name.
    pub method: String,

    /// Tool arguments.
    #[serde(default)]
    pub params: Value,

    /// Overrides the default call timeout.
    #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ClientRequest {
    /// Creates a request.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
            timeout_ms: None,
        }
    }

    /// Returns the requested timeout, if any.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// ClientResponse
// ============================================================================

/// A response to the external client.
///
/// Exactly one of `result` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    /// Matches the request `id`.
    pub id: Value,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error data (if failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClientError>,
}

impl ClientResponse {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: Value, error: ClientError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// ClientError
// ============================================================================

/// Error body of a [`ClientResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientError {
    /// Always `true`.
    #[serde(rename = "isError")]
    pub is_error: bool,

    /// Stable error code, see [`Error::code`].
    pub code: String,

    /// Human-readable message.
    pub message: String,
}

impl ClientError {
    /// Creates an error body.
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&Error> for ClientError {
    fn from(err: &Error) -> Self {
        let message = match err {
            Error::Dispatch { message } => message.clone(),
            other => other.to_string(),
        };
        Self::new(err.code(), message)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::identifiers::CallId;

    #[test]
    fn test_parse_request() {
        let request: ClientRequest = serde_json::from_str(
            r#"{"id":"1","method":"navigate","params":{"url":"https://example.com"}}"#,
        )
        .expect("parse");

        assert_eq!(request.id, json!("1"));
        assert_eq!(request.method, "navigate");
        assert_eq!(request.params["url"], json!("https://example.com"));
        assert!(request.timeout().is_none());
    }

    #[test]
    fn test_request_numeric_id_and_timeout() {
        let request: ClientRequest =
            serde_json::from_str(r#"{"id":5,"method":"history","timeoutMs":250}"#).expect("parse");

        assert_eq!(request.id, json!(5));
        assert_eq!(request.params, Value::Null);
        assert_eq!(request.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_error_response_format() {
        let err = Error::unknown_tool("nonexistent_tool");
        let response = ClientResponse::failure(json!("2"), ClientError::from(&err));
        let value = serde_json::to_value(&response).expect("serialize");

        assert_eq!(value["id"], json!("2"));
        assert_eq!(value["error"]["isError"], json!(true));
        assert_eq!(value["error"]["code"], json!("unknown_tool"));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_timeout_maps_to_client_error() {
        let err = Error::timeout(CallId::new(4), 100);
        let body = ClientError::from(&err);
        assert_eq!(body.code, "timeout");
        assert!(body.is_error);
    }

    #[test]
    fn test_dispatch_message_passed_through() {
        let body = ClientError::from(&Error::dispatch("element not found"));
        assert_eq!(body.code, "dispatch");
        assert_eq!(body.message, "element not found");
    }
}
