//! Error types for the browser bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use browser_bridge::{Result, CallRouter};
//!
//! async fn example(router: &CallRouter) -> Result<()> {
//!     let result = router.invoke("navigate", args, None).await?;
//!     println!("{}", result.text());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::ConnectionLost`], [`Error::ReconnectExhausted`] |
//! | Protocol | [`Error::Protocol`], [`Error::PayloadTooLarge`], [`Error::BufferOverflow`] |
//! | Dispatch | [`Error::UnknownTool`], [`Error::InvalidArguments`], [`Error::Dispatch`] |
//! | Execution | [`Error::Timeout`], [`Error::TooManyPendingCalls`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::CallId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The browser connection is not established or was lost mid-call.
    #[error("Connection lost")]
    ConnectionLost,

    /// The supervisor gave up reconnecting.
    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of failed connection attempts.
        attempts: u32,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed frame or record.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Outbound payload exceeds the configured frame limit.
    ///
    /// Raised before any byte is written to the stream.
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Encoded payload size.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Inbound reassembly buffer exceeded its cap.
    ///
    /// The byte stream can no longer be trusted; the connection is torn down.
    #[error("Reassembly buffer holds {buffered} bytes, cap is {limit} bytes")]
    BufferOverflow {
        /// Bytes currently buffered.
        buffered: usize,
        /// Configured cap.
        limit: usize,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// No tool registered under this name.
    #[error("Unknown tool: {name}")]
    UnknownTool {
        /// The unrecognized tool name.
        name: String,
    },

    /// Tool arguments do not match the declared shape.
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// Description of the mismatch.
        message: String,
    },

    /// The remote handler failed or returned an error result.
    #[error("Dispatch error: {message}")]
    Dispatch {
        /// Error message reported by the dispatcher.
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// No result arrived before the call deadline.
    #[error("Call {call_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The call that timed out.
        call_id: CallId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many calls are already awaiting results.
    #[error("Too many pending calls (limit {limit})")]
    TooManyPendingCalls {
        /// Configured maximum.
        limit: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unknown tool error.
    #[inline]
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool { name: name.into() }
    }

    /// Creates an invalid arguments error.
    #[inline]
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Creates a dispatch error.
    #[inline]
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// Creates a call timeout error.
    #[inline]
    pub fn timeout(call_id: CallId, timeout_ms: u64) -> Self {
        Self::Timeout {
            call_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionLost | Self::ReconnectExhausted { .. } => true,
            Self::Io(err) => is_disconnect(err),
            _ => false,
        }
    }

    /// Returns `true` if this is a dispatch error.
    #[inline]
    #[must_use]
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool { .. } | Self::InvalidArguments { .. } | Self::Dispatch { .. }
        )
    }

    /// Returns `true` if the framed stream can no longer be trusted.
    ///
    /// A binary length prefix cannot be resynchronized, so these errors
    /// close the connection instead of skipping input.
    #[inline]
    #[must_use]
    pub fn tears_down_connection(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::BufferOverflow { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::Timeout { .. } | Self::TooManyPendingCalls { .. }
        )
    }

    /// Stable snake_case code reported to the client.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::ConnectionLost | Self::ReconnectExhausted { .. } => "connection_lost",
            Self::Protocol { .. } | Self::BufferOverflow { .. } => "protocol",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Dispatch { .. } => "dispatch",
            Self::Timeout { .. } => "timeout",
            Self::TooManyPendingCalls { .. } => "too_many_pending_calls",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

// ============================================================================
// IO Classification
// ============================================================================

/// Returns `true` if an IO error means the peer went away.
///
/// Broken pipes and resets are ordinary disconnects, not process faults.
#[must_use]
pub fn is_disconnect(err: &IoError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("bad frame");
        assert_eq!(err.to_string(), "Protocol error: bad frame");
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout(CallId::new(7), 1500);
        assert_eq!(err.to_string(), "Call 7 timed out after 1500ms");
        assert!(err.is_timeout());
        assert_eq!(err.code(), "timeout");
    }

    #[test]
    fn test_is_connection_error() {
        let lost = Error::ConnectionLost;
        let pipe: Error = IoError::new(ErrorKind::BrokenPipe, "pipe").into();
        let denied: Error = IoError::new(ErrorKind::PermissionDenied, "nope").into();

        assert!(lost.is_connection_error());
        assert!(pipe.is_connection_error());
        assert!(!denied.is_connection_error());
        assert!(!Error::config("x").is_connection_error());
    }

    #[test]
    fn test_is_dispatch_error() {
        assert!(Error::unknown_tool("nope").is_dispatch_error());
        assert!(Error::invalid_arguments("navigate", "url missing").is_dispatch_error());
        assert!(Error::dispatch("handler failed").is_dispatch_error());
        assert!(!Error::ConnectionLost.is_dispatch_error());
    }

    #[test]
    fn test_tears_down_connection() {
        let overflow = Error::BufferOverflow {
            buffered: 10,
            limit: 5,
        };
        let too_large = Error::PayloadTooLarge { size: 10, limit: 5 };

        assert!(overflow.tears_down_connection());
        assert!(Error::protocol("misaligned").tears_down_connection());
        assert!(!too_large.tears_down_connection());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::ConnectionLost.is_recoverable());
        assert!(Error::timeout(CallId::new(1), 10).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_is_disconnect() {
        assert!(is_disconnect(&IoError::new(ErrorKind::BrokenPipe, "x")));
        assert!(is_disconnect(&IoError::new(ErrorKind::UnexpectedEof, "x")));
        assert!(!is_disconnect(&IoError::new(ErrorKind::InvalidData, "x")));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.code(), "json");
    }
}
