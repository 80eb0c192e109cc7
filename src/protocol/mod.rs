//! Wire message types.
//!
//! This module defines the messages exchanged on both sides of the bridge.
//!
//! # Protocol Overview
//!
//! | Message Type | Channel | Direction | Purpose |
//! |--------------|---------|-----------|---------|
//! | `ClientRequest` | client | Client → Host | Tool request |
//! | `ClientResponse` | client | Host → Client | Tool outcome |
//! | `Envelope::Call` | browser | Host → Browser | Framed tool call |
//! | `Envelope::Result` | browser | Browser → Host | Framed tool result |
//! | `Envelope::Error` | browser | Browser → Host | Framed dispatch failure |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Newline-delimited client records |
//! | `content` | Tool result content blocks |
//! | `envelope` | Framed host↔browser envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Client-facing request and response records.
pub mod client;

/// Tool result content blocks.
pub mod content;

/// Host↔browser envelope.
pub mod envelope;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{ClientError, ClientRequest, ClientResponse};
pub use content::{ContentBlock, ToolResult};
pub use envelope::Envelope;
