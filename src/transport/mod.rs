//! Transport layer.
//!
//! This module carries traffic on both sides of the host process: the
//! newline-delimited client stream and the framed browser stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  NDJSON   ┌───────────────────────────┐  framed   ┌──────────────┐
//! │   Client     │◄─────────►│ ClientTransport           │           │   Browser    │
//! │ (automation) │  stdio    │   → CallRouter            │           │ (Dispatcher) │
//! └──────────────┘           │   → Link ─► writer task ──┼──────────►│              │
//!                            │ ConnectionSupervisor      │◄──────────┤              │
//!                            │   reader task → router    │  len+JSON └──────────────┘
//!                            └───────────────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionSupervisor::run` - connect through a [`Connector`]
//! 2. Stream split into reader loop and writer task, [`Link`] attached
//! 3. `Connected` - calls flow, results are routed by ID
//! 4. Stream lost - pending calls rejected, backoff, reconnect
//! 5. `ConnectionSupervisor::shutdown` - `Closing`, flush, `Disconnected`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Newline-delimited client transport |
//! | `framing` | Length-prefixed frame codec and reassembly |
//! | `link` | Connection state and outbound frame slot |
//! | `supervisor` | Connect, serve, reconnect |

// ============================================================================
// Submodules
// ============================================================================

/// Newline-delimited client transport.
pub mod client;

/// Length-prefixed framing.
pub mod framing;

/// Shared connection handle.
pub mod link;

/// Browser connection supervisor.
pub mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{ClientEnd, ClientTransport, LIST_TOOLS_METHOD};
pub use framing::{FrameBuffer, FrameCodec};
pub use link::{ConnectionState, Link};
#[cfg(unix)]
pub use supervisor::UnixConnector;
pub use supervisor::{BoxedStream, BrowserStream, ConnectionSupervisor, Connector, TcpConnector};
