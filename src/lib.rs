//! Browser Bridge - Cross-process tool-call router.
//!
//! This library lets an external automation client call browser "tools"
//! (navigate, screenshot, DOM interaction, network capture, bookmarks,
//! history, semantic tab search) in a browser it does not control directly.
//!
//! # Architecture
//!
//! The bridge sits between two independent transports:
//!
//! - **Client side**: newline-delimited JSON over a local duplex stream
//! - **Browser side**: length-prefixed JSON envelopes over a second stream
//!
//! ```text
//! Client ──NDJSON──► ClientTransport ─► CallRouter ─► Link ──frames──► Dispatcher ─► HandlerRegistry
//!    ▲                                     ▲                                  │
//!    └─────────────── response ────────────┴──── result/error envelope ◄──────┘
//! ```
//!
//! Key design principles:
//!
//! - Each [`CallRouter`] owns its correlation table; no global state
//! - Every pending call resolves exactly once: result, timeout, dispatch
//!   error or connection loss
//! - Calls are never queued while the browser is disconnected
//! - Handler failures, panics included, become error results
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use browser_bridge::{BridgeConfig, BridgeHost, Result, TcpConnector, ToolCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let host = BridgeHost::new(
//!         BridgeConfig::new(),
//!         ToolCatalog::builtin(),
//!         Arc::new(TcpConnector::new("127.0.0.1:12306")),
//!     )?;
//!
//!     let exit = host
//!         .run(tokio::io::stdin(), tokio::io::stdout(), async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     println!("host exited: {exit:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Bridge configuration and reconnect policy |
//! | [`dispatcher`] | Browser-side call execution |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | Host process wiring |
//! | [`identifiers`] | Call and session IDs |
//! | [`protocol`] | Client records and framed envelopes |
//! | [`registry`] | Tool catalog and handlers |
//! | [`router`] | Call correlation |
//! | [`transport`] | Client transport, framing, connection supervision |

// ============================================================================
// Modules
// ============================================================================

/// Bridge configuration.
pub mod config;

/// Browser-side dispatcher.
///
/// Resolves handlers, validates arguments and contains handler failures.
pub mod dispatcher;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Host process wiring.
pub mod host;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire message types.
pub mod protocol;

/// Tool catalog and handler registry.
pub mod registry;

/// Call correlation engine.
pub mod router;

/// Transport layer.
///
/// Client-facing transport, browser framing and connection supervision.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{BridgeConfig, ReconnectPolicy};

// Core types
pub use dispatcher::Dispatcher;
pub use host::{BridgeHost, HostExit};
pub use router::CallRouter;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallId, SessionId};

// Protocol types
pub use protocol::{ClientError, ClientRequest, ClientResponse, ContentBlock, Envelope, ToolResult};

// Registry types
pub use registry::{
    ArgumentShape, ExecutionContext, FieldKind, HandlerRegistry, ToolCatalog, ToolDescriptor,
    ToolHandler, handler_fn,
};

// Transport types
pub use transport::{ConnectionState, ConnectionSupervisor, Connector, TcpConnector};
#[cfg(unix)]
pub use transport::UnixConnector;
