//! Shared handle onto the browser connection.
//!
//! The [`Link`] exposes the current [`ConnectionState`] and an outbound frame
//! slot. The connection supervisor is the only writer of both; the call
//! router reads the state and pushes frames through it.
//!
//! # State Machine
//!
//! ```text
//!                ┌────────────┐
//!        ┌──────►│Disconnected│◄────────────┐
//!        │       └─────┬──────┘             │
//!        │ connect     │                    │ stream error / EOF
//!        │ failed      ▼                    │
//!        │       ┌────────────┐       ┌─────┴─────┐
//!        └───────┤ Connecting ├──────►│ Connected │
//!                └────────────┘       └─────┬─────┘
//!                                           │ shutdown
//!                      ┌─────────┐          │
//!                      │ Closing │◄─────────┘
//!                      └────┬────┘
//!                           └──────► Disconnected
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::Envelope;

use super::framing::FrameCodec;

// ============================================================================
// Types
// ============================================================================

/// Sender half feeding the connection's writer task.
pub(crate) type FrameSender = mpsc::UnboundedSender<Vec<u8>>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the browser connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No stream.
    Disconnected,
    /// Connect attempt in progress.
    Connecting,
    /// Stream established, calls flow.
    Connected,
    /// Graceful shutdown in progress.
    Closing,
}

impl ConnectionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closing, Connected, Connecting, Disconnected};

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected | Disconnected)
                | (Connected, Closing | Disconnected)
                | (Closing, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Link
// ============================================================================

/// Cloneable handle onto the browser connection.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    /// Current state; receivers observe transitions.
    state: watch::Sender<ConnectionState>,
    /// Writer task input while connected.
    outbound: Mutex<Option<FrameSender>>,
    /// Outbound frame encoder.
    codec: FrameCodec,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("state", &self.state())
            .field("codec", &self.inner.codec)
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Creates a disconnected link.
    #[must_use]
    pub fn new(codec: FrameCodec) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(LinkInner {
                state,
                outbound: Mutex::new(None),
                codec,
            }),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns `true` if calls can be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribes to state transitions.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Returns the outbound frame codec.
    #[inline]
    #[must_use]
    pub fn codec(&self) -> FrameCodec {
        self.inner.codec
    }

    /// Encodes and queues an envelope.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadTooLarge`] before anything is queued
    /// - [`Error::ConnectionLost`] if no stream is attached
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = self.inner.codec.encode_envelope(envelope)?;
        self.send_frame(frame)
    }

    /// Queues an already encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if no stream is attached or the
    /// writer task has stopped.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        let outbound = self.inner.outbound.lock();
        let sender = outbound.as_ref().ok_or(Error::ConnectionLost)?;
        sender.send(frame).map_err(|_| Error::ConnectionLost)
    }
}

// ============================================================================
// Link - Supervisor API
// ============================================================================

impl Link {
    /// Moves to `next` if the transition is legal.
    ///
    /// Returns `false` (and leaves the state alone) otherwise.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut from = next;
        let changed = self.inner.state.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(%from, to = %next, "Connection state changed");
        } else if from != next {
            warn!(%from, to = %next, "Rejected connection state transition");
        }

        changed
    }

    /// Installs the writer task input.
    pub(crate) fn attach(&self, sender: FrameSender) {
        *self.inner.outbound.lock() = Some(sender);
    }

    /// Drops the writer task input, letting it drain and stop.
    pub(crate) fn detach(&self) {
        self.inner.outbound.lock().take();
    }
}

// ============================================================================
// Tests
// ============================================================================
