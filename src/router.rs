//! Call router and correlation table.
//!
//! The [`CallRouter`] turns a tool invocation into a framed `call` envelope,
//! parks the caller on a oneshot channel keyed by [`CallId`], and resolves
//! it when the matching `result`/`error` envelope arrives.
//!
//! # Lifecycle of one call
//!
//! ```text
//! Created ──► Sent ──► AwaitingResult ──┬──► Resolved
//!                                       ├──► Rejected(Timeout)
//!                                       ├──► Rejected(ConnectionLost)
//!                                       └──► Rejected(Dispatch)
//! ```
//!
//! Every entry leaves the table exactly once. Whoever removes it under the
//! table lock (result arrival, timeout, bulk rejection, or the caller
//! dropping its future) owns the terminal transition.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::identifiers::{CallId, CallIdGenerator};
use crate::protocol::{Envelope, ToolResult};
use crate::transport::Link;

// ============================================================================
// Types
// ============================================================================

/// Map of call IDs to parked callers.
type CorrelationMap = FxHashMap<CallId, PendingCall>;

// ============================================================================
// ToolCall
// ============================================================================

/// A call accepted by the router.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Correlation ID.
    pub id: CallId,
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    pub args: Value,
    /// When the call was accepted.
    pub issued_at: Instant,
    /// Deadline relative to `issued_at`.
    pub timeout: Duration,
}

impl ToolCall {
    /// Builds the outbound envelope.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope::call(self.id, self.name.clone(), self.args.clone())
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// A parked caller awaiting its result.
struct PendingCall {
    /// Tool name, for logs.
    name: String,
    /// When the call was accepted.
    issued_at: Instant,
    /// Resolves the caller.
    response_tx: oneshot::Sender<Result<ToolResult>>,
}

/// Correlation table plus its admission flag.
///
/// `open` flips under the same lock as the entries, so a call is either
/// admitted before a bulk rejection (and rejected by it) or refused.
#[derive(Default)]
struct CorrelationTable {
    entries: CorrelationMap,
    open: bool,
}

// ============================================================================
// CallRouter
// ============================================================================

/// Correlates outbound tool calls with inbound results.
///
/// # Thread Safety
///
/// `CallRouter` is `Send + Sync`; share it behind an `Arc`. The correlation
/// table is guarded by a mutex that is never held across an await.
pub struct CallRouter {
    /// Correlation ID source.
    ids: CallIdGenerator,
    /// Pending calls.
    table: Mutex<CorrelationTable>,
    /// Browser connection handle.
    link: Link,
    /// Timeout when the caller gives none.
    default_timeout: Duration,
    /// Pending-call bound.
    max_pending: usize,
}

impl fmt::Debug for CallRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRouter")
            .field("pending", &self.pending_count())
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CallRouter - Constructor
// ============================================================================

impl CallRouter {
    /// Creates a router sending through `link`.
    #[must_use]
    pub fn new(link: Link, config: &BridgeConfig) -> Self {
        Self {
            ids: CallIdGenerator::new(),
            table: Mutex::new(CorrelationTable::default()),
            link,
            default_timeout: config.call_timeout,
            max_pending: config.max_pending_calls,
        }
    }

    /// Returns the connection handle.
    #[inline]
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }
}

// ============================================================================
// CallRouter - Public API
// ============================================================================

impl CallRouter {
    /// Invokes a tool and waits for its result.
    ///
    /// # Arguments
    ///
    /// * `name` - Registered tool name
    /// * `args` - Tool arguments
    /// * `call_timeout` - Deadline, or the configured default when `None`
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionLost`] if not connected, or the connection drops
    /// - [`Error::PayloadTooLarge`] if the call cannot be framed
    /// - [`Error::TooManyPendingCalls`] if the pending bound is reached
    /// - [`Error::Timeout`] if no result arrives in time
    /// - [`Error::Dispatch`] if the browser reports a failure
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        call_timeout: Option<Duration>,
    ) -> Result<ToolResult> {
        if !self.link.is_connected() {
            debug!(tool = %name, state = %self.link.state(), "Rejecting call while disconnected");
            return Err(Error::ConnectionLost);
        }

        let call = ToolCall {
            id: self.allocate_id(),
            name: name.to_string(),
            args,
            issued_at: Instant::now(),
            timeout: call_timeout.unwrap_or(self.default_timeout),
        };

        // Fail fast on oversized calls, before the table is touched.
        let frame = self.link.codec().encode_envelope(&call.to_envelope())?;

        let (response_tx, mut response_rx) = oneshot::channel();
        self.admit(&call, response_tx)?;
        let _guard = PendingGuard {
            router: self,
            id: call.id,
        };

        if let Err(err) = self.link.send_frame(frame) {
            self.take(call.id);
            return Err(err);
        }

        trace!(call_id = %call.id, tool = %call.name, "Call sent");

        match timeout(call.timeout, &mut response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                if self.take(call.id).is_some() {
                    let timeout_ms = u64::try_from(call.timeout.as_millis()).unwrap_or(u64::MAX);
                    debug!(call_id = %call.id, tool = %call.name, timeout_ms, "Call timed out");
                    return Err(Error::timeout(call.id, timeout_ms));
                }

                // Claimed by `complete` or `fail_all` as the deadline fired.
                // The claimant sends or drops the sender right after.
                response_rx.await.unwrap_or(Err(Error::ConnectionLost))
            }
        }
    }

    /// Routes an inbound envelope to its pending call.
    ///
    /// Returns `true` if a caller was resolved. Unmatched IDs (late results
    /// after a timeout, or foreign messages) are logged and dropped.
    pub fn complete(&self, envelope: Envelope) -> bool {
        let (id, outcome) = match envelope {
            Envelope::Result { id, payload } => (id, Ok(payload)),
            Envelope::Error { id, payload } => (id, Err(Error::dispatch(payload.text_content()))),
            Envelope::Call { id, name, .. } => {
                warn!(call_id = %id, tool = %name, "Ignoring call envelope from browser");
                return false;
            }
        };

        let Some(pending) = self.take(id) else {
            warn!(call_id = %id, "Result for unknown call");
            return false;
        };

        debug!(
            call_id = %id,
            tool = %pending.name,
            ok = outcome.is_ok(),
            elapsed_ms = u64::try_from(pending.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Call completed"
        );

        let _ = pending.response_tx.send(outcome);
        true
    }

    /// Returns the number of calls awaiting results.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Returns `true` if `id` is awaiting a result.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, id: CallId) -> bool {
        self.table.lock().entries.contains_key(&id)
    }
}

// ============================================================================
// CallRouter - Supervisor API
// ============================================================================

impl CallRouter {
    /// Starts admitting calls. Called once a stream is attached.
    pub(crate) fn open(&self) {
        self.table.lock().open = true;
    }

    /// Stops admitting calls and rejects every pending one.
    ///
    /// Returns the number of rejected calls. The table is empty afterwards.
    pub(crate) fn fail_all(&self) -> usize {
        let pending: Vec<_> = {
            let mut table = self.table.lock();
            table.open = false;
            table.entries.drain().collect()
        };
        let count = pending.len();

        for (_, call) in pending {
            let _ = call.response_tx.send(Err(Error::ConnectionLost));
        }

        if count > 0 {
            debug!(count, "Rejected pending calls on disconnect");
        }

        count
    }
}

// ============================================================================
// CallRouter - Internals
// ============================================================================

impl CallRouter {
    /// Returns an ID not currently in the table.
    fn allocate_id(&self) -> CallId {
        let table = self.table.lock();
        loop {
            let id = self.ids.next_id();
            if !table.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Inserts a pending entry if the table is open and has room.
    fn admit(&self, call: &ToolCall, response_tx: oneshot::Sender<Result<ToolResult>>) -> Result<()> {
        let mut table = self.table.lock();

        if !table.open {
            return Err(Error::ConnectionLost);
        }

        if table.entries.len() >= self.max_pending {
            warn!(
                pending = table.entries.len(),
                max = self.max_pending,
                "Too many pending calls"
            );
            return Err(Error::TooManyPendingCalls {
                limit: self.max_pending,
            });
        }

        table.entries.insert(
            call.id,
            PendingCall {
                name: call.name.clone(),
                issued_at: call.issued_at,
                response_tx,
            },
        );
        Ok(())
    }

    /// Removes an entry, returning it if it was still pending.
    fn take(&self, id: CallId) -> Option<PendingCall> {
        self.table.lock().entries.remove(&id)
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Removes the entry if the caller's future is dropped early.
struct PendingGuard<'a> {
    router: &'a CallRouter,
    id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.router.take(self.id).is_some() {
            trace!(call_id = %self.id, "Dropped abandoned call");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
