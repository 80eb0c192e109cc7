//! Browser-side dispatcher.
//!
//! Runs inside the browser process. Each inbound `call` envelope is resolved
//! against the [`HandlerRegistry`], its arguments are checked against the
//! tool's [`ArgumentShape`](crate::registry::ArgumentShape), and the handler
//! runs on its own task. Exactly one `result` or `error` envelope goes back
//! per call, carrying the call's ID.
//!
//! | Outcome | Reply |
//! |---------|-------|
//! | `Ok(result)` | `result` |
//! | `Ok(result)` with `isError` | `error` carrying the handler's blocks |
//! | `Err(..)` | `error` with the message |
//! | panic | `error`, the loop keeps running |
//! | unknown tool / bad arguments | `error`, no handler runs |

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result, is_disconnect};
use crate::identifiers::CallId;
use crate::protocol::Envelope;
use crate::registry::HandlerRegistry;
use crate::transport::supervisor::READ_CHUNK_SIZE;
use crate::transport::{FrameBuffer, FrameCodec};

// ============================================================================
// Dispatcher
// ============================================================================

/// Executes framed tool calls against a handler registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    config: BridgeConfig,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, config: BridgeConfig) -> Self {
        Self { registry, config }
    }

    /// Returns the handler registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Executes one call and builds its reply envelope.
    ///
    /// Never fails: every failure mode becomes an `error` envelope.
    pub async fn dispatch(&self, id: CallId, name: &str, args: Value) -> Envelope {
        let Some(tool) = self.registry.lookup(name) else {
            let message = if self.registry.catalog().contains(name) {
                format!("No handler registered for tool: {name}")
            } else {
                Error::unknown_tool(name).to_string()
            };
            warn!(call_id = %id, tool = name, "{message}");
            return Envelope::error(id, message);
        };

        if let Err(err) = tool.descriptor.shape.validate(name, &args) {
            debug!(call_id = %id, tool = name, error = %err, "Rejected arguments");
            return Envelope::error(id, err.to_string());
        }

        let span = info_span!("tool", call_id = %id, tool = name, context = %tool.descriptor.context);
        let handler = Arc::clone(&tool.handler);

        let outcome = AssertUnwindSafe(handler.execute(args))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(Ok(result)) if result.is_error => {
                debug!(call_id = %id, tool = name, "Tool reported an error");
                Envelope::Error {
                    id,
                    payload: result,
                }
            }
            Ok(Ok(result)) => {
                trace!(call_id = %id, tool = name, blocks = result.content.len(), "Tool completed");
                Envelope::result(id, result)
            }
            Ok(Err(err)) => {
                debug!(call_id = %id, tool = name, error = %err, "Tool failed");
                let message = match err {
                    Error::Dispatch { message } => message,
                    other => other.to_string(),
                };
                Envelope::error(id, message)
            }
            Err(panic) => {
                let message = format!("Tool {name} panicked: {}", panic_message(panic.as_ref()));
                error!(call_id = %id, tool = name, "{message}");
                Envelope::error(id, message)
            }
        }
    }

    /// Serves calls arriving on `stream` until the host goes away.
    ///
    /// Calls run concurrently; replies are written in completion order.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] or [`Error::BufferOverflow`] if the inbound byte
    ///   stream breaks framing
    /// - [`Error::Io`] on a stream failure that is not a disconnect
    pub async fn serve<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let codec = FrameCodec::from_config(&self.config);
        let mut writer_task = tokio::spawn(write_replies(writer, reply_rx, codec));

        let mut frames = FrameBuffer::from_config(&self.config);
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let mut in_flight = JoinSet::new();

        let outcome = loop {
            while in_flight.try_join_next().is_some() {}

            let read = tokio::select! {
                read = reader.read(&mut chunk) => read,
                joined = &mut writer_task => {
                    break match joined {
                        Ok(result) => result,
                        Err(join_err) => Err(std::io::Error::other(join_err).into()),
                    };
                }
            };

            let read = match read {
                Ok(0) => {
                    debug!("Host closed the stream");
                    break Ok(());
                }
                Ok(read) => read,
                Err(err) if is_disconnect(&err) => {
                    debug!(error = %err, "Host disconnected");
                    break Ok(());
                }
                Err(err) => break Err(err.into()),
            };

            let payloads = match frames.feed(&chunk[..read]) {
                Ok(payloads) => payloads,
                Err(err) => {
                    error!(error = %err, "Framing violation, closing stream");
                    break Err(err);
                }
            };

            for payload in payloads {
                match Envelope::from_payload(&payload) {
                    Ok(Envelope::Call { id, name, args }) => {
                        let dispatcher = self.clone();
                        let replies = reply_tx.clone();
                        in_flight.spawn(async move {
                            let reply = dispatcher.dispatch(id, &name, args).await;
                            let _ = replies.send(reply);
                        });
                    }
                    Ok(other) => {
                        warn!(call_id = %other.id(), kind = other.kind(), "Ignoring non-call envelope");
                    }
                    Err(err) => {
                        warn!(error = %err, len = payload.len(), "Dropping malformed envelope");
                    }
                }
            }
        };

        in_flight.shutdown().await;
        drop(reply_tx);
        if !writer_task.is_finished() {
            let _ = writer_task.await;
        }

        outcome
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Frames and writes replies until the channel closes or the host leaves.
async fn write_replies<W>(
    mut writer: WriteHalf<W>,
    mut replies: mpsc::UnboundedReceiver<Envelope>,
    codec: FrameCodec,
) -> Result<()>
where
    W: AsyncRead + AsyncWrite,
{
    while let Some(reply) = replies.recv().await {
        let frame = match codec.encode_envelope(&reply) {
            Ok(frame) => frame,
            Err(err @ Error::PayloadTooLarge { .. }) => {
                warn!(call_id = %reply.id(), error = %err, "Reply too large, sending error instead");
                codec.encode_envelope(&Envelope::error(reply.id(), err.to_string()))?
            }
            Err(err) => return Err(err),
        };

        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => trace!(call_id = %reply.id(), len = frame.len(), "Reply written"),
            Err(err) if is_disconnect(&err) => {
                debug!(error = %err, "Host went away during write");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Extracts a readable message from a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::io::DuplexStream;

    use crate::protocol::ToolResult;
    use crate::registry::{
        ArgumentShape, ExecutionContext, FieldKind, ToolDescriptor, handler_fn,
    };

    async fn explode(_: Value) -> Result<ToolResult> {
        panic!("console exploded")
    }

    fn registry(calls: Arc<AtomicUsize>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::builtin();
        registry
            .register_builtin(
                "navigate",
                handler_fn(move |args| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(ToolResult::text(format!("opened {}", args["url"].as_str().unwrap_or(""))))
                    }
                }),
            )
            .expect("navigate");
        registry
            .register_builtin(
                "click_element",
                handler_fn(|_| async { Err(Error::dispatch("element not found")) }),
            )
            .expect("click");
        registry
            .register_builtin(
                "history",
                handler_fn(|_| async { Ok(ToolResult::error("history unavailable")) }),
            )
            .expect("history");
        registry
            .register_builtin(
                "console",
                handler_fn(explode),
            )
            .expect("console");
        registry
            .register(
                ToolDescriptor::new(
                    "echo",
                    ExecutionContext::Background,
                    "Echo the payload",
                    ArgumentShape::new().required("data", FieldKind::String),
                ),
                handler_fn(|args| async move {
                    Ok(ToolResult::text(args["data"].as_str().unwrap_or_default().to_string()))
                }),
            )
            .expect("echo");
        registry
    }

    fn dispatcher() -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Arc::new(registry(Arc::clone(&calls))), BridgeConfig::new());
        (dispatcher, calls)
    }

    #[tokio::test]
    async fn test_success() {
        let (dispatcher, calls) = dispatcher();
        let reply = dispatcher
            .dispatch(CallId::new(1), "navigate", json!({ "url": "https://example.com" }))
            .await;

        let Envelope::Result { id, payload } = reply else {
            panic!("expected result, got {reply:?}");
        };
        assert_eq!(id, CallId::new(1));
        assert_eq!(payload.text_content(), "opened https://example.com");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_runs_nothing() {
        let (dispatcher, calls) = dispatcher();
        let reply = dispatcher.dispatch(CallId::new(2), "nonexistent_tool", json!({})).await;

        let Envelope::Error { id, payload } = reply else {
            panic!("expected error");
        };
        assert_eq!(id, CallId::new(2));
        assert!(payload.is_error);
        assert_eq!(payload.text_content(), "Unknown tool: nonexistent_tool");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_catalogued_tool_without_handler() {
        let (dispatcher, _) = dispatcher();
        let reply = dispatcher.dispatch(CallId::new(3), "screenshot", json!({})).await;
        let Envelope::Error { payload, .. } = reply else {
            panic!("expected error");
        };
        assert!(payload.text_content().contains("No handler"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_handler() {
        let (dispatcher, calls) = dispatcher();
        let reply = dispatcher
            .dispatch(CallId::new(4), "navigate", json!({ "url": 42 }))
            .await;

        assert_eq!(reply.kind(), "error");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_envelope() {
        let (dispatcher, _) = dispatcher();
        let reply = dispatcher.dispatch(CallId::new(5), "click_element", json!({})).await;
        let Envelope::Error { payload, .. } = reply else {
            panic!("expected error");
        };
        assert_eq!(payload.text_content(), "element not found");
    }

    #[tokio::test]
    async fn test_error_result_keeps_blocks() {
        let (dispatcher, _) = dispatcher();
        let reply = dispatcher.dispatch(CallId::new(6), "history", Value::Null).await;
        let Envelope::Error { payload, .. } = reply else {
            panic!("expected error");
        };
        assert_eq!(payload.text_content(), "history unavailable");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (dispatcher, _) = dispatcher();
        let reply = dispatcher.dispatch(CallId::new(7), "console", json!({})).await;
        let Envelope::Error { payload, .. } = reply else {
            panic!("expected error");
        };
        assert!(payload.text_content().contains("console exploded"));

        // Still usable afterwards.
        let reply = dispatcher
            .dispatch(CallId::new(8), "navigate", json!({ "url": "https://a.example" }))
            .await;
        assert_eq!(reply.kind(), "result");
    }

    // ------------------------------------------------------------------------
    // serve
    // ------------------------------------------------------------------------

    async fn send(stream: &mut DuplexStream, envelope: &Envelope) {
        let frame = FrameCodec::new(1024 * 1024)
            .encode_envelope(envelope)
            .expect("encode");
        stream.write_all(&frame).await.expect("write");
    }

    async fn recv(stream: &mut DuplexStream, frames: &mut FrameBuffer) -> Envelope {
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(payload) = frames.next_frame().expect("frame") {
                return Envelope::from_payload(&payload).expect("envelope");
            }
            let n = stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "dispatcher closed the stream");
            frames.extend(&chunk[..n]).expect("extend");
        }
    }

    #[tokio::test]
    async fn test_serve_replies_per_call() {
        let (dispatcher, _) = dispatcher();
        let (mut host, browser) = tokio::io::duplex(64 * 1024);
        let serving = tokio::spawn(async move { dispatcher.serve(browser).await });

        send(&mut host, &Envelope::call(CallId::new(1), "console", json!({}))).await;
        send(
            &mut host,
            &Envelope::call(CallId::new(2), "navigate", json!({ "url": "https://example.com" })),
        )
        .await;

        let mut frames = FrameBuffer::new(1024 * 1024, 4 * 1024 * 1024);
        let mut replies = vec![recv(&mut host, &mut frames).await, recv(&mut host, &mut frames).await];
        replies.sort_by_key(Envelope::id);

        assert_eq!(replies[0].kind(), "error");
        assert_eq!(replies[1].kind(), "result");

        drop(host);
        serving.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn test_serve_replaces_oversized_reply() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                ToolDescriptor::new(
                    "big",
                    ExecutionContext::Background,
                    "Returns a large result",
                    ArgumentShape::new(),
                ),
                handler_fn(|_| async { Ok(ToolResult::text("x".repeat(4096))) }),
            )
            .expect("register");
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            BridgeConfig::new().with_max_payload_size(1024),
        );
        let (mut host, browser) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move { dispatcher.serve(browser).await });

        send(&mut host, &Envelope::call(CallId::new(9), "big", json!({}))).await;

        let mut frames = FrameBuffer::new(1024 * 1024, 4 * 1024 * 1024);
        let reply = recv(&mut host, &mut frames).await;
        let Envelope::Error { id, payload } = reply else {
            panic!("expected error");
        };
        assert_eq!(id, CallId::new(9));
        assert!(payload.text_content().contains("exceeds limit of 1024 bytes"));
    }

    #[tokio::test]
    async fn test_serve_rejects_misaligned_stream() {
        let (dispatcher, _) = dispatcher();
        let (mut host, browser) = tokio::io::duplex(64 * 1024);
        let serving = tokio::spawn(async move { dispatcher.serve(browser).await });

        host.write_all(&u32::MAX.to_le_bytes()).await.expect("write");

        let err = serving.await.expect("join").unwrap_err();
        assert!(err.tears_down_connection());
    }

    #[tokio::test]
    async fn test_serve_skips_garbage_payload() {
        let (dispatcher, _) = dispatcher();
        let (mut host, browser) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move { dispatcher.serve(browser).await });

        let garbage = FrameCodec::new(64).encode(b"not an envelope").expect("encode");
        host.write_all(&garbage).await.expect("write");
        send(&mut host, &Envelope::call(CallId::new(3), "echo", json!({ "data": "hi" }))).await;

        let mut frames = FrameBuffer::new(1024 * 1024, 4 * 1024 * 1024);
        let reply = recv(&mut host, &mut frames).await;
        assert_eq!(reply.id(), CallId::new(3));
        let Envelope::Result { payload, .. } = reply else {
            panic!("expected result");
        };
        assert_eq!(payload.text_content(), "hi");
    }
}
