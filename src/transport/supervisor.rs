//! Browser connection supervisor.
//!
//! The [`ConnectionSupervisor`] owns the browser stream. It connects through
//! a [`Connector`], runs the per-connection event loop, and reconnects with
//! exponential backoff when the stream is lost.
//!
//! # Event Loop
//!
//! Each established stream is split in two:
//!
//! - a spawned writer task draining the [`Link`]'s outbound frames
//! - a reader loop reassembling frames and handing envelopes to the router
//!
//! When either side fails the supervisor moves straight to `Disconnected`,
//! detaches the link and rejects every pending call with
//! [`Error::ConnectionLost`].

// ============================================================================
// Imports
// ============================================================================

#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result, is_disconnect};
use crate::identifiers::SessionId;
use crate::protocol::Envelope;
use crate::router::CallRouter;

use super::framing::FrameBuffer;
use super::link::{ConnectionState, Link};

// ============================================================================
// Constants
// ============================================================================

/// Bytes read from the stream per syscall.
pub(crate) const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long a graceful close waits for queued frames to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Stream Types
// ============================================================================

/// A duplex byte stream to the browser.
pub trait BrowserStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> BrowserStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed browser stream.
pub type BoxedStream = Box<dyn BrowserStream>;

// ============================================================================
// Connector
// ============================================================================

/// Opens a fresh stream to the browser.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempts one connection.
    async fn connect(&self) -> std::io::Result<BoxedStream>;
}

/// Connects over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Creates a connector for `host:port`.
    #[inline]
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> std::io::Result<BoxedStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Connects over a Unix domain socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    /// Creates a connector for a socket path.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> std::io::Result<BoxedStream> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }
}

// ============================================================================
// SessionEnd
// ============================================================================

/// Why a connection's event loop stopped.
#[derive(Debug)]
enum SessionEnd {
    /// Shutdown was requested.
    Closed,
    /// The stream failed or the peer misbehaved.
    Lost(Error),
}

// ============================================================================
// ConnectionSupervisor
// ============================================================================

/// Owns the browser connection lifecycle.
pub struct ConnectionSupervisor {
    /// Stream factory.
    connector: Arc<dyn Connector>,
    /// Correlation engine fed by the reader loop.
    router: Arc<CallRouter>,
    /// Connection handle shared with the router.
    link: Link,
    /// Framing and backoff settings.
    config: BridgeConfig,
    /// Set to `true` to stop.
    shutdown: watch::Sender<bool>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor for `router`'s link.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, router: Arc<CallRouter>, config: BridgeConfig) -> Self {
        let link = router.link().clone();
        let (shutdown, _) = watch::channel(false);
        Self {
            connector,
            router,
            link,
            config,
            shutdown,
        }
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Subscribes to connection state transitions.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.link.subscribe()
    }

    /// Requests a graceful shutdown.
    ///
    /// [`run`](Self::run) returns once the current stream is closed.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Connects, serves and reconnects until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReconnectExhausted`] once the policy's attempt
    /// limit is reached.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let policy = &self.config.reconnect;
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.link.transition(ConnectionState::Connecting);

            let attempt = tokio::select! {
                attempt = self.connector.connect() => attempt,
                () = wait_for_shutdown(&mut shutdown) => {
                    self.link.transition(ConnectionState::Disconnected);
                    break;
                }
            };

            match attempt {
                Ok(stream) => {
                    failures = 0;
                    match self.serve(stream, &mut shutdown).await {
                        SessionEnd::Closed => break,
                        SessionEnd::Lost(reason) => {
                            warn!(error = %reason, "Browser connection lost");
                        }
                    }
                }
                Err(err) => {
                    self.link.transition(ConnectionState::Disconnected);
                    failures = failures.saturating_add(1);
                    warn!(attempt = failures, error = %err, "Browser connect failed");
                }
            }

            if policy.is_exhausted(failures) {
                error!(attempts = failures, "Giving up on browser connection");
                return Err(Error::ReconnectExhausted { attempts: failures });
            }

            let delay = policy.delay_for(failures.max(1));
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            debug!(delay_ms, "Reconnecting after delay");

            tokio::select! {
                () = sleep(delay) => {}
                () = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Connection supervisor stopped");
        Ok(())
    }

    /// Runs the event loop for one established stream.
    async fn serve(&self, stream: BoxedStream, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let session = SessionId::generate();
        let (reader, writer) = tokio::io::split(stream);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let mut writer_task = tokio::spawn(write_loop(writer, frame_rx, session));

        self.link.attach(frame_tx);
        self.router.open();
        self.link.transition(ConnectionState::Connected);
        info!(%session, "Browser connected");

        let end = tokio::select! {
            reason = read_loop(reader, &self.router, &self.config, session) => SessionEnd::Lost(reason),
            joined = &mut writer_task => {
                let reason = match joined {
                    Ok(Ok(())) => Error::ConnectionLost,
                    Ok(Err(err)) => err,
                    Err(join_err) => Error::protocol(format!("writer task failed: {join_err}")),
                };
                SessionEnd::Lost(reason)
            }
            () = wait_for_shutdown(shutdown) => SessionEnd::Closed,
        };

        match &end {
            SessionEnd::Closed => {
                self.link.transition(ConnectionState::Closing);
                self.link.detach();
                if timeout(CLOSE_GRACE, writer_task).await.is_err() {
                    warn!(%session, "Writer did not flush before close deadline");
                }
                let rejected = self.router.fail_all();
                self.link.transition(ConnectionState::Disconnected);
                info!(%session, rejected, "Browser connection closed");
            }
            SessionEnd::Lost(_) => {
                self.link.transition(ConnectionState::Disconnected);
                self.link.detach();
                writer_task.abort();
                let rejected = self.router.fail_all();
                debug!(%session, rejected, "Session torn down");
            }
        }

        end
    }
}

// ============================================================================
// Event Loop Halves
// ============================================================================

/// Reads frames until the stream fails. Returns the reason.
async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    router: &CallRouter,
    config: &BridgeConfig,
    session: SessionId,
) -> Error {
    let mut frames = FrameBuffer::from_config(config);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!(%session, buffered = frames.buffered(), "Browser stream ended");
                return Error::ConnectionLost;
            }
            Ok(read) => read,
            Err(err) => {
                if is_disconnect(&err) {
                    debug!(%session, error = %err, "Browser stream closed");
                } else {
                    error!(%session, error = %err, "Browser stream error");
                }
                return err.into();
            }
        };

        let payloads = match frames.feed(&chunk[..read]) {
            Ok(payloads) => payloads,
            Err(err) => {
                error!(%session, error = %err, "Framing violation, tearing down connection");
                return err;
            }
        };

        for payload in payloads {
            match Envelope::from_payload(&payload) {
                Ok(envelope) => {
                    trace!(%session, call_id = %envelope.id(), kind = envelope.kind(), "Envelope received");
                    router.complete(envelope);
                }
                Err(err) => {
                    warn!(%session, error = %err, len = payload.len(), "Dropping malformed envelope");
                }
            }
        }
    }
}

/// Writes queued frames until the queue closes or the stream fails.
async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    session: SessionId,
) -> Result<()> {
    while let Some(frame) = frames.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(err) = written {
            if is_disconnect(&err) {
                info!(%session, error = %err, "Browser went away during write");
            } else {
                error!(%session, error = %err, "Browser write failed");
            }
            return Err(err.into());
        }

        trace!(%session, len = frame.len(), "Frame written");
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Resolves once the shutdown flag is set.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // Sender gone: nobody can request shutdown any more.
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::task::{Context, Poll};

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadBuf};

    use crate::config::ReconnectPolicy;
    use crate::protocol::ToolResult;
    use crate::transport::{FrameCodec, Link};

    /// Hands out pre-made streams, then refuses.
    struct QueueConnector {
        streams: Mutex<Vec<BoxedStream>>,
        attempts: AtomicU32,
    }

    impl QueueConnector {
        fn new(streams: Vec<BoxedStream>) -> Arc<Self> {
            Arc::new(Self {
                streams: Mutex::new(streams),
                attempts: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for QueueConnector {
        async fn connect(&self) -> std::io::Result<BoxedStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut streams = self.streams.lock();
                if streams.is_empty() { None } else { Some(streams.remove(0)) }
            };
            match next {
                Some(stream) => Ok(stream),
                None => Err(io::ErrorKind::ConnectionRefused.into()),
            }
        }
    }

    fn boxed(stream: DuplexStream) -> BoxedStream {
        Box::new(stream)
    }

    /// Host end whose peer has stopped reading: reads pass through, every
    /// write fails with a broken pipe.
    struct ReaderGone {
        inner: DuplexStream,
    }

    impl AsyncRead for ReaderGone {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for ReaderGone {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Browser end of a test stream. Keeps one reassembly buffer across
    /// reads so several frames arriving in one chunk are all seen.
    struct BrowserEnd {
        stream: DuplexStream,
        frames: FrameBuffer,
        ready: VecDeque<Vec<u8>>,
    }

    impl BrowserEnd {
        fn new(stream: DuplexStream) -> Self {
            Self {
                stream,
                frames: FrameBuffer::new(1024 * 1024, 4 * 1024 * 1024),
                ready: VecDeque::new(),
            }
        }

        async fn next_envelope(&mut self) -> Envelope {
            tokio::time::timeout(Duration::from_secs(5), async {
                let mut chunk = [0u8; 1024];
                loop {
                    if let Some(payload) = self.ready.pop_front() {
                        return Envelope::from_payload(&payload).expect("envelope");
                    }
                    let n = self.stream.read(&mut chunk).await.expect("read");
                    assert!(n > 0, "stream closed");
                    self.ready.extend(self.frames.feed(&chunk[..n]).expect("feed"));
                }
            })
            .await
            .expect("envelope before deadline")
        }

        async fn write(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).await.expect("write");
        }
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig::new().with_reconnect(
            ReconnectPolicy::new()
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(20)),
        )
    }

    fn router(config: &BridgeConfig) -> Arc<CallRouter> {
        Arc::new(CallRouter::new(Link::new(FrameCodec::from_config(config)), config))
    }

    async fn wait_for_state(supervisor: &ConnectionSupervisor, state: ConnectionState) {
        let mut states = supervisor.subscribe();
        let _ = tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == state))
            .await
            .expect("state reached");
    }

    #[tokio::test]
    async fn test_connect_and_route_result() {
        let config = fast_config();
        let (host_side, browser_side) = tokio::io::duplex(64 * 1024);
        let mut browser = BrowserEnd::new(browser_side);
        let router = router(&config);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            QueueConnector::new(vec![boxed(host_side)]),
            Arc::clone(&router),
            config,
        ));

        let running = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });
        wait_for_state(&supervisor, ConnectionState::Connected).await;

        let call = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.invoke("get_windows_and_tabs", json!({}), None).await }
        });

        let envelope = browser.next_envelope().await;
        let reply = Envelope::result(envelope.id(), ToolResult::text("tabs"));
        let frame = FrameCodec::new(1024).encode_envelope(&reply).expect("encode");
        browser.write(&frame).await;

        let result = call.await.expect("join").expect("result");
        assert_eq!(result.text_content(), "tabs");

        supervisor.shutdown();
        running.await.expect("join").expect("clean stop");
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_rejects_pending_and_reconnects() {
        let config = fast_config();
        let (first_host, first_browser) = tokio::io::duplex(64 * 1024);
        let (second_host, _second_browser) = tokio::io::duplex(64 * 1024);
        let mut first_browser = BrowserEnd::new(first_browser);
        let connector = QueueConnector::new(vec![boxed(first_host), boxed(second_host)]);
        let router = router(&config);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&router),
            config,
        ));

        tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });
        wait_for_state(&supervisor, ConnectionState::Connected).await;

        let mut calls = Vec::new();
        for _ in 0..3 {
            let router = Arc::clone(&router);
            calls.push(tokio::spawn(async move {
                router.invoke("history", json!({}), None).await
            }));
        }
        for _ in 0..3 {
            first_browser.next_envelope().await;
        }
        assert_eq!(router.pending_count(), 3);

        drop(first_browser);

        for call in calls {
            let err = call.await.expect("join").unwrap_err();
            assert!(matches!(err, Error::ConnectionLost));
        }
        assert_eq!(router.pending_count(), 0);

        // Comes back on the second stream.
        let mut states = supervisor.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if connector.attempts.load(Ordering::SeqCst) >= 2
                    && *states.borrow_and_update() == ConnectionState::Connected
                {
                    break;
                }
                states.changed().await.expect("changed");
            }
        })
        .await
        .expect("reconnected");

        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_broken_pipe_on_write_is_a_disconnect() {
        // Slow enough that every call below is issued before the reconnect.
        let config = BridgeConfig::new().with_reconnect(
            ReconnectPolicy::new()
                .with_initial_delay(Duration::from_millis(200))
                .with_max_delay(Duration::from_millis(400)),
        );
        let (first_host, _first_browser) = tokio::io::duplex(64 * 1024);
        let (second_host, _second_browser) = tokio::io::duplex(64 * 1024);
        let connector = QueueConnector::new(vec![
            Box::new(ReaderGone { inner: first_host }) as BoxedStream,
            boxed(second_host),
        ]);
        let router = router(&config);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&router),
            config,
        ));

        let running = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });
        wait_for_state(&supervisor, ConnectionState::Connected).await;

        let mut calls = Vec::new();
        for _ in 0..3 {
            let router = Arc::clone(&router);
            calls.push(tokio::spawn(async move {
                router.invoke("history", json!({}), None).await
            }));
        }

        for call in calls {
            let err = call.await.expect("join").unwrap_err();
            assert!(matches!(err, Error::ConnectionLost));
        }
        assert_eq!(router.pending_count(), 0);

        let mut states = supervisor.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if connector.attempts.load(Ordering::SeqCst) >= 2
                    && *states.borrow_and_update() == ConnectionState::Connected
                {
                    break;
                }
                states.changed().await.expect("changed");
            }
        })
        .await
        .expect("reconnected");

        // The supervisor kept running through the failed write.
        assert!(!running.is_finished());
        supervisor.shutdown();
        running.await.expect("join").expect("clean stop");
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_tears_down() {
        let config = fast_config()
            .with_max_payload_size(64)
            .with_max_buffer_size(256);
        let (host_side, browser_side) = tokio::io::duplex(64 * 1024);
        let mut browser = BrowserEnd::new(browser_side);
        let router = router(&config);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            QueueConnector::new(vec![boxed(host_side)]),
            Arc::clone(&router),
            config,
        ));

        tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });
        wait_for_state(&supervisor, ConnectionState::Connected).await;

        let call = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.invoke("history", json!({}), None).await }
        });
        browser.next_envelope().await;

        browser.write(&10_000u32.to_le_bytes()).await;

        let err = call.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::ConnectionLost));
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let config = BridgeConfig::new().with_reconnect(
            ReconnectPolicy::new()
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(2))
                .with_max_attempts(3),
        );
        let connector = QueueConnector::new(Vec::new());
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&connector) as Arc<dyn Connector>,
            router(&config),
            config,
        );

        let err = supervisor.run().await.unwrap_err();
        assert!(matches!(err, Error::ReconnectExhausted { attempts: 3 }));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_skipped() {
        let config = fast_config();
        let (host_side, browser_side) = tokio::io::duplex(64 * 1024);
        let mut browser = BrowserEnd::new(browser_side);
        let router = router(&config);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            QueueConnector::new(vec![boxed(host_side)]),
            Arc::clone(&router),
            config,
        ));

        tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });
        wait_for_state(&supervisor, ConnectionState::Connected).await;

        let call = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.invoke("history", json!({}), None).await }
        });
        let id = browser.next_envelope().await.id();

        let codec = FrameCodec::new(1024);
        let garbage = codec.encode(b"{not json").expect("encode");
        let reply = codec
            .encode_envelope(&Envelope::result(id, ToolResult::text("ok")))
            .expect("encode");
        browser.write(&garbage).await;
        browser.write(&reply).await;

        assert!(call.await.expect("join").is_ok());
        assert!(supervisor.state() == ConnectionState::Connected);
        supervisor.shutdown();
    }
}
