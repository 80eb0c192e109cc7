//! Host process wiring.
//!
//! [`BridgeHost`] owns one [`CallRouter`], one [`ConnectionSupervisor`] and
//! the tool catalog, and serves a single client until its input ends, it
//! stops reading, or shutdown is requested.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::registry::ToolCatalog;
use crate::router::CallRouter;
use crate::transport::{
    ClientEnd, ClientTransport, ConnectionState, ConnectionSupervisor, Connector, FrameCodec, Link,
};

// ============================================================================
// HostExit
// ============================================================================

/// Why [`BridgeHost::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// Client input reached EOF.
    EndOfInput,
    /// Client stopped reading.
    ClientGone,
    /// Shutdown was requested.
    Signal,
}

// ============================================================================
// BridgeHost
// ============================================================================

/// The host side of the bridge.
pub struct BridgeHost {
    catalog: Arc<ToolCatalog>,
    router: Arc<CallRouter>,
    supervisor: Arc<ConnectionSupervisor>,
    max_record_size: usize,
}

impl BridgeHost {
    /// Creates a host that reaches the browser through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `config` is
    /// inconsistent.
    pub fn new(
        config: BridgeConfig,
        catalog: ToolCatalog,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;

        let link = Link::new(FrameCodec::from_config(&config));
        let router = Arc::new(CallRouter::new(link, &config));
        let max_record_size = config.max_record_size;
        let supervisor = Arc::new(ConnectionSupervisor::new(
            connector,
            Arc::clone(&router),
            config,
        ));

        Ok(Self {
            catalog: Arc::new(catalog),
            router,
            supervisor,
            max_record_size,
        })
    }

    /// Returns the call router.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Arc<CallRouter> {
        &self.router
    }

    /// Returns the tool catalog.
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Returns the browser connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Subscribes to browser connection state transitions.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    /// Serves the client on `reader`/`writer` until it leaves or `shutdown`
    /// resolves, then closes the browser connection.
    ///
    /// If the supervisor gives up reconnecting, the client keeps being
    /// served and every call fails with `connection_lost`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the client stream fails
    /// with something other than a disconnect.
    pub async fn run<R, W, F>(&self, reader: R, writer: W, shutdown: F) -> Result<HostExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        let supervising = tokio::spawn({
            let supervisor = Arc::clone(&self.supervisor);
            async move {
                if let Err(err) = supervisor.run().await {
                    error!(error = %err, "Browser connection supervisor stopped");
                }
            }
        });

        let client = ClientTransport::new(Arc::clone(&self.router), Arc::clone(&self.catalog))
            .with_max_record_size(self.max_record_size);

        let exit = tokio::select! {
            served = client.serve(reader, writer) => served.map(|end| match end {
                ClientEnd::EndOfInput => HostExit::EndOfInput,
                ClientEnd::PeerGone => HostExit::ClientGone,
            }),
            () = shutdown => {
                info!("Shutdown requested");
                Ok(HostExit::Signal)
            }
        };

        self.supervisor.shutdown();
        if let Err(join_err) = supervising.await {
            error!(error = %join_err, "Supervisor task failed");
        }

        info!(exit = ?exit, pending = self.router.pending_count(), "Host stopped");
        exit
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::error::Error;
    use crate::transport::TcpConnector;

    #[test]
    fn test_rejects_invalid_config() {
        let result = BridgeHost::new(
            BridgeConfig::new().with_call_timeout(Duration::ZERO),
            ToolCatalog::builtin(),
            Arc::new(TcpConnector::new("127.0.0.1:9")),
        );
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_signal_stops_host() {
        let host = BridgeHost::new(
            BridgeConfig::new(),
            ToolCatalog::builtin(),
            Arc::new(TcpConnector::new("127.0.0.1:9")),
        )
        .expect("host");

        let (_client, host_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(host_side);

        let exit = host
            .run(reader, writer, async {})
            .await
            .expect("run");
        assert_eq!(exit, HostExit::Signal);
        assert_eq!(host.state(), ConnectionState::Disconnected);
    }
}
