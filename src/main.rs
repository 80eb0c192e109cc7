//! `browser-bridge` host binary.
//!
//! Serves one automation client on stdin/stdout and forwards its tool calls
//! to the browser. Logs go to stderr; stdout carries protocol traffic only.
//!
//! | Event | Exit code |
//! |-------|-----------|
//! | SIGINT / SIGTERM | 0 |
//! | client EOF or broken pipe | 0 |
//! | invalid configuration, startup failure | 1 |
//! | uncaught panic | 1 |

use std::backtrace::Backtrace;
use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Subscriber, error, info};
use tracing_subscriber::{EnvFilter, fmt};

use browser_bridge::{
    BridgeConfig, BridgeHost, Connector, ReconnectPolicy, TcpConnector, ToolCatalog,
};

// ============================================================================
// Command Line
// ============================================================================

/// Log output format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    /// Single-line human-readable records.
    #[default]
    Compact,
    /// One JSON object per record.
    Json,
}

/// Routes tool calls from an automation client to a browser extension.
#[derive(Parser, Debug)]
#[command(name = "browser-bridge", version, about)]
struct Args {
    /// Browser endpoint: `host:port`, or `unix:/path/to/socket`.
    #[arg(long, env = "BROWSER_BRIDGE_ADDR", default_value = "127.0.0.1:12306")]
    browser_addr: String,

    /// Default per-call timeout in milliseconds.
    #[arg(long, env = "BROWSER_BRIDGE_CALL_TIMEOUT_MS", default_value_t = 30_000)]
    call_timeout_ms: u64,

    /// Largest envelope accepted in either direction.
    #[arg(long, env = "BROWSER_BRIDGE_MAX_PAYLOAD_BYTES", default_value_t = 1024 * 1024)]
    max_payload_bytes: usize,

    /// Maximum number of calls awaiting results.
    #[arg(long, env = "BROWSER_BRIDGE_MAX_PENDING_CALLS", default_value_t = 100)]
    max_pending_calls: usize,

    /// Longest client request line accepted; longer lines are skipped.
    #[arg(long, env = "BROWSER_BRIDGE_MAX_RECORD_BYTES", default_value_t = 2 * 1024 * 1024)]
    max_record_bytes: usize,

    /// First reconnect delay in milliseconds.
    #[arg(long, env = "BROWSER_BRIDGE_RECONNECT_INITIAL_MS", default_value_t = 250)]
    reconnect_initial_ms: u64,

    /// Reconnect delay cap in milliseconds.
    #[arg(long, env = "BROWSER_BRIDGE_RECONNECT_MAX_MS", default_value_t = 10_000)]
    reconnect_max_ms: u64,

    /// Consecutive failed connects before giving up. Unlimited when unset.
    #[arg(long, env = "BROWSER_BRIDGE_RECONNECT_MAX_ATTEMPTS")]
    reconnect_max_attempts: Option<u32>,

    /// Log filter, e.g. `debug` or `browser_bridge=trace`. Falls back to
    /// `RUST_LOG`, then `info`.
    #[arg(long, env = "BROWSER_BRIDGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format.
    #[arg(long, env = "BROWSER_BRIDGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

impl Args {
    fn bridge_config(&self) -> BridgeConfig {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(self.reconnect_initial_ms))
            .with_max_delay(Duration::from_millis(self.reconnect_max_ms));
        let policy = match self.reconnect_max_attempts {
            Some(attempts) => policy.with_max_attempts(attempts),
            None => policy.unlimited(),
        };

        BridgeConfig::new()
            .with_call_timeout(Duration::from_millis(self.call_timeout_ms))
            .with_max_payload_size(self.max_payload_bytes)
            .with_max_pending_calls(self.max_pending_calls)
            .with_max_record_size(self.max_record_bytes)
            .with_reconnect(policy)
    }

    fn connector(&self) -> Arc<dyn Connector> {
        unix_connector(&self.browser_addr)
            .unwrap_or_else(|| Arc::new(TcpConnector::new(self.browser_addr.clone())))
    }
}

#[cfg(unix)]
fn unix_connector(addr: &str) -> Option<Arc<dyn Connector>> {
    let path = addr.strip_prefix("unix:")?;
    Some(Arc::new(browser_bridge::UnixConnector::new(path)))
}

#[cfg(not(unix))]
fn unix_connector(_addr: &str) -> Option<Arc<dyn Connector>> {
    None
}

// ============================================================================
// Telemetry
// ============================================================================

fn init_tracing(args: &Args) -> Result<(), String> {
    let directive = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|err| format!("invalid log filter '{directive}': {err}"))?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match args.log_format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(|err| err.to_string())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        let backtrace = Backtrace::force_capture();
        error!(%panic, %backtrace, "Uncaught panic");
        std::process::exit(1);
    }));
}

// ============================================================================
// Signals
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// How long runtime teardown waits for blocking stdin reads.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = init_tracing(&args) {
        eprintln!("browser-bridge: {err}");
        return ExitCode::FAILURE;
    }
    install_panic_hook();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "Cannot start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(serve(args));
    // A stdin read parked on a blocking thread would otherwise hold the exit.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    code
}

async fn serve(args: Args) -> ExitCode {
    let host = match BridgeHost::new(args.bridge_config(), ToolCatalog::builtin(), args.connector())
    {
        Ok(host) => host,
        Err(err) => {
            error!(error = %err, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    info!(
        browser = %args.browser_addr,
        tools = host.catalog().len(),
        "Browser bridge started"
    );

    match host
        .run(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
        .await
    {
        Ok(exit) => {
            info!(?exit, "Browser bridge stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Browser bridge failed");
            ExitCode::FAILURE
        }
    }
}
