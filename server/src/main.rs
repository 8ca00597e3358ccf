use anyhow::{bail, Result};
use booksdb::{Catalog, SledCatalog};
use clap::Parser;
use server::config::{DEFAULT_HTTP_ADDR, DEFAULT_SOCKET_PATH};
use server::{LineProtocol, ServerConfig, ShutdownSignals};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "booksdb-server")]
#[command(about = "Serve fuzzy book-title search over a Unix socket and HTTP")]
struct Args {
    /// Path to the catalog database
    db: PathBuf,
    /// Unix socket path for the line protocol
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
    /// Also serve the line protocol on this TCP address
    #[arg(long)]
    tcp: Option<SocketAddr>,
    /// HTTP address
    #[arg(long, default_value = DEFAULT_HTTP_ADDR)]
    http: SocketAddr,
    /// Disable the HTTP interface
    #[arg(long, default_value_t = false)]
    no_http: bool,
    /// Reply with an echo of each line instead of running commands
    #[arg(long, default_value_t = false)]
    echo: bool,
    /// Seconds between catalog refreshes, 0 disables
    #[arg(long, default_value_t = 300)]
    refresh_secs: u64,
    /// Seconds to wait for open connections on shutdown
    #[arg(long, default_value_t = 10)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let args = Args::parse();

    if !args.db.exists() {
        bail!("cannot access database {}", args.db.display());
    }
    let catalog: Arc<dyn Catalog> = Arc::new(SledCatalog::open(&args.db)?);
    let signals = ShutdownSignals::register()?;

    let config = ServerConfig {
        socket_path: args.socket,
        tcp_addr: args.tcp,
        http_addr: (!args.no_http).then_some(args.http),
        protocol: if args.echo { LineProtocol::Echo } else { LineProtocol::Command },
        refresh_interval: (args.refresh_secs > 0).then(|| Duration::from_secs(args.refresh_secs)),
        shutdown_grace: Duration::from_secs(args.grace_secs),
        ..ServerConfig::default()
    }
    .with_env();

    server::run(config, catalog, async move {
        let name = signals.recv().await;
        tracing::info!(signal = name, "received signal");
    })
    .await
}
