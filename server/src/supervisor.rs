use crate::config::ServerConfig;
use crate::connection::{accept_loop, ConnectionLimits, LineProtocol};
use crate::http::{build_app, AppState};
use crate::listener::SocketListener;
use anyhow::{Context, Result};
use booksdb::{Catalog, Store};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const ERROR_CHANNEL_CAPACITY: usize = 4;

/// Failures local to one listener or connection. Never fatal to the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("accept on {listener} failed: {source}")]
    Accept {
        listener: String,
        #[source]
        source: io::Error,
    },
    #[error("read from {peer} failed: {source}")]
    Read {
        peer: String,
        #[source]
        source: LinesCodecError,
    },
    #[error("write to {peer} failed: {source}")]
    Write {
        peer: String,
        #[source]
        source: LinesCodecError,
    },
}

/// Everything a listener or connection task needs, cheap to clone.
#[derive(Clone)]
pub struct ServerContext {
    pub store: Arc<Store>,
    pub token: CancellationToken,
    /// Live-connection group drained on shutdown.
    pub tracker: TaskTracker,
    pub errors: mpsc::Sender<ServerError>,
    pub limits: ConnectionLimits,
    pub protocol: LineProtocol,
}

impl ServerContext {
    /// Hand an error to the reporter. Returns `false` once the reporter is gone.
    pub async fn report(&self, err: ServerError) -> bool {
        self.errors.send(err).await.is_ok()
    }
}

/// Log every reported error until all senders are dropped. Resolves with the count.
pub fn spawn_error_reporter(mut errors: mpsc::Receiver<ServerError>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut reported = 0;
        while let Some(err) = errors.recv().await {
            tracing::warn!(error = %err, "connection error");
            reported += 1;
        }
        reported
    })
}

/// Interrupt, terminate and hangup, registered up front so none is missed
/// while the server is starting.
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl ShutdownSignals {
    pub fn register() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("installing SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
            hangup: signal(SignalKind::hangup()).context("installing SIGHUP handler")?,
        })
    }

    /// Resolve with the name of the first signal received.
    pub async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

/// Stop admitting tasks and wait for the live ones, at most `grace`.
///
/// Returns `true` if every tracked task finished in time. Stragglers are left
/// running: their own read timeouts will let them observe cancellation.
pub async fn drain(tracker: &TaskTracker, grace: Duration) -> bool {
    tracker.close();
    timeout(grace, tracker.wait()).await.is_ok()
}

/// Wait for live connections, then for the listeners, both bounded by `deadline`.
///
/// Listeners still running at the deadline are aborted. Returns `true` if
/// everything stopped on its own.
pub async fn wind_down(tracker: &TaskTracker, listeners: &mut JoinSet<()>, deadline: Instant) -> bool {
    let grace = deadline.saturating_duration_since(Instant::now());
    let drained = drain(tracker, grace).await;
    if drained {
        tracing::info!("all client connections closed gracefully");
    } else {
        tracing::warn!(?grace, "timeout reached, continuing shutdown");
    }

    let stopped = timeout_at(deadline, async {
        while listeners.join_next().await.is_some() {}
    })
    .await
    .is_ok();
    if !stopped {
        tracing::warn!("listeners did not stop in time, aborting");
        listeners.shutdown().await;
    }
    drained && stopped
}

/// Rebuild the snapshot every `every` until cancelled. Failures keep the old snapshot.
pub fn spawn_refresher(store: Arc<Store>, catalog: Arc<dyn Catalog>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately and the initial load has already happened
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let store = Arc::clone(&store);
            let catalog = Arc::clone(&catalog);
            match tokio::task::spawn_blocking(move || store.try_refresh(catalog.as_ref())).await {
                Ok(Ok(Some(snapshot))) => tracing::debug!(generation = snapshot.generation(), "periodic refresh done"),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => tracing::warn!(error = %format!("{err:#}"), "catalog refresh failed, keeping previous snapshot"),
                Err(err) => tracing::error!(%err, "refresh task panicked"),
            }
        }
    })
}

/// Load the catalog, start every listener and serve until `shutdown` resolves.
pub async fn run<F>(config: ServerConfig, catalog: Arc<dyn Catalog>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    tracing::info!(
        socket = %config.socket_path.display(),
        tcp = ?config.tcp_addr,
        http = ?config.http_addr,
        protocol = ?config.protocol,
        "starting server"
    );
    let store = Arc::new(Store::new());
    {
        let store = Arc::clone(&store);
        let catalog = Arc::clone(&catalog);
        tokio::task::spawn_blocking(move || store.refresh(catalog.as_ref()))
            .await?
            .context("error initializing book catalog")?;
    }

    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let (errors, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
    let mut reporter = spawn_error_reporter(errors_rx);
    let ctx = ServerContext {
        store: Arc::clone(&store),
        token: token.clone(),
        tracker: tracker.clone(),
        errors,
        limits: config.limits,
        protocol: config.protocol,
    };

    let mut listeners = JoinSet::new();
    let socket = SocketListener::bind(&config.socket_path)?;
    listeners.spawn(accept_loop(socket, ctx.clone()));

    if let Some(addr) = config.tcp_addr {
        let tcp = TcpListener::bind(addr).await.with_context(|| format!("failed to bind tcp listener {addr}"))?;
        listeners.spawn(accept_loop(tcp, ctx.clone()));
    }

    if let Some(addr) = config.http_addr {
        let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind http listener {addr}"))?;
        tracing::info!(%addr, "http listening");
        let state = AppState::new(Arc::clone(&store), Arc::clone(&catalog), config.admin_token.clone());
        let app = build_app(state, &config.cors_origins);
        let token = token.clone();
        listeners.spawn(async move {
            if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(token.cancelled_owned()).await {
                tracing::error!(%err, "http server failed");
            }
        });
    }

    let refresher = config
        .refresh_interval
        .map(|every| spawn_refresher(Arc::clone(&store), Arc::clone(&catalog), every, token.clone()));

    shutdown.await;
    tracing::info!("initiating graceful shutdown");
    token.cancel();
    let deadline = Instant::now() + config.shutdown_grace;

    wind_down(&tracker, &mut listeners, deadline).await;
    if let Some(refresher) = refresher {
        refresher.abort();
    }
    // straggling handlers keep their senders, so the reporter only gets what is left of the grace period
    drop(ctx);
    match timeout_at(deadline, &mut reporter).await {
        Ok(Ok(reported)) => tracing::debug!(reported, "error reporter finished"),
        Ok(Err(err)) => tracing::error!(%err, "error reporter panicked"),
        Err(_) => reporter.abort(),
    }
    tracing::info!("server stopped");
    Ok(())
}
