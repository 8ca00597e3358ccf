use crate::connection::{ConnectionLimits, LineProtocol};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/booksdb.sock";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Extra line-protocol listener over TCP.
    pub tcp_addr: Option<SocketAddr>,
    pub http_addr: Option<SocketAddr>,
    pub protocol: LineProtocol,
    pub limits: ConnectionLimits,
    /// `None` disables periodic catalog refreshes.
    pub refresh_interval: Option<Duration>,
    pub shutdown_grace: Duration,
    pub admin_token: Option<String>,
    /// Allowed CORS origins for the HTTP app; empty allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            tcp_addr: None,
            http_addr: DEFAULT_HTTP_ADDR.parse().ok(),
            protocol: LineProtocol::Command,
            limits: ConnectionLimits::default(),
            refresh_interval: Some(DEFAULT_REFRESH_INTERVAL),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            admin_token: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Fill secrets and CORS settings from `ADMIN_TOKEN` and `CORS_ALLOW_ORIGIN`.
    pub fn with_env(mut self) -> Self {
        self.admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
        if let Ok(val) = std::env::var("CORS_ALLOW_ORIGIN") {
            self.cors_origins = val.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        self
    }
}
