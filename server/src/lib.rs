pub mod config;
pub mod connection;
pub mod http;
pub mod listener;
pub mod supervisor;

pub use config::ServerConfig;
pub use connection::{ConnectionLimits, LineProtocol};
pub use http::{build_app, AppState};
pub use listener::SocketListener;
pub use supervisor::{run, ShutdownSignals};
