//! Line-oriented connection handling shared by the Unix and TCP listeners.
//!
//! Every wait is bounded: accept and read both time out regularly so the
//! loops can notice the cancellation token without interrupting blocked I/O.

use crate::listener::Accept;
use crate::supervisor::{ServerContext, ServerError};
use booksdb::{command, Store};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::codec::{Framed, LinesCodec};

const ECHO_PREFIX: &str = "Server echo: ";

#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Total lifetime of one connection.
    pub connection_timeout: Duration,
    /// Longest single read wait; also the shutdown polling granularity.
    pub read_timeout: Duration,
    pub accept_timeout: Duration,
    pub max_line_length: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5 * 60),
            read_timeout: Duration::from_secs(1),
            accept_timeout: Duration::from_secs(1),
            max_line_length: 64 * 1024,
        }
    }
}

/// What a connection replies to each request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineProtocol {
    /// Reply with the request line prefixed by `Server echo: `.
    Echo,
    /// Treat the line as `command args...` and reply with one JSON line.
    Command,
}

impl LineProtocol {
    pub fn respond(self, store: &Store, line: &str) -> String {
        match self {
            Self::Echo => format!("{ECHO_PREFIX}{line}"),
            Self::Command => {
                let mut parts = line.split_whitespace();
                let Some(name) = parts.next() else {
                    return error_line("empty command");
                };
                let args: Vec<&str> = parts.collect();
                let snapshot = store.get();
                match command::execute(&snapshot, name, &args) {
                    Ok(records) => serde_json::to_string(&records).unwrap_or_else(|err| error_line(&err.to_string())),
                    Err(err) => error_line(&err.to_string()),
                }
            }
        }
    }
}

fn error_line(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Accept connections until the context is cancelled.
pub async fn accept_loop<L: Accept>(listener: L, ctx: ServerContext) {
    let name = listener.describe();
    tracing::info!(listener = %name, "accepting connections");

    while !ctx.token.is_cancelled() {
        let accepted = match timeout(ctx.limits.accept_timeout, listener.accept()).await {
            Ok(accepted) => accepted,
            Err(_) => continue,
        };
        match accepted {
            Ok((stream, peer)) => {
                ctx.tracker.spawn(handle_connection(stream, peer, ctx.clone()));
            }
            Err(source) => {
                if !ctx.report(ServerError::Accept { listener: name.clone(), source }).await {
                    break;
                }
            }
        }
    }
    tracing::info!(listener = %name, "accept loop stopped");
}

/// Serve one client: read a line, write a reply, until EOF, error, deadline or shutdown.
pub async fn handle_connection<S>(stream: S, peer: String, ctx: ServerContext)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    tracing::debug!(%peer, "connection accepted");
    let deadline = Instant::now() + ctx.limits.connection_timeout;
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(ctx.limits.max_line_length));

    tracing::debug!(%peer, "connection active");
    loop {
        if ctx.token.is_cancelled() {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(%peer, "connection lifetime expired");
            break;
        }

        let wait = ctx.limits.read_timeout.min(deadline - now);
        let line = match timeout(wait, framed.next()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(Ok(line))) => line,
            Ok(Some(Err(source))) => {
                ctx.report(ServerError::Read { peer: peer.clone(), source }).await;
                break;
            }
        };

        let reply = ctx.protocol.respond(&ctx.store, &line);
        match timeout_at(deadline, framed.send(reply)).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                ctx.report(ServerError::Write { peer: peer.clone(), source }).await;
                break;
            }
            Err(_) => {
                tracing::debug!(%peer, "connection lifetime expired while writing");
                break;
            }
        }
    }

    tracing::debug!(%peer, "connection closing");
    if let Err(err) = SinkExt::<String>::close(&mut framed).await {
        tracing::debug!(%peer, %err, "error closing connection");
    }
    tracing::debug!(%peer, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use booksdb::BookRecord;

    fn store() -> Store {
        let store = Store::new();
        store.publish(vec![
            BookRecord { id: 1, title: "The Great War".into(), authors: vec![], series: None, published: None },
            BookRecord { id: 2, title: "War and Peace".into(), authors: vec!["Lew Tołstoj".into()], series: None, published: None },
        ]);
        store
    }

    #[test]
    fn echo_prefixes_line() {
        assert_eq!(LineProtocol::Echo.respond(&store(), "hello"), "Server echo: hello");
    }

    #[test]
    fn command_replies_with_json_records() {
        let reply = LineProtocol::Command.respond(&store(), "title  peace");
        let records: Vec<BookRecord> = serde_json::from_str(&reply).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 2);
    }

    #[test]
    fn command_errors_are_reported_inline() {
        let reply = LineProtocol::Command.respond(&store(), "isbn 123");
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["error"], "unknown command \"isbn\"");

        let reply = LineProtocol::Command.respond(&store(), "   ");
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["error"], "empty command");
    }
}
