use booksdb::{BookRecord, Catalog, Store};
use server::connection::handle_connection;
use server::supervisor::{ServerContext, ServerError};
use server::{ConnectionLimits, LineProtocol, ServerConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

fn catalog() -> Arc<dyn Catalog> {
    Arc::new(vec![
        BookRecord { id: 1, title: "The Great War".into(), authors: vec![], series: None, published: None },
        BookRecord { id: 2, title: "War and Peace".into(), authors: vec![], series: None, published: None },
    ])
}

fn limits() -> ConnectionLimits {
    ConnectionLimits {
        connection_timeout: Duration::from_secs(30),
        read_timeout: Duration::from_millis(50),
        accept_timeout: Duration::from_millis(50),
        max_line_length: 1024,
    }
}

fn config(socket: &Path, protocol: LineProtocol) -> ServerConfig {
    ServerConfig {
        socket_path: socket.to_path_buf(),
        http_addr: None,
        protocol,
        limits: limits(),
        refresh_interval: None,
        shutdown_grace: Duration::from_secs(5),
        ..ServerConfig::default()
    }
}

fn start(config: ServerConfig) -> (oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>) {
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server::run(config, catalog(), async move {
        let _ = stopped.await;
    }));
    (stop, handle)
}

async fn connect(path: &Path) -> UnixStream {
    for _ in 0..100 {
        if let Ok(stream) = UnixStream::connect(path).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not start listening on {}", path.display());
}

#[tokio::test]
async fn echo_scenario() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("books.sock");
    let (stop, server) = start(config(&socket, LineProtocol::Echo));

    let stream = connect(&socket).await;
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    write.write_all(b"hello\n").await.unwrap();
    let mut reply = String::new();
    reader.read_line(&mut reply).await.unwrap();
    assert_eq!(reply, "Server echo: hello\n");

    write.write_all(b"second line\n").await.unwrap();
    reply.clear();
    reader.read_line(&mut reply).await.unwrap();
    assert_eq!(reply, "Server echo: second line\n");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn command_protocol_runs_title_search() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("books.sock");
    let (stop, server) = start(config(&socket, LineProtocol::Command));

    let mut stream = connect(&socket).await;
    stream.write_all(b"title war\n").await.unwrap();
    let mut reader = BufReader::new(&mut stream);
    let mut reply = String::new();
    reader.read_line(&mut reply).await.unwrap();
    let records: Vec<BookRecord> = serde_json::from_str(reply.trim_end()).unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, [1, 2]);

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_connection_before_grace_period() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("books.sock");
    let (stop, server) = start(config(&socket, LineProtocol::Echo));

    let mut stream = connect(&socket).await;
    stream.write_all(b"ping\n").await.unwrap();
    let mut reply = [0u8; 18];
    stream.read_exact(&mut reply).await.unwrap();

    let started = Instant::now();
    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
    // grace period is 5s; the idle handler notices cancellation at its next read timeout
    assert!(started.elapsed() < Duration::from_secs(3));

    let mut rest = Vec::new();
    let read = stream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(read, 0);
}

#[tokio::test]
async fn connection_lifetime_is_bounded() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("books.sock");
    let mut cfg = config(&socket, LineProtocol::Echo);
    cfg.limits.connection_timeout = Duration::from_millis(200);
    let (stop, server) = start(cfg);

    let mut stream = connect(&socket).await;
    let started = Instant::now();
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert_eq!(read, 0);
    assert!(started.elapsed() >= Duration::from_millis(150));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_line_is_reported_and_closes_connection() {
    let (errors, mut errors_rx) = mpsc::channel(4);
    let store = Arc::new(Store::new());
    let ctx = ServerContext {
        store,
        token: CancellationToken::new(),
        tracker: TaskTracker::new(),
        errors,
        limits: ConnectionLimits { max_line_length: 16, ..limits() },
        protocol: LineProtocol::Echo,
    };
    let (mut client, server_side) = tokio::io::duplex(4096);
    let handler = tokio::spawn(handle_connection(server_side, "duplex".to_string(), ctx));

    let mut line = vec![b'x'; 64];
    line.push(b'\n');
    client.write_all(&line).await.unwrap();
    handler.await.unwrap();

    match errors_rx.recv().await {
        Some(ServerError::Read { peer, .. }) => assert_eq!(peer, "duplex"),
        other => panic!("unexpected report: {other:?}"),
    }
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
}

#[tokio::test]
async fn startup_fails_when_catalog_cannot_load() {
    struct Broken;
    impl Catalog for Broken {
        fn list_books(&self) -> anyhow::Result<Vec<BookRecord>> { anyhow::bail!("no such table: books") }
    }

    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("books.sock"), LineProtocol::Command);
    let err = server::run(cfg, Arc::new(Broken), std::future::pending()).await.unwrap_err();
    assert!(format!("{err:#}").contains("no such table"));
}
