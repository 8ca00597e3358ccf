use anyhow::{Context, Result};
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

const SOCKET_PERMISSIONS: u32 = 0o600; // rw-------

/// A listener the accept loop can drive, Unix or TCP.
pub trait Accept: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection, returning it with a printable peer label.
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;

    fn describe(&self) -> String;
}

/// Unix-domain socket listener that owns its socket file.
///
/// A stale file at the path is removed before binding and the file is removed
/// again when the listener is dropped.
#[derive(Debug)]
pub struct SocketListener {
    path: PathBuf,
    inner: UnixListener,
}

impl SocketListener {
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        remove_socket_file(&path).with_context(|| format!("removing stale socket {}", path.display()))?;

        let inner = UnixListener::bind(&path).with_context(|| format!("failed to create {} socket listener", path.display()))?;
        let listener = Self { path, inner };
        std::fs::set_permissions(&listener.path, std::fs::Permissions::from_mode(SOCKET_PERMISSIONS))
            .with_context(|| format!("failed to set socket {} permissions", listener.path.display()))?;
        Ok(listener)
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let Err(err) = remove_socket_file(&self.path) {
            tracing::warn!(path = %self.path.display(), %err, "error removing socket");
        }
    }
}

fn remove_socket_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

impl Accept for SocketListener {
    type Stream = UnixStream;

    async fn accept(&self) -> io::Result<(UnixStream, String)> {
        let (stream, _addr) = self.inner.accept().await?;
        let peer = match stream.peer_cred() {
            Ok(cred) => format!("unix:pid={}", cred.pid().unwrap_or(-1)),
            Err(_) => "unix".to_string(),
        };
        Ok((stream, peer))
    }

    fn describe(&self) -> String { format!("unix:{}", self.path.display()) }
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        Ok((stream, addr.to_string()))
    }

    fn describe(&self) -> String {
        match self.local_addr() {
            Ok(addr) => format!("tcp:{addr}"),
            Err(_) => "tcp".to_string(),
        }
    }
}
