//! Connections to the ClamAV daemon.
//!
//! The client never opens sockets itself. It asks a [`TransportProvider`] for a
//! fresh stream at the start of every command and drops it when the command
//! finishes, so no connection outlives a call.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;
use tracing::{trace, warn};

/// Default clamd Unix socket.
pub const DEFAULT_SOCKET_PATH: &str = "/run/clamav/clamd.ctl";

/// Default clamd TCP host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default clamd TCP port.
pub const DEFAULT_PORT: u16 = 3310;

/// Error talking to the daemon.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection to clamd failed.
    #[error("Connection to clamd failed: {0}")]
    Connect(std::io::Error),
    /// A connect, send or receive deadline elapsed.
    #[error("Operation timed out")]
    Timeout,
    /// Read or write failed on an open connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supplies one bidirectional byte stream per command.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Stream handed to the client for the duration of a single command.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Open a new connection to the daemon.
    async fn acquire(&self) -> Result<Self::Stream, TransportError>;

    /// Deadline the client applies to each send and receive phase.
    fn io_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Connects to clamd over a Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UnixSocketTransport {
    /// Create a transport for the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>, timeout_ms: u64) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Socket this transport connects to.
    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

impl Default for UnixSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH, 30000)
    }
}

#[async_trait]
impl TransportProvider for UnixSocketTransport {
    type Stream = UnixStream;

    async fn acquire(&self) -> Result<UnixStream, TransportError> {
        trace!(socket = %self.socket_path.display(), "Connecting to clamd");
        match timeout(self.timeout, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(s)) => Ok(s),
            Ok(Err(e)) => Err(TransportError::Connect(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn io_timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}

/// Connects to clamd over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpTransport {
    /// Create a transport for `host:port`.
    pub fn new(host: impl Into<String>, port: u16, timeout_ms: u64) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, 30000)
    }
}

#[async_trait]
impl TransportProvider for TcpTransport {
    type Stream = TcpStream;

    async fn acquire(&self) -> Result<TcpStream, TransportError> {
        let address = self.address();
        trace!(address = %address, "Connecting to clamd");
        match timeout(self.timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(s)) => {
                // Small request frames go out immediately.
                if let Err(e) = s.set_nodelay(true) {
                    warn!(error = %e, "Failed to set TCP_NODELAY on clamd connection");
                }
                Ok(s)
            }
            Ok(Err(e)) => Err(TransportError::Connect(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn io_timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}
