//! ClamAV daemon client.
//!
//! Line commands (PING, VERSION, RELOAD, SHUTDOWN, SCAN, CONTSCAN) are sent as
//! newline-terminated text and answered with text. INSTREAM streams a local
//! file to the daemon:
//!
//! 1. Send `zINSTREAM\0`
//! 2. Send the file as one chunk: `[4-byte big-endian length][data]`
//! 3. Send `[0x00 0x00 0x00 0x00]` to end the stream
//! 4. Read one reply line: `stream: OK` or `stream: <virus> FOUND`

use crate::transport::{TransportError, TransportProvider};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Most bytes accepted for a single-line reply.
pub const MAX_RESPONSE_LEN: u64 = 20000;

/// Most bytes accepted for a CONTSCAN reply, which has one line per scanned item.
pub const MAX_CONTSCAN_RESPONSE_LEN: u64 = 8 * 1024 * 1024;

/// Largest chunk the 4-byte INSTREAM length prefix can describe.
pub const MAX_CHUNK_LEN: u64 = u32::MAX as u64;

/// The only INSTREAM reply that counts as clean.
pub const STREAM_OK: &str = "stream: OK";

const INSTREAM_COMMAND: &[u8] = b"zINSTREAM\0";

const COPY_BUFFER_SIZE: usize = 65536;

/// Classified status of a scanned item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// Item is clean.
    Clean,
    /// Malware detected.
    Infected {
        /// Name of the matching signature.
        signature: String,
    },
    /// The daemon could not scan the item, or replied with something unrecognised.
    Error {
        /// Error message.
        message: String,
    },
}

impl ScanStatus {
    /// Classify a status string such as `OK`, `Eicar-Test-Signature FOUND`
    /// or `Access denied. ERROR`.
    pub fn parse(status: &str) -> Self {
        let status = status.trim();

        if status == "OK" {
            return ScanStatus::Clean;
        }

        if let Some(signature) = status.strip_suffix(" FOUND") {
            return ScanStatus::Infected {
                signature: signature.to_string(),
            };
        }

        let message = status.strip_suffix(" ERROR").unwrap_or(status);
        ScanStatus::Error {
            message: message.to_string(),
        }
    }
}

/// One `<path>: <status>` entry from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Path as reported by the daemon (`stream` for INSTREAM).
    pub path: String,
    /// Raw status text, trimmed.
    pub status: String,
}

impl ScanResult {
    /// True only for an explicit `OK`.
    pub fn is_clean(&self) -> bool {
        self.status == "OK"
    }

    /// Classify the raw status.
    pub fn verdict(&self) -> ScanStatus {
        ScanStatus::parse(&self.status)
    }
}

/// Error from ClamAV operations.
#[derive(Debug, thiserror::Error)]
pub enum ClamdError {
    /// The local file could not be opened or read.
    #[error("Cannot read {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Connecting to or talking with clamd failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Reply did not match the expected grammar.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Request argument cannot be framed as a single command line.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// File does not fit in a single INSTREAM chunk.
    #[error("File of {size} bytes exceeds the {max} byte INSTREAM chunk limit", max = MAX_CHUNK_LEN)]
    PayloadTooLarge { size: u64 },
}

/// ClamAV daemon client.
///
/// Holds no per-call state: every operation acquires its own connection from
/// the transport and releases it before returning.
#[derive(Debug, Clone)]
pub struct ClamdClient<T> {
    transport: T,
}

impl<T: TransportProvider> ClamdClient<T> {
    /// Create a new ClamAV client over the given transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Transport this client acquires connections from.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Check if clamd is alive. Never fails: any error reads as `false`.
    pub async fn ping(&self) -> bool {
        match self.send_command("PING", MAX_RESPONSE_LEN).await {
            Ok(response) => response == "PONG",
            Err(e) => {
                warn!(error = %e, "clamd ping failed");
                false
            }
        }
    }

    /// Get clamd version.
    pub async fn version(&self) -> Result<String, ClamdError> {
        let response = self.send_command("VERSION", MAX_RESPONSE_LEN).await?;
        if response.is_empty() {
            return Err(ClamdError::InvalidResponse(
                "empty reply to VERSION".to_string(),
            ));
        }
        Ok(response)
    }

    /// Ask clamd to reload its signature databases.
    pub async fn reload(&self) -> Result<Option<String>, ClamdError> {
        let response = self.send_command("RELOAD", MAX_RESPONSE_LEN).await?;
        Ok(non_empty(response))
    }

    /// Ask clamd to exit.
    pub async fn shutdown(&self) -> Result<Option<String>, ClamdError> {
        let response = self.send_command("SHUTDOWN", MAX_RESPONSE_LEN).await?;
        Ok(non_empty(response))
    }

    /// Scan a path on the daemon's filesystem. `true` only for an explicit `OK`.
    pub async fn scan_file(&self, path: &str) -> Result<bool, ClamdError> {
        Ok(self.scan_file_result(path).await?.is_clean())
    }

    /// Scan a path on the daemon's filesystem and return the raw status.
    pub async fn scan_file_result(&self, path: &str) -> Result<ScanResult, ClamdError> {
        check_argument(path)?;
        let response = self
            .send_command(&format!("SCAN {}", path), MAX_RESPONSE_LEN)
            .await?;
        parse_scan_reply(&response)
    }

    /// Scan a path recursively without stopping at the first detection.
    /// Results keep the daemon's order.
    pub async fn continue_scan(&self, path: &str) -> Result<Vec<ScanResult>, ClamdError> {
        check_argument(path)?;
        let response = self
            .send_command(&format!("CONTSCAN {}", path), MAX_CONTSCAN_RESPONSE_LEN)
            .await?;
        parse_contscan_reply(&response)
    }

    /// Stream a local file to clamd. `true` only for an exact `stream: OK`.
    pub async fn file_scan_in_stream(&self, path: impl AsRef<Path>) -> Result<bool, ClamdError> {
        let response = self.file_scan_in_stream_response(path).await?;
        Ok(response == STREAM_OK)
    }

    /// Stream a local file to clamd and return the trimmed reply line, which is
    /// empty if the daemon closed the connection without answering.
    pub async fn file_scan_in_stream_response(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<String, ClamdError> {
        let path = path.as_ref();

        // The file is opened and sized before any connection exists.
        let mut file = File::open(path).await.map_err(|source| ClamdError::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        let metadata = file.metadata().await.map_err(|source| ClamdError::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(ClamdError::FileIo {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ),
            });
        }
        let size = metadata.len();
        let chunk_len = chunk_len(size)?;

        debug!(
            file = %path.display(),
            size,
            "Starting ClamAV INSTREAM scan"
        );

        let mut stream = self.transport.acquire().await?;

        self.timed(stream.write_all(INSTREAM_COMMAND)).await?;
        self.timed(stream.write_all(&chunk_len.to_be_bytes())).await?;
        self.copy_body(&mut file, &mut stream, path, size).await?;

        // Zero-length chunk ends the stream
        self.timed(stream.write_all(&0u32.to_be_bytes())).await?;
        self.timed(stream.flush()).await?;

        let mut raw = Vec::new();
        let mut reader = BufReader::new((&mut stream).take(MAX_RESPONSE_LEN));
        self.timed(reader.read_until(b'\n', &mut raw)).await?;
        drop(reader);
        drop(stream);

        let response = trim_reply(&String::from_utf8_lossy(&raw)).to_string();
        debug!(response = %response, "ClamAV response");
        Ok(response)
    }

    /// Send one line command and read the whole reply. A reply longer than
    /// `limit` bytes is an error rather than a truncated result.
    async fn send_command(&self, command: &str, limit: u64) -> Result<String, ClamdError> {
        debug!(command, "Sending clamd command");

        let mut stream = self.transport.acquire().await?;

        let request = format!("{}\n", command);
        self.timed(stream.write_all(request.as_bytes())).await?;
        self.timed(stream.flush()).await?;

        // clamd closes the connection after answering a non-session command.
        let mut raw = Vec::new();
        self.timed((&mut stream).take(limit + 1).read_to_end(&mut raw))
            .await?;
        drop(stream);

        if raw.len() as u64 > limit {
            return Err(ClamdError::InvalidResponse(format!(
                "reply to {} exceeds {} bytes",
                command.split(' ').next().unwrap_or(command),
                limit
            )));
        }

        let response = trim_reply(&String::from_utf8_lossy(&raw)).to_string();
        debug!(response = %response, "ClamAV response");
        Ok(response)
    }

    /// Copy exactly `size` bytes of the file onto the stream.
    async fn copy_body(
        &self,
        file: &mut File,
        stream: &mut T::Stream,
        path: &Path,
        size: u64,
    ) -> Result<(), ClamdError> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut remaining = size;

        while remaining > 0 {
            let want = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
            let n = file
                .read(&mut buf[..want])
                .await
                .map_err(|source| ClamdError::FileIo {
                    path: path.to_path_buf(),
                    source,
                })?;
            if n == 0 {
                return Err(ClamdError::FileIo {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("file ended {} bytes short of its announced size", remaining),
                    ),
                });
            }
            self.timed(stream.write_all(&buf[..n])).await?;
            remaining -= n as u64;
        }

        Ok(())
    }

    /// Run one send or receive phase under the transport's deadline.
    async fn timed<R, F>(&self, fut: F) -> Result<R, TransportError>
    where
        F: Future<Output = std::io::Result<R>>,
    {
        match self.transport.io_timeout() {
            Some(limit) => match timeout(limit, fut).await {
                Ok(result) => result.map_err(TransportError::Io),
                Err(_) => Err(TransportError::Timeout),
            },
            None => fut.await.map_err(TransportError::Io),
        }
    }
}

/// Split a `<path>: <status>` line on its first colon.
pub fn parse_status_line(line: &str) -> Option<ScanResult> {
    let (path, status) = line.split_once(':')?;
    Some(ScanResult {
        path: path.to_string(),
        status: status.trim().to_string(),
    })
}

/// The status of a SCAN reply is whatever follows the last colon.
fn parse_scan_reply(response: &str) -> Result<ScanResult, ClamdError> {
    let (path, status) = response.rsplit_once(':').ok_or_else(|| {
        ClamdError::InvalidResponse(format!("no status in SCAN reply: {:?}", response))
    })?;
    Ok(ScanResult {
        path: path.to_string(),
        status: status.trim().to_string(),
    })
}

fn parse_contscan_reply(response: &str) -> Result<Vec<ScanResult>, ClamdError> {
    response
        .split('\n')
        .map(|line| {
            parse_status_line(line).ok_or_else(|| {
                ClamdError::InvalidResponse(format!("malformed CONTSCAN line: {:?}", line))
            })
        })
        .collect()
}

/// Length prefix for a single chunk covering the whole file.
fn chunk_len(size: u64) -> Result<u32, ClamdError> {
    u32::try_from(size).map_err(|_| ClamdError::PayloadTooLarge { size })
}

/// Strip surrounding whitespace and NUL. `z`-prefixed replies end in NUL.
fn trim_reply(raw: &str) -> &str {
    raw.trim_matches(|c: char| matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B'))
}

fn non_empty(response: String) -> Option<String> {
    if response.is_empty() {
        None
    } else {
        Some(response)
    }
}

/// Paths are sent inside a newline-terminated command.
fn check_argument(path: &str) -> Result<(), ClamdError> {
    if path.is_empty() {
        return Err(ClamdError::InvalidRequest("path is empty".to_string()));
    }
    if path.contains(['\n', '\0']) {
        return Err(ClamdError::InvalidRequest(format!(
            "path contains a line terminator: {:?}",
            path
        )));
    }
    Ok(())
}
