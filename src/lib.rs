//! Client for the ClamAV daemon.
//!
//! Talks clamd's line protocol (PING, VERSION, RELOAD, SHUTDOWN, SCAN,
//! CONTSCAN) and streams local files with INSTREAM.

pub mod clamd;
pub mod config;
pub mod transport;

pub use clamd::{
    parse_status_line, ClamdClient, ClamdError, ScanResult, ScanStatus, MAX_CHUNK_LEN,
    MAX_CONTSCAN_RESPONSE_LEN, MAX_RESPONSE_LEN, STREAM_OK,
};
pub use config::{ClamdConfig, Config, TransportKind};
pub use transport::{TcpTransport, TransportError, TransportProvider, UnixSocketTransport};
