//! Server error types.

use std::io;
use std::path::PathBuf;

use shared::LinkError;
use thiserror::Error;

/// Errors that can stop the server during startup
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid relay config: {0}")]
    Relay(#[from] shared::ConfigError),
    #[error("Invalid escape sequence in '{0}'")]
    Escape(String),
    #[error("No serial device configured (use --device or \"device\" in the config file)")]
    NoDevice,
    #[error("Failed to open serial port {device}: {source}")]
    SerialOpen {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for server setup
pub type ServerResult<T> = Result<T, ServerError>;

/// Classify a std I/O error for the relay
pub fn link_error(err: &io::Error) -> LinkError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
            LinkError::WouldBlock
        }
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            LinkError::ConnectionReset
        }
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => {
            LinkError::Closed
        }
        _ => LinkError::Io(err.raw_os_error().unwrap_or(-1)),
    }
}
