//! # Collaborator Traits
//!
//! The relay never touches a socket or a UART directly. It talks to three
//! non-blocking seams defined here:
//!
//! - [`SerialDevice`]: byte stream with an `available()` probe
//! - [`Listener`]: passive socket yielding new [`Connection`]s
//! - [`Connection`]: one accepted client socket
//!
//! Every method must return immediately. "Nothing right now" is reported as
//! [`LinkError::WouldBlock`], never by waiting.

use alloc::string::String;
use core::fmt;

/// Millisecond timestamp from a free-running, wrapping tick counter
pub type Millis = u32;

/// Classification of a failed transport operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// No data (or no buffer space) right now; try again next tick
    WouldBlock,
    /// The peer closed the connection
    Closed,
    /// The peer reset the connection
    ConnectionReset,
    /// Any other failure, with the platform error code when known
    Io(i32),
}

impl LinkError {
    /// Whether this error ends the connection it was raised on
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, LinkError::WouldBlock)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::WouldBlock => f.write_str("operation would block"),
            LinkError::Closed => f.write_str("connection closed by peer"),
            LinkError::ConnectionReset => f.write_str("connection reset by peer"),
            LinkError::Io(code) => write!(f, "i/o error (code {})", code),
        }
    }
}

/// Result type alias for transport operations
pub type LinkResult<T> = Result<T, LinkError>;

/// A byte-oriented serial device (UART or similar)
pub trait SerialDevice {
    /// Number of bytes that can be read right now without blocking
    fn available(&mut self) -> usize;

    /// Read up to `buf.len()` bytes. Partial reads are allowed.
    fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize>;

    /// Write `data`, best effort. Returns how many bytes were taken.
    fn write(&mut self, data: &[u8]) -> LinkResult<usize>;
}

/// One accepted, non-blocking client socket
pub trait Connection {
    /// Read into `buf`.
    ///
    /// `Ok(0)` means the peer closed the connection.
    fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize>;

    /// Write `data`, best effort. Short writes are not retried.
    fn write(&mut self, data: &[u8]) -> LinkResult<usize>;

    /// Shut down both the read and the write direction
    fn shutdown(&mut self);

    /// Close the socket from our side
    fn close(&mut self) {
        self.shutdown();
    }
}

/// A passive, non-blocking listening socket
pub trait Listener {
    /// Connection type produced by `accept`
    type Connection: Connection;

    /// Accept one pending connection together with a printable peer name.
    ///
    /// Returns `Ok(None)` when nobody is waiting.
    fn accept(&mut self) -> LinkResult<Option<(Self::Connection, String)>>;
}

/// Adapter exposing any `embedded-io` UART as a [`SerialDevice`]
///
/// `embedded-io` only reports readiness, not a byte count, so `available()`
/// answers with a full chunk whenever the device is ready. The relay bounds
/// each read by that value and keeps polling while the device stays ready.
pub struct EmbeddedSerial<T> {
    inner: T,
}

impl<T> EmbeddedSerial<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn map_embedded_error<E: embedded_io::Error>(err: E) -> LinkError {
    use embedded_io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => LinkError::ConnectionReset,
        ErrorKind::NotConnected | ErrorKind::BrokenPipe => LinkError::Closed,
        ErrorKind::TimedOut | ErrorKind::Interrupted => LinkError::WouldBlock,
        _ => LinkError::Io(-1),
    }
}

impl<T> SerialDevice for EmbeddedSerial<T>
where
    T: embedded_io::Read + embedded_io::ReadReady + embedded_io::Write,
{
    fn available(&mut self) -> usize {
        match self.inner.read_ready() {
            Ok(true) => crate::CHUNK_SIZE,
            _ => 0,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        embedded_io::Read::read(&mut self.inner, buf).map_err(map_embedded_error)
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<usize> {
        embedded_io::Write::write_all(&mut self.inner, data).map_err(map_embedded_error)?;
        Ok(data.len())
    }
}
