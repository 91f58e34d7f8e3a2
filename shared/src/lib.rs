//! # Shared Line Relay Library
//!
//! This crate provides the core of the serial line server:
//!
//! - **Line Buffer**: fixed-capacity ring with terminator-based line extraction
//! - **Client Registry**: ordered set of live network connections
//! - **Relay**: one non-blocking tick that moves lines between serial and clients
//! - **Collaborator Traits**: serial device, listener and connection seams
//!
//! ## Architecture
//!
//! ```text
//! Serial RX ─────► LineBuffer (serial side) ─────► every client
//!                        │
//!                 (whole lines only)
//!                        │
//! Serial TX ◄───── LineBuffer (network side) ◄──── any client
//! ```
//!
//! ## Tick Order
//!
//! accept → serial drain → serial lines to clients → client drain →
//! network lines to serial → keepalive → prune and publish presence

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod buffer;
pub mod client;
pub mod config;
pub mod policy;
pub mod presence;
pub mod relay;
pub mod traits;

#[cfg(test)]
mod mock;

use core::fmt;

// Re-export main types for convenience
pub use buffer::{BufferError, BufferSlice, LineBuffer, MAX_TERMINATOR_LEN};
pub use client::{Client, ClientRegistry};
pub use config::{
    ConfigError, DirectionConfig, NetworkPartialPolicy, OverflowPolicy, RelayConfig,
};
pub use policy::{KeepalivePolicy, TimeoutTransform};
pub use presence::PresenceReporter;
pub use relay::{Direction, Relay, RelayStats};
pub use traits::{
    Connection, EmbeddedSerial, LinkError, LinkResult, Listener, Millis, SerialDevice,
};

/// Library version reported in the configuration dump
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest single read from the serial device or a client socket
pub const CHUNK_SIZE: usize = 128;

/// Default TCP port of the line server
pub const DEFAULT_PORT: u16 = 6638;

/// Pending-connection queue length of the listening socket
pub const LISTEN_BACKLOG: u32 = 8;

/// Renders bytes for log lines, escaping control characters.
///
/// `Escaped(b"OK\r\n")` displays as `OK\r\n`.
pub struct Escaped<'a>(pub &'a [u8]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in self.0 {
            for c in core::ascii::escape_default(byte) {
                fmt::Write::write_char(f, c as char)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

/// Renders bytes as space separated upper-case hex, e.g. `0D 0A`.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
