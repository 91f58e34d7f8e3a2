//! Relay configuration.
//!
//! Consumed once when the relay is built. Terminators are kept as text so a
//! config file can spell them the usual way (`"\r\n"`).

use alloc::string::String;
use core::fmt;
use serde::{Deserialize, Deserializer, Serialize};

use crate::buffer::{BufferError, LineBuffer, MAX_TERMINATOR_LEN};
use crate::traits::Millis;

/// Buffer and timeout settings for one direction of the relay.
///
/// Inside a [`RelayConfig`] every field may be omitted. A missing field takes
/// the default of its own direction, so a `network` section holding only
/// `buffer_size` still splits on `"\r"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionConfig {
    /// Ring capacity in bytes
    pub buffer_size: usize,
    /// Line terminator
    pub terminator: String,
    /// Age after which a partial line is stale. 0 disables timeout handling.
    pub flush_timeout_ms: Millis,
}

impl DirectionConfig {
    fn with_terminator(terminator: &str) -> Self {
        Self {
            buffer_size: 256,
            terminator: String::from(terminator),
            flush_timeout_ms: 300,
        }
    }

    /// Serial → network defaults: 256 bytes, `"\r\n"`, 300 ms
    pub fn serial() -> Self {
        Self::with_terminator("\r\n")
    }

    /// Network → serial defaults: 256 bytes, `"\r"`, 300 ms
    pub fn network() -> Self {
        Self::with_terminator("\r")
    }

    /// Build the line buffer described by this section
    pub fn build_buffer(&self) -> Result<LineBuffer, ConfigError> {
        LineBuffer::new(self.buffer_size, self.terminator.as_bytes()).map_err(|e| match e {
            BufferError::ZeroCapacity => ConfigError::ZeroBufferSize,
            BufferError::InvalidTerminator | BufferError::Overflow => {
                ConfigError::InvalidTerminator
            }
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        let len = self.terminator.len();
        if len == 0 || len > MAX_TERMINATOR_LEN {
            return Err(ConfigError::InvalidTerminator);
        }
        Ok(())
    }
}

/// A direction section as written in a config file
#[derive(Default, Deserialize)]
#[serde(default)]
struct DirectionSection {
    buffer_size: Option<usize>,
    terminator: Option<String>,
    flush_timeout_ms: Option<Millis>,
}

impl DirectionSection {
    fn over(self, base: DirectionConfig) -> DirectionConfig {
        DirectionConfig {
            buffer_size: self.buffer_size.unwrap_or(base.buffer_size),
            terminator: self.terminator.unwrap_or(base.terminator),
            flush_timeout_ms: self.flush_timeout_ms.unwrap_or(base.flush_timeout_ms),
        }
    }
}

fn serial_section<'de, D>(deserializer: D) -> Result<DirectionConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let section = DirectionSection::deserialize(deserializer)?;
    Ok(section.over(DirectionConfig::serial()))
}

fn network_section<'de, D>(deserializer: D) -> Result<DirectionConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let section = DirectionSection::deserialize(deserializer)?;
    Ok(section.over(DirectionConfig::network()))
}

/// What happens to serial bytes that do not fit into the serial-side buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverflowPolicy {
    /// Leave them in the device until the next tick
    #[default]
    Defer,
    /// Read and drop them, counting the loss
    Drop,
}

/// What happens to a stale network-side partial when no transform is set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkPartialPolicy {
    /// Log and drop it
    #[default]
    Discard,
    /// Write it to serial unchanged
    Forward,
}

/// Full relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Serial → network direction
    #[serde(deserialize_with = "serial_section")]
    pub serial: DirectionConfig,
    /// Network → serial direction
    #[serde(deserialize_with = "network_section")]
    pub network: DirectionConfig,
    /// Interval of the idle keepalive. 0 disables it.
    pub keepalive_interval_ms: Millis,
    /// Keepalive payload, sent with the network terminator appended
    pub keepalive_message: String,
    /// Close every client when a serial partial goes stale
    pub drop_clients_on_serial_timeout: bool,
    /// Drop serial input while nobody is connected
    pub discard_serial_without_clients: bool,
    pub overflow: OverflowPolicy,
    pub network_partial: NetworkPartialPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            serial: DirectionConfig::serial(),
            network: DirectionConfig::network(),
            keepalive_interval_ms: 0,
            keepalive_message: String::new(),
            drop_clients_on_serial_timeout: false,
            discard_serial_without_clients: true,
            overflow: OverflowPolicy::Defer,
            network_partial: NetworkPartialPolicy::Discard,
        }
    }
}

impl RelayConfig {
    /// Check both directions
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.serial.validate()?;
        self.network.validate()
    }

    /// Whether the keepalive can ever fire
    pub fn keepalive_enabled(&self) -> bool {
        self.keepalive_interval_ms > 0 && !self.keepalive_message.is_empty()
    }
}

/// Errors raised while validating a [`RelayConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A buffer size of zero
    ZeroBufferSize,
    /// Terminator empty or longer than [`MAX_TERMINATOR_LEN`] bytes
    InvalidTerminator,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroBufferSize => f.write_str("buffer size must be non-zero"),
            ConfigError::InvalidTerminator => write!(
                f,
                "terminator must be between 1 and {} bytes",
                MAX_TERMINATOR_LEN
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}
