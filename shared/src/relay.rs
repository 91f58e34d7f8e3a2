//! # Relay Orchestrator
//!
//! Owns one [`LineBuffer`] per direction, the client registry and the
//! serial/listener handles, and moves data between them one tick at a time.
//!
//! ## Tick
//!
//! ```text
//! ┌────────┐  ┌─────────────┐  ┌──────────────┐  ┌─────────────┐
//! │ accept │─►│ serial →    │─►│ serial lines │─►│ clients →   │
//! └────────┘  │ serial buf  │  │ → clients    │  │ network buf │
//!             └─────────────┘  └──────────────┘  └─────────────┘
//!                                                        │
//!             ┌─────────────┐  ┌──────────────┐  ┌───────▼──────┐
//!             │ prune and   │◄─│  keepalive   │◄─│ network lines│
//!             │ publish     │  │  (no clients)│  │ → serial     │
//!             └─────────────┘  └──────────────┘  └──────────────┘
//! ```
//!
//! Every step is non-blocking. Failures degrade one line or one client and
//! are reported through logs and [`RelayStats`]; a tick never fails.

use serde::Serialize;

use crate::buffer::LineBuffer;
use crate::client::ClientRegistry;
use crate::config::{ConfigError, NetworkPartialPolicy, OverflowPolicy, RelayConfig};
use crate::policy::{KeepalivePolicy, TimeoutTransform};
use crate::presence::PresenceReporter;
use crate::traits::{LinkError, Listener, Millis, SerialDevice};
use crate::{Escaped, Hex, CHUNK_SIZE, VERSION};

/// Direction currently being flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    SerialToNetwork,
    NetworkToSerial,
}

/// Counters collected across ticks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Bytes read from serial into the serial-side buffer
    pub serial_bytes_in: u64,
    /// Complete lines sent to clients
    pub serial_lines: u64,
    /// Bytes read from clients into the network-side buffer
    pub network_bytes_in: u64,
    /// Complete lines written to serial
    pub network_lines: u64,
    /// Serial bytes dropped because the serial-side buffer was full
    pub serial_overflow_drops: u64,
    /// Client bytes dropped because the network-side buffer was full
    pub network_overflow_drops: u64,
    /// Serial bytes dropped because nobody was connected
    pub serial_discarded: u64,
    pub serial_stale_partials: u64,
    pub network_stale_partials: u64,
    pub keepalives_sent: u64,
    pub connections_accepted: u64,
    /// Clients closed by the drop-on-serial-timeout policy
    pub clients_dropped: u64,
}

/// Serial ⇄ multi-client line relay
pub struct Relay<S: SerialDevice, L: Listener> {
    config: RelayConfig,
    serial: S,
    listener: L,
    serial_buf: Option<LineBuffer>,
    network_buf: Option<LineBuffer>,
    clients: ClientRegistry<L::Connection>,
    presence: PresenceReporter,
    keepalive: KeepalivePolicy,
    serial_transform: Option<TimeoutTransform>,
    network_transform: Option<TimeoutTransform>,
    /// Phase marker, set while one direction is being flushed
    in_progress: Option<Direction>,
    stats: RelayStats,
    active: bool,
}

impl<S: SerialDevice, L: Listener> Relay<S, L> {
    /// Build a relay. Buffers are created on [`setup`](Self::setup) unless
    /// installed beforehand.
    pub fn new(config: RelayConfig, serial: S, listener: L) -> Result<Self, ConfigError> {
        config.validate()?;
        let keepalive = KeepalivePolicy::new(
            config.keepalive_interval_ms,
            config.keepalive_message.as_bytes(),
            config.network.terminator.as_bytes(),
        );

        Ok(Self {
            config,
            serial,
            listener,
            serial_buf: None,
            network_buf: None,
            clients: ClientRegistry::new(),
            presence: PresenceReporter::new(),
            keepalive,
            serial_transform: None,
            network_transform: None,
            in_progress: None,
            stats: RelayStats::default(),
            active: false,
        })
    }

    /// Install the serial → network buffer instead of building it from config
    pub fn set_serial_buffer(&mut self, buffer: LineBuffer) {
        self.serial_buf = Some(buffer);
    }

    /// Install the network → serial buffer instead of building it from config
    pub fn set_network_buffer(&mut self, buffer: LineBuffer) {
        self.network_buf = Some(buffer);
    }

    pub fn set_serial_timeout_transform(&mut self, transform: TimeoutTransform) {
        self.serial_transform = Some(transform);
    }

    pub fn set_network_timeout_transform(&mut self, transform: TimeoutTransform) {
        self.network_transform = Some(transform);
    }

    /// Observers for connection presence
    pub fn presence_mut(&mut self) -> &mut PresenceReporter {
        &mut self.presence
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn clients(&self) -> &ClientRegistry<L::Connection> {
        &self.clients
    }

    pub fn serial_buffer(&self) -> Option<&LineBuffer> {
        self.serial_buf.as_ref()
    }

    pub fn network_buffer(&self) -> Option<&LineBuffer> {
        self.network_buf.as_ref()
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Create missing buffers, dump the configuration and publish presence.
    ///
    /// Runs implicitly on the first [`tick`](Self::tick).
    pub fn setup(&mut self) -> Result<(), ConfigError> {
        if self.serial_buf.is_none() {
            let buffer = self.config.serial.build_buffer()?;
            log::info!(
                "Serial buffer was not set explicitly, using size {} terminator '{}'",
                buffer.capacity(),
                Escaped(buffer.terminator())
            );
            self.serial_buf = Some(buffer);
        }
        if self.network_buf.is_none() {
            let buffer = self.config.network.build_buffer()?;
            log::info!(
                "Network buffer was not set explicitly, using size {} terminator '{}'",
                buffer.capacity(),
                Escaped(buffer.terminator())
            );
            self.network_buf = Some(buffer);
        }

        self.active = true;
        self.log_config();
        self.presence.publish(self.clients.len());
        Ok(())
    }

    /// Log the effective configuration
    pub fn log_config(&self) {
        log::info!("Line relay {}:", VERSION);
        if let Some(buffer) = self.serial_buf.as_ref() {
            log::info!(
                "- Serial buffer: size={}, terminator={}",
                buffer.capacity(),
                Hex(buffer.terminator())
            );
        }
        log::info!("- Serial flush timeout: {}ms", self.config.serial.flush_timeout_ms);
        if let Some(buffer) = self.network_buf.as_ref() {
            log::info!(
                "- Network buffer: size={}, terminator={}",
                buffer.capacity(),
                Hex(buffer.terminator())
            );
        }
        log::info!("- Network flush timeout: {}ms", self.config.network.flush_timeout_ms);
        if self.keepalive.is_enabled() {
            log::info!(
                "- Keepalive: '{}' every {}ms",
                self.config.keepalive_message,
                self.config.keepalive_interval_ms
            );
        }
        log::info!(
            "- Overflow: {:?}, stale network partial: {:?}, drop clients on serial timeout: {}",
            self.config.overflow,
            self.config.network_partial,
            self.config.drop_clients_on_serial_timeout
        );
    }

    /// Run one full pass. Never blocks.
    pub fn tick(&mut self, now: Millis) {
        if !self.active {
            if let Err(e) = self.setup() {
                log::error!("Relay setup failed: {}", e);
                return;
            }
        }

        self.accept();
        self.read_serial(now);
        self.flush_serial_lines(now);
        self.read_clients(now);
        self.flush_network_lines(now);
        self.send_keepalive(now);
        self.cleanup();
    }

    /// Shut down both directions of every client socket
    pub fn shutdown(&mut self) {
        log::info!("Shutting down {} client(s)", self.clients.len());
        self.clients.shutdown_all();
    }

    fn accept(&mut self) {
        let (connection, identifier) = match self.listener.accept() {
            Ok(Some(accepted)) => accepted,
            Ok(None) | Err(LinkError::WouldBlock) => return,
            Err(e) => {
                log::warn!("Accept failed: {}", e);
                return;
            }
        };

        if !self.clients.has_active() {
            log::warn!("No active clients connected, flushing serial RX buffer");
            if let Some(buffer) = self.serial_buf.as_mut() {
                buffer.clear();
            }
            self.flush_serial_rx();
        }

        log::debug!("New client connected from {}", identifier);
        self.clients.push(connection, identifier);
        self.stats.connections_accepted += 1;
        self.presence.update(self.clients.len());
    }

    /// Throw away whatever the serial device has queued
    fn flush_serial_rx(&mut self) {
        let mut count = 0;
        while self.serial.available() > 0 {
            match discard_serial(&mut self.serial) {
                Some(n) => count += n,
                None => break,
            }
        }
        if count > 0 {
            log::debug!("Flushed {} bytes from serial RX buffer", count);
            self.stats.serial_discarded += count as u64;
        }
    }

    fn read_serial(&mut self, now: Millis) {
        if self.in_progress == Some(Direction::NetworkToSerial) {
            return;
        }
        let Some(buffer) = self.serial_buf.as_mut() else {
            return;
        };

        loop {
            let available = self.serial.available();
            if available == 0 {
                break;
            }

            if self.config.discard_serial_without_clients && !self.clients.has_active() {
                match discard_serial(&mut self.serial) {
                    Some(n) => {
                        log::trace!("Discarded {} bytes from serial (no clients connected)", n);
                        self.stats.serial_discarded += n as u64;
                        continue;
                    }
                    None => break,
                }
            }

            let chunk = buffer.next_write_chunk();
            if chunk.is_empty() {
                match self.config.overflow {
                    OverflowPolicy::Defer => break,
                    OverflowPolicy::Drop => match discard_serial(&mut self.serial) {
                        Some(n) => {
                            log::warn!("Serial buffer overflow, dropped {} bytes", n);
                            self.stats.serial_overflow_drops += n as u64;
                            continue;
                        }
                        None => break,
                    },
                }
            }

            let len = available.min(chunk.len()).min(CHUNK_SIZE);
            match self.serial.read(&mut chunk[..len]) {
                Ok(0) => break,
                Ok(n) => {
                    log::trace!("Read {} bytes from serial of {} available", n, available);
                    if let Err(e) = buffer.advance_head(n, now) {
                        log::error!("Serial buffer commit of {} bytes failed: {}", n, e);
                        break;
                    }
                    self.stats.serial_bytes_in += n as u64;
                }
                Err(LinkError::WouldBlock) => break,
                Err(e) => {
                    log::error!("Serial read failed for {} bytes: {}", len, e);
                    break;
                }
            }
        }
    }

    fn flush_serial_lines(&mut self, now: Millis) {
        let Some(buffer) = self.serial_buf.as_mut() else {
            return;
        };
        let outer = self.in_progress.replace(Direction::SerialToNetwork);

        while let Some(line) = buffer.read_line() {
            log::debug!("Serial → clients [line]: '{}'", Escaped(&line));
            self.clients.broadcast(&line);
            self.stats.serial_lines += 1;
        }

        let timeout = self.config.serial.flush_timeout_ms;
        if timeout > 0 {
            if let Some(partial) = buffer.flush_if_idle(now, timeout) {
                self.stats.serial_stale_partials += 1;
                match self.serial_transform.as_ref() {
                    Some(transform) => {
                        let processed = transform(&partial);
                        if processed.is_empty() {
                            log::warn!("Serial line timed out and was discarded by transform");
                        } else {
                            log::warn!("Serial → clients [timeout flush]: '{}'", Escaped(&processed));
                            self.clients.broadcast(&processed);
                        }
                    }
                    None => log::warn!(
                        "Serial line timed out without terminator, discarding partial: size={}",
                        partial.len()
                    ),
                }
                buffer.clear();

                if self.config.drop_clients_on_serial_timeout && self.clients.has_active() {
                    log::warn!("Serial timeout, dropping network clients");
                    let before = self.clients.active_count();
                    self.clients.close_all();
                    self.stats.clients_dropped += before as u64;
                }
            }
        }

        self.in_progress = outer;
    }

    fn read_clients(&mut self, now: Millis) {
        let Some(buffer) = self.network_buf.as_mut() else {
            return;
        };
        let mut scratch = [0u8; CHUNK_SIZE];

        for client in self.clients.active_mut() {
            loop {
                match client.read(&mut scratch) {
                    Ok(n) => {
                        let written = buffer.write_many(&scratch[..n], now);
                        self.stats.network_bytes_in += written as u64;
                        if written < n {
                            log::warn!(
                                "Network buffer overflow, dropped {} bytes from {}",
                                n - written,
                                client.identifier()
                            );
                            self.stats.network_overflow_drops += (n - written) as u64;
                        }
                    }
                    Err(LinkError::WouldBlock) => break,
                    Err(LinkError::Closed) | Err(LinkError::ConnectionReset) => {
                        log::debug!("Client {} disconnected during read", client.identifier());
                        break;
                    }
                    Err(e) => {
                        log::warn!("Error reading from client {}: {}", client.identifier(), e);
                        break;
                    }
                }
            }
        }
    }

    fn flush_network_lines(&mut self, now: Millis) {
        if let Some(direction) = self.in_progress {
            log::debug!("Skipping network flush, {:?} still in progress", direction);
            return;
        }
        let Some(buffer) = self.network_buf.as_mut() else {
            return;
        };
        self.in_progress = Some(Direction::NetworkToSerial);

        // A line leaves the buffer only once serial took it
        while let Some(command) = buffer.peek_line() {
            log::debug!("Clients → serial [line]: '{}'", Escaped(&command));
            if let Err(e) = write_serial(&mut self.serial, &command) {
                log::error!("Serial write failed, abandoning flush until next tick: {}", e);
                self.in_progress = None;
                return;
            }
            buffer.consume(command.len());
            self.stats.network_lines += 1;
        }

        let timeout = self.config.network.flush_timeout_ms;
        if timeout > 0 {
            if let Some(partial) = buffer.flush_if_idle(now, timeout) {
                self.stats.network_stale_partials += 1;
                let outgoing = match self.network_transform.as_ref() {
                    Some(transform) => {
                        let processed = transform(&partial);
                        if processed.is_empty() {
                            log::warn!("Network input timed out and was discarded by transform");
                            None
                        } else {
                            Some(processed)
                        }
                    }
                    None => match self.config.network_partial {
                        NetworkPartialPolicy::Discard => {
                            log::warn!(
                                "Network input timed out without terminator, discarding partial: size={}",
                                partial.len()
                            );
                            None
                        }
                        NetworkPartialPolicy::Forward => Some(partial),
                    },
                };

                if let Some(data) = outgoing {
                    log::warn!("Clients → serial [timeout flush]: '{}'", Escaped(&data));
                    if let Err(e) = write_serial(&mut self.serial, &data) {
                        log::error!("Serial write of stale partial failed: {}", e);
                    }
                }
                buffer.clear();
            }
        }

        self.in_progress = None;
    }

    fn send_keepalive(&mut self, now: Millis) {
        let clients = self.clients.active_count();
        if clients > 0 {
            self.keepalive.restart(now);
        }
        let Some(payload) = self.keepalive.due(now, clients) else {
            return;
        };

        match write_serial(&mut self.serial, payload) {
            Ok(()) => {
                log::debug!("Serial keepalive sent: '{}'", Escaped(payload));
                self.keepalive.restart(now);
                self.stats.keepalives_sent += 1;
            }
            Err(e) => log::error!("Serial keepalive failed: {}", e),
        }
    }

    fn cleanup(&mut self) {
        if self.clients.prune() > 0 {
            self.presence.update(self.clients.len());
        }

        if self.clients.is_empty() {
            if let Some(direction) = self.in_progress.take() {
                log::warn!("{:?} marked in progress but no clients, clearing flag", direction);
            }
        }
    }
}

/// Read and drop up to one chunk from serial. `None` when nothing was read.
fn discard_serial<S: SerialDevice>(serial: &mut S) -> Option<usize> {
    let mut scratch = [0u8; CHUNK_SIZE];
    let len = serial.available().min(CHUNK_SIZE);
    if len == 0 {
        return None;
    }
    match serial.read(&mut scratch[..len]) {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(LinkError::WouldBlock) => None,
        Err(e) => {
            log::error!("Serial read failed while discarding: {}", e);
            None
        }
    }
}

fn write_serial<S: SerialDevice>(serial: &mut S, data: &[u8]) -> Result<(), LinkError> {
    let written = serial.write(data)?;
    if written < data.len() {
        log::warn!("Short serial write: {} of {} bytes", written, data.len());
    }
    Ok(())
}
