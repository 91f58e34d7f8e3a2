//! Host serial port backed by the `serialport` crate.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use shared::{LinkResult, SerialDevice};

use crate::error::{link_error, ServerError, ServerResult};

pub struct SerialPortDevice {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialPortDevice {
    /// Open `device` at `baud_rate` (8N1).
    ///
    /// Reads are only issued after `bytes_to_read()` reports data, so the
    /// port timeout just caps the rare read that races a drained queue.
    pub fn open(device: &str, baud_rate: u32) -> ServerResult<Self> {
        let port = serialport::new(device, baud_rate)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|source| ServerError::SerialOpen {
                device: device.to_string(),
                source,
            })?;

        let _ = port.clear(serialport::ClearBuffer::All);
        log::info!("Opened {} at {} baud", device, baud_rate);

        Ok(Self {
            port,
            name: device.to_string(),
        })
    }
}

impl SerialDevice for SerialPortDevice {
    fn available(&mut self) -> usize {
        match self.port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => {
                log::warn!("{}: bytes_to_read failed: {}", self.name, e);
                0
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize> {
        self.port.read(buf).map_err(|e| link_error(&e))
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<usize> {
        self.port.write(data).map_err(|e| link_error(&e))
    }
}

impl std::fmt::Debug for SerialPortDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortDevice")
            .field("name", &self.name)
            .finish()
    }
}
