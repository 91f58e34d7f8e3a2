//! Server configuration: JSON file + CLI overrides.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use shared::RelayConfig;

use crate::error::{ServerError, ServerResult};
use crate::Cli;

/// Top-level config file structure. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Serial device path, e.g. `/dev/ttyUSB0`
    pub device: Option<String>,
    pub baud_rate: u32,
    /// Delay between relay ticks
    pub tick_interval_ms: u64,
    /// Send stale serial partials to clients with the terminator appended
    pub forward_stale_serial: bool,
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: shared::DEFAULT_PORT,
            device: None,
            baud_rate: 115_200,
            tick_interval_ms: 5,
            forward_stale_serial: false,
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Config file (if any) with command line flags layered on top
    pub fn resolve(cli: &Cli) -> ServerResult<Self> {
        let mut config = match cli.config.as_deref() {
            Some(path) => {
                let config = Self::load(path)?;
                log::info!("Loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.apply_cli(cli)?;
        config.relay.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) -> ServerResult<()> {
        if let Some(bind) = cli.bind {
            self.bind = bind;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(device) = &cli.device {
            self.device = Some(device.clone());
        }
        if let Some(baud) = cli.baud {
            self.baud_rate = baud;
        }
        if let Some(ms) = cli.tick_interval {
            self.tick_interval_ms = ms.max(1);
        }
        if cli.forward_stale_serial {
            self.forward_stale_serial = true;
        }

        let relay = &mut self.relay;
        if let Some(term) = &cli.serial_terminator {
            relay.serial.terminator = unescape(term)?;
        }
        if let Some(term) = &cli.network_terminator {
            relay.network.terminator = unescape(term)?;
        }
        if let Some(size) = cli.serial_buffer_size {
            relay.serial.buffer_size = size;
        }
        if let Some(size) = cli.network_buffer_size {
            relay.network.buffer_size = size;
        }
        if let Some(ms) = cli.serial_timeout {
            relay.serial.flush_timeout_ms = ms;
        }
        if let Some(ms) = cli.network_timeout {
            relay.network.flush_timeout_ms = ms;
        }
        if let Some(ms) = cli.keepalive_interval {
            relay.keepalive_interval_ms = ms;
        }
        if let Some(message) = &cli.keepalive_message {
            relay.keepalive_message = unescape(message)?;
        }
        if cli.drop_on_serial_timeout {
            relay.drop_clients_on_serial_timeout = true;
        }
        Ok(())
    }
}

/// Expand `\r`, `\n`, `\t`, `\0`, `\\` and `\xHH` (ASCII only) escapes
pub fn unescape(input: &str) -> ServerResult<String> {
    let invalid = || ServerError::Escape(input.to_string());
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next().ok_or_else(invalid)? {
            'r' => out.push('\r'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 {
                    return Err(invalid());
                }
                let value = u8::from_str_radix(&hex, 16).map_err(|_| invalid())?;
                if !value.is_ascii() {
                    return Err(invalid());
                }
                out.push(value as char);
            }
            _ => return Err(invalid()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use shared::NetworkPartialPolicy;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("\\r\\n").unwrap(), "\r\n");
        assert_eq!(unescape("OK\\t\\\\").unwrap(), "OK\t\\");
        assert_eq!(unescape("\\x03").unwrap(), "\u{3}");
        assert_eq!(unescape("plain").unwrap(), "plain");
        assert!(unescape("\\").is_err());
        assert!(unescape("\\q").is_err());
        assert!(unescape("\\x4").is_err());
        assert!(unescape("\\xZZ").is_err());
        assert!(unescape("\\xFF").is_err());
    }

    #[test]
    fn test_json_sections_are_optional() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "port": 7000,
                "device": "/dev/ttyUSB0",
                "relay": {
                    "network": { "terminator": "\n", "flush_timeout_ms": 0 },
                    "network_partial": "forward"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.relay.network.terminator, "\n");
        assert_eq!(config.relay.network.buffer_size, 256);
        assert_eq!(config.relay.network.flush_timeout_ms, 0);
        assert_eq!(config.relay.serial.terminator, "\r\n");
        assert_eq!(config.relay.network_partial, NetworkPartialPolicy::Forward);
    }

    #[test]
    fn test_network_section_with_only_size_keeps_terminator() {
        let config: ServerConfig =
            serde_json::from_str(r#"{ "relay": { "network": { "buffer_size": 64 } } }"#).unwrap();

        assert_eq!(config.relay.network.buffer_size, 64);
        assert_eq!(config.relay.network.terminator, "\r");
        assert_eq!(config.relay.network.flush_timeout_ms, 300);
        assert_eq!(config.relay.serial.terminator, "\r\n");
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "line-server",
            "--device",
            "/dev/ttyS1",
            "--port",
            "2323",
            "--serial-terminator",
            "\\n",
            "--keepalive-interval",
            "5000",
            "--keepalive-message",
            "AT",
            "--drop-on-serial-timeout",
        ]);
        let config = ServerConfig::resolve(&cli).unwrap();

        assert_eq!(config.port, 2323);
        assert_eq!(config.device.as_deref(), Some("/dev/ttyS1"));
        assert_eq!(config.relay.serial.terminator, "\n");
        assert_eq!(config.relay.network.terminator, "\r");
        assert_eq!(config.relay.keepalive_interval_ms, 5_000);
        assert_eq!(config.relay.keepalive_message, "AT");
        assert!(config.relay.drop_clients_on_serial_timeout);
    }

    #[test]
    fn test_resolve_rejects_long_terminator() {
        let cli = Cli::parse_from(["line-server", "--network-terminator", "\\r\\n\\r\\n\\r"]);
        assert!(matches!(
            ServerConfig::resolve(&cli),
            Err(ServerError::Relay(shared::ConfigError::InvalidTerminator))
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let result = ServerConfig::load(Path::new("/nonexistent/line-server.json"));
        assert!(matches!(result, Err(ServerError::ConfigRead { .. })));
    }
}
