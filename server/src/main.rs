//! Line Server
//!
//! Relays terminator-delimited lines between one serial port and any number
//! of TCP clients.
//!
//! Usage:
//!   line-server --device /dev/ttyUSB0 --port 6638
//!   line-server --config relay.json --log-level debug

mod config;
mod driver;
mod error;
mod net;
mod serial;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use shared::{Millis, Relay, VERSION};

use config::ServerConfig;
use error::{ServerError, ServerResult};
use net::TcpLineListener;
use serial::SerialPortDevice;

#[derive(Parser, Debug)]
#[command(name = "line-server")]
#[command(version = VERSION)]
#[command(about = "Serial to TCP line relay")]
pub struct Cli {
    /// JSON config file. Flags override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial device path
    #[arg(short, long)]
    pub device: Option<String>,

    #[arg(short, long)]
    pub baud: Option<u32>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Serial line terminator, escapes like \r\n allowed
    #[arg(long)]
    pub serial_terminator: Option<String>,

    /// Network line terminator, escapes like \r allowed
    #[arg(long)]
    pub network_terminator: Option<String>,

    #[arg(long)]
    pub serial_buffer_size: Option<usize>,

    #[arg(long)]
    pub network_buffer_size: Option<usize>,

    /// Idle time (ms) before a serial partial line is flushed
    #[arg(long)]
    pub serial_timeout: Option<Millis>,

    /// Idle time (ms) before a network partial line is flushed
    #[arg(long)]
    pub network_timeout: Option<Millis>,

    /// Keepalive interval in ms (0 disables)
    #[arg(long)]
    pub keepalive_interval: Option<Millis>,

    #[arg(long)]
    pub keepalive_message: Option<String>,

    /// Disconnect all clients when a serial partial line times out
    #[arg(long)]
    pub drop_on_serial_timeout: bool,

    /// Forward stale serial partials with the terminator appended
    #[arg(long)]
    pub forward_stale_serial: bool,

    /// Relay tick interval in ms
    #[arg(long)]
    pub tick_interval: Option<u64>,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .format_timestamp_millis()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let config = ServerConfig::resolve(&cli)?;
    let device = config.device.as_deref().ok_or(ServerError::NoDevice)?;

    let serial = SerialPortDevice::open(device, config.baud_rate)?;
    let listener = TcpLineListener::bind(SocketAddr::new(config.bind, config.port))?;
    match listener.local_addr() {
        Ok(addr) => log::info!("Listening on {}", addr),
        Err(e) => log::warn!("Listening, but local address is unknown: {}", e),
    }

    let mut relay = Relay::new(config.relay.clone(), serial, listener)?;

    if config.forward_stale_serial {
        let terminator = config.relay.serial.terminator.clone().into_bytes();
        relay.set_serial_timeout_transform(Box::new(move |partial: &[u8]| {
            [partial, terminator.as_slice()].concat()
        }));
    }

    let presence = relay.presence_mut();
    presence.set_connected_sink(Box::new(|connected: bool| {
        log::info!("Client connected: {}", if connected { "yes" } else { "no" });
    }));
    presence.set_count_sink(Box::new(|count: usize| {
        log::info!("Client count: {}", count);
    }));

    relay.setup()?;
    driver::run(&mut relay, Duration::from_millis(config.tick_interval_ms.max(1))).await;

    match serde_json::to_string(relay.stats()) {
        Ok(stats) => log::info!("Relay stats: {}", stats),
        Err(e) => log::warn!("Could not serialize relay stats: {}", e),
    }
    Ok(())
}
