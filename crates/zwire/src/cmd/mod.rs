use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use zwire_driver::{Driver, DriverConfig};
use zwire_frame::FunctionType;
use zwire_transport::DEFAULT_BAUD_RATE;

use crate::config::{parse_duration, FileConfig};
use crate::exit::{driver_error, transport_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod decode;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one request and print the reply.
    Send(SendArgs),
    /// Print unsolicited frames from the controller.
    Listen(ListenArgs),
    /// Decode a hex byte string offline.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Listen(args) => block_on(listen::run(args, format)),
    }
}

fn block_on<F: std::future::Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?;
    runtime.block_on(future)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Serial tty device.
    Serial,
    /// Unix domain socket bridge.
    Unix,
}

#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Serial device or socket path.
    #[arg(long, env = "ZWIRE_PORT")]
    pub port: PathBuf,
    /// How to reach the controller.
    #[arg(long, value_enum, default_value = "serial")]
    pub transport: TransportKind,
    /// Serial line speed. Default: 115200.
    #[arg(long)]
    pub baud: Option<u32>,
    /// Acknowledgement timeout (e.g. 1600ms, 2s).
    #[arg(long)]
    pub ack_timeout: Option<String>,
    /// JSON file with driver settings.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl ConnectionArgs {
    /// Resolve driver settings: defaults, then the config file, then flags.
    pub fn driver_config(&self) -> CliResult<(DriverConfig, u32)> {
        let mut config = DriverConfig::default();
        let mut baud = DEFAULT_BAUD_RATE;
        if let Some(path) = &self.config {
            let file = FileConfig::load(path)?;
            file.apply(&mut config);
            baud = file.baud_rate.unwrap_or(baud);
        }
        if let Some(timeout) = &self.ack_timeout {
            config.coordinator.ack_timeout = parse_duration(timeout)?;
        }
        Ok((config, self.baud.unwrap_or(baud)))
    }

    pub async fn open(&self) -> CliResult<Driver> {
        let (config, baud) = self.driver_config()?;
        open_driver(self, config, baud).await
    }
}

#[cfg(unix)]
async fn open_driver(args: &ConnectionArgs, config: DriverConfig, baud: u32) -> CliResult<Driver> {
    use zwire_transport::{SerialConfig, SerialPort, UnixSocketPort};

    let opened = match args.transport {
        TransportKind::Serial => {
            let port = SerialPort::with_config(&args.port, SerialConfig { baud_rate: baud });
            Driver::open(port, config).await
        }
        TransportKind::Unix => {
            let port = UnixSocketPort::new(&args.port)
                .map_err(|err| transport_error("invalid socket path", err))?;
            Driver::open(port, config).await
        }
    };
    opened.map_err(|err| driver_error("open failed", err))
}

#[cfg(not(unix))]
async fn open_driver(
    _args: &ConnectionArgs,
    _config: DriverConfig,
    _baud: u32,
) -> CliResult<Driver> {
    Err(CliError::new(
        crate::exit::USAGE,
        "serial and unix socket channels are only available on unix",
    ))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum AwaitKind {
    /// Return once the controller acknowledges the frame.
    None,
    /// Wait for the response of the same function.
    Response,
    /// Tag the request with a session id and wait for its callback.
    Callback,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Message id, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_function)]
    pub function: FunctionType,
    /// Parameter bytes as hex (e.g. "05 02 20 02 25").
    #[arg(long, default_value = "")]
    pub data: String,
    /// What to wait for after the acknowledgement.
    #[arg(long = "await", value_enum, default_value = "response")]
    pub wait: AwaitKind,
    /// Give up after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Only frames from this node.
    #[arg(long)]
    pub node: Option<u8>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Bytes as hex, e.g. "01 02 00 20 DD".
    #[arg(required = true, num_args = 1..)]
    pub hex: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a message id: `0x15`, `21`, or a known name such as `GetVersion`.
pub fn parse_function(input: &str) -> Result<FunctionType, String> {
    let input = input.trim();
    let value = if let Some(hex) = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        u8::from_str_radix(hex, 16).map_err(|err| format!("invalid message id {input:?}: {err}"))?
    } else if let Ok(value) = input.parse::<u8>() {
        value
    } else {
        return (0..=u8::MAX)
            .map(FunctionType::from)
            .find(|function| {
                !matches!(function, FunctionType::Unknown(_))
                    && function.name().eq_ignore_ascii_case(input)
            })
            .ok_or_else(|| format!("unknown message id {input:?}"));
    };
    Ok(FunctionType::from(value))
}
