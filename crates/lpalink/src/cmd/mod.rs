use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use lpalink_frame::{parse_channel, CMD_AP_TEST};
use lpalink_replay::StopSignal;
use lpalink_transport::{Endpoint, IoMode, TransportConfig};

use crate::exit::{transport_error, CliError, CliResult, INTERNAL};
use crate::output::{Direction, OutputFormat};

pub mod decode;
pub mod encode;
pub mod loopback;
pub mod replay;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a schedule and validate the frames that come back.
    Replay(ReplayArgs),
    /// Send a single CAN frame.
    Send(SendArgs),
    /// Print the wire bytes of an LPA frame.
    Encode(EncodeArgs),
    /// Scan hex bytes for envelopes and print what they carry.
    Decode(DecodeArgs),
    /// Answer every transmitted frame on a Unix socket, like a gateway.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Replay(args) => replay::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EndpointArgs {
    /// IPC device node, or socket path with --unix.
    pub endpoint: PathBuf,
    /// Connect to a Unix domain socket instead of opening a device.
    #[arg(long)]
    pub unix: bool,
    /// Open the endpoint in non-blocking mode.
    #[arg(long)]
    pub nonblocking: bool,
    /// Read timeout in blocking mode (e.g. 100ms, 1s).
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,
}

impl EndpointArgs {
    pub fn transport_config(&self) -> CliResult<TransportConfig> {
        let read_timeout = self.read_timeout.as_deref().map(parse_duration).transpose()?;
        Ok(TransportConfig {
            mode: if self.nonblocking {
                IoMode::NonBlocking
            } else {
                IoMode::Blocking
            },
            read_timeout,
            write_timeout: None,
        })
    }

    pub fn open(&self) -> CliResult<Endpoint> {
        let config = self.transport_config()?;
        let endpoint = if self.unix {
            Endpoint::connect_unix(&self.endpoint, config)
        } else {
            Endpoint::open_device(&self.endpoint, config)
        };
        endpoint.map_err(|err| transport_error("open failed", err))
    }
}

#[derive(Args, Debug)]
pub struct CanFlags {
    /// Send CAN FD frames.
    #[arg(long)]
    pub fd: bool,
    /// Request bit-rate switching (with --fd).
    #[arg(long, requires = "fd")]
    pub brs: bool,
    /// Ask the gateway to timestamp transmissions.
    #[arg(long)]
    pub timestamps: bool,
    /// Command code placed in every frame.
    #[arg(long, default_value_t = CMD_AP_TEST, value_parser = parse_u16)]
    pub cmd: u16,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// JSON schedule: an array of rows with channel, msg_id, msg_value,
    /// cycle_time_ms and optional dest_* columns.
    #[arg(long, short = 's', value_name = "FILE")]
    pub schedule: PathBuf,
    /// How long to keep listening after the last send.
    #[arg(long, default_value = "1s", value_name = "DURATION")]
    pub drain: String,
    /// Head start for the receiver before the first send.
    #[arg(long, default_value = "100ms", value_name = "DURATION")]
    pub warmup: String,
    /// Wait out the whole drain even when everything matched.
    #[arg(long)]
    pub full_drain: bool,
    #[command(flatten)]
    pub can: CanFlags,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Port number or channel name (CANHS1, CANFD2, LIN1).
    #[arg(long, short = 'p', value_parser = parse_port)]
    pub port: u16,
    /// CAN identifier, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_id)]
    pub can_id: u32,
    /// Payload bytes as hex.
    #[arg(long, default_value = "", value_parser = parse_hex)]
    pub data: HexBytes,
    /// Print frames received within this long after sending (e.g. 500ms).
    #[arg(long, value_name = "DURATION")]
    pub wait: Option<String>,
    #[command(flatten)]
    pub can: CanFlags,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Port number or channel name.
    #[arg(long, short = 'p', value_parser = parse_port)]
    pub port: u16,
    /// CAN identifier, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_id)]
    pub can_id: u32,
    /// Payload bytes as hex.
    #[arg(long, default_value = "", value_parser = parse_hex)]
    pub data: HexBytes,
    /// Build the gateway's RX form instead of a TX frame.
    #[arg(long, value_enum, default_value = "tx")]
    pub direction: Direction,
    /// Device timestamp for RX frames, in microseconds.
    #[arg(long, default_value_t = 0)]
    pub timestamp_us: u64,
    #[command(flatten)]
    pub can: CanFlags,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex bytes to scan; `-` reads them from stdin.
    pub hex: String,
    /// Descriptor layout of the frames.
    #[arg(long, value_enum, default_value = "rx")]
    pub direction: Direction,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Route a port to another, as FROM:TO (repeatable).
    #[arg(long = "route", value_parser = parse_route)]
    pub routes: Vec<(u16, u16)>,
    /// Exit after answering N frames.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Decoded `--data` bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

fn parse_u16(input: &str) -> Result<u16, String> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid number {input:?}: {err}"))
}

fn parse_port(input: &str) -> Result<u16, String> {
    parse_channel(input)
        .map(Ok)
        .unwrap_or_else(|| parse_u16(input).map_err(|_| format!("unknown port {input:?}")))
}

fn parse_id(input: &str) -> Result<u32, String> {
    let can_id = lpalink_replay::parse_can_id(input)?;
    if can_id > 0x1FFF_FFFF {
        return Err(format!("CAN id 0x{can_id:X} exceeds 29 bits"));
    }
    Ok(can_id)
}

fn parse_hex(input: &str) -> Result<HexBytes, String> {
    let input = input.trim();
    let digits: String = input
        .strip_prefix("0x")
        .unwrap_or(input)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits)
        .map(HexBytes)
        .map_err(|err| format!("invalid hex {input:?}: {err}"))
}

fn parse_route(input: &str) -> Result<(u16, u16), String> {
    let (from, to) = input
        .split_once(':')
        .ok_or_else(|| format!("route {input:?} is not FROM:TO"))?;
    Ok((parse_port(from)?, parse_port(to)?))
}

pub fn install_ctrlc_handler(stop: StopSignal) -> CliResult<()> {
    ctrlc::set_handler(move || stop.stop())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
