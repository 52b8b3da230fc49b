use std::{net::Ipv4Addr, str::FromStr};

use anyhow::Result;
use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

/// `node <tracker_ip> <tracker_port>` — the two positional arguments this
/// node needs to bootstrap against a tracker; everything else about the
/// node (self-address, listening port, owned range) is discovered at
/// runtime and is never configured up front.
#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// Tracker IPv4 address.
    tracker_ip: Ipv4Addr,

    /// Tracker UDP port.
    tracker_port: u16,

    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub tracker_ip: Ipv4Addr,
    pub tracker_port: u16,
    pub log_level: LogLevel,
}

impl Config {
    /// Parses the process arguments into a `Config`.
    pub fn load() -> Result<Self> {
        let cli = Cli::parse();
        Ok(Self {
            tracker_ip: cli.tracker_ip,
            tracker_port: cli.tracker_port,
            log_level: cli.log_level,
        })
    }
}
