//! Command-line argument parsing.

use clap::{Args, Parser, Subcommand, ValueEnum};
use spp_link::link;
use spp_link::transport::{RfcommConfig, TcpConfig};
use spp_link::{ConnectionConfig, ReadStrategy};
use std::time::Duration;

/// Serial Port Profile link tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "spp-link")]
#[command(about = "Connect to a Bluetooth serial-profile peer")]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Connect to a peer, forward stdin lines and print inbound data.
    Connect(ConnectArgs),
    /// List nearby devices offering the serial profile.
    Scan {
        /// Scan duration in seconds.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

/// Transport used to reach the peer.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bluetooth RFCOMM via BlueZ.
    Rfcomm,
    /// TCP simulation; the peer is `host:port`.
    Tcp,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Peer address (Bluetooth MAC, or host:port for tcp).
    pub peer: String,

    #[arg(long, value_enum, default_value = "rfcomm")]
    pub transport: TransportKind,

    /// RFCOMM channel dialed when the service lookup fails.
    #[arg(long, default_value_t = link::DEFAULT_FALLBACK_CHANNEL)]
    pub fallback_channel: u8,

    /// Alternate address dialed when the tcp peer refuses.
    #[arg(long)]
    pub fallback_address: Option<String>,

    /// Poll the stream every N milliseconds instead of awaiting reads.
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Read buffer size in bytes.
    #[arg(long, default_value_t = link::DEFAULT_READ_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Timeout for each connect strategy in milliseconds.
    #[arg(long, default_value_t = link::DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ConnectArgs {
    pub fn connection_config(&self) -> ConnectionConfig {
        let read_strategy = match self.poll_ms {
            Some(ms) => ReadStrategy::Poll {
                interval: Duration::from_millis(ms),
            },
            None => ReadStrategy::Blocking,
        };

        ConnectionConfig {
            read_buffer_size: self.buffer_size,
            read_strategy,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn rfcomm_config(&self) -> RfcommConfig {
        RfcommConfig {
            fallback_channel: self.fallback_channel,
            ..Default::default()
        }
    }

    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            fallback_address: self.fallback_address.clone(),
        }
    }
}
