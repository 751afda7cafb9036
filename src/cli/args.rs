//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use crate::dht::info_hash::InfoHash;
use clap::Parser;

/// CLI arguments for the DHT node
#[derive(Debug, Parser)]
#[command(name = "dht-peerkeeper")]
#[command(
    about = "BitTorrent DHT node with bounded peer storage and host throttling",
    long_about = None
)]
pub struct CliArgs {
    /// UDP port to listen on for DHT traffic
    #[arg(short, long, default_value_t = 6881)]
    pub port: u16,

    /// Maximum number of info hashes to remember peers for
    #[arg(long, default_value_t = 2048)]
    pub max_info_hashes: usize,

    /// Maximum number of peers remembered per info hash
    #[arg(long, default_value_t = 256)]
    pub max_info_hash_peers: usize,

    /// Requests per minute a single host may send before being blocked
    #[arg(long, default_value_t = 100)]
    pub max_per_minute: usize,

    /// Number of hosts tracked by the throttle
    #[arg(long, default_value_t = 1000)]
    pub max_hosts: usize,

    /// Info hash this node is a peer for, as INFO_HASH:PORT (repeatable)
    #[arg(
        long = "local-download",
        value_name = "INFO_HASH:PORT",
        value_parser = parse_local_download
    )]
    pub local_downloads: Vec<(InfoHash, u16)>,

    /// Do not contact the well-known bootstrap routers
    #[arg(long)]
    pub no_bootstrap: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

/// Parse a `<40 hex chars>:<port>` local download.
pub fn parse_local_download(value: &str) -> Result<(InfoHash, u16), String> {
    let (hash, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected INFO_HASH:PORT, got '{}'", value))?;
    let info_hash = InfoHash::from_hex(hash)
        .ok_or_else(|| format!("'{}' is not a 40 character hex info hash", hash))?;
    let port = port
        .parse::<u16>()
        .ok()
        .filter(|&port| port != 0)
        .ok_or_else(|| format!("'{}' is not a valid port", port))?;
    Ok((info_hash, port))
}
