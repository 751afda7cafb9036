//! CLI configuration module
//!
//! Manages configuration for the DHT node.

use crate::cli::args::CliArgs;
use crate::dht::info_hash::InfoHash;
use crate::error::DhtError;
use anyhow::Result;

/// Configuration for the DHT node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Listening port
    pub port: u16,
    /// Info hashes the peer store remembers
    pub max_info_hashes: usize,
    /// Peers remembered per info hash
    pub max_info_hash_peers: usize,
    /// Per host request quota
    pub max_per_minute: usize,
    /// Hosts tracked by the throttle
    pub max_hosts: usize,
    /// Info hashes we are a peer for, with the port we serve them on
    pub local_downloads: Vec<(InfoHash, u16)>,
    /// Contact the bootstrap routers on startup
    pub bootstrap: bool,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6881,
            max_info_hashes: 2048,
            max_info_hash_peers: 256,
            max_per_minute: 100,
            max_hosts: 1000,
            local_downloads: Vec::new(),
            bootstrap: true,
            verbose: false,
            quiet: false,
        }
    }
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            port: args.port,
            max_info_hashes: args.max_info_hashes,
            max_info_hash_peers: args.max_info_hash_peers,
            max_per_minute: args.max_per_minute,
            max_hosts: args.max_hosts,
            local_downloads: args.local_downloads.clone(),
            bootstrap: !args.no_bootstrap,
            verbose: args.verbose,
            quiet: args.quiet,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(DhtError::validation_error_with_field("Port cannot be 0", "port").into());
        }

        let limits = [
            ("max_info_hashes", self.max_info_hashes),
            ("max_info_hash_peers", self.max_info_hash_peers),
            ("max_per_minute", self.max_per_minute),
            ("max_hosts", self.max_hosts),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(DhtError::config_error_with_field("must be at least 1", field).into());
            }
        }

        Ok(())
    }

    /// Get the listen address for DHT traffic
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_config_from_args() {
        let args = CliArgs::try_parse_from([
            "dht-peerkeeper",
            "--port",
            "6882",
            "--max-hosts",
            "50",
            "--no-bootstrap",
            "--quiet",
        ])
        .unwrap();
        let config = Config::from_args(&args);

        assert_eq!(config.port, 6882);
        assert_eq!(config.max_hosts, 50);
        assert_eq!(config.max_info_hashes, 2048);
        assert!(!config.bootstrap);
        assert!(config.local_downloads.is_empty());
        assert!(config.quiet);
        assert!(!config.verbose);
    }

    #[test]
    fn test_config_carries_local_downloads() {
        let value = format!("{}:51413", "cd".repeat(20));
        let args = CliArgs::try_parse_from(["dht-peerkeeper", "--local-download", &value]).unwrap();
        let config = Config::from_args(&args);

        assert_eq!(config.local_downloads, vec![(InfoHash::new([0xCD; 20]), 51413)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_matches_cli_defaults() {
        let args = CliArgs::try_parse_from(["dht-peerkeeper"]).unwrap();
        assert_eq!(Config::from_args(&args), Config::default());
    }

    #[test]
    fn test_config_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_invalid_port() {
        let config = Config { port: 0, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_zero_limit() {
        let config = Config { max_info_hash_peers: 0, ..Config::default() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_info_hash_peers"));
    }

    #[test]
    fn test_listen_addr() {
        assert_eq!(Config::default().listen_addr(), "0.0.0.0:6881");
    }
}
