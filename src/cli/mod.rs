//! CLI module
//!
//! Command-line interface for the DHT node.

pub mod args;
pub mod config;

pub use args::CliArgs;
pub use config::Config;
