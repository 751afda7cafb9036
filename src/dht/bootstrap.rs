//! DHT bootstrap module
//!
//! Resolves the well-known router nodes and feeds them to the routing table.

use std::net::SocketAddr;
use tokio::net::lookup_host;

/// Well-known DHT routers used to join the network.
pub const DEFAULT_BOOTSTRAP_ADDRESSES: &[&str] = &[
    "router.utorrent.com:6881",
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "dht.aelitis.com:6881",
    "router.silotis.us:6881",
    "dht.libtorrent.org:25401",
    "dht.anacrolix.link:42069",
    "router.bittorrent.cloud:42069",
];

/// Receives bootstrap nodes. Implemented by the routing table.
pub trait NodeSink {
    fn add_node(&mut self, addr: SocketAddr);
}

impl NodeSink for Vec<SocketAddr> {
    fn add_node(&mut self, addr: SocketAddr) {
        self.push(addr);
    }
}

/// Bootstrap configuration
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Seed nodes as `host:port`
    pub seeds: Vec<String>,
}

impl BootstrapConfig {
    pub fn new(seeds: Vec<String>) -> Self {
        Self { seeds }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BOOTSTRAP_ADDRESSES.iter().map(|s| s.to_string()).collect())
    }
}

/// Resolve every seed, skipping the ones that fail to resolve.
pub async fn resolve_seeds(config: &BootstrapConfig) -> Vec<SocketAddr> {
    let mut resolved = Vec::with_capacity(config.seeds.len());
    for seed in &config.seeds {
        match lookup_host(seed.as_str()).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => resolved.push(addr),
                None => tracing::debug!("Bootstrap seed {} resolved to no address", seed),
            },
            Err(e) => tracing::debug!("Skipping bootstrap seed {}: {}", seed, e),
        }
    }
    resolved
}

/// Bootstrap the DHT network. Returns the number of nodes handed to `sink`.
pub async fn bootstrap(config: &BootstrapConfig, sink: &mut impl NodeSink) -> usize {
    tracing::info!("Bootstrapping DHT network...");

    let nodes = resolve_seeds(config).await;
    for addr in &nodes {
        sink.add_node(*addr);
        tracing::debug!("Added bootstrap node: {}", addr);
    }

    tracing::info!("DHT bootstrapping complete ({} of {} seeds)", nodes.len(), config.seeds.len());
    nodes.len()
}
