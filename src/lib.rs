//! dht-peerkeeper
//!
//! Peer bookkeeping and abuse control for a BitTorrent-style DHT node: a
//! bounded, rotating store of announced peers and a per-host throttle.

pub mod dht;
pub mod net;
pub mod cli;
pub mod error;

pub use error::DhtError;

pub use dht::{
    InfoHash, PeerContact, RotatingContactSet, PeerStore,
    BootstrapConfig, NodeSink, bootstrap, resolve_seeds, DEFAULT_BOOTSTRAP_ADDRESSES,
    DatagramHandler, DhtServer, ServerStats,
};
pub use net::{BoundedHostSet, HostThrottle};
pub use cli::{CliArgs, Config};
