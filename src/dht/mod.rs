//! DHT (Distributed Hash Table) module
//!
//! Peer bookkeeping for the BitTorrent DHT, plus the bootstrap and UDP
//! plumbing around it.

pub mod info_hash;
pub mod contacts;
pub mod peer_store;
pub mod bootstrap;
pub mod server;

// Re-exports for convenience
pub use info_hash::InfoHash;
pub use contacts::{PeerContact, RotatingContactSet, DEFAULT_NEXT_COUNT, MIN_CONTACT_LEN};
pub use peer_store::PeerStore;
pub use bootstrap::{
    bootstrap, resolve_seeds, BootstrapConfig, NodeSink, DEFAULT_BOOTSTRAP_ADDRESSES,
};
pub use server::{DatagramHandler, DhtServer, ServerStats};
