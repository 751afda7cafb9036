//! Peer store module
//!
//! Remembers which peers announced themselves for which info hash, under a
//! fixed memory bound, and which info hashes this node is serving itself.

use crate::dht::contacts::{
    PeerContact, RotatingContactSet, DEFAULT_NEXT_COUNT, MIN_CONTACT_LEN,
};
use crate::dht::info_hash::InfoHash;
use crate::error::DhtError;
use anyhow::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::{debug, trace, warn};

/// Bounded cache of peer contacts per info hash.
///
/// Reading or writing an info hash marks it most recently used; once more
/// than `max_info_hashes` are known, the least recently used one is
/// forgotten together with all of its contacts.
pub struct PeerStore {
    /// Contacts per info hash
    info_hash_peers: Mutex<LruCache<InfoHash, RotatingContactSet>>,
    /// Info hashes we are a peer for, with the port we listen on
    local_downloads: Mutex<HashMap<InfoHash, u16>>,
    max_info_hash_peers: usize,
}

impl PeerStore {
    /// Create a new peer store. Both limits must be at least 1.
    pub fn new(max_info_hashes: usize, max_info_hash_peers: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_info_hashes).ok_or_else(|| {
            DhtError::config_error_with_field("must be at least 1", "max_info_hashes")
        })?;
        if max_info_hash_peers == 0 {
            let field = "max_info_hash_peers";
            return Err(DhtError::config_error_with_field("must be at least 1", field).into());
        }

        Ok(Self {
            info_hash_peers: Mutex::new(LruCache::new(capacity)),
            local_downloads: Mutex::new(HashMap::new()),
            max_info_hash_peers,
        })
    }

    /// Add a contact as a peer for `info_hash`.
    ///
    /// Returns false if the contact is invalid or already known. A full set
    /// makes room by dropping a dead contact, or the next one in rotation.
    pub fn add_contact(&self, info_hash: InfoHash, contact: PeerContact) -> bool {
        let mut cache = self.info_hash_peers.lock();

        match cache.get_mut(&info_hash) {
            Some(peers) if peers.is_intact() => {
                if peers.size() >= self.max_info_hash_peers {
                    if contact.len() < MIN_CONTACT_LEN || peers.contains(&contact) {
                        return false;
                    }
                    match peers.drop(None) {
                        Some(evicted) => {
                            debug!("Evicted {} from full peer set of {}", evicted, info_hash)
                        }
                        None => return false,
                    }
                }
                trace!("Adding {} for {}", contact, info_hash);
                return peers.put(contact);
            }
            Some(_) => {
                warn!("Peer set for {} is inconsistent, resetting it", info_hash);
            }
            None => {
                debug!("Tracking new info hash {}", info_hash);
            }
        }

        let mut peers = RotatingContactSet::new();
        let added = peers.put(contact);
        if let Some((evicted, _)) = cache.push(info_hash, peers) {
            if evicted != info_hash {
                debug!("Forgot info hash {} to stay within capacity", evicted);
            }
        }
        added
    }

    /// Up to 8 contacts for `info_hash`, different ones on consecutive calls.
    pub fn peer_contacts(&self, info_hash: &InfoHash) -> Vec<PeerContact> {
        self.info_hash_peers
            .lock()
            .get_mut(info_hash)
            .map(|peers| peers.next(DEFAULT_NEXT_COUNT))
            .unwrap_or_default()
    }

    /// Number of known contacts for `info_hash`, dead ones included.
    pub fn count(&self, info_hash: &InfoHash) -> usize {
        self.info_hash_peers.lock().get(info_hash).map_or(0, |peers| peers.size())
    }

    /// Number of alive contacts for `info_hash`.
    pub fn alive(&self, info_hash: &InfoHash) -> usize {
        self.info_hash_peers.lock().get(info_hash).map_or(0, |peers| peers.alive())
    }

    /// Mark `contact` dead, but only for info hashes we are downloading ourselves.
    pub fn kill_contact(&self, contact: &PeerContact) {
        let local_downloads = self.local_downloads.lock();
        let mut cache = self.info_hash_peers.lock();
        for info_hash in local_downloads.keys() {
            if let Some(peers) = cache.get_mut(info_hash) {
                if peers.kill(contact) {
                    debug!("Marked {} dead for {}", contact, info_hash);
                }
            }
        }
    }

    pub fn add_local_download(&self, info_hash: InfoHash, port: u16) {
        self.local_downloads.lock().insert(info_hash, port);
    }

    /// Port we serve `info_hash` on, or 0 if we are not a peer for it.
    pub fn has_local_download(&self, info_hash: &InfoHash) -> u16 {
        self.local_download_port(info_hash).unwrap_or(0)
    }

    pub fn local_download_port(&self, info_hash: &InfoHash) -> Option<u16> {
        self.local_downloads.lock().get(info_hash).copied()
    }

    pub fn remove_local_download(&self, info_hash: &InfoHash) {
        self.local_downloads.lock().remove(info_hash);
    }

    /// Number of info hashes currently cached.
    pub fn info_hash_count(&self) -> usize {
        self.info_hash_peers.lock().len()
    }
}
