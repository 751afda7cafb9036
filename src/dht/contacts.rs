//! Peer contact module
//!
//! Holds the contacts known for a single info hash and hands them out in
//! rotation, so repeated `get_peers` answers surface different peers.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Contacts shorter than this (4 byte IPv4 + 2 byte port) are never stored.
pub const MIN_CONTACT_LEN: usize = 6;

/// Number of contacts returned by a single `next` call unless asked otherwise.
pub const DEFAULT_NEXT_COUNT: usize = 8;

/// Compact, binary encoded peer address.
///
/// The store treats it as an opaque value; decoding is only offered for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerContact(Bytes);

impl PeerContact {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Encode an IPv4 socket address in compact form. IPv6 is not supported.
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(addr_v4) => {
                let mut buffer = Vec::with_capacity(MIN_CONTACT_LEN);
                buffer.extend_from_slice(&addr_v4.ip().octets());
                buffer.extend_from_slice(&addr_v4.port().to_be_bytes());
                Some(Self(Bytes::from(buffer)))
            }
            SocketAddr::V6(_) => None,
        }
    }

    /// Decode the compact IPv4 form, if this contact is exactly that.
    pub fn to_socket_addr(&self) -> Option<SocketAddrV4> {
        match self.0.as_ref() {
            [a, b, c, d, p0, p1] => Some(SocketAddrV4::new(
                Ipv4Addr::new(*a, *b, *c, *d),
                u16::from_be_bytes([*p0, *p1]),
            )),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for PeerContact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "{}", hex::encode(&self.0)),
        }
    }
}

/// Ring slot. Free slots keep an empty contact and are linked to nothing.
#[derive(Debug, Clone)]
struct Slot {
    contact: PeerContact,
    alive: bool,
    prev: usize,
    next: usize,
}

/// Bounded-by-caller, deduplicated set of contacts for one info hash.
///
/// Contacts live in a circular doubly linked list laid out in a slot vector
/// (freed slots are recycled through a free list), with a cursor that moves
/// one step for every contact examined. The membership map and the ring
/// always hold exactly the same contacts.
///
/// Not internally synchronized: callers serialize access.
#[derive(Debug, Clone, Default)]
pub struct RotatingContactSet {
    slots: Vec<Slot>,
    free: Vec<usize>,
    members: HashMap<PeerContact, usize>,
    cursor: Option<usize>,
    /// Number of slots linked into the ring
    ring_len: usize,
}

impl RotatingContactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contact as alive. Returns false for short or already known contacts.
    pub fn put(&mut self, contact: PeerContact) -> bool {
        if contact.len() < MIN_CONTACT_LEN || self.members.contains_key(&contact) {
            return false;
        }

        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot {
                    contact: PeerContact::from_bytes(Bytes::new()),
                    alive: false,
                    prev: 0,
                    next: 0,
                });
                self.slots.len() - 1
            }
        };

        // Link right after the cursor, or start a ring of one.
        let (prev, next) = match self.cursor {
            Some(cur) => (cur, self.slots[cur].next),
            None => (idx, idx),
        };
        self.slots[idx] = Slot {
            contact: contact.clone(),
            alive: true,
            prev,
            next,
        };
        self.slots[prev].next = idx;
        self.slots[next].prev = idx;
        if self.cursor.is_none() {
            self.cursor = Some(idx);
        }

        self.ring_len += 1;
        self.members.insert(contact, idx);
        true
    }

    /// Up to `max_count` distinct contacts, alive ones first.
    ///
    /// Every examined contact advances the cursor, so consecutive calls start
    /// where the previous one stopped. Dead contacts are only used to fill
    /// the quota when too few alive ones exist.
    pub fn next(&mut self, max_count: usize) -> Vec<PeerContact> {
        let len = self.members.len();
        let count = max_count.min(len);
        let mut picked = Vec::with_capacity(count);
        if count == 0 {
            return picked;
        }

        let mut seen = HashSet::with_capacity(count);
        for _ in 0..len {
            let Some(idx) = self.advance() else { break };
            let slot = &self.slots[idx];
            if slot.alive && seen.insert(slot.contact.clone()) {
                picked.push(slot.contact.clone());
            }
            if picked.len() >= count {
                return picked;
            }
        }

        for _ in 0..len {
            let Some(idx) = self.advance() else { break };
            let contact = &self.slots[idx].contact;
            if seen.insert(contact.clone()) {
                picked.push(contact.clone());
            }
            if picked.len() >= count {
                break;
            }
        }
        picked
    }

    /// Remove `contact`, or with `None` make room: a dead contact if there is
    /// one, otherwise whichever contact is next in rotation.
    pub fn drop(&mut self, contact: Option<&PeerContact>) -> Option<PeerContact> {
        match contact {
            Some(contact) => {
                let idx = *self.members.get(contact)?;
                Some(self.unlink(idx))
            }
            None => {
                if let Some(dead) = self.drop_dead() {
                    return Some(dead);
                }
                let idx = self.advance()?;
                Some(self.unlink(idx))
            }
        }
    }

    /// Remove the first dead contact found within one revolution.
    pub fn drop_dead(&mut self) -> Option<PeerContact> {
        for _ in 0..self.members.len() {
            let idx = self.advance()?;
            if !self.slots[idx].alive {
                return Some(self.unlink(idx));
            }
        }
        None
    }

    /// Tombstone a contact in place. Returns true if it was alive.
    pub fn kill(&mut self, contact: &PeerContact) -> bool {
        match self.members.get(contact) {
            Some(&idx) => {
                let was_alive = self.slots[idx].alive;
                self.slots[idx].alive = false;
                was_alive
            }
            None => false,
        }
    }

    pub fn contains(&self, contact: &PeerContact) -> bool {
        self.members.contains_key(contact)
    }

    /// Number of known contacts, dead ones included.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of contacts not tombstoned.
    pub fn alive(&self) -> usize {
        self.members.values().filter(|&&idx| self.slots[idx].alive).count()
    }

    /// Check that the ring and the membership map hold the same number of
    /// contacts. Debug builds also walk the ring and compare every slot.
    pub fn is_intact(&self) -> bool {
        if self.ring_len != self.members.len() || self.cursor.is_some() != (self.ring_len > 0) {
            return false;
        }
        debug_assert!(self.ring_matches_members(), "ring and membership map diverged");
        true
    }

    fn ring_matches_members(&self) -> bool {
        let Some(start) = self.cursor else {
            return self.members.is_empty();
        };
        if start >= self.slots.len() {
            return false;
        }

        let mut ring_len = 0;
        let mut idx = start;
        loop {
            ring_len += 1;
            let slot = &self.slots[idx];
            if self.members.get(&slot.contact) != Some(&idx) || ring_len > self.members.len() {
                return false;
            }
            if slot.next >= self.slots.len() || self.slots[slot.next].prev != idx {
                return false;
            }
            idx = slot.next;
            if idx == start {
                break;
            }
        }
        ring_len == self.members.len()
    }

    fn advance(&mut self) -> Option<usize> {
        let cur = self.cursor?;
        let next = self.slots[cur].next;
        self.cursor = Some(next);
        Some(next)
    }

    /// Unlink an occupied slot, keeping the cursor on a live slot.
    fn unlink(&mut self, idx: usize) -> PeerContact {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        let contact = std::mem::replace(
            &mut self.slots[idx].contact,
            PeerContact::from_bytes(Bytes::new()),
        );
        self.slots[idx].alive = false;
        self.ring_len -= 1;

        if next == idx {
            self.cursor = None;
        } else {
            self.slots[prev].next = next;
            self.slots[next].prev = prev;
            if self.cursor == Some(idx) {
                self.cursor = Some(prev);
            }
        }

        self.free.push(idx);
        self.members.remove(&contact);
        contact
    }

    /// Forget a member without unlinking it, leaving the set inconsistent.
    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self) {
        let victim = self.members.keys().next().cloned();
        if let Some(victim) = victim {
            self.members.remove(&victim);
        }
    }
}
