//! Generation-based snapshot diffing
//!
//! A [`Snapshot`] holds the baseline of the last successfully applied
//! generation. `replace` installs the desired elements for the current
//! generation and records what was added and removed relative to the
//! baseline; `copy` commits the generation by producing a fresh, unfrozen
//! snapshot over the new baseline.
//!
//! Discarding a snapshot instead of copying it (e.g. after a failed apply)
//! leaves the next generation diffing against an empty baseline, so every
//! current element is reported as added again.

use crate::types::Peer;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::net::Ipv4Addr;

/// An element with a natural unique key.
///
/// Key order is the order `added()` and `removed()` are returned in.
pub trait Keyed: Clone + Debug {
    type Key: Ord + Clone + Debug;

    fn key(&self) -> Self::Key;
}

impl Keyed for Ipv4Addr {
    type Key = Ipv4Addr;

    // Ipv4Addr orders like its big-endian octets
    fn key(&self) -> Ipv4Addr {
        *self
    }
}

impl Keyed for Peer {
    type Key = String;

    fn key(&self) -> String {
        self.public_key.to_string()
    }
}

/// Baseline plus the delta of the current generation
#[derive(Debug)]
pub struct Snapshot<T: Keyed> {
    state: BTreeMap<T::Key, T>,
    added: BTreeMap<T::Key, T>,
    removed: BTreeMap<T::Key, T>,
    frozen: bool,
}

/// Snapshot of packet-filter allowlist addresses
pub type AddressSet = Snapshot<Ipv4Addr>;

/// Snapshot of VPN peers keyed by public key
pub type PeerSet = Snapshot<Peer>;

impl<T: Keyed> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed> Snapshot<T> {
    /// Empty, unfrozen snapshot
    pub fn new() -> Self {
        Self {
            state: BTreeMap::new(),
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
            frozen: false,
        }
    }

    /// Replace the baseline with `elements` and record the delta.
    ///
    /// No-op when already called in this generation.
    pub fn replace<I>(&mut self, elements: I)
    where
        I: IntoIterator<Item = T>,
    {
        if self.frozen {
            return;
        }
        self.frozen = true;

        let previous = std::mem::take(&mut self.state);
        for element in elements {
            self.state.insert(element.key(), element);
        }

        self.added = self
            .state
            .iter()
            .filter(|(k, _)| !previous.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.removed = previous
            .into_iter()
            .filter(|(k, _)| !self.state.contains_key(k))
            .collect();
    }

    /// Elements absent from the baseline, in key order.
    ///
    /// Empty until `replace` has been called in this generation.
    pub fn added(&self) -> Vec<T> {
        if !self.frozen {
            return Vec::new();
        }
        self.added.values().cloned().collect()
    }

    /// Baseline elements no longer present, in key order.
    ///
    /// Empty until `replace` has been called in this generation.
    pub fn removed(&self) -> Vec<T> {
        if !self.frozen {
            return Vec::new();
        }
        self.removed.values().cloned().collect()
    }

    /// Commit: a new unfrozen snapshot over a copy of the current baseline
    pub fn copy(&self) -> Self {
        Self {
            state: self.state.clone(),
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
            frozen: false,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Baseline elements in key order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.state.values()
    }
}
