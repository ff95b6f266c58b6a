//! Location fingerprint: the strongest neighbouring networks seen at the last
//! successful connection.

use core::cmp::Reverse;

use heapless::Vec;

use crate::network::{NetworkIdentity, SCAN_CAPACITY, Ssid};

mod matcher;
mod store;

pub use matcher::{MatchResult, classify, required_matches};
pub use store::{FingerprintStore, KeyValueStore, KvUpdate, MemoryKvError, MemoryKvStore};

pub const FINGERPRINT_CAPACITY: usize = 4;

/// Up to [`FINGERPRINT_CAPACITY`] distinct, non-empty SSIDs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Fingerprint {
    entries: Vec<Ssid, FINGERPRINT_CAPACITY>,
}

impl Fingerprint {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Snapshot of `visible` ordered by signal strength, excluding `target`
    /// and hidden networks. Networks without a reported RSSI rank last.
    pub fn capture(target: &NetworkIdentity, visible: &[NetworkIdentity]) -> Self {
        let mut ranked: Vec<(usize, &NetworkIdentity), SCAN_CAPACITY> = Vec::new();
        for (index, network) in visible.iter().enumerate() {
            if network.is_hidden() || network.same_network(target) {
                continue;
            }
            if ranked.push((index, network)).is_err() {
                break;
            }
        }
        ranked.sort_unstable_by_key(|(index, network)| {
            (Reverse(network.rssi_dbm().unwrap_or(i8::MIN)), *index)
        });

        let mut fingerprint = Self::new();
        for (_, network) in ranked {
            if fingerprint.is_full() {
                break;
            }
            let _ = fingerprint.insert(network.ssid());
        }
        fingerprint
    }

    /// Adds an entry. Rejects empty, duplicate and over-long SSIDs, and
    /// anything past capacity.
    pub fn insert(&mut self, ssid: &str) -> bool {
        if ssid.is_empty() || self.contains(ssid) || self.is_full() {
            return false;
        }
        let mut entry = Ssid::new();
        if entry.push_str(ssid).is_err() {
            return false;
        }
        self.entries.push(entry).is_ok()
    }

    pub fn contains(&self, ssid: &str) -> bool {
        self.entries.iter().any(|entry| entry.as_str() == ssid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    /// Order-insensitive comparison, the only one that matters for matching.
    pub fn same_entries(&self, other: &Fingerprint) -> bool {
        self.len() == other.len() && self.iter().all(|ssid| other.contains(ssid))
    }
}
