//! PMK security association cache.
use std::fmt;
use std::time::Duration;

use aux::MacAddr;

use crate::keys::{Pmk, Pmkid};

pub const PMKSA_CACHE_MAX_ENTRIES: usize = 1024;

#[derive(Clone, PartialEq, Eq)]
pub struct PmksaEntry {
    pub spa: MacAddr,
    pub pmkid: Pmkid,
    pub pmk: Pmk,
    /// Absolute expiry on the authenticator clock.
    pub expiration: Duration,
    pub vlan_id: u16,
}

impl fmt::Debug for PmksaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PmksaEntry")
            .field("spa", &self.spa)
            .field("pmkid", &hex::encode(self.pmkid))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Lookup and insertion are all the engine needs; eviction is up to the
/// implementation.
pub trait PmksaCache {
    /// Finds the live entry of `spa`, optionally requiring a PMKID match.
    fn get(&self, spa: &MacAddr, pmkid: Option<&Pmkid>, now: Duration) -> Option<PmksaEntry>;

    /// Inserts an entry, replacing any previous one for the same station.
    fn add(&mut self, entry: PmksaEntry);

    fn remove(&mut self, spa: &MacAddr);

    /// Drops the entries that expired by `now`.
    fn flush_expired(&mut self, now: Duration);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory cache evicting the entry closest to expiry when full.
#[derive(Debug, Default)]
pub struct MemoryPmksaCache {
    entries: Vec<PmksaEntry>,
}

impl MemoryPmksaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PmksaCache for MemoryPmksaCache {
    fn get(&self, spa: &MacAddr, pmkid: Option<&Pmkid>, now: Duration) -> Option<PmksaEntry> {
        self.entries
            .iter()
            .filter(|e| e.expiration > now)
            .find(|e| e.spa == *spa && pmkid.map_or(true, |id| aux::ct_eq(id, &e.pmkid)))
            .cloned()
    }

    fn add(&mut self, entry: PmksaEntry) {
        self.remove(&entry.spa);
        if self.entries.len() >= PMKSA_CACHE_MAX_ENTRIES {
            if let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.expiration)
                .map(|(i, _)| i)
            {
                log::debug!("PMKSA cache full, removing entry for {}", self.entries[oldest].spa);
                self.entries.remove(oldest);
            }
        }
        self.entries.push(entry);
    }

    fn remove(&mut self, spa: &MacAddr) {
        self.entries.retain(|e| e.spa != *spa);
    }

    fn flush_expired(&mut self, now: Duration) {
        self.entries.retain(|e| e.expiration > now);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
