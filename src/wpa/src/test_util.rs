use std::collections::HashMap;

use aux::MacAddr;
use log::Level;

use crate::host::{EapolFlag, HostCallbacks, HostError};
use crate::keys::Pmk;
use crate::suite::KeyAlgorithm;

pub const AA: MacAddr = MacAddr([0x1d, 0xe3, 0xfd, 0xdf, 0xcb, 0xd3]);
pub const SPA: MacAddr = MacAddr([0x81, 0x76, 0x61, 0x14, 0xdf, 0xc9]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledKey {
    pub vlan_id: u16,
    pub alg: KeyAlgorithm,
    pub addr: Option<MacAddr>,
    pub key_idx: u8,
    pub key: Vec<u8>,
}

/// Host recording every call it receives.
#[derive(Debug, Default)]
pub struct MockHost {
    pub psks: Vec<Pmk>,
    pub pmk: Option<Pmk>,
    pub flags: HashMap<(MacAddr, EapolFlag), bool>,
    pub sent: Vec<(MacAddr, Vec<u8>, bool)>,
    pub keys: Vec<InstalledKey>,
    pub disconnects: Vec<(MacAddr, u16)>,
    pub mic_failures: Vec<MacAddr>,
    pub logs: Vec<(Option<MacAddr>, Level, String)>,
    pub fail_pairwise_set_key: bool,
}

impl MockHost {
    pub fn with_passphrase(passphrase: &str, ssid: &[u8]) -> Self {
        MockHost { psks: vec![crypto::generate_psk(passphrase, ssid)], ..Default::default() }
    }

    pub fn take_sent(&mut self) -> Vec<(MacAddr, Vec<u8>, bool)> {
        std::mem::take(&mut self.sent)
    }

    /// Frames sent to `addr` since the last call.
    pub fn take_sent_to(&mut self, addr: &MacAddr) -> Vec<Vec<u8>> {
        let (to, rest): (Vec<_>, Vec<_>) = self.take_sent().into_iter().partition(|(a, _, _)| a == addr);
        self.sent = rest;
        to.into_iter().map(|(_, frame, _)| frame).collect()
    }

    /// Pairwise keys installed for `addr`, removals excluded.
    pub fn pairwise_keys(&self, addr: &MacAddr) -> Vec<&InstalledKey> {
        self.keys
            .iter()
            .filter(|k| k.addr.as_ref() == Some(addr) && k.alg != KeyAlgorithm::None)
            .collect()
    }

    pub fn group_keys(&self) -> Vec<&InstalledKey> {
        self.keys.iter().filter(|k| k.addr.is_none()).collect()
    }

    pub fn flag(&self, addr: &MacAddr, flag: EapolFlag) -> bool {
        self.flags.get(&(*addr, flag)).copied().unwrap_or(false)
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.logs.iter().any(|(_, _, text)| text.contains(needle))
    }
}

impl HostCallbacks for MockHost {
    fn set_key(
        &mut self,
        vlan_id: u16,
        alg: KeyAlgorithm,
        addr: Option<&MacAddr>,
        key_idx: u8,
        key: &[u8],
    ) -> Result<(), HostError> {
        if self.fail_pairwise_set_key && addr.is_some() && alg != KeyAlgorithm::None {
            return Err(HostError::KeyInstall { alg: alg.as_str(), reason: "mock failure".to_string() });
        }
        self.keys.push(InstalledKey { vlan_id, alg, addr: addr.copied(), key_idx, key: key.to_vec() });
        Ok(())
    }

    fn send_eapol(&mut self, addr: &MacAddr, frame: &[u8], encrypt: bool) {
        self.sent.push((*addr, frame.to_vec(), encrypt));
    }

    fn get_psk(&self, _addr: &MacAddr, prev: Option<&Pmk>) -> Option<Pmk> {
        match prev {
            None => self.psks.first().copied(),
            Some(prev) => {
                let pos = self.psks.iter().position(|p| p == prev)?;
                self.psks.get(pos + 1).copied()
            }
        }
    }

    fn get_pmk(&self, _addr: &MacAddr) -> Option<Pmk> {
        self.pmk
    }

    fn disconnect(&mut self, addr: &MacAddr, reason: u16) {
        self.disconnects.push((*addr, reason));
    }

    fn mic_failure_report(&mut self, addr: &MacAddr) {
        self.mic_failures.push(*addr);
    }

    fn logger(&mut self, addr: Option<&MacAddr>, level: Level, text: &str) {
        self.logs.push((addr.copied(), level, text.to_string()));
    }

    fn set_eapol_flag(&mut self, addr: &MacAddr, flag: EapolFlag, value: bool) {
        self.flags.insert((*addr, flag), value);
    }

    fn get_eapol_flag(&self, addr: &MacAddr, flag: EapolFlag) -> bool {
        self.flag(addr, flag)
    }
}
