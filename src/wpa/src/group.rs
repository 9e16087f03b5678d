//! Group key state machine, one per VLAN.
use aux::MacAddr;
use log::Level;

use crate::config::AuthConfig;
use crate::consts::*;
use crate::error::CryptoError;
use crate::host::{Effect, UpdateSink};
use crate::keys::{self, Nonce};
use crate::suite::{Cipher, KeyAlgorithm, MgmtFrameProtection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    GtkInit = 0,
    SetKeys = 1,
    SetKeysDone = 2,
}

/// GTK owner for the stations of one VLAN
/// ## Description
/// Two GTK slots are kept. `GN` names the active one, `GM` the other; a
/// rekey swaps them and derives a fresh key into the new `GN` slot, so the
/// previous key stays installed while stations are being updated.
#[derive(Debug)]
pub struct Group {
    pub(crate) vlan_id: u16,
    pub(crate) state: GroupState,
    pub(crate) changed: bool,
    pub(crate) g_init: bool,
    pub(crate) gtk_authenticator: bool,
    pub(crate) gtk_rekey: bool,
    cipher: Cipher,
    gmk: [u8; GMK_LEN],
    gtk: [Vec<u8>; 2],
    pub(crate) gn: u8,
    pub(crate) gm: u8,
    pub(crate) gnonce: Nonce,
    pub(crate) counter: Nonce,
    igtk: [[u8; IGTK_LEN]; 2],
    dgtk: [u8; DGTK_LEN],
    /// Stations past AUTHENTICATION.
    pub(crate) no_stations: u32,
    /// Stations still to acknowledge the GTK of the running rekey.
    pub(crate) key_done_stations: u32,
}

impl Group {
    pub fn new(aa: &MacAddr, vlan_id: u16, config: &AuthConfig) -> Result<Group, CryptoError> {
        Ok(Group {
            vlan_id,
            state: GroupState::GtkInit,
            changed: false,
            g_init: false,
            gtk_authenticator: true,
            gtk_rekey: false,
            cipher: config.group_cipher(),
            gmk: keys::random_bytes(),
            gtk: [vec![], vec![]],
            gn: 1,
            gm: 2,
            gnonce: [0; NONCE_LEN],
            counter: keys::init_counter(aa, vlan_id)?,
            igtk: [[0; IGTK_LEN]; 2],
            dgtk: [0; DGTK_LEN],
            no_stations: 0,
            key_done_stations: 0,
        })
    }

    pub fn vlan_id(&self) -> u16 {
        self.vlan_id
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    pub fn gn(&self) -> u8 {
        self.gn
    }

    pub fn gm(&self) -> u8 {
        self.gm
    }

    /// The active GTK.
    pub fn gtk(&self) -> &[u8] {
        &self.gtk[(self.gn - 1) as usize]
    }

    pub fn igtk(&self) -> &[u8; IGTK_LEN] {
        &self.igtk[(self.gn - 1) as usize]
    }

    pub fn dgtk(&self) -> &[u8; DGTK_LEN] {
        &self.dgtk
    }

    pub fn no_stations(&self) -> u32 {
        self.no_stations
    }

    pub fn key_done_stations(&self) -> u32 {
        self.key_done_stations
    }

    /// Replaces the GMK. GTKs derived from now on use the new one.
    pub fn rekey_gmk(&mut self) {
        self.gmk = keys::random_bytes();
    }

    /// Takes a fresh GNonce from the counter and derives GTK[GN] from it.
    fn gtk_update(&mut self, aa: &MacAddr, config: &AuthConfig) -> Result<(), CryptoError> {
        self.gnonce = self.counter;
        aux::inc_byte_array(&mut self.counter);
        let slot = (self.gn - 1) as usize;
        self.gtk[slot] = keys::derive_gtk(&self.gmk, aa, &self.gnonce, self.cipher)?;
        if config.ieee80211w != MgmtFrameProtection::Disabled {
            self.dgtk = keys::random_bytes();
            self.igtk[slot] = keys::random_bytes();
        }
        Ok(())
    }

    fn update_keys(&mut self, aa: &MacAddr, config: &AuthConfig, sink: &mut UpdateSink) {
        if let Err(e) = self.gtk_update(aa, config) {
            sink.push(Effect::log(None, Level::Error, format!("GTK derivation failed: {}", e)));
        }
    }

    fn enter_gtk_init(&mut self, aa: &MacAddr, config: &AuthConfig, sink: &mut UpdateSink) {
        log::debug!("WPA: group state machine entering state GTK_INIT (VLAN-ID {})", self.vlan_id);
        self.changed = false;
        self.state = GroupState::GtkInit;
        self.gtk = [vec![], vec![]];
        self.gn = 1;
        self.gm = 2;
        self.update_keys(aa, config, sink);
    }

    fn enter_setkeys(&mut self, aa: &MacAddr, config: &AuthConfig, sink: &mut UpdateSink) {
        log::debug!("WPA: group state machine entering state SETKEYS (VLAN-ID {})", self.vlan_id);
        self.changed = true;
        self.state = GroupState::SetKeys;
        self.gtk_rekey = false;
        std::mem::swap(&mut self.gn, &mut self.gm);
        self.key_done_stations = self.no_stations;
        self.update_keys(aa, config, sink);
        sink.push(Effect::UpdateStationKeys { vlan_id: self.vlan_id });
    }

    fn enter_setkeysdone(&mut self, config: &AuthConfig, sink: &mut UpdateSink) {
        log::debug!("WPA: group state machine entering state SETKEYSDONE (VLAN-ID {})", self.vlan_id);
        self.changed = true;
        self.state = GroupState::SetKeysDone;
        sink.push(Effect::SetKey {
            vlan_id: self.vlan_id,
            alg: self.cipher.algorithm(),
            addr: None,
            key_idx: self.gn,
            key: self.gtk().to_vec(),
        });
        if config.ieee80211w != MgmtFrameProtection::Disabled {
            sink.push(Effect::SetKey {
                vlan_id: self.vlan_id,
                alg: KeyAlgorithm::Igtk,
                addr: None,
                key_idx: self.gn,
                key: self.igtk().to_vec(),
            });
            sink.push(Effect::SetKey {
                vlan_id: self.vlan_id,
                alg: KeyAlgorithm::Dgtk,
                addr: None,
                key_idx: 0,
                key: self.dgtk.to_vec(),
            });
        }
    }

    /// Runs one transition of the group state machine.
    pub(crate) fn step(&mut self, aa: &MacAddr, config: &AuthConfig, sink: &mut UpdateSink) {
        if self.g_init {
            self.enter_gtk_init(aa, config, sink);
        } else if self.state == GroupState::GtkInit && self.gtk_authenticator {
            self.enter_setkeysdone(config, sink);
        } else if self.state == GroupState::SetKeysDone && self.gtk_rekey {
            self.enter_setkeys(aa, config, sink);
        } else if self.state == GroupState::SetKeys {
            if self.key_done_stations == 0 {
                self.enter_setkeysdone(config, sink);
            } else if self.gtk_rekey {
                self.enter_setkeys(aa, config, sink);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AA: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    /// Runs the group machine until it settles, as the rekey timer does.
    fn settle(group: &mut Group, config: &AuthConfig, sink: &mut UpdateSink) {
        loop {
            group.changed = false;
            group.step(&AA, config, sink);
            if !group.changed {
                break;
            }
        }
    }

    fn initialized(config: &AuthConfig) -> (Group, UpdateSink) {
        let mut group = Group::new(&AA, 0, config).unwrap();
        let mut sink = vec![];
        group.g_init = true;
        group.step(&AA, config, &mut sink);
        group.g_init = false;
        group.step(&AA, config, &mut sink);
        (group, sink)
    }

    fn installed_gtks(sink: &UpdateSink) -> Vec<(u8, Vec<u8>)> {
        sink.iter()
            .filter_map(|e| match e {
                Effect::SetKey { alg: KeyAlgorithm::Ccmp, key_idx, key, addr: None, .. } => Some((*key_idx, key.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn init_installs_first_gtk() {
        let config = AuthConfig::default();
        let (group, sink) = initialized(&config);
        assert_eq!(GroupState::SetKeysDone, group.state());
        assert_eq!((1, 2), (group.gn(), group.gm()));
        assert_eq!(16, group.gtk().len());
        assert_eq!(vec![(1, group.gtk().to_vec())], installed_gtks(&sink));
    }

    #[test]
    fn gtk_length_follows_group_cipher() {
        let config = AuthConfig { wpa_group: Some(Cipher::Tkip), ..Default::default() };
        let (group, sink) = initialized(&config);
        assert_eq!(32, group.gtk().len());
        assert!(matches!(sink[0], Effect::SetKey { alg: KeyAlgorithm::Tkip, .. }));
    }

    #[test]
    fn rekey_without_stations_completes_at_once() {
        let config = AuthConfig::default();
        let (mut group, _) = initialized(&config);
        let first = group.gtk().to_vec();
        let mut sink = vec![];
        group.gtk_rekey = true;
        settle(&mut group, &config, &mut sink);

        assert_eq!(GroupState::SetKeysDone, group.state());
        assert_eq!((2, 1), (group.gn(), group.gm()));
        assert_ne!(first, group.gtk());
        assert_eq!(Effect::UpdateStationKeys { vlan_id: 0 }, sink[0]);
        assert_eq!(vec![(2, group.gtk().to_vec())], installed_gtks(&sink));
    }

    #[test]
    fn setkeys_waits_for_pending_stations() {
        let config = AuthConfig::default();
        let (mut group, _) = initialized(&config);
        group.no_stations = 3;
        let mut sink = vec![];
        group.gtk_rekey = true;
        settle(&mut group, &config, &mut sink);
        assert_eq!(GroupState::SetKeys, group.state());
        assert_eq!(3, group.key_done_stations());
        assert!(installed_gtks(&sink).is_empty());

        group.key_done_stations = 0;
        settle(&mut group, &config, &mut sink);
        assert_eq!(GroupState::SetKeysDone, group.state());
        assert_eq!(1, installed_gtks(&sink).len());
    }

    #[test]
    fn indices_never_collide() {
        let config = AuthConfig::default();
        let (mut group, _) = initialized(&config);
        let mut sink = vec![];
        for _ in 0..7 {
            group.gtk_rekey = true;
            settle(&mut group, &config, &mut sink);
            assert_ne!(group.gn(), group.gm());
            assert!(matches!(group.gn(), 1 | 2));
        }
        // rekey queued while stations are pending restarts SETKEYS
        group.no_stations = 1;
        group.gtk_rekey = true;
        settle(&mut group, &config, &mut sink);
        let gn = group.gn();
        group.gtk_rekey = true;
        settle(&mut group, &config, &mut sink);
        assert_eq!(GroupState::SetKeys, group.state());
        assert_ne!(gn, group.gn());
        assert_ne!(group.gn(), group.gm());
    }

    #[test]
    fn gnonce_advances() {
        let config = AuthConfig::default();
        let (mut group, _) = initialized(&config);
        let gnonce = group.gnonce;
        assert_eq!(group.counter, {
            let mut next = gnonce;
            aux::inc_byte_array(&mut next);
            next
        });
        group.gtk_rekey = true;
        settle(&mut group, &config, &mut vec![]);
        assert_ne!(gnonce, group.gnonce);
    }

    #[test]
    fn mgmt_frame_protection_installs_igtk_and_dgtk() {
        let config = AuthConfig { ieee80211w: MgmtFrameProtection::Optional, ..Default::default() };
        let (group, sink) = initialized(&config);
        assert!(sink.iter().any(|e| matches!(e,
            Effect::SetKey { alg: KeyAlgorithm::Igtk, key_idx: 1, key, .. } if key[..] == group.igtk()[..])));
        assert!(sink.iter().any(|e| matches!(e, Effect::SetKey { alg: KeyAlgorithm::Dgtk, key_idx: 0, .. })));
    }
}
