//! In-process access point used by the `simulate` command: an
//! authenticator and a set of supplicants exchanging frames through memory.
use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use aux::MacAddr;
use wpa::{
    AuthConfig, Authenticator, EapolFlag, HostCallbacks, HostError, KeyAlgorithm, Pmk, PtkState, StaEvent,
    Supplicant,
};

/// Host side of the simulated access point
pub struct SimHost {
    psk: Pmk,
    outbox: Vec<(MacAddr, Vec<u8>)>,
    flags: HashMap<(MacAddr, EapolFlag), bool>,
    keys_installed: usize,
}

impl SimHost {
    pub fn new(psk: Pmk) -> Self {
        SimHost { psk, outbox: vec![], flags: HashMap::new(), keys_installed: 0 }
    }

    pub fn keys_installed(&self) -> usize {
        self.keys_installed
    }
}

impl HostCallbacks for SimHost {
    fn set_key(
        &mut self,
        vlan_id: u16,
        alg: KeyAlgorithm,
        addr: Option<&MacAddr>,
        key_idx: u8,
        key: &[u8],
    ) -> Result<(), HostError> {
        match addr {
            Some(addr) => log::info!("set_key: {} {} idx={} len={}", addr, alg.as_str(), key_idx, key.len()),
            None => log::info!("set_key: group vlan={} {} idx={} len={}", vlan_id, alg.as_str(), key_idx, key.len()),
        }
        if alg != KeyAlgorithm::None {
            self.keys_installed += 1;
        }
        Ok(())
    }

    fn send_eapol(&mut self, addr: &MacAddr, frame: &[u8], _encrypt: bool) {
        log::trace!("EAPOL-Key to {}: {}", addr, hex::encode(frame));
        self.outbox.push((*addr, frame.to_vec()));
    }

    fn get_psk(&self, _addr: &MacAddr, prev: Option<&Pmk>) -> Option<Pmk> {
        match prev {
            None => Some(self.psk),
            Some(_) => None,
        }
    }

    fn get_pmk(&self, _addr: &MacAddr) -> Option<Pmk> {
        None
    }

    fn disconnect(&mut self, addr: &MacAddr, reason: u16) {
        log::warn!("disconnecting {} (reason {})", addr, reason);
    }

    fn set_eapol_flag(&mut self, addr: &MacAddr, flag: EapolFlag, value: bool) {
        self.flags.insert((*addr, flag), value);
    }

    fn get_eapol_flag(&self, addr: &MacAddr, flag: EapolFlag) -> bool {
        self.flags.get(&(*addr, flag)).copied().unwrap_or(false)
    }
}

/// Simulation parameters.
pub struct Simulation {
    pub aa: MacAddr,
    pub passphrase: String,
    pub ssid: String,
    pub stations: u8,
    pub rekeys: u32,
}

/// The IE a station sends: the first element of the advertised one, RSN
/// when it is enabled.
fn station_ie(advertised: &[u8]) -> Result<Vec<u8>> {
    let len = match advertised.get(1) {
        Some(len) => 2 + *len as usize,
        None => bail!("empty WPA/RSN IE"),
    };
    Ok(advertised[..len.min(advertised.len())].to_vec())
}

/// Delivers frames both ways until the authenticator goes quiet.
fn pump(auth: &mut Authenticator<SimHost>, supps: &mut [Supplicant]) -> Result<()> {
    loop {
        let outbox = std::mem::take(&mut auth.host_mut().outbox);
        if outbox.is_empty() {
            return Ok(());
        }
        for (addr, frame) in outbox {
            let supp = match supps.iter_mut().find(|s| *s.addr() == addr) {
                Some(supp) => supp,
                None => bail!("frame for unknown station {}", addr),
            };
            let reply = supp.process(&frame).with_context(|| format!("supplicant {}", addr))?;
            auth.receive(&addr, &reply).with_context(|| format!("frame from {}", addr))?;
        }
    }
}

/// Runs the simulation and returns the final MIB dump
/// ## Description
/// Every station associates and completes the 4-Way Handshake, then the GTK
/// is rotated `rekeys` times. The result holds the authenticator MIB
/// followed by one entry per station.
/// ## Example
/// **Basic usage:**
/// ```
///     let sim = cli::Simulation {
///         aa: "02:00:00:00:00:01".parse().unwrap(),
///         passphrase: "testpassword".to_string(),
///         ssid: "testnet".to_string(),
///         stations: 2,
///         rekeys: 1,
///     };
///     let mib = cli::simulate(wpa::AuthConfig::default(), &sim).unwrap();
///     assert!(mib.contains("dot11RSNAStatsSTAAddress=02:00:00:00:10:02"));
/// ```
pub fn simulate(config: AuthConfig, sim: &Simulation) -> Result<String> {
    let psk = crypto::generate_psk(&sim.passphrase, sim.ssid.as_bytes());
    let mut auth = Authenticator::new(sim.aa, config, SimHost::new(psk))?;
    let ie = station_ie(auth.wpa_ie())?;

    let mut supps = vec![];
    for i in 0..sim.stations {
        let addr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x10, i.wrapping_add(1)]);
        auth.sta_init(addr);
        auth.validate_sta_ie(&addr, &ie)?;
        auth.sm_event(&addr, StaEvent::Assoc)?;
        auth.sta_associated(&addr)?;
        supps.push(Supplicant::new(addr, sim.aa, psk, ie.clone())?);
    }
    pump(&mut auth, &mut supps)?;

    for round in 0..sim.rekeys {
        log::info!("GTK rekey round {}", round + 1);
        auth.rekey_gtk();
        pump(&mut auth, &mut supps)?;
    }

    let mut text = auth.mib_text();
    for supp in &supps {
        let sta = match auth.station(supp.addr()) {
            Some(sta) => sta,
            None => bail!("station {} was removed", supp.addr()),
        };
        if sta.ptk_state() != PtkState::PtkInitDone {
            bail!("station {} stuck in {:?}", supp.addr(), sta.ptk_state());
        }
        if let Some(entry) = auth.station_mib_text(supp.addr()) {
            text.push_str(&entry);
        }
    }
    log::info!("{} keys installed", auth.host().keys_installed());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wpa::{CipherSuites, WpaVersions};

    fn sim(stations: u8, rekeys: u32) -> Simulation {
        Simulation {
            aa: MacAddr([0x02, 0, 0, 0, 0, 1]),
            passphrase: "testpassword".to_string(),
            ssid: "testnet".to_string(),
            stations,
            rekeys,
        }
    }

    #[test]
    fn rsn_simulation() {
        let text = simulate(AuthConfig::default(), &sim(3, 2)).unwrap();
        assert!(text.contains("dot11RSNAPairwiseCipherSelected=00-0f-ac-4\n"));
        assert!(text.contains("hostapdWPAGroupState=2\n"));
        assert_eq!(3, text.matches("hostapdWPAPTKState=11\n").count());
    }

    #[test]
    fn mixed_mode_simulation_uses_rsn() {
        let config = AuthConfig {
            wpa: WpaVersions::all(),
            wpa_pairwise: CipherSuites::CCMP | CipherSuites::TKIP,
            ..Default::default()
        };
        let text = simulate(config, &sim(1, 1)).unwrap();
        assert!(text.contains("dot11RSNAAuthenticationSuiteSelected=00-0f-ac-2\n"));
        assert!(text.contains("dot11RSNAGroupCipherSelected=00-0f-ac-2\n"));
    }

    #[test]
    fn station_ie_takes_first_element() {
        assert_eq!(vec![0x30, 0x01, 0xaa], station_ie(&[0x30, 0x01, 0xaa, 0xdd, 0x00]).unwrap());
        assert!(station_ie(&[]).is_err());
    }
}
