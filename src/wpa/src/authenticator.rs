//! The authenticator context: owns the group and station state machines of
//! one BSS, routes station events and EAPOL-Key frames to them, and carries
//! out the effects they produce.
use std::collections::BTreeMap;
use std::time::Duration;

use aux::MacAddr;
use log::Level;

use crate::config::AuthConfig;
use crate::consts::*;
use crate::eapol::{self, KeyInfoFlags, MessageKind};
use crate::error::{AuthError, CryptoError, RxError, SessionError};
use crate::group::{Group, GroupState};
use crate::host::{Effect, HostCallbacks, UpdateSink};
use crate::ie::{self, Selection};
use crate::kde;
use crate::keys::{self, Pmk};
use crate::mib::{self, Mib};
use crate::pairwise::{self, Lifecycle, PtkGroupState, PtkState, Station, StepContext};
use crate::pmksa::{MemoryPmksaCache, PmksaCache, PmksaEntry};
use crate::suite::{KeyAlgorithm, Proto};
use crate::timer::Timer;

/// Station events reported by the access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaEvent {
    Auth,
    Assoc,
    Deauth,
    Disassoc,
    Reauth,
    /// Reauthentication triggered by EAPOL; keeps the installed pairwise key.
    ReauthEapol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEvent {
    EapolTimeout(MacAddr),
    RekeyGtk,
    RekeyGmk,
}

/// WPA/RSN authenticator of one BSS
/// ## Description
/// Holds one group key state machine per VLAN and one pairwise state
/// machine per station. Every entry point steps the affected machines until
/// nothing changes and hands the resulting effects to the host right away.
/// Time is driven by the host through [`Authenticator::next_deadline`] and
/// [`Authenticator::handle_timeouts`].
///
/// A station goes through [`Authenticator::sta_init`],
/// [`Authenticator::validate_sta_ie`], [`Authenticator::sm_event`] with
/// [`StaEvent::Assoc`] and [`Authenticator::sta_associated`]; its EAPOL-Key
/// frames are then passed to [`Authenticator::receive`].
/// ## Example
/// **Basic usage:**
/// ```
///     use aux::MacAddr;
///     use wpa::{AuthConfig, Authenticator, HostCallbacks, HostError, KeyAlgorithm, Pmk};
///
///     struct Host;
///     impl HostCallbacks for Host {
///         fn set_key(&mut self, _: u16, _: KeyAlgorithm, _: Option<&MacAddr>, _: u8, _: &[u8]) -> Result<(), HostError> {
///             Ok(())
///         }
///         fn send_eapol(&mut self, _: &MacAddr, _: &[u8], _: bool) {}
///         fn get_psk(&self, _: &MacAddr, _: Option<&Pmk>) -> Option<Pmk> { None }
///         fn get_pmk(&self, _: &MacAddr) -> Option<Pmk> { None }
///         fn disconnect(&mut self, _: &MacAddr, _: u16) {}
///     }
///
///     let aa = MacAddr([0x02, 0, 0, 0, 0, 1]);
///     let auth = Authenticator::new(aa, AuthConfig::default(), Host).unwrap();
///     assert_eq!(Some(1), auth.group(0).map(|g| g.gn()));
/// ```
pub struct Authenticator<H: HostCallbacks> {
    aa: MacAddr,
    config: AuthConfig,
    wpa_ie: Vec<u8>,
    groups: Vec<Group>,
    stations: BTreeMap<MacAddr, Station>,
    host: H,
    pmksa: Box<dyn PmksaCache>,
    timer: Timer<TimerEvent>,
    mib: Mib,
}

impl<H: HostCallbacks> Authenticator<H> {
    /// Validates the policy, builds the advertised IE and brings up the
    /// group of VLAN 0.
    pub fn new(aa: MacAddr, config: AuthConfig, host: H) -> Result<Self, AuthError> {
        config.validate()?;
        let wpa_ie = ie::build_ie(&config)?;
        let mut auth = Authenticator {
            aa,
            config,
            wpa_ie,
            groups: vec![],
            stations: BTreeMap::new(),
            host,
            pmksa: Box::new(MemoryPmksaCache::new()),
            timer: Timer::new(),
            mib: Mib::default(),
        };
        auth.group_index(0)?;
        if auth.config.wpa_gmk_rekey > 0 {
            let after = Duration::from_secs(auth.config.wpa_gmk_rekey as u64);
            auth.timer.schedule_after(after, TimerEvent::RekeyGmk);
        }
        if auth.config.wpa_group_rekey > 0 {
            let after = Duration::from_secs(auth.config.wpa_group_rekey as u64);
            auth.timer.schedule_after(after, TimerEvent::RekeyGtk);
        }
        Ok(auth)
    }

    /// Replaces the in-memory PMKSA cache.
    pub fn with_pmksa_cache(mut self, cache: Box<dyn PmksaCache>) -> Self {
        self.pmksa = cache;
        self
    }

    pub fn aa(&self) -> &MacAddr {
        &self.aa
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The IE advertised in Beacons and Probe Responses.
    pub fn wpa_ie(&self) -> &[u8] {
        &self.wpa_ie
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn mib(&self) -> &Mib {
        &self.mib
    }

    pub fn pmksa(&self) -> &dyn PmksaCache {
        self.pmksa.as_ref()
    }

    pub fn station(&self, addr: &MacAddr) -> Option<&Station> {
        self.stations.get(addr)
    }

    pub fn group(&self, vlan_id: u16) -> Option<&Group> {
        self.groups.iter().find(|g| g.vlan_id == vlan_id)
    }

    /// Calls `f` on every station in address order until it returns `true`.
    pub fn for_each_station<F: FnMut(&Station) -> bool>(&self, mut f: F) {
        for sta in self.stations.values() {
            if f(sta) {
                break;
            }
        }
    }

    /// Time of the earliest pending timer, on the authenticator clock.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timer.next_deadline()
    }

    pub fn now(&self) -> Duration {
        self.timer.now()
    }

    // ------------------------ Station management ------------------------

    /// Creates the state machine of a station, keeping an existing one.
    pub fn sta_init(&mut self, addr: MacAddr) -> &Station {
        self.stations.entry(addr).or_insert_with(|| {
            log::debug!("WPA: new station state machine for {}", addr);
            Station::new(addr)
        })
    }

    /// Checks the IE of a (Re)Association Request
    /// ## Description
    /// Parses the IE, negotiates it against the local policy and stores it
    /// for the comparison with message 2/4. An RSN IE listing a PMKID of a
    /// live PMKSA cache entry selects that entry for the 4-Way Handshake.
    pub fn validate_sta_ie(&mut self, addr: &MacAddr, ie_bytes: &[u8]) -> Result<Selection, AuthError> {
        if !self.stations.contains_key(addr) {
            return Err(AuthError::UnknownStation(*addr));
        }
        let parsed = match ie::parse_ie(ie_bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.host.logger(Some(addr), Level::Info, &format!("invalid WPA/RSN IE: {}", e));
                return Err(e.into());
            }
        };
        self.mib.record_request(&parsed);
        let selection = match ie::validate_against_policy(&parsed, &self.config) {
            Ok(selection) => selection,
            Err(e) => {
                self.host.logger(Some(addr), Level::Info, &format!("rejected WPA/RSN IE: {}", e));
                return Err(e.into());
            }
        };
        self.mib.record_selection(&selection);

        let now = self.timer.now();
        let pmksa = match selection.proto {
            Proto::Rsn => parsed.pmkids.iter().find_map(|pmkid| self.pmksa.get(addr, Some(pmkid), now)),
            Proto::Wpa => None,
        };
        if let Some(entry) = &pmksa {
            self.host.logger(Some(addr), Level::Debug, "PMKID found from PMKSA cache");
            self.mib.pmkid_used = entry.pmkid;
        }

        let sta = self.stations.get_mut(addr).ok_or(AuthError::UnknownStation(*addr))?;
        sta.pmksa = pmksa;
        sta.wpa_ie = Some(ie_bytes.to_vec());
        sta.selection = Some(selection);
        Ok(selection)
    }

    /// Starts key management for a station whose IE has been validated. A
    /// station that already started is reauthenticated with fresh replay
    /// state.
    pub fn sta_associated(&mut self, addr: &MacAddr) -> Result<(), AuthError> {
        let sta = self.stations.get_mut(addr).ok_or(AuthError::UnknownStation(*addr))?;
        if sta.selection.is_none() {
            return Err(AuthError::NotNegotiated(*addr));
        }
        if sta.started {
            sta.tx_counter = 0;
            sta.tx_counter_valid = false;
            sta.rx_replay.reset();
            sta.reauthentication_request = true;
            self.step_station(addr);
            return Ok(());
        }

        self.host.logger(Some(addr), Level::Debug, "start authentication");
        sta.started = true;
        sta.init = true;
        self.step_station(addr);
        if let Some(sta) = self.stations.get_mut(addr) {
            sta.init = false;
            sta.authentication_request = true;
        }
        self.step_station(addr);
        Ok(())
    }

    /// Feeds a station event to the pairwise state machine. Every event
    /// invalidates the PTK.
    pub fn sm_event(&mut self, addr: &MacAddr, event: StaEvent) -> Result<(), AuthError> {
        let sta = self.stations.get_mut(addr).ok_or(AuthError::UnknownStation(*addr))?;
        log::debug!("WPA: event {:?} received for {}", event, addr);
        match event {
            StaEvent::Auth | StaEvent::Assoc => {}
            StaEvent::Deauth | StaEvent::Disassoc => {
                sta.deauthentication_request = true;
                let target = *addr;
                self.timer.cancel_where(move |e| *e == TimerEvent::EapolTimeout(target));
            }
            StaEvent::Reauth | StaEvent::ReauthEapol => sta.reauthentication_request = true,
        }
        sta.ptk = None;
        if event != StaEvent::ReauthEapol {
            let mut sink = vec![];
            pairwise::remove_ptk(sta, &mut sink);
            self.apply_effects(sink);
        }
        self.step_station(addr);
        Ok(())
    }

    /// Drops the state machine of a station that left
    /// ## Description
    /// With strict rekeying, a station that held the GTK schedules a group
    /// rekey. When called from inside the station's own step loop the
    /// removal is deferred until the loop unwinds.
    pub fn sta_deinit(&mut self, addr: &MacAddr) -> Result<(), AuthError> {
        let sta = self.stations.get_mut(addr).ok_or(AuthError::UnknownStation(*addr))?;
        if self.config.wpa_strict_rekey && sta.has_gtk {
            self.host.logger(Some(addr), Level::Debug, "strict rekeying - force GTK rekey since STA is leaving");
            self.timer.cancel_where(|e| *e == TimerEvent::RekeyGtk);
            self.timer.schedule_after(Duration::from_millis(STRICT_REKEY_DELAY_MS), TimerEvent::RekeyGtk);
        }
        let target = *addr;
        self.timer.cancel_where(move |e| *e == TimerEvent::EapolTimeout(target));
        if sta.in_step_loop {
            log::debug!("WPA: registering pending STA state machine deinit for {}", addr);
            sta.lifecycle = Lifecycle::PendingRemoval;
        } else {
            self.remove_station(addr);
        }
        Ok(())
    }

    /// Moves a station to the group of `vlan_id`, creating the group on
    /// first use. The station keeps its slot in the group count.
    pub fn sta_set_vlan(&mut self, addr: &MacAddr, vlan_id: u16) -> Result<(), AuthError> {
        let current = self.stations.get(addr).ok_or(AuthError::UnknownStation(*addr))?.vlan_id;
        if current == vlan_id {
            return Ok(());
        }
        let new_idx = self.group_index(vlan_id)?;
        let old_idx = self.groups.iter().position(|g| g.vlan_id == current);
        log::debug!("WPA: moving STA {} to use group state machine for VLAN-ID {}", addr, vlan_id);

        let sta = self.stations.get_mut(addr).ok_or(AuthError::UnknownStation(*addr))?;
        sta.vlan_id = vlan_id;
        let old_idx = match old_idx {
            Some(idx) => idx,
            None => return Ok(()),
        };
        if sta.sta_counted {
            self.groups[old_idx].no_stations = self.groups[old_idx].no_stations.saturating_sub(1);
            self.groups[new_idx].no_stations += 1;
        }
        if sta.g_update_station_keys {
            let old = &mut self.groups[old_idx];
            old.key_done_stations = old.key_done_stations.saturating_sub(1);
            sta.g_update_station_keys = false;
        }
        self.settle_group(old_idx);
        Ok(())
    }

    /// Stores the PMK of a completed 802.1X authentication for PMKSA
    /// caching. The entry lives for `session_timeout`, or the configured
    /// PMK lifetime without one.
    pub fn pmksa_cache_add(&mut self, addr: &MacAddr, pmk: &Pmk, session_timeout: Option<Duration>) -> Result<(), AuthError> {
        let sta = self.stations.get(addr).ok_or(AuthError::UnknownStation(*addr))?;
        let selection = sta.selection.ok_or(AuthError::NotNegotiated(*addr))?;
        if selection.proto != Proto::Rsn {
            return Err(AuthError::NotRsn(*addr));
        }
        let pmkid = keys::pmkid(pmk, &self.aa, addr)?;
        let lifetime = session_timeout.unwrap_or_else(|| Duration::from_secs(self.config.pmk_lifetime as u64));
        log::debug!("WPA: adding PMKSA cache entry for {} ({} s)", addr, lifetime.as_secs());
        self.pmksa.add(PmksaEntry {
            spa: *addr,
            pmkid,
            pmk: *pmk,
            expiration: self.timer.now() + lifetime,
            vlan_id: sta.vlan_id,
        });
        Ok(())
    }

    /// TKIP countermeasures were started by the host.
    pub fn countermeasures_start(&mut self) {
        self.mib.tkip_countermeasures_invoked += 1;
    }

    /// The driver detected a Michael MIC failure in a frame from `addr`.
    pub fn sta_local_mic_failure_report(&mut self, addr: &MacAddr) -> Result<(), AuthError> {
        let sta = self.stations.get_mut(addr).ok_or(AuthError::UnknownStation(*addr))?;
        sta.local_mic_failures += 1;
        Ok(())
    }

    pub fn mib_text(&self) -> String {
        let state = self.group(0).map_or(GroupState::GtkInit, |g| g.state());
        mib::mib_text(&self.config, &self.mib, state)
    }

    pub fn station_mib_text(&self, addr: &MacAddr) -> Option<String> {
        self.stations.get(addr).and_then(mib::station_mib_text)
    }

    // ------------------------ Timers and rekeying ------------------------

    /// Advances the clock to `now` and fires every timer that is due.
    pub fn handle_timeouts(&mut self, now: Duration) {
        self.timer.advance_to(now);
        self.pmksa.flush_expired(now);
        while let Some(event) = self.timer.pop_due() {
            match event {
                TimerEvent::EapolTimeout(addr) => {
                    if let Some(sta) = self.stations.get_mut(&addr) {
                        self.host.logger(Some(&addr), Level::Debug, "EAPOL-Key timeout");
                        sta.timeout_evt = true;
                        self.step_station(&addr);
                    }
                }
                TimerEvent::RekeyGtk => self.rekey_gtk(),
                TimerEvent::RekeyGmk => self.rekey_gmk(),
            }
        }
    }

    /// Starts a group key update in every group and re-arms the periodic
    /// rekey timer.
    pub fn rekey_gtk(&mut self) {
        self.host.logger(None, Level::Debug, "rekeying GTK");
        self.timer.cancel_where(|e| *e == TimerEvent::RekeyGtk);
        for idx in 0..self.groups.len() {
            self.groups[idx].gtk_rekey = true;
            self.settle_group(idx);
        }
        if self.config.wpa_group_rekey > 0 {
            let after = Duration::from_secs(self.config.wpa_group_rekey as u64);
            self.timer.schedule_after(after, TimerEvent::RekeyGtk);
        }
    }

    /// Replaces the GMK of every group. The next GTK rekey uses it.
    pub fn rekey_gmk(&mut self) {
        self.timer.cancel_where(|e| *e == TimerEvent::RekeyGmk);
        for group in self.groups.iter_mut() {
            group.rekey_gmk();
        }
        self.host.logger(None, Level::Debug, "rekeying GMK");
        if self.config.wpa_gmk_rekey > 0 {
            let after = Duration::from_secs(self.config.wpa_gmk_rekey as u64);
            self.timer.schedule_after(after, TimerEvent::RekeyGmk);
        }
    }

    // ------------------------ Inbound EAPOL-Key ------------------------

    /// Processes an EAPOL-Key frame from a station
    /// ## Description
    /// The frame is dropped, with the reason returned, when it does not
    /// parse, replays an old counter, arrives in a state that does not
    /// expect it, or fails MIC verification. None of those affect the
    /// station's session; an IE mismatch in message 2/4 disconnects it.
    pub fn receive(&mut self, addr: &MacAddr, bytes: &[u8]) -> Result<(), RxError> {
        let frame = match eapol::parse_header(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("WPA: dropping EAPOL-Key frame from {}: {}", addr, e);
                return Err(e.into());
            }
        };
        let kind = MessageKind::classify(&frame);
        let sta = self.stations.get_mut(addr).ok_or(RxError::UnknownStation(*addr))?;
        if sta.selection.is_none() {
            return Err(RxError::UnexpectedState(kind.as_str()));
        }
        if matches!(kind, MessageKind::SmkM1 | MessageKind::SmkM3 | MessageKind::SmkError) {
            log::debug!("WPA: {} from {} dropped, PeerKey is not supported", kind.as_str(), addr);
            return Err(RxError::Unsupported);
        }

        let flags = frame.key_info.flags;
        let counter = frame.replay_counter;
        if kind == MessageKind::Request {
            if !sta.req_replay.is_fresh(counter) {
                self.host.logger(Some(addr), Level::Warn, "received EAPOL-Key request with replayed counter");
                return Err(RxError::ReplayViolation { received: counter, last: sta.req_replay.last() });
            }
        } else if !sta.tx_counter_valid || counter != sta.tx_counter || !sta.rx_replay.is_fresh(counter) {
            let text = format!("received EAPOL-Key {} with unexpected replay counter", kind.as_str());
            self.host.logger(Some(addr), Level::Warn, &text);
            return Err(RxError::ReplayViolation { received: counter, last: sta.rx_replay.last() });
        }

        let expected = match kind {
            MessageKind::Pairwise2 => matches!(sta.ptk_state, PtkState::PtkStart | PtkState::PtkCalcNegotiating),
            MessageKind::Pairwise4 => sta.ptk_state == PtkState::PtkInitNegotiating && sta.ptk.is_some(),
            MessageKind::Group2 => sta.ptk_group_state == PtkGroupState::RekeyNegotiating && sta.ptk.is_some(),
            _ => true,
        };
        if !expected {
            let text = format!("received EAPOL-Key msg {} in invalid state ({:?}) - dropped", kind.as_str(), sta.ptk_state);
            self.host.logger(Some(addr), Level::Info, &text);
            return Err(RxError::UnexpectedState(kind.as_str()));
        }
        if kind == MessageKind::Pairwise2 && sta.wpa_ie.as_deref() != Some(&frame.key_data[..]) {
            self.host.logger(Some(addr), Level::Info, "WPA IE from (Re)AssocReq did not match with msg 2/4");
            log::debug!("WPA: msg 2/4 IE {}", hex::encode(&frame.key_data));
            self.host.disconnect(addr, REASON_PREV_AUTH_NOT_VALID);
            return Err(RxError::IeMismatch);
        }
        log::debug!("WPA: received EAPOL-Key frame ({}) from {}", kind.as_str(), addr);

        if flags.contains(KeyInfoFlags::ACK) {
            self.host.logger(Some(addr), Level::Info, "received invalid EAPOL-Key: Key Ack set");
            return Err(RxError::InvalidKeyInfo("Key Ack set"));
        }
        if !flags.contains(KeyInfoFlags::MIC) {
            self.host.logger(Some(addr), Level::Info, "received invalid EAPOL-Key: Key MIC not set");
            return Err(RxError::InvalidKeyInfo("Key MIC not set"));
        }

        sta.mic_verified = false;
        if let Some(ptk) = &sta.ptk {
            if !eapol::verify_mic(ptk.kck(), bytes) {
                self.host.logger(Some(addr), Level::Info, "received EAPOL-Key with invalid MIC");
                return Err(RxError::MicMismatch);
            }
            sta.mic_verified = true;
            let target = *addr;
            self.timer.cancel_where(move |e| *e == TimerEvent::EapolTimeout(target));
        }

        let mut rekey = false;
        if kind == MessageKind::Request {
            if !sta.mic_verified {
                self.host.logger(Some(addr), Level::Info, "received EAPOL-Key request with invalid MIC");
                return Err(RxError::MicMismatch);
            }
            sta.req_replay.update(counter);
            if flags.contains(KeyInfoFlags::ERROR) {
                self.host.logger(
                    Some(addr),
                    Level::Info,
                    "received EAPOL-Key Error Request (STA detected Michael MIC failure)",
                );
                sta.remote_mic_failures += 1;
                self.mib.tkip_remote_mic_failures += 1;
                self.host.mic_failure_report(addr);
                sta.ptk_request = true;
                sta.ptk = None;
            } else if frame.key_info.is_pairwise() {
                self.host.logger(Some(addr), Level::Info, "received EAPOL-Key Request for new 4-Way Handshake");
                sta.ptk_request = true;
                sta.ptk = None;
            } else if kde::parse_kde_list(&frame.key_data).map_or(false, |kdes| kdes.mac_addr.is_some()) {
                log::debug!("WPA: SMK request from {} ignored", addr);
            } else {
                self.host.logger(Some(addr), Level::Info, "received EAPOL-Key Request for GTK rekeying");
                rekey = true;
            }
        } else {
            sta.tx_counter_valid = false;
            sta.rx_replay.update(counter);
        }

        sta.last_rx = Some(bytes.to_vec());
        sta.eapol_key_received = true;
        sta.eapol_key_pairwise = frame.key_info.is_pairwise();
        sta.eapol_key_request = flags.contains(KeyInfoFlags::REQUEST);
        sta.snonce = frame.nonce;

        if rekey {
            self.rekey_gtk();
        }
        self.step_station(addr);
        if let Some(sta) = self.stations.get_mut(addr) {
            sta.mic_verified = false;
        }
        Ok(())
    }

    // ------------------------ Internals ------------------------

    /// Index of the group of `vlan_id`, bringing the group up on first use.
    fn group_index(&mut self, vlan_id: u16) -> Result<usize, CryptoError> {
        if let Some(idx) = self.groups.iter().position(|g| g.vlan_id == vlan_id) {
            return Ok(idx);
        }
        log::debug!("WPA: add group state machine for VLAN-ID {}", vlan_id);
        let mut group = Group::new(&self.aa, vlan_id, &self.config)?;
        let mut sink = vec![];
        group.g_init = true;
        group.step(&self.aa, &self.config, &mut sink);
        group.g_init = false;
        group.step(&self.aa, &self.config, &mut sink);
        self.groups.push(group);
        self.apply_effects(sink);
        Ok(self.groups.len() - 1)
    }

    /// Steps a group alone until it settles.
    fn settle_group(&mut self, idx: usize) {
        loop {
            let mut sink = vec![];
            let group = &mut self.groups[idx];
            group.changed = false;
            group.step(&self.aa, &self.config, &mut sink);
            let changed = group.changed;
            self.apply_effects(sink);
            if !changed {
                break;
            }
        }
    }

    /// Runs the station's machines and its group to a fixpoint.
    fn step_station(&mut self, addr: &MacAddr) {
        match self.stations.get_mut(addr) {
            None => return,
            Some(sta) if sta.in_step_loop => {
                log::error!("WPA: state machine step for {} called recursively", addr);
                return;
            }
            Some(sta) => sta.in_step_loop = true,
        }

        loop {
            let Self { aa, config, wpa_ie, groups, stations, host, .. } = self;
            let sta = match stations.get_mut(addr) {
                Some(sta) if sta.lifecycle == Lifecycle::Active => sta,
                _ => break,
            };
            let group = match groups.iter_mut().find(|g| g.vlan_id == sta.vlan_id) {
                Some(group) => group,
                None => break,
            };
            let ctx = StepContext { aa: *aa, config: &*config, wpa_ie: wpa_ie.as_slice(), host: &*host };
            let mut sink = vec![];
            sta.changed = false;
            group.changed = false;
            pairwise::step_ptk(sta, group, &ctx, &mut sink);
            pairwise::step_ptk_group(sta, group, &ctx, &mut sink);
            group.step(&*aa, &*config, &mut sink);
            let group_changed = group.changed;

            self.apply_effects(sink);
            let sta_changed = self.stations.get(addr).map_or(false, |sta| sta.changed);
            if !sta_changed && !group_changed {
                break;
            }
        }

        let pending = match self.stations.get_mut(addr) {
            Some(sta) => {
                sta.in_step_loop = false;
                sta.lifecycle == Lifecycle::PendingRemoval
            }
            None => false,
        };
        if pending {
            log::debug!("WPA: completing pending STA state machine deinit for {}", addr);
            self.remove_station(addr);
        }
    }

    /// Flags the members of a group in SETKEYS for the new GTK. Stations
    /// still in the 4-Way Handshake get it in message 3 and are not waited
    /// for.
    fn update_station_keys(&mut self, vlan_id: u16) {
        let group = match self.groups.iter_mut().find(|g| g.vlan_id == vlan_id) {
            Some(group) => group,
            None => return,
        };
        let mut flagged = vec![];
        for sta in self.stations.values_mut() {
            if sta.vlan_id != vlan_id || !sta.sta_counted || sta.lifecycle != Lifecycle::Active {
                continue;
            }
            if sta.ptk_state == PtkState::PtkInitDone {
                sta.g_update_station_keys = true;
                flagged.push(sta.addr);
            } else {
                group.key_done_stations = group.key_done_stations.saturating_sub(1);
            }
        }
        for addr in flagged {
            match self.stations.get_mut(&addr) {
                Some(sta) if sta.in_step_loop => sta.changed = true,
                Some(_) => self.step_station(&addr),
                None => {}
            }
        }
    }

    fn remove_station(&mut self, addr: &MacAddr) {
        let sta = match self.stations.remove(addr) {
            Some(sta) => sta,
            None => return,
        };
        log::debug!("WPA: removed station state machine for {}", addr);
        let idx = match self.groups.iter().position(|g| g.vlan_id == sta.vlan_id) {
            Some(idx) => idx,
            None => return,
        };
        let group = &mut self.groups[idx];
        if sta.sta_counted {
            group.no_stations = group.no_stations.saturating_sub(1);
        }
        if sta.g_update_station_keys {
            group.key_done_stations = group.key_done_stations.saturating_sub(1);
        }
        self.settle_group(idx);
    }

    fn apply_effects(&mut self, sink: UpdateSink) {
        // stations whose pairwise key the driver refused
        let mut failed: Vec<MacAddr> = vec![];
        for effect in sink {
            match effect {
                Effect::SendEapol { addr, frame, encrypt } => self.host.send_eapol(&addr, &frame, encrypt),
                Effect::SetKey { vlan_id, alg, addr, key_idx, key } => {
                    if let Err(e) = self.host.set_key(vlan_id, alg, addr.as_ref(), key_idx, &key) {
                        match addr {
                            Some(addr) if alg != KeyAlgorithm::None => {
                                self.host.logger(Some(&addr), Level::Error, &format!("failed to set PTK: {}", e));
                                self.host.disconnect(&addr, REASON_PREV_AUTH_NOT_VALID);
                                if let Some(sta) = self.stations.get_mut(&addr) {
                                    sta.pairwise_set = false;
                                }
                                failed.push(addr);
                            }
                            _ => log::warn!("WPA: {}", e),
                        }
                    }
                }
                Effect::SetEapolFlag { addr, flag, value } => {
                    if !failed.contains(&addr) {
                        self.host.set_eapol_flag(&addr, flag, value);
                    }
                }
                Effect::ScheduleRetransmit { addr, after } => {
                    self.timer.cancel_where(move |e| *e == TimerEvent::EapolTimeout(addr));
                    self.timer.schedule_after(after, TimerEvent::EapolTimeout(addr));
                }
                Effect::CancelRetransmit { addr } => {
                    self.timer.cancel_where(move |e| *e == TimerEvent::EapolTimeout(addr));
                }
                Effect::Disconnect { addr, reason } => self.host.disconnect(&addr, reason),
                Effect::UpdateStationKeys { vlan_id } => self.update_station_keys(vlan_id),
                Effect::HandshakeFailed { addr, error } => {
                    if matches!(error, SessionError::HandshakeTimeout | SessionError::NoPmk | SessionError::NoPsk) {
                        self.mib.four_way_handshake_failures += 1;
                    }
                    self.host.logger(Some(&addr), Level::Info, &error.to_string());
                }
                Effect::Log { addr, level, text } => self.host.logger(addr.as_ref(), level, &text),
            }
        }
    }
}
