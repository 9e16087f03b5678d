//! Per-station key state machines: the 4-Way Handshake (PTK) machine and
//! the embedded group key delivery machine.
use std::time::Duration;

use aux::{MacAddr, ReplayWindow};
use log::Level;

use crate::config::AuthConfig;
use crate::consts::*;
use crate::eapol::{self, FrameContext, FrameRequest, KeyInfoFlags, KeyType};
use crate::error::SessionError;
use crate::group::{Group, GroupState};
use crate::host::{EapolFlag, Effect, HostCallbacks, UpdateSink};
use crate::ie::{self, Selection};
use crate::kde;
use crate::keys::{self, Nonce, Pmk, Ptk};
use crate::pmksa::PmksaEntry;
use crate::suite::{Akm, KeyAlgorithm, Proto, WpaVersions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtkState {
    Initialize = 0,
    Disconnect = 1,
    Disconnected = 2,
    Authentication = 3,
    Authentication2 = 4,
    InitPmk = 5,
    InitPsk = 6,
    PtkStart = 7,
    PtkCalcNegotiating = 8,
    PtkCalcNegotiating2 = 9,
    PtkInitNegotiating = 10,
    PtkInitDone = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtkGroupState {
    Idle = 0,
    RekeyNegotiating = 1,
    RekeyEstablished = 2,
    KeyError = 3,
}

/// Whether a station can be dropped right away. A station whose step loop
/// is running is only marked and gets removed when the loop unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    PendingRemoval,
}

/// Key management state of one associated station.
#[derive(Debug)]
pub struct Station {
    pub(crate) addr: MacAddr,
    pub(crate) vlan_id: u16,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) in_step_loop: bool,
    pub(crate) changed: bool,
    pub(crate) started: bool,
    /// Counted in its group's station total.
    pub(crate) sta_counted: bool,

    pub(crate) ptk_state: PtkState,
    pub(crate) ptk_group_state: PtkGroupState,

    pub(crate) init: bool,
    pub(crate) disconnect: bool,
    pub(crate) deauthentication_request: bool,
    pub(crate) authentication_request: bool,
    pub(crate) reauthentication_request: bool,
    pub(crate) ptk_request: bool,
    pub(crate) timeout_evt: bool,
    pub(crate) eapol_key_received: bool,
    pub(crate) eapol_key_pairwise: bool,
    pub(crate) eapol_key_request: bool,
    pub(crate) mic_verified: bool,
    pub(crate) g_update_station_keys: bool,
    pub(crate) p_init_a_keys: bool,
    pub(crate) pair: bool,

    pub(crate) timeout_ctr: u32,
    pub(crate) g_timeout_ctr: u32,

    pub(crate) anonce: Nonce,
    pub(crate) snonce: Nonce,
    pub(crate) pmk: Option<Pmk>,
    pub(crate) ptk: Option<Ptk>,
    pub(crate) pairwise_set: bool,
    pub(crate) has_gtk: bool,

    /// Replay counter of the last frame sent.
    pub(crate) tx_counter: u64,
    /// A response carrying `tx_counter` may still be accepted.
    pub(crate) tx_counter_valid: bool,
    pub(crate) rx_replay: ReplayWindow,
    pub(crate) req_replay: ReplayWindow,
    pub(crate) last_rx: Option<Vec<u8>>,

    /// IE from the (Re)Association Request.
    pub(crate) wpa_ie: Option<Vec<u8>>,
    pub(crate) selection: Option<Selection>,
    pub(crate) pmksa: Option<PmksaEntry>,

    pub(crate) local_mic_failures: u32,
    pub(crate) remote_mic_failures: u32,
}

impl Station {
    pub fn new(addr: MacAddr) -> Self {
        Station {
            addr,
            vlan_id: 0,
            lifecycle: Lifecycle::Active,
            in_step_loop: false,
            changed: false,
            started: false,
            sta_counted: false,
            ptk_state: PtkState::Initialize,
            ptk_group_state: PtkGroupState::Idle,
            init: false,
            disconnect: false,
            deauthentication_request: false,
            authentication_request: false,
            reauthentication_request: false,
            ptk_request: false,
            timeout_evt: false,
            eapol_key_received: false,
            eapol_key_pairwise: false,
            eapol_key_request: false,
            mic_verified: false,
            g_update_station_keys: false,
            p_init_a_keys: false,
            pair: false,
            timeout_ctr: 0,
            g_timeout_ctr: 0,
            anonce: [0; NONCE_LEN],
            snonce: [0; NONCE_LEN],
            pmk: None,
            ptk: None,
            pairwise_set: false,
            has_gtk: false,
            tx_counter: 0,
            tx_counter_valid: false,
            rx_replay: ReplayWindow::strict(),
            req_replay: ReplayWindow::non_decreasing(),
            last_rx: None,
            wpa_ie: None,
            selection: None,
            pmksa: None,
            local_mic_failures: 0,
            remote_mic_failures: 0,
        }
    }

    pub fn addr(&self) -> &MacAddr {
        &self.addr
    }

    pub fn vlan_id(&self) -> u16 {
        self.vlan_id
    }

    pub fn ptk_state(&self) -> PtkState {
        self.ptk_state
    }

    pub fn ptk_group_state(&self) -> PtkGroupState {
        self.ptk_group_state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn ptk(&self) -> Option<&Ptk> {
        self.ptk.as_ref()
    }

    pub fn pairwise_set(&self) -> bool {
        self.pairwise_set
    }

    pub fn has_gtk(&self) -> bool {
        self.has_gtk
    }

    pub fn anonce(&self) -> &Nonce {
        &self.anonce
    }

    pub fn replay_counter(&self) -> u64 {
        self.tx_counter
    }

    pub fn last_accepted_counter(&self) -> Option<u64> {
        self.rx_replay.last()
    }

    fn proto(&self) -> Proto {
        self.selection.map_or(Proto::Rsn, |s| s.proto)
    }

    fn akm(&self) -> Option<Akm> {
        self.selection.map(|s| s.akm)
    }

    fn proto_name(&self) -> &'static str {
        match self.proto() {
            Proto::Wpa => "WPA",
            Proto::Rsn => "RSN",
        }
    }
}

/// Read-only view of the authenticator handed to the step functions.
pub(crate) struct StepContext<'a> {
    pub aa: MacAddr,
    pub config: &'a AuthConfig,
    /// The advertised IE, RSN first.
    pub wpa_ie: &'a [u8],
    pub host: &'a dyn HostCallbacks,
}

fn log(sta: &Station, level: Level, text: &str, sink: &mut UpdateSink) {
    sink.push(Effect::log(Some(sta.addr), level, text));
}

fn set_flag(sta: &Station, flag: EapolFlag, value: bool, sink: &mut UpdateSink) {
    sink.push(Effect::SetEapolFlag { addr: sta.addr, flag, value });
}

/// Drops the PTK and removes the pairwise key from the driver.
pub(crate) fn remove_ptk(sta: &mut Station, sink: &mut UpdateSink) {
    sta.ptk = None;
    sink.push(Effect::SetKey { vlan_id: 0, alg: KeyAlgorithm::None, addr: Some(sta.addr), key_idx: 0, key: vec![] });
    sta.pairwise_set = false;
}

/// Builds and queues an EAPOL-Key frame, then arms the retransmit timer.
fn send_eapol(sta: &mut Station, group: &mut Group, ctx: &StepContext<'_>, req: &FrameRequest<'_>, sink: &mut UpdateSink) {
    let selection = match sta.selection {
        Some(selection) => selection,
        None => return,
    };
    let frame_ctx = FrameContext {
        proto: selection.proto,
        eapol_version: ctx.config.eapol_version,
        pairwise: selection.pairwise,
        group: group.cipher(),
        ptk: sta.ptk.as_ref(),
        replay_counter: &mut sta.tx_counter,
        iv_counter: &mut group.counter,
    };
    match eapol::build_frame(frame_ctx, req) {
        Ok(frame) => {
            sta.tx_counter_valid = true;
            sink.push(Effect::SendEapol { addr: sta.addr, frame, encrypt: sta.pairwise_set });
        }
        Err(e) => log(sta, Level::Error, &format!("failed to send EAPOL-Key frame: {}", e), sink),
    }
    let timeout_ms = match req.key_type {
        KeyType::Pairwise => ctx.config.pairwise_update_timeout_ms,
        KeyType::Group => ctx.config.group_update_timeout_ms,
    };
    sink.push(Effect::ScheduleRetransmit { addr: sta.addr, after: Duration::from_millis(timeout_ms) });
}

/// DHV and IGTK KDEs for stations using management frame protection.
fn write_ieee80211w_kdes(sta: &Station, group: &Group, ctx: &StepContext<'_>, writer: &mut kde::Writer) {
    if !sta.selection.map_or(false, |s| s.mgmt_frame_protection) {
        return;
    }
    writer.write_dhv(&keys::derive_dhv(&ctx.aa, &sta.addr, group.dgtk()));
    let key_id = group.gn() as u16;
    let pn = ctx.host.get_seqnum_igtk(key_id).unwrap_or([0; IGTK_PN_LEN]);
    writer.write_igtk(key_id, &pn, group.igtk());
}

fn enter_ptk(sta: &mut Station, state: PtkState) {
    log::debug!("WPA: {} WPA_PTK entering state {:?}", sta.addr, state);
    sta.ptk_state = state;
    sta.changed = true;
}

fn enter_initialize(sta: &mut Station, group: &mut Group, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::Initialize);
    if sta.init {
        // Init stays set until the caller clears it
        sta.changed = false;
    }
    if sta.g_update_station_keys {
        group.key_done_stations = group.key_done_stations.saturating_sub(1);
    }
    sta.g_update_station_keys = false;
    if sta.proto() == Proto::Wpa {
        sta.p_init_a_keys = false;
    }
    sta.pair = true;
    set_flag(sta, EapolFlag::PortEnabled, false, sink);
    remove_ptk(sta, sink);
    set_flag(sta, EapolFlag::PortValid, false, sink);
    sta.timeout_ctr = 0;
    if sta.akm() == Some(Akm::Psk) {
        set_flag(sta, EapolFlag::Authorized, false, sink);
    }
}

fn enter_disconnect(sta: &mut Station, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::Disconnect);
    sta.disconnect = false;
    sink.push(Effect::Disconnect { addr: sta.addr, reason: REASON_PREV_AUTH_NOT_VALID });
}

fn enter_disconnected(sta: &mut Station, group: &mut Group) {
    enter_ptk(sta, PtkState::Disconnected);
    if sta.sta_counted {
        group.no_stations = group.no_stations.saturating_sub(1);
        sta.sta_counted = false;
    }
    sta.deauthentication_request = false;
}

fn enter_authentication(sta: &mut Station, group: &mut Group, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::Authentication);
    if !sta.sta_counted {
        group.no_stations += 1;
        sta.sta_counted = true;
    }
    sta.ptk = None;
    set_flag(sta, EapolFlag::PortControlAuto, true, sink);
    set_flag(sta, EapolFlag::PortEnabled, true, sink);
    sta.authentication_request = false;
}

fn enter_authentication2(sta: &mut Station, group: &mut Group) {
    enter_ptk(sta, PtkState::Authentication2);
    sta.anonce = group.counter;
    aux::inc_byte_array(&mut group.counter);
    sta.reauthentication_request = false;
    sta.timeout_ctr = 0;
}

fn enter_initpmk(sta: &mut Station, ctx: &StepContext<'_>, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::InitPmk);
    if let Some(entry) = &sta.pmksa {
        log::debug!("WPA: PMK from PMKSA cache for {}", sta.addr);
        sta.pmk = Some(entry.pmk);
    } else if let Some(pmk) = ctx.host.get_pmk(&sta.addr) {
        log::debug!("WPA: PMK from EAPOL state machine for {}", sta.addr);
        sta.pmk = Some(pmk);
    } else {
        log::debug!("WPA: could not get PMK for {}", sta.addr);
        sta.pmk = None;
    }
    sta.req_replay.reset();
    // keyRun is cleared here so a later reauthentication starts a new handshake
    set_flag(sta, EapolFlag::KeyRun, false, sink);
}

fn enter_initpsk(sta: &mut Station, ctx: &StepContext<'_>) {
    enter_ptk(sta, PtkState::InitPsk);
    if let Some(psk) = ctx.host.get_psk(&sta.addr, None) {
        sta.pmk = Some(psk);
    }
    sta.req_replay.reset();
}

fn enter_ptkstart(sta: &mut Station, group: &mut Group, ctx: &StepContext<'_>, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::PtkStart);
    sta.ptk_request = false;
    sta.timeout_evt = false;
    log(sta, Level::Debug, "sending 1/4 msg of 4-Way Handshake", sink);

    let mut writer = kde::Writer::new();
    if sta.proto() == Proto::Rsn && sta.akm() != Some(Akm::Psk) {
        let pmkid = match (&sta.pmksa, &sta.pmk) {
            (Some(entry), _) => Some(entry.pmkid),
            (None, Some(pmk)) => keys::pmkid(pmk, &ctx.aa, &sta.addr).ok(),
            (None, None) => None,
        };
        if let Some(pmkid) = pmkid {
            writer.write_pmkid(&pmkid);
        }
    }
    let key_data = writer.finalize();
    let anonce = sta.anonce;
    let req = FrameRequest {
        key_type: KeyType::Pairwise,
        flags: KeyInfoFlags::ACK,
        nonce: Some(&anonce),
        key_rsc: None,
        key_data: if key_data.is_empty() { None } else { Some(key_data.as_slice()) },
        key_idx: 0,
        encrypt: false,
        force_version: None,
    };
    send_eapol(sta, group, ctx, &req, sink);
    sta.timeout_ctr += 1;
}

/// Finds the PMK the station used for message 2 by checking its MIC
/// against the PTK derived from each candidate.
fn enter_ptkcalcnegotiating(sta: &mut Station, ctx: &StepContext<'_>, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::PtkCalcNegotiating);
    sta.eapol_key_received = false;
    let (selection, last_rx) = match (sta.selection, &sta.last_rx) {
        (Some(selection), Some(last_rx)) => (selection, last_rx),
        _ => return,
    };

    let mut found = None;
    let mut prev: Option<Pmk> = None;
    loop {
        let pmk = if selection.akm == Akm::Psk {
            match ctx.host.get_psk(&sta.addr, prev.as_ref()) {
                Some(psk) if Some(psk) != prev => psk,
                _ => break,
            }
        } else {
            match sta.pmk {
                Some(pmk) => pmk,
                None => break,
            }
        };
        match keys::derive_ptk(&pmk, &ctx.aa, &sta.addr, &sta.anonce, &sta.snonce, selection.pairwise) {
            Ok(ptk) if eapol::verify_mic(ptk.kck(), last_rx) => {
                found = Some((pmk, ptk));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("WPA: PTK derivation failed for {}: {}", sta.addr, e);
                break;
            }
        }
        if selection.akm != Akm::Psk {
            break;
        }
        prev = Some(pmk);
    }

    let (pmk, ptk) = match found {
        Some(found) => found,
        None => {
            log(sta, Level::Info, "invalid MIC in msg 2/4 of 4-Way Handshake", sink);
            return;
        }
    };
    sink.push(Effect::CancelRetransmit { addr: sta.addr });
    if selection.akm == Akm::Psk {
        sta.pmk = Some(pmk);
    }
    sta.mic_verified = true;
    sta.ptk = Some(ptk);
}

fn enter_ptkcalcnegotiating2(sta: &mut Station) {
    enter_ptk(sta, PtkState::PtkCalcNegotiating2);
    sta.timeout_ctr = 0;
}

fn enter_ptkinitnegotiating(sta: &mut Station, group: &mut Group, ctx: &StepContext<'_>, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::PtkInitNegotiating);
    sta.timeout_evt = false;
    let rsc = ctx.host.get_seqnum(None, group.gn()).unwrap_or([0; KEY_RSC_LEN]);
    let own_ie = if sta.proto() == Proto::Wpa && ctx.config.wpa.contains(WpaVersions::WPA2) {
        // a WPA-only station gets the WPA IE alone
        ie::find_wpa_ie(ctx.wpa_ie).unwrap_or(ctx.wpa_ie)
    } else {
        ctx.wpa_ie
    };
    log(sta, Level::Debug, "sending 3/4 msg of 4-Way Handshake", sink);

    let rsn = sta.proto() == Proto::Rsn;
    let mut writer = kde::Writer::new();
    writer.write_ie(own_ie);
    if rsn {
        writer.write_gtk(group.gn(), group.gtk());
        write_ieee80211w_kdes(sta, group, ctx, &mut writer);
    }
    let key_data = writer.finalize();

    let mut flags = KeyInfoFlags::MIC | KeyInfoFlags::ACK | KeyInfoFlags::INSTALL;
    if rsn {
        flags |= KeyInfoFlags::SECURE;
    }
    let anonce = sta.anonce;
    let req = FrameRequest {
        key_type: KeyType::Pairwise,
        flags,
        nonce: Some(&anonce),
        key_rsc: if rsn { Some(&rsc) } else { None },
        key_data: Some(key_data.as_slice()),
        key_idx: if rsn { group.gn() } else { 0 },
        encrypt: rsn,
        force_version: None,
    };
    send_eapol(sta, group, ctx, &req, sink);
    sta.timeout_ctr += 1;
}

fn enter_ptkinitdone(sta: &mut Station, sink: &mut UpdateSink) {
    enter_ptk(sta, PtkState::PtkInitDone);
    sta.eapol_key_received = false;
    if sta.pair {
        let (selection, tk) = match (sta.selection, &sta.ptk) {
            (Some(selection), Some(ptk)) => (selection, ptk.tk().to_vec()),
            _ => {
                log(sta, Level::Error, "no PTK to install", sink);
                sink.push(Effect::Disconnect { addr: sta.addr, reason: REASON_PREV_AUTH_NOT_VALID });
                return;
            }
        };
        sink.push(Effect::SetKey {
            vlan_id: 0,
            alg: selection.pairwise.algorithm(),
            addr: Some(sta.addr),
            key_idx: 0,
            key: tk[..selection.pairwise.key_len()].to_vec(),
        });
        sta.pairwise_set = true;
        if selection.akm == Akm::Psk {
            set_flag(sta, EapolFlag::Authorized, true, sink);
        }
    }
    set_flag(sta, EapolFlag::PortValid, true, sink);
    set_flag(sta, EapolFlag::KeyAvailable, false, sink);
    set_flag(sta, EapolFlag::KeyDone, true, sink);
    if sta.proto() == Proto::Wpa {
        sta.p_init_a_keys = true;
    } else {
        sta.has_gtk = true;
    }
    let text = format!("pairwise key handshake completed ({})", sta.proto_name());
    log(sta, Level::Debug, &text, sink);
}

fn fail_handshake(sta: &mut Station, error: SessionError, sink: &mut UpdateSink) {
    sink.push(Effect::HandshakeFailed { addr: sta.addr, error });
    enter_disconnect(sta, sink);
}

/// Runs one transition of the PTK state machine
/// ## Description
/// Global events are checked first, in priority order Init, Disconnect,
/// DeauthenticationRequest, AuthenticationRequest, ReAuthenticationRequest
/// and PTKRequest; otherwise the current state decides. The retry budget is
/// checked when a retransmit timeout fires.
pub(crate) fn step_ptk(sta: &mut Station, group: &mut Group, ctx: &StepContext<'_>, sink: &mut UpdateSink) {
    if sta.init {
        enter_initialize(sta, group, sink);
    } else if sta.disconnect {
        enter_disconnect(sta, sink);
    } else if sta.deauthentication_request {
        enter_disconnected(sta, group);
    } else if sta.authentication_request {
        enter_authentication(sta, group, sink);
    } else if sta.reauthentication_request {
        enter_authentication2(sta, group);
    } else if sta.ptk_request {
        enter_ptkstart(sta, group, ctx, sink);
    } else {
        let retries = ctx.config.pairwise_update_count;
        match sta.ptk_state {
            PtkState::Initialize => {}
            PtkState::Disconnect => enter_disconnected(sta, group),
            PtkState::Disconnected => enter_initialize(sta, group, sink),
            PtkState::Authentication => enter_authentication2(sta, group),
            PtkState::Authentication2 => match sta.akm() {
                Some(Akm::Ieee8021X) if ctx.host.get_eapol_flag(&sta.addr, EapolFlag::KeyRun) => {
                    enter_initpmk(sta, ctx, sink)
                }
                Some(Akm::Psk) => enter_initpsk(sta, ctx),
                _ => {}
            },
            PtkState::InitPmk => {
                if ctx.host.get_eapol_flag(&sta.addr, EapolFlag::KeyAvailable) && sta.pmk.is_some() {
                    enter_ptkstart(sta, group, ctx, sink);
                } else {
                    fail_handshake(sta, SessionError::NoPmk, sink);
                }
            }
            PtkState::InitPsk => {
                if ctx.host.get_psk(&sta.addr, None).is_some() {
                    enter_ptkstart(sta, group, ctx, sink);
                } else {
                    log(sta, Level::Info, "no PSK configured for the STA", sink);
                    fail_handshake(sta, SessionError::NoPsk, sink);
                }
            }
            PtkState::PtkStart => {
                if sta.eapol_key_received && !sta.eapol_key_request && sta.eapol_key_pairwise {
                    enter_ptkcalcnegotiating(sta, ctx, sink);
                } else if sta.timeout_evt {
                    if sta.timeout_ctr >= retries {
                        fail_handshake(sta, SessionError::HandshakeTimeout, sink);
                    } else {
                        enter_ptkstart(sta, group, ctx, sink);
                    }
                }
            }
            PtkState::PtkCalcNegotiating => {
                if sta.mic_verified {
                    enter_ptkcalcnegotiating2(sta);
                } else if sta.eapol_key_received && !sta.eapol_key_request && sta.eapol_key_pairwise {
                    enter_ptkcalcnegotiating(sta, ctx, sink);
                } else if sta.timeout_evt {
                    enter_ptkstart(sta, group, ctx, sink);
                }
            }
            PtkState::PtkCalcNegotiating2 => enter_ptkinitnegotiating(sta, group, ctx, sink),
            PtkState::PtkInitNegotiating => {
                if sta.eapol_key_received && !sta.eapol_key_request && sta.eapol_key_pairwise && sta.mic_verified {
                    enter_ptkinitdone(sta, sink);
                } else if sta.timeout_evt {
                    if sta.timeout_ctr >= retries {
                        fail_handshake(sta, SessionError::HandshakeTimeout, sink);
                    } else {
                        enter_ptkinitnegotiating(sta, group, ctx, sink);
                    }
                }
            }
            PtkState::PtkInitDone => {}
        }
    }
}

fn enter_ptk_group(sta: &mut Station, state: PtkGroupState) {
    log::debug!("WPA: {} WPA_PTK_GROUP entering state {:?}", sta.addr, state);
    sta.ptk_group_state = state;
    sta.changed = true;
}

fn enter_idle(sta: &mut Station) {
    enter_ptk_group(sta, PtkGroupState::Idle);
    if sta.init {
        sta.changed = false;
    }
    sta.g_timeout_ctr = 0;
}

fn enter_rekeynegotiating(sta: &mut Station, group: &mut Group, ctx: &StepContext<'_>, sink: &mut UpdateSink) {
    enter_ptk_group(sta, PtkGroupState::RekeyNegotiating);
    if sta.proto() == Proto::Wpa {
        sta.p_init_a_keys = false;
    }
    sta.timeout_evt = false;
    let rsc = if group.state() == GroupState::SetKeysDone {
        ctx.host.get_seqnum(None, group.gn()).unwrap_or([0; KEY_RSC_LEN])
    } else {
        [0; KEY_RSC_LEN]
    };
    log(sta, Level::Debug, "sending 1/2 msg of Group Key Handshake", sink);

    let key_data = if sta.proto() == Proto::Rsn {
        let mut writer = kde::Writer::new();
        writer.write_gtk(group.gn(), group.gtk());
        write_ieee80211w_kdes(sta, group, ctx, &mut writer);
        writer.finalize()
    } else {
        group.gtk().to_vec()
    };

    let mut flags = KeyInfoFlags::SECURE | KeyInfoFlags::MIC | KeyInfoFlags::ACK;
    if !sta.pair {
        flags |= KeyInfoFlags::INSTALL;
    }
    let gnonce = group.gnonce;
    let req = FrameRequest {
        key_type: KeyType::Group,
        flags,
        nonce: Some(&gnonce),
        key_rsc: Some(&rsc),
        key_data: Some(key_data.as_slice()),
        key_idx: group.gn(),
        encrypt: true,
        force_version: None,
    };
    send_eapol(sta, group, ctx, &req, sink);
    sta.g_timeout_ctr += 1;
}

fn enter_rekeyestablished(sta: &mut Station, group: &mut Group, sink: &mut UpdateSink) {
    enter_ptk_group(sta, PtkGroupState::RekeyEstablished);
    sta.eapol_key_received = false;
    if sta.g_update_station_keys {
        group.key_done_stations = group.key_done_stations.saturating_sub(1);
    }
    sta.g_update_station_keys = false;
    sta.g_timeout_ctr = 0;
    let text = format!("group key handshake completed ({})", sta.proto_name());
    log(sta, Level::Debug, &text, sink);
    sta.has_gtk = true;
}

fn enter_keyerror(sta: &mut Station, group: &mut Group, sink: &mut UpdateSink) {
    enter_ptk_group(sta, PtkGroupState::KeyError);
    if sta.g_update_station_keys {
        group.key_done_stations = group.key_done_stations.saturating_sub(1);
    }
    sta.g_update_station_keys = false;
    sta.disconnect = true;
    sink.push(Effect::HandshakeFailed { addr: sta.addr, error: SessionError::GroupHandshakeTimeout });
}

/// Runs one transition of the group key delivery machine.
pub(crate) fn step_ptk_group(sta: &mut Station, group: &mut Group, ctx: &StepContext<'_>, sink: &mut UpdateSink) {
    if sta.init {
        enter_idle(sta);
        return;
    }
    match sta.ptk_group_state {
        PtkGroupState::Idle => {
            if sta.g_update_station_keys || (sta.proto() == Proto::Wpa && sta.p_init_a_keys) {
                enter_rekeynegotiating(sta, group, ctx, sink);
            }
        }
        PtkGroupState::RekeyNegotiating => {
            if sta.eapol_key_received && !sta.eapol_key_request && !sta.eapol_key_pairwise && sta.mic_verified {
                enter_rekeyestablished(sta, group, sink);
            } else if sta.timeout_evt {
                if sta.g_timeout_ctr >= ctx.config.group_update_count {
                    enter_keyerror(sta, group, sink);
                } else {
                    enter_rekeynegotiating(sta, group, ctx, sink);
                }
            }
        }
        PtkGroupState::KeyError | PtkGroupState::RekeyEstablished => enter_idle(sta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::Cipher;
    use crate::test_util::{MockHost, AA, SPA};

    fn psk_selection(proto: Proto) -> Selection {
        Selection {
            proto,
            akm: Akm::Psk,
            pairwise: Cipher::Ccmp,
            group: Cipher::Ccmp,
            mgmt_frame_protection: false,
        }
    }

    struct Fixture {
        sta: Station,
        group: Group,
        config: AuthConfig,
        wpa_ie: Vec<u8>,
        host: MockHost,
    }

    impl Fixture {
        fn new(proto: Proto) -> Self {
            let config = AuthConfig::default();
            let mut sta = Station::new(SPA);
            sta.selection = Some(psk_selection(proto));
            Fixture {
                sta,
                group: Group::new(&AA, 0, &config).unwrap(),
                wpa_ie: ie::build_ie(&config).unwrap(),
                config,
                host: MockHost::with_passphrase("testpassword", b"testnet"),
            }
        }

        /// Steps both machines to a fixpoint.
        fn run(&mut self) -> UpdateSink {
            let ctx = StepContext { aa: AA, config: &self.config, wpa_ie: &self.wpa_ie, host: &self.host };
            let mut sink = vec![];
            loop {
                self.sta.changed = false;
                step_ptk(&mut self.sta, &mut self.group, &ctx, &mut sink);
                step_ptk_group(&mut self.sta, &mut self.group, &ctx, &mut sink);
                if !self.sta.changed {
                    break;
                }
            }
            sink
        }

        fn start(&mut self) -> UpdateSink {
            self.sta.init = true;
            let mut sink = self.run();
            self.sta.init = false;
            self.sta.authentication_request = true;
            sink.extend(self.run());
            sink
        }
    }

    fn sent_frames(sink: &UpdateSink) -> Vec<Vec<u8>> {
        sink.iter()
            .filter_map(|e| match e {
                Effect::SendEapol { frame, .. } => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn association_sends_message_one() {
        let mut fx = Fixture::new(Proto::Rsn);
        let sink = fx.start();
        assert_eq!(PtkState::PtkStart, fx.sta.ptk_state());
        assert_eq!(1, fx.group.no_stations());
        assert!(fx.sta.sta_counted);
        assert_eq!(1, fx.sta.timeout_ctr);

        let frames = sent_frames(&sink);
        assert_eq!(1, frames.len());
        let msg1 = eapol::parse_header(&frames[0]).unwrap();
        assert_eq!(KeyInfoFlags::ACK, msg1.key_info.flags);
        assert!(msg1.key_info.is_pairwise());
        assert_eq!(fx.sta.anonce, msg1.nonce);
        assert_eq!(1, msg1.replay_counter);
        // PSK never carries a PMKID
        assert!(msg1.key_data.is_empty());
        assert!(sink.contains(&Effect::ScheduleRetransmit { addr: SPA, after: Duration::from_millis(1000) }));
    }

    #[test]
    fn anonce_comes_from_group_counter() {
        let mut fx = Fixture::new(Proto::Rsn);
        let counter = fx.group.counter;
        fx.start();
        assert_eq!(counter, fx.sta.anonce);
        assert_ne!(counter, fx.group.counter);
    }

    #[test]
    fn missing_psk_disconnects() {
        let mut fx = Fixture::new(Proto::Rsn);
        fx.host.psks.clear();
        let sink = fx.start();
        assert!(sink.contains(&Effect::HandshakeFailed { addr: SPA, error: SessionError::NoPsk }));
        assert!(sink.contains(&Effect::Disconnect { addr: SPA, reason: REASON_PREV_AUTH_NOT_VALID }));
        // DISCONNECT falls through to INITIALIZE and releases the group slot
        assert_eq!(PtkState::Initialize, fx.sta.ptk_state());
        assert_eq!(0, fx.group.no_stations());
        assert!(sent_frames(&sink).is_empty());
    }

    #[test]
    fn timeouts_retransmit_until_budget_is_spent() {
        let mut fx = Fixture::new(Proto::Rsn);
        let mut frames = sent_frames(&fx.start());
        for _ in 0..2 {
            fx.sta.timeout_evt = true;
            frames.extend(sent_frames(&fx.run()));
            assert_eq!(PtkState::PtkStart, fx.sta.ptk_state());
        }
        assert_eq!(3, frames.len());
        let counters: Vec<u64> = frames.iter().map(|f| eapol::parse_header(f).unwrap().replay_counter).collect();
        assert_eq!(vec![1, 2, 3], counters);

        fx.sta.timeout_evt = true;
        let sink = fx.run();
        assert!(sent_frames(&sink).is_empty());
        assert!(sink.contains(&Effect::HandshakeFailed { addr: SPA, error: SessionError::HandshakeTimeout }));
        assert_eq!(PtkState::Initialize, fx.sta.ptk_state());
    }

    #[test]
    fn message_two_with_wrong_psk_is_ignored() {
        let mut fx = Fixture::new(Proto::Rsn);
        fx.start();
        let wrong = crypto::generate_psk("not the password", b"testnet");
        let snonce = [0x42; NONCE_LEN];
        let ptk = keys::derive_ptk(&wrong, &AA, &SPA, &fx.sta.anonce, &snonce, Cipher::Ccmp).unwrap();
        let mut msg2 = eapol::EapolKeyFrame::new(
            Proto::Rsn,
            eapol::KeyInfo::from_bits(0x010a),
        );
        msg2.replay_counter = 1;
        msg2.nonce = snonce;
        msg2.key_data = fx.wpa_ie.clone();
        let mut bytes = msg2.to_bytes();
        eapol::write_mic(eapol::KeyDescriptorVersion::HmacSha1Aes, ptk.kck(), &mut bytes).unwrap();

        fx.sta.snonce = snonce;
        fx.sta.last_rx = Some(bytes);
        fx.sta.eapol_key_received = true;
        fx.sta.eapol_key_pairwise = true;
        let sink = fx.run();
        assert_eq!(PtkState::PtkCalcNegotiating, fx.sta.ptk_state());
        assert!(fx.sta.ptk().is_none());
        assert!(sink.iter().any(|e| matches!(e, Effect::Log { text, .. } if text.contains("invalid MIC in msg 2/4"))));
    }

    #[test]
    fn group_update_sends_group_message_one() {
        let mut fx = Fixture::new(Proto::Rsn);
        fx.start();
        // pretend the 4-way handshake completed
        fx.sta.ptk = Some(keys::derive_ptk(&[1; 32], &AA, &SPA, &[2; 32], &[3; 32], Cipher::Ccmp).unwrap());
        fx.sta.ptk_state = PtkState::PtkInitDone;
        fx.sta.g_update_station_keys = true;
        fx.group.key_done_stations = 1;
        let sink = fx.run();
        assert_eq!(PtkGroupState::RekeyNegotiating, fx.sta.ptk_group_state());
        let frames = sent_frames(&sink);
        assert_eq!(1, frames.len());
        let msg = eapol::parse_header(&frames[0]).unwrap();
        assert!(!msg.key_info.is_pairwise());
        assert!(msg.key_info.flags.contains(KeyInfoFlags::SECURE | KeyInfoFlags::MIC | KeyInfoFlags::ACK));
        assert!(msg.key_info.flags.contains(KeyInfoFlags::ENCRYPTED_KEY_DATA));
        assert!(!msg.key_info.flags.contains(KeyInfoFlags::INSTALL));
        assert_eq!(fx.group.gnonce, msg.nonce);

        // no answer: budget runs out and the station is disconnected
        for _ in 0..3 {
            fx.sta.timeout_evt = true;
            fx.run();
        }
        assert_eq!(0, fx.group.key_done_stations());
        assert!(!fx.sta.g_update_station_keys);
        assert_eq!(PtkState::Initialize, fx.sta.ptk_state());
        assert_eq!(PtkGroupState::Idle, fx.sta.ptk_group_state());
    }

    #[test]
    fn wpa_station_gets_wpa_ie_only() {
        let mut fx = Fixture::new(Proto::Wpa);
        fx.config.wpa = WpaVersions::all();
        fx.config.wpa_pairwise = crate::suite::CipherSuites::CCMP | crate::suite::CipherSuites::TKIP;
        fx.wpa_ie = ie::build_ie(&fx.config).unwrap();
        fx.group = Group::new(&AA, 0, &fx.config).unwrap();
        fx.start();
        fx.sta.ptk = Some(keys::derive_ptk(&[1; 32], &AA, &SPA, &[2; 32], &[3; 32], Cipher::Ccmp).unwrap());
        fx.sta.ptk_state = PtkState::PtkCalcNegotiating2;
        let sink = fx.run();
        let frames = sent_frames(&sink);
        let msg3 = eapol::parse_header(&frames[0]).unwrap();
        assert_eq!(ie::find_wpa_ie(&fx.wpa_ie).unwrap(), &msg3.key_data[..]);
        assert!(!msg3.key_info.flags.contains(KeyInfoFlags::SECURE));
        assert_eq!(0, msg3.key_info.key_index);
    }
}
