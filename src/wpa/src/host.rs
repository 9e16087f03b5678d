//! The contract between the key management engine and the access point
//! hosting it: queries the engine makes while stepping, and the effects it
//! hands back for the host to carry out.
use std::time::Duration;

use aux::MacAddr;
use log::Level;
use thiserror::Error;

use crate::consts::{IGTK_PN_LEN, KEY_RSC_LEN};
use crate::error::SessionError;
use crate::keys::Pmk;
use crate::suite::KeyAlgorithm;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("driver rejected {alg} key: {reason}")]
    KeyInstall { alg: &'static str, reason: String },
}

/// Port flags shared with the 802.1X state machine of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EapolFlag {
    PortEnabled,
    PortValid,
    Authorized,
    PortControlAuto,
    KeyRun,
    KeyAvailable,
    KeyDone,
}

/// Operations the engine needs from the access point
/// ## Description
/// Everything that touches the driver, the 802.1X port or key storage goes
/// through this trait. Queries return `None` when the information is not
/// available. Only `set_key`, `send_eapol`, `get_psk`, `get_pmk` and
/// `disconnect` have no default.
pub trait HostCallbacks {
    /// Installs a key. `alg` of [`KeyAlgorithm::None`] removes it; `addr` is
    /// `None` for group keys.
    fn set_key(
        &mut self,
        vlan_id: u16,
        alg: KeyAlgorithm,
        addr: Option<&MacAddr>,
        key_idx: u8,
        key: &[u8],
    ) -> Result<(), HostError>;

    fn send_eapol(&mut self, addr: &MacAddr, frame: &[u8], encrypt: bool);

    /// Returns the PSK following `prev` for this station, the first one
    /// when `prev` is `None`.
    fn get_psk(&self, addr: &MacAddr, prev: Option<&Pmk>) -> Option<Pmk>;

    /// PMK exported by a completed 802.1X authentication.
    fn get_pmk(&self, addr: &MacAddr) -> Option<Pmk>;

    /// Transmit sequence counter of a key, used as the RSC in key messages.
    fn get_seqnum(&self, _addr: Option<&MacAddr>, _key_idx: u8) -> Option<[u8; KEY_RSC_LEN]> {
        None
    }

    fn get_seqnum_igtk(&self, _key_idx: u16) -> Option<[u8; IGTK_PN_LEN]> {
        None
    }

    fn disconnect(&mut self, addr: &MacAddr, reason: u16);

    /// A station reported a Michael MIC failure.
    fn mic_failure_report(&mut self, _addr: &MacAddr) {}

    /// Authentication events worth showing to an operator.
    fn logger(&mut self, addr: Option<&MacAddr>, level: Level, text: &str) {
        match addr {
            Some(addr) => log::log!(level, "STA {} WPA: {}", addr, text),
            None => log::log!(level, "WPA: {}", text),
        }
    }

    fn set_eapol_flag(&mut self, _addr: &MacAddr, _flag: EapolFlag, _value: bool) {}

    fn get_eapol_flag(&self, _addr: &MacAddr, _flag: EapolFlag) -> bool {
        false
    }
}

/// Side effects produced by one state machine step, applied in order by the
/// authenticator once the step returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendEapol { addr: MacAddr, frame: Vec<u8>, encrypt: bool },
    SetKey { vlan_id: u16, alg: KeyAlgorithm, addr: Option<MacAddr>, key_idx: u8, key: Vec<u8> },
    SetEapolFlag { addr: MacAddr, flag: EapolFlag, value: bool },
    /// (Re)arms the station's EAPOL-Key retransmission timer.
    ScheduleRetransmit { addr: MacAddr, after: Duration },
    CancelRetransmit { addr: MacAddr },
    Disconnect { addr: MacAddr, reason: u16 },
    /// A group entered SETKEYS; its members need the new GTK.
    UpdateStationKeys { vlan_id: u16 },
    HandshakeFailed { addr: MacAddr, error: SessionError },
    Log { addr: Option<MacAddr>, level: Level, text: String },
}

impl Effect {
    pub fn log<S: Into<String>>(addr: Option<MacAddr>, level: Level, text: S) -> Self {
        Effect::Log { addr, level, text: text.into() }
    }
}

pub type UpdateSink = Vec<Effect>;
