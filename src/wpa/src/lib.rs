//! # wpa
//! Wi-Fi Protected Access (WPA) and its successor RSN (IEEE 802.11i) protect
//! the traffic of a wireless network with keys negotiated per station.
//!
//! `wpa` is the key management engine of an access point (the
//! Authenticator). It advertises the security policy in a WPA/RSN IE,
//! negotiates it with every associating station, runs the EAPOL-Key 4-Way
//! Handshake that derives a fresh PTK per station, and distributes and
//! rotates the GTK shared by the stations of a VLAN.
//!
//! The engine does no I/O. The access point implements [`HostCallbacks`] to
//! install keys, transmit frames and answer PSK/PMK lookups, reports station
//! events to the [`Authenticator`] and drives its clock through
//! [`Authenticator::handle_timeouts`].
//!
//! A [`Supplicant`] answering the authenticator's messages is included for
//! simulations and tests.

mod authenticator;
mod config;
mod consts;
mod eapol;
mod error;
mod group;
mod host;
mod ie;
mod kde;
mod keys;
mod mib;
mod pairwise;
mod pmksa;
mod suite;
mod supplicant;
mod timer;

#[cfg(test)]
mod test_util;

pub use authenticator::{Authenticator, StaEvent};
pub use config::AuthConfig;
pub use eapol::{
    build_frame, decrypt_key_data, encrypt_key_data, parse_header, verify_mic, write_mic, EapolKeyFrame,
    FrameContext, FrameRequest, KeyDescriptorVersion, KeyInfo, KeyInfoFlags, KeyType, MessageKind,
};
pub use error::{
    AuthError, BuildError, CryptoError, FrameError, IeError, NegotiationError, RxError, SessionError,
};
pub use group::{Group, GroupState};
pub use host::{EapolFlag, Effect, HostCallbacks, HostError};
pub use ie::{build_ie, find_wpa_ie, parse_ie, validate_against_policy, ParsedIe, Selection};
pub use kde::{add_kde, parse_kde_list, GtkKde, IgtkKde, KdeSet};
pub use keys::{derive_gtk, derive_ptk, pmkid, Nonce, Pmk, Pmkid, Ptk};
pub use mib::{mib_text, station_mib_text, Mib, Selector};
pub use pairwise::{Lifecycle, PtkGroupState, PtkState, Station};
pub use pmksa::{MemoryPmksaCache, PmksaCache, PmksaEntry};
pub use suite::{Akm, AkmSuites, Cipher, CipherSuites, KeyAlgorithm, MgmtFrameProtection, Proto, WpaVersions};
pub use supplicant::{Supplicant, SupplicantError};
pub use timer::{EventId, Timer};
