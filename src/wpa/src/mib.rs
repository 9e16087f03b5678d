//! dot11RSNA MIB counters and their `name=value` text rendering.
use std::fmt::Write;

use crate::config::AuthConfig;
use crate::consts::*;
use crate::group::GroupState;
use crate::ie::{ParsedIe, Selection};
use crate::keys::Pmkid;
use crate::pairwise::Station;
use crate::suite::{Cipher, Proto, WpaVersions};

/// A suite selector, OUI followed by the suite type.
pub type Selector = [u8; SELECTOR_LEN];

pub fn selector(proto: Proto, suite_type: u8) -> Selector {
    let oui = match proto {
        Proto::Rsn => RSN_OUI,
        Proto::Wpa => WPA_OUI,
    };
    [oui[0], oui[1], oui[2], suite_type]
}

fn suite_txt(s: &Selector) -> String {
    format!("{:02x}-{:02x}-{:02x}-{}", s[0], s[1], s[2], s[3])
}

fn bool_txt(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Authenticator wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mib {
    pub auth_suite_selected: Selector,
    pub pairwise_cipher_selected: Selector,
    pub group_cipher_selected: Selector,
    pub pmkid_used: Pmkid,
    pub auth_suite_requested: Selector,
    pub pairwise_cipher_requested: Selector,
    pub group_cipher_requested: Selector,
    pub tkip_countermeasures_invoked: u32,
    pub four_way_handshake_failures: u32,
    pub tkip_remote_mic_failures: u32,
}

impl Mib {
    /// Records what the station asked for in its IE.
    pub fn record_request(&mut self, parsed: &ParsedIe) {
        let proto = parsed.proto;
        if let Some(akm) = parsed.akm.preferred() {
            self.auth_suite_requested = selector(proto, akm.suite_type());
        }
        let pairwise = parsed.pairwise.preferred_pairwise().unwrap_or(Cipher::None);
        self.pairwise_cipher_requested = selector(proto, pairwise.suite_type());
        if let Some(group) = parsed.group_cipher {
            self.group_cipher_requested = selector(proto, group.suite_type());
        }
    }

    /// Records the outcome of a successful negotiation.
    pub fn record_selection(&mut self, selection: &Selection) {
        let proto = selection.proto;
        self.auth_suite_selected = selector(proto, selection.akm.suite_type());
        self.pairwise_cipher_selected = selector(proto, selection.pairwise.suite_type());
        self.group_cipher_selected = selector(proto, selection.group.suite_type());
    }
}

/// Renders the authenticator MIB
/// ## Description
/// One `name=value` line per variable, dot11RSNAConfig and statistics first
/// and the private group state last.
/// ## Example
/// **Basic usage:**
/// ```
///     let config = wpa::AuthConfig::default();
///     let text = wpa::mib_text(&config, &wpa::Mib::default(), wpa::GroupState::SetKeysDone);
///     assert!(text.contains("dot11RSNAEnabled=TRUE\n"));
/// ```
pub fn mib_text(config: &AuthConfig, mib: &Mib, group_state: GroupState) -> String {
    let mut buf = String::new();
    // writing into a String cannot fail
    let _ = write_mib(&mut buf, config, mib, group_state);
    buf
}

fn write_mib(buf: &mut String, config: &AuthConfig, mib: &Mib, group_state: GroupState) -> std::fmt::Result {
    writeln!(buf, "dot11RSNAOptionImplemented=TRUE")?;
    writeln!(buf, "dot11RSNAPreauthenticationImplemented=TRUE")?;
    writeln!(buf, "dot11RSNAEnabled={}", bool_txt(config.wpa.contains(WpaVersions::WPA2)))?;
    writeln!(buf, "dot11RSNAPreauthenticationEnabled={}", bool_txt(config.rsn_preauth))?;
    writeln!(buf, "dot11RSNAConfigVersion={}", RSN_VERSION)?;
    writeln!(buf, "dot11RSNAConfigPairwiseKeysSupported=9999")?;
    writeln!(buf, "dot11RSNAConfigGroupRekeyStrict={}", config.wpa_strict_rekey as u8)?;
    writeln!(buf, "dot11RSNAConfigGroupUpdateCount={}", config.group_update_count)?;
    writeln!(buf, "dot11RSNAConfigPairwiseUpdateCount={}", config.pairwise_update_count)?;
    writeln!(buf, "dot11RSNAConfigGroupCipherSize={}", config.group_cipher().key_bits())?;
    writeln!(buf, "dot11RSNAConfigPMKLifetime={}", config.pmk_lifetime)?;
    writeln!(buf, "dot11RSNAConfigPMKReauthThreshold={}", config.pmk_reauth_threshold)?;
    writeln!(buf, "dot11RSNAConfigNumberOfPTKSAReplayCounters=0")?;
    writeln!(buf, "dot11RSNAConfigSATimeout={}", config.sa_timeout)?;
    writeln!(buf, "dot11RSNAAuthenticationSuiteSelected={}", suite_txt(&mib.auth_suite_selected))?;
    writeln!(buf, "dot11RSNAPairwiseCipherSelected={}", suite_txt(&mib.pairwise_cipher_selected))?;
    writeln!(buf, "dot11RSNAGroupCipherSelected={}", suite_txt(&mib.group_cipher_selected))?;
    writeln!(buf, "dot11RSNAPMKIDUsed={}", hex::encode(mib.pmkid_used))?;
    writeln!(buf, "dot11RSNAAuthenticationSuiteRequested={}", suite_txt(&mib.auth_suite_requested))?;
    writeln!(buf, "dot11RSNAPairwiseCipherRequested={}", suite_txt(&mib.pairwise_cipher_requested))?;
    writeln!(buf, "dot11RSNAGroupCipherRequested={}", suite_txt(&mib.group_cipher_requested))?;
    writeln!(buf, "dot11RSNATKIPCounterMeasuresInvoked={}", mib.tkip_countermeasures_invoked)?;
    writeln!(buf, "dot11RSNA4WayHandshakeFailures={}", mib.four_way_handshake_failures)?;
    writeln!(buf, "dot11RSNAConfigNumberOfGTKSAReplayCounters=0")?;
    writeln!(buf, "hostapdWPAGroupState={}", group_state as u8)
}

/// Renders the statistics entry of one station, `None` until its IE has
/// been validated.
pub fn station_mib_text(sta: &Station) -> Option<String> {
    let selection = sta.selection()?;
    let pairwise = selector(selection.proto, selection.pairwise.suite_type());
    let mut buf = String::new();
    let _ = write_station_mib(&mut buf, sta, &pairwise);
    Some(buf)
}

fn write_station_mib(buf: &mut String, sta: &Station, pairwise: &Selector) -> std::fmt::Result {
    writeln!(buf, "dot11RSNAStatsSTAAddress={}", sta.addr())?;
    writeln!(buf, "dot11RSNAStatsVersion=1")?;
    writeln!(buf, "dot11RSNAStatsSelectedPairwiseCipher={}", suite_txt(pairwise))?;
    writeln!(buf, "dot11RSNAStatsTKIPLocalMICFailures={}", sta.local_mic_failures)?;
    writeln!(buf, "dot11RSNAStatsTKIPRemoteMICFailures={}", sta.remote_mic_failures)?;
    writeln!(buf, "hostapdWPAPTKState={}", sta.ptk_state() as u8)?;
    writeln!(buf, "hostapdWPAPTKGroupState={}", sta.ptk_group_state() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie;
    use crate::suite::{Akm, CipherSuites};
    use aux::MacAddr;

    fn line<'a>(text: &'a str, name: &str) -> Option<&'a str> {
        text.lines().find_map(|l| l.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
    }

    #[test]
    fn default_mib() {
        let text = mib_text(&AuthConfig::default(), &Mib::default(), GroupState::SetKeysDone);
        assert_eq!(Some("TRUE"), line(&text, "dot11RSNAEnabled"));
        assert_eq!(Some("FALSE"), line(&text, "dot11RSNAPreauthenticationEnabled"));
        assert_eq!(Some("128"), line(&text, "dot11RSNAConfigGroupCipherSize"));
        assert_eq!(Some("43200"), line(&text, "dot11RSNAConfigPMKLifetime"));
        assert_eq!(Some("00-00-00-0"), line(&text, "dot11RSNAAuthenticationSuiteSelected"));
        assert_eq!(Some("00000000000000000000000000000000"), line(&text, "dot11RSNAPMKIDUsed"));
        assert_eq!(Some("2"), line(&text, "hostapdWPAGroupState"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn selection_uses_protocol_oui() {
        let mut mib = Mib::default();
        mib.record_selection(&Selection {
            proto: Proto::Wpa,
            akm: Akm::Psk,
            pairwise: Cipher::Tkip,
            group: Cipher::Tkip,
            mgmt_frame_protection: false,
        });
        mib.four_way_handshake_failures = 4;
        let config = AuthConfig {
            wpa: WpaVersions::WPA,
            wpa_pairwise: CipherSuites::TKIP,
            ..Default::default()
        };
        let text = mib_text(&config, &mib, GroupState::SetKeys);
        assert_eq!(Some("00-50-f2-2"), line(&text, "dot11RSNAAuthenticationSuiteSelected"));
        assert_eq!(Some("00-50-f2-2"), line(&text, "dot11RSNAPairwiseCipherSelected"));
        assert_eq!(Some("256"), line(&text, "dot11RSNAConfigGroupCipherSize"));
        assert_eq!(Some("FALSE"), line(&text, "dot11RSNAEnabled"));
        assert_eq!(Some("4"), line(&text, "dot11RSNA4WayHandshakeFailures"));
        assert_eq!(Some("1"), line(&text, "hostapdWPAGroupState"));
    }

    #[test]
    fn request_follows_station_preference() {
        let config = AuthConfig {
            wpa_key_mgmt: crate::suite::AkmSuites::all(),
            wpa_pairwise: CipherSuites::CCMP | CipherSuites::TKIP,
            ..Default::default()
        };
        let parsed = ie::parse_ie(&ie::build_ie(&config).unwrap()).unwrap();
        let mut mib = Mib::default();
        mib.record_request(&parsed);
        assert_eq!([0x00, 0x0f, 0xac, 1], mib.auth_suite_requested);
        assert_eq!([0x00, 0x0f, 0xac, 4], mib.pairwise_cipher_requested);
        assert_eq!([0x00, 0x0f, 0xac, 2], mib.group_cipher_requested);
    }

    #[test]
    fn station_entry_needs_selection() {
        let mut sta = Station::new(MacAddr([2, 0, 0, 0, 0, 9]));
        assert!(station_mib_text(&sta).is_none());
        sta.selection = Some(Selection {
            proto: Proto::Rsn,
            akm: Akm::Psk,
            pairwise: Cipher::Ccmp,
            group: Cipher::Ccmp,
            mgmt_frame_protection: false,
        });
        sta.remote_mic_failures = 2;
        let text = station_mib_text(&sta).unwrap();
        assert_eq!(Some("02:00:00:00:00:09"), line(&text, "dot11RSNAStatsSTAAddress"));
        assert_eq!(Some("00-0f-ac-4"), line(&text, "dot11RSNAStatsSelectedPairwiseCipher"));
        assert_eq!(Some("2"), line(&text, "dot11RSNAStatsTKIPRemoteMICFailures"));
        assert_eq!(Some("0"), line(&text, "hostapdWPAPTKState"));
    }
}
