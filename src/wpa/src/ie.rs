//! WPA and RSN information elements: the advertised IE built from the local
//! policy, the parser for the IE a station sends at association, and the
//! negotiation between the two.
use byteorder::{ByteOrder, LittleEndian};

use crate::config::AuthConfig;
use crate::consts::*;
use crate::error::{IeError, NegotiationError};
use crate::keys::Pmkid;
use crate::suite::{Akm, AkmSuites, Cipher, CipherSuites, MgmtFrameProtection, Proto, WpaVersions};

/// A parsed WPA or RSN IE. Fields the IE omits carry the protocol defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIe {
    pub proto: Proto,
    /// `None` when the selector names a cipher this engine does not know.
    pub group_cipher: Option<Cipher>,
    pub pairwise: CipherSuites,
    pub akm: AkmSuites,
    pub capabilities: u16,
    pub pmkids: Vec<Pmkid>,
    pub mgmt_group_cipher: Option<Cipher>,
}

/// The outcome of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub proto: Proto,
    pub akm: Akm,
    pub pairwise: Cipher,
    pub group: Cipher,
    pub mgmt_frame_protection: bool,
}

fn oui_for(proto: Proto) -> [u8; 3] {
    match proto {
        Proto::Wpa => WPA_OUI,
        Proto::Rsn => RSN_OUI,
    }
}

fn push_selector(buf: &mut Vec<u8>, proto: Proto, suite_type: u8) {
    buf.extend_from_slice(&oui_for(proto));
    buf.push(suite_type);
}

fn push_suite_list<I: ExactSizeIterator<Item = u8>>(buf: &mut Vec<u8>, proto: Proto, suites: I) {
    let mut count = [0u8; 2];
    LittleEndian::write_u16(&mut count, suites.len() as u16);
    buf.extend_from_slice(&count);
    for suite_type in suites {
        push_selector(buf, proto, suite_type);
    }
}

/// Writes one IE, element header included.
fn write_ie(config: &AuthConfig, proto: Proto, buf: &mut Vec<u8>) -> Result<(), IeError> {
    let group = config.group_cipher();
    if !matches!(group, Cipher::Ccmp | Cipher::Tkip | Cipher::Wep104 | Cipher::Wep40) {
        return Err(IeError::Malformed("invalid group cipher"));
    }
    let pairwise = config.wpa_pairwise.advertised();
    if pairwise.is_empty() {
        return Err(IeError::Malformed("invalid pairwise cipher"));
    }
    let akms = config.wpa_key_mgmt.advertised();
    if akms.is_empty() {
        return Err(IeError::Malformed("invalid key management type"));
    }

    let start = buf.len();
    match proto {
        Proto::Rsn => buf.extend_from_slice(&[RSN_TAG_ID, 0]),
        Proto::Wpa => {
            buf.extend_from_slice(&[VENDOR_TAG_ID, 0]);
            buf.extend_from_slice(&WPA_OUI);
            buf.push(WPA_OUI_TYPE);
        }
    }
    let version = match proto {
        Proto::Rsn => RSN_VERSION,
        Proto::Wpa => WPA_VERSION,
    };
    buf.extend_from_slice(&version.to_le_bytes());
    push_selector(buf, proto, group.suite_type());
    push_suite_list(buf, proto, pairwise.iter().map(|c| c.suite_type()));
    push_suite_list(buf, proto, akms.iter().map(|a| a.suite_type()));

    // WPA capabilities keep their defaults and are left out
    if proto == Proto::Rsn {
        let mfp = config.ieee80211w != MgmtFrameProtection::Disabled;
        let mut capab = 0u16;
        if config.rsn_preauth {
            capab |= RSN_CAP_PREAUTH;
        }
        if config.peerkey {
            capab |= RSN_CAP_PEERKEY;
        }
        if config.wme_enabled {
            capab |= RSN_NUM_REPLAY_COUNTERS_16 << RSN_CAP_PTKSA_REPLAY_COUNTERS_SHIFT;
        }
        if mfp {
            capab |= RSN_CAP_MGMT_FRAME_PROTECTION;
        }
        buf.extend_from_slice(&capab.to_le_bytes());
        if mfp {
            // empty PMKID list, then the management group cipher
            buf.extend_from_slice(&[0, 0]);
            push_selector(buf, proto, CIPHER_AES_128_CMAC);
        }
    }

    // back-patch the element length
    buf[start + 1] = (buf.len() - start - 2) as u8;
    Ok(())
}

/// Builds the IE advertised in beacons and probe responses
/// ## Description
/// The RSN IE comes first when WPA2 is enabled, followed by the WPA vendor
/// IE when WPA is enabled. Pairwise suites are listed CCMP, TKIP, NONE and
/// AKM suites 802.1X, PSK.
/// ## Example
/// **Basic usage:**
/// ```
///     let config = wpa::AuthConfig::default();
///     let ie = wpa::build_ie(&config).unwrap();
///     assert_eq!(0x30, ie[0]);
///     assert_eq!(ie.len() - 2, ie[1] as usize);
/// ```
pub fn build_ie(config: &AuthConfig) -> Result<Vec<u8>, IeError> {
    let mut buf = Vec::with_capacity(64);
    if config.wpa.contains(WpaVersions::WPA2) {
        write_ie(config, Proto::Rsn, &mut buf)?;
    }
    if config.wpa.contains(WpaVersions::WPA) {
        write_ie(config, Proto::Wpa, &mut buf)?;
    }
    Ok(buf)
}

/// Returns the WPA vendor IE inside a combined IE, for stations that
/// negotiated WPA while both versions are enabled.
pub fn find_wpa_ie(ies: &[u8]) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + 1 < ies.len() {
        let end = pos + 2 + ies[pos + 1] as usize;
        if end > ies.len() {
            return None;
        }
        let element = &ies[pos..end];
        if element[0] == VENDOR_TAG_ID && element.len() >= 6 && element[2..5] == WPA_OUI && element[5] == WPA_OUI_TYPE {
            return Some(element);
        }
        pos = end;
    }
    None
}

fn read_selector(proto: Proto, bytes: &[u8]) -> Option<u8> {
    if bytes[..3] == oui_for(proto) {
        Some(bytes[3])
    } else {
        None
    }
}

fn cipher_from_selector(proto: Proto, bytes: &[u8]) -> Option<Cipher> {
    read_selector(proto, bytes).and_then(Cipher::from_suite_type)
}

/// Reads a counted suite list, returning the members in order. Unknown
/// selectors are skipped.
fn read_suite_list<'a>(body: &'a [u8], pos: &mut usize, what: &'static str) -> Result<Vec<&'a [u8]>, IeError> {
    let left = body.len() - *pos;
    if left == 1 {
        return Err(IeError::Malformed(what));
    }
    let count = LittleEndian::read_u16(&body[*pos..]) as usize;
    *pos += 2;
    if count == 0 || body.len() - *pos < count * SELECTOR_LEN {
        return Err(IeError::Malformed(what));
    }
    let list = body[*pos..*pos + count * SELECTOR_LEN].chunks(SELECTOR_LEN).collect();
    *pos += count * SELECTOR_LEN;
    Ok(list)
}

/// Parses a station's WPA or RSN IE
/// ## Description
/// The element id selects the protocol. Trailing fields may be omitted, in
/// which case the defaults apply: TKIP/TKIP/802.1X for WPA and
/// CCMP/CCMP/802.1X with the CMAC management cipher for RSN.
pub fn parse_ie(ie: &[u8]) -> Result<ParsedIe, IeError> {
    if ie.len() < 2 || ie[1] as usize != ie.len() - 2 {
        return Err(IeError::Malformed("element length"));
    }
    let (proto, body) = match ie[0] {
        RSN_TAG_ID => (Proto::Rsn, &ie[2..]),
        VENDOR_TAG_ID => {
            if ie.len() < 6 || ie[2..5] != WPA_OUI || ie[5] != WPA_OUI_TYPE {
                return Err(IeError::Malformed("not a WPA IE"));
            }
            (Proto::Wpa, &ie[6..])
        }
        _ => return Err(IeError::Malformed("element id")),
    };
    if body.len() < 2 {
        return Err(IeError::Malformed("missing version"));
    }
    let version = LittleEndian::read_u16(body);
    let expected = match proto {
        Proto::Rsn => RSN_VERSION,
        Proto::Wpa => WPA_VERSION,
    };
    if version != expected {
        return Err(IeError::UnsupportedVersion(version));
    }

    let mut parsed = match proto {
        Proto::Wpa => ParsedIe {
            proto,
            group_cipher: Some(Cipher::Tkip),
            pairwise: CipherSuites::TKIP,
            akm: AkmSuites::IEEE8021X,
            capabilities: 0,
            pmkids: vec![],
            mgmt_group_cipher: None,
        },
        Proto::Rsn => ParsedIe {
            proto,
            group_cipher: Some(Cipher::Ccmp),
            pairwise: CipherSuites::CCMP,
            akm: AkmSuites::IEEE8021X,
            capabilities: 0,
            pmkids: vec![],
            mgmt_group_cipher: Some(Cipher::AesCmac),
        },
    };

    let mut pos = 2;
    if body.len() - pos >= SELECTOR_LEN {
        parsed.group_cipher = cipher_from_selector(proto, &body[pos..]);
        pos += SELECTOR_LEN;
    } else if body.len() > pos {
        return Err(IeError::Malformed("truncated group cipher"));
    }

    if body.len() > pos {
        parsed.pairwise = read_suite_list(body, &mut pos, "pairwise cipher list")?
            .into_iter()
            .filter_map(|s| cipher_from_selector(proto, s))
            .fold(CipherSuites::empty(), |acc, c| acc | c.as_flag());
    }
    if body.len() > pos {
        parsed.akm = read_suite_list(body, &mut pos, "AKM list")?
            .into_iter()
            .filter_map(|s| read_selector(proto, s).and_then(Akm::from_suite_type))
            .fold(AkmSuites::empty(), |acc, a| acc | a.as_flag());
    }
    if body.len() - pos >= 2 {
        parsed.capabilities = LittleEndian::read_u16(&body[pos..]);
        pos += 2;
    }

    if proto == Proto::Rsn {
        if body.len() - pos >= 2 {
            let count = LittleEndian::read_u16(&body[pos..]) as usize;
            pos += 2;
            if body.len() - pos < count * PMKID_LEN {
                return Err(IeError::Malformed("PMKID list overrun"));
            }
            for chunk in body[pos..pos + count * PMKID_LEN].chunks(PMKID_LEN) {
                let mut pmkid = [0u8; PMKID_LEN];
                pmkid.copy_from_slice(chunk);
                parsed.pmkids.push(pmkid);
            }
            pos += count * PMKID_LEN;
        }
        if body.len() - pos >= SELECTOR_LEN {
            let mgmt = cipher_from_selector(proto, &body[pos..]);
            if mgmt != Some(Cipher::AesCmac) {
                return Err(IeError::Malformed("unsupported management group cipher"));
            }
            parsed.mgmt_group_cipher = mgmt;
            pos += SELECTOR_LEN;
        }
    }

    if body.len() > pos {
        return Err(IeError::Malformed("trailing bytes"));
    }
    Ok(parsed)
}

/// Intersects a station's IE with the local policy
/// ## Description
/// 802.1X is preferred over PSK and CCMP over TKIP. With management frame
/// protection required the station must advertise the capability, must not
/// end up on TKIP and must use the CMAC management cipher.
pub fn validate_against_policy(parsed: &ParsedIe, config: &AuthConfig) -> Result<Selection, NegotiationError> {
    if !config.wpa.allows(parsed.proto) {
        return Err(NegotiationError::ProtoNotEnabled);
    }
    let group = config.group_cipher();
    if parsed.group_cipher != Some(group) {
        return Err(NegotiationError::InvalidGroupCipher);
    }
    let akm = (parsed.akm & config.wpa_key_mgmt)
        .preferred()
        .ok_or(NegotiationError::InvalidAkm)?;
    let ciphers = parsed.pairwise & config.wpa_pairwise;
    let pairwise = ciphers.preferred_pairwise().ok_or(NegotiationError::InvalidPairwise)?;
    if pairwise == Cipher::None {
        return Err(NegotiationError::InvalidPairwise);
    }

    let peer_mfp = parsed.capabilities & RSN_CAP_MGMT_FRAME_PROTECTION != 0;
    if config.ieee80211w == MgmtFrameProtection::Required {
        if !peer_mfp || ciphers.contains(CipherSuites::TKIP) {
            return Err(NegotiationError::MgmtFrameProtectionViolation);
        }
        if parsed.mgmt_group_cipher != Some(Cipher::AesCmac) {
            return Err(NegotiationError::InvalidMgmtGroupCipher);
        }
    }

    Ok(Selection {
        proto: parsed.proto,
        akm,
        pairwise,
        group,
        mgmt_frame_protection: config.ieee80211w != MgmtFrameProtection::Disabled && peer_mfp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    const RSN_PSK_CCMP: [u8; 22] = [
        0x30, 0x14,
        // version
        0x01, 0x00,
        // group cipher
        0x00, 0x0f, 0xac, 0x04,
        // pairwise cipher list
        0x01, 0x00, 0x00, 0x0f, 0xac, 0x04,
        // AKM list
        0x01, 0x00, 0x00, 0x0f, 0xac, 0x02,
        // capabilities
        0x00, 0x00,
    ];

    #[rustfmt::skip]
    const WPA_PSK_TKIP: [u8; 24] = [
        0xdd, 0x16, 0x00, 0x50, 0xf2, 0x01,
        // version
        0x01, 0x00,
        // group cipher
        0x00, 0x50, 0xf2, 0x02,
        // pairwise cipher list
        0x01, 0x00, 0x00, 0x50, 0xf2, 0x02,
        // AKM list
        0x01, 0x00, 0x00, 0x50, 0xf2, 0x02,
    ];

    fn mixed_config() -> AuthConfig {
        AuthConfig {
            wpa: WpaVersions::all(),
            wpa_pairwise: CipherSuites::CCMP | CipherSuites::TKIP,
            ..Default::default()
        }
    }

    #[test]
    fn build_rsn_default() {
        assert_eq!(RSN_PSK_CCMP.to_vec(), build_ie(&AuthConfig::default()).unwrap());
    }

    #[test]
    fn build_mixed_mode() {
        let mut config = mixed_config();
        config.wpa_key_mgmt = AkmSuites::all();
        config.rsn_preauth = true;
        config.wme_enabled = true;
        let ie = build_ie(&config).unwrap();
        #[rustfmt::skip]
        assert_eq!(&ie[..30], &[
            0x30, 0x1c, 0x01, 0x00,
            0x00, 0x0f, 0xac, 0x02,
            0x02, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x00, 0x0f, 0xac, 0x02,
            0x02, 0x00, 0x00, 0x0f, 0xac, 0x01, 0x00, 0x0f, 0xac, 0x02,
            // pre-auth and 16 replay counters
            0x0d, 0x00,
        ][..]);
        let wpa = find_wpa_ie(&ie).unwrap();
        assert_eq!(&ie[30..], wpa);
        assert_eq!(Proto::Wpa, parse_ie(wpa).unwrap().proto);
        assert_eq!(0x1e, wpa[1]);
    }

    #[test]
    fn build_with_mfp() {
        let config = AuthConfig { ieee80211w: MgmtFrameProtection::Required, ..Default::default() };
        let ie = build_ie(&config).unwrap();
        assert_eq!(ie.len() - 2, ie[1] as usize);
        assert_eq!(&[0x80, 0x00, 0x00, 0x00, 0x00, 0x0f, 0xac, 0x06][..], &ie[20..]);
        let parsed = parse_ie(&ie).unwrap();
        assert_eq!(RSN_CAP_MGMT_FRAME_PROTECTION, parsed.capabilities);
        assert!(parsed.pmkids.is_empty());
    }

    #[test]
    fn build_rejects_empty_sets() {
        let config = AuthConfig { wpa_pairwise: CipherSuites::WEP40, ..Default::default() };
        assert!(build_ie(&config).is_err());
    }

    #[test]
    fn parse_rsn() {
        let parsed = parse_ie(&RSN_PSK_CCMP).unwrap();
        assert_eq!(Proto::Rsn, parsed.proto);
        assert_eq!(Some(Cipher::Ccmp), parsed.group_cipher);
        assert_eq!(CipherSuites::CCMP, parsed.pairwise);
        assert_eq!(AkmSuites::PSK, parsed.akm);
    }

    #[test]
    fn parse_defaults_for_omitted_fields() {
        let parsed = parse_ie(&[0x30, 0x02, 0x01, 0x00]).unwrap();
        assert_eq!(Some(Cipher::Ccmp), parsed.group_cipher);
        assert_eq!(CipherSuites::CCMP, parsed.pairwise);
        assert_eq!(AkmSuites::IEEE8021X, parsed.akm);
        assert_eq!(Some(Cipher::AesCmac), parsed.mgmt_group_cipher);

        let parsed = parse_ie(&[0xdd, 0x06, 0x00, 0x50, 0xf2, 0x01, 0x01, 0x00]).unwrap();
        assert_eq!(Some(Cipher::Tkip), parsed.group_cipher);
        assert_eq!(CipherSuites::TKIP, parsed.pairwise);
        assert_eq!(AkmSuites::IEEE8021X, parsed.akm);
        assert_eq!(None, parsed.mgmt_group_cipher);
    }

    #[test]
    fn parse_malformed() {
        // pairwise count claims more suites than remain
        let mut bad = RSN_PSK_CCMP;
        bad[8] = 0x05;
        assert!(matches!(parse_ie(&bad), Err(IeError::Malformed(_))));

        // zero count
        let mut zero = RSN_PSK_CCMP;
        zero[8] = 0x00;
        assert!(matches!(parse_ie(&zero), Err(IeError::Malformed(_))));

        // element length disagrees with the buffer
        assert!(matches!(parse_ie(&RSN_PSK_CCMP[..20]), Err(IeError::Malformed(_))));

        // a lone trailing byte after the capabilities
        let mut trailing = RSN_PSK_CCMP.to_vec();
        trailing.push(0x01);
        trailing[1] += 1;
        assert!(matches!(parse_ie(&trailing), Err(IeError::Malformed(_))));

        // PMKID list overrun
        let mut pmkid = RSN_PSK_CCMP.to_vec();
        pmkid.extend_from_slice(&[0x01, 0x00, 0xaa, 0xbb]);
        pmkid[1] += 4;
        assert_eq!(Err(IeError::Malformed("PMKID list overrun")), parse_ie(&pmkid));

        // group cipher cut short
        assert!(matches!(parse_ie(&[0x30, 0x04, 0x01, 0x00, 0x00, 0x0f]), Err(IeError::Malformed(_))));

        assert_eq!(Err(IeError::UnsupportedVersion(2)), parse_ie(&[0x30, 0x02, 0x02, 0x00]));
        assert!(parse_ie(&[0x07, 0x02, 0x01, 0x00]).is_err());
    }

    #[test]
    fn parse_pmkids_and_mgmt_cipher() {
        let mut ie = RSN_PSK_CCMP.to_vec();
        ie.extend_from_slice(&[0x01, 0x00]);
        ie.extend_from_slice(&[0x42; 16]);
        ie.extend_from_slice(&[0x00, 0x0f, 0xac, 0x06]);
        ie[1] = (ie.len() - 2) as u8;
        let parsed = parse_ie(&ie).unwrap();
        assert_eq!(vec![[0x42; 16]], parsed.pmkids);
        assert_eq!(Some(Cipher::AesCmac), parsed.mgmt_group_cipher);

        let last = ie.len() - 1;
        ie[last] = 0x04;
        assert_eq!(Err(IeError::Malformed("unsupported management group cipher")), parse_ie(&ie));
    }

    #[test]
    fn negotiation_picks_tkip_when_peer_only_offers_tkip() {
        let config = mixed_config();
        let mut ie = RSN_PSK_CCMP;
        // TKIP group, TKIP pairwise
        ie[7] = CIPHER_TKIP;
        ie[13] = CIPHER_TKIP;
        let selection = validate_against_policy(&parse_ie(&ie).unwrap(), &config).unwrap();
        assert_eq!(Cipher::Tkip, selection.pairwise);
        assert_eq!(Akm::Psk, selection.akm);
        assert_eq!(Proto::Rsn, selection.proto);

        let selection = validate_against_policy(&parse_ie(&WPA_PSK_TKIP).unwrap(), &config).unwrap();
        assert_eq!(Proto::Wpa, selection.proto);
    }

    #[test]
    fn negotiation_failures() {
        let config = mixed_config();
        let mut wep = RSN_PSK_CCMP;
        wep[7] = CIPHER_TKIP;
        wep[13] = CIPHER_WEP40;
        assert_eq!(Err(NegotiationError::InvalidPairwise), validate_against_policy(&parse_ie(&wep).unwrap(), &config));

        // group cipher differs from the configured TKIP
        assert_eq!(
            Err(NegotiationError::InvalidGroupCipher),
            validate_against_policy(&parse_ie(&RSN_PSK_CCMP).unwrap(), &config)
        );

        let mut eap_only = RSN_PSK_CCMP;
        eap_only[19] = AKM_IEEE8021X;
        assert_eq!(
            Err(NegotiationError::InvalidAkm),
            validate_against_policy(&parse_ie(&eap_only).unwrap(), &AuthConfig::default())
        );

        let wpa2_only = AuthConfig::default();
        assert_eq!(
            Err(NegotiationError::ProtoNotEnabled),
            validate_against_policy(&parse_ie(&WPA_PSK_TKIP).unwrap(), &wpa2_only)
        );
    }

    #[test]
    fn negotiation_mgmt_frame_protection() {
        let required = AuthConfig { ieee80211w: MgmtFrameProtection::Required, ..Default::default() };
        assert_eq!(
            Err(NegotiationError::MgmtFrameProtectionViolation),
            validate_against_policy(&parse_ie(&RSN_PSK_CCMP).unwrap(), &required)
        );

        let mut capable = RSN_PSK_CCMP;
        capable[20] = 0x80;
        let selection = validate_against_policy(&parse_ie(&capable).unwrap(), &required).unwrap();
        assert!(selection.mgmt_frame_protection);

        let optional = AuthConfig { ieee80211w: MgmtFrameProtection::Optional, ..Default::default() };
        let selection = validate_against_policy(&parse_ie(&RSN_PSK_CCMP).unwrap(), &optional).unwrap();
        assert!(!selection.mgmt_frame_protection);

        let tkip_required = AuthConfig {
            ieee80211w: MgmtFrameProtection::Required,
            wpa_pairwise: CipherSuites::TKIP,
            wpa_group: Some(Cipher::Ccmp),
            ..Default::default()
        };
        let mut tkip = capable;
        tkip[13] = CIPHER_TKIP;
        assert_eq!(
            Err(NegotiationError::MgmtFrameProtectionViolation),
            validate_against_policy(&parse_ie(&tkip).unwrap(), &tkip_required)
        );
    }
}
