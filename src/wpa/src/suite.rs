//! Cipher and AKM suites, protocol versions and the policy enums shared by
//! the IE codec, the key hierarchy and the configuration.
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::consts::*;

/// A single cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cipher {
    None,
    Wep40,
    Tkip,
    Wrap,
    Ccmp,
    Wep104,
    #[serde(rename = "AES-128-CMAC")]
    AesCmac,
}

impl Cipher {
    pub fn suite_type(self) -> u8 {
        match self {
            Cipher::None => CIPHER_NONE,
            Cipher::Wep40 => CIPHER_WEP40,
            Cipher::Tkip => CIPHER_TKIP,
            Cipher::Wrap => CIPHER_WRAP,
            Cipher::Ccmp => CIPHER_CCMP,
            Cipher::Wep104 => CIPHER_WEP104,
            Cipher::AesCmac => CIPHER_AES_128_CMAC,
        }
    }

    pub fn from_suite_type(suite_type: u8) -> Option<Cipher> {
        Some(match suite_type {
            CIPHER_NONE => Cipher::None,
            CIPHER_WEP40 => Cipher::Wep40,
            CIPHER_TKIP => Cipher::Tkip,
            CIPHER_WRAP => Cipher::Wrap,
            CIPHER_CCMP => Cipher::Ccmp,
            CIPHER_WEP104 => Cipher::Wep104,
            CIPHER_AES_128_CMAC => Cipher::AesCmac,
            _ => return None,
        })
    }

    /// Temporal key length, also used for the EAPOL-Key `key_length` field.
    pub fn key_len(self) -> usize {
        match self {
            Cipher::Ccmp => 16,
            Cipher::Tkip => 32,
            Cipher::Wep104 => 13,
            Cipher::Wep40 => 5,
            Cipher::AesCmac => 16,
            Cipher::None | Cipher::Wrap => 0,
        }
    }

    pub fn key_bits(self) -> usize {
        self.key_len() * 8
    }

    pub fn algorithm(self) -> KeyAlgorithm {
        match self {
            Cipher::Ccmp => KeyAlgorithm::Ccmp,
            Cipher::Tkip => KeyAlgorithm::Tkip,
            Cipher::Wep40 | Cipher::Wep104 => KeyAlgorithm::Wep,
            Cipher::AesCmac => KeyAlgorithm::Igtk,
            Cipher::None | Cipher::Wrap => KeyAlgorithm::None,
        }
    }

    pub fn as_flag(self) -> CipherSuites {
        match self {
            Cipher::None => CipherSuites::NONE,
            Cipher::Wep40 => CipherSuites::WEP40,
            Cipher::Tkip => CipherSuites::TKIP,
            Cipher::Wrap => CipherSuites::WRAP,
            Cipher::Ccmp => CipherSuites::CCMP,
            Cipher::Wep104 => CipherSuites::WEP104,
            Cipher::AesCmac => CipherSuites::AES_128_CMAC,
        }
    }
}

bitflags! {
    /// A set of cipher suites.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CipherSuites: u8 {
        const NONE = 1 << 0;
        const WEP40 = 1 << 1;
        const WEP104 = 1 << 2;
        const TKIP = 1 << 3;
        const CCMP = 1 << 4;
        const WRAP = 1 << 5;
        const AES_128_CMAC = 1 << 6;
    }
}

impl CipherSuites {
    /// Pairwise preference order: CCMP, TKIP, NONE.
    pub fn preferred_pairwise(self) -> Option<Cipher> {
        [Cipher::Ccmp, Cipher::Tkip, Cipher::None]
            .into_iter()
            .find(|c| self.contains(c.as_flag()))
    }

    /// Members in the order they are advertised.
    pub fn advertised(self) -> Vec<Cipher> {
        [Cipher::Ccmp, Cipher::Tkip, Cipher::None]
            .into_iter()
            .filter(|c| self.contains(c.as_flag()))
            .collect()
    }
}

/// A single authentication and key management suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Akm {
    #[serde(rename = "WPA-EAP")]
    Ieee8021X,
    #[serde(rename = "WPA-PSK")]
    Psk,
}

impl Akm {
    pub fn suite_type(self) -> u8 {
        match self {
            Akm::Ieee8021X => AKM_IEEE8021X,
            Akm::Psk => AKM_PSK,
        }
    }

    pub fn from_suite_type(suite_type: u8) -> Option<Akm> {
        match suite_type {
            AKM_IEEE8021X => Some(Akm::Ieee8021X),
            AKM_PSK => Some(Akm::Psk),
            _ => None,
        }
    }

    pub fn as_flag(self) -> AkmSuites {
        match self {
            Akm::Ieee8021X => AkmSuites::IEEE8021X,
            Akm::Psk => AkmSuites::PSK,
        }
    }
}

bitflags! {
    /// A set of AKM suites.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AkmSuites: u8 {
        const IEEE8021X = 1 << 0;
        const PSK = 1 << 1;
    }
}

impl AkmSuites {
    /// 802.1X is preferred over PSK.
    pub fn preferred(self) -> Option<Akm> {
        [Akm::Ieee8021X, Akm::Psk].into_iter().find(|a| self.contains(a.as_flag()))
    }

    pub fn advertised(self) -> Vec<Akm> {
        [Akm::Ieee8021X, Akm::Psk].into_iter().filter(|a| self.contains(a.as_flag())).collect()
    }
}

/// The protocol a station negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Proto {
    /// WPA, vendor IE with OUI 00-50-F2.
    Wpa,
    /// IEEE 802.11i / WPA2.
    Rsn,
}

bitflags! {
    /// Enabled protocol versions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WpaVersions: u8 {
        const WPA = 1 << 0;
        const WPA2 = 1 << 1;
    }
}

impl WpaVersions {
    pub fn allows(self, proto: Proto) -> bool {
        match proto {
            Proto::Wpa => self.contains(WpaVersions::WPA),
            Proto::Rsn => self.contains(WpaVersions::WPA2),
        }
    }
}

/// Management frame protection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MgmtFrameProtection {
    #[default]
    Disabled,
    Optional,
    Required,
}

/// The algorithm name handed to the driver with `set_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// Removes the key.
    None,
    Wep,
    Tkip,
    Ccmp,
    Igtk,
    Dgtk,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::None => "none",
            KeyAlgorithm::Wep => "WEP",
            KeyAlgorithm::Tkip => "TKIP",
            KeyAlgorithm::Ccmp => "CCMP",
            KeyAlgorithm::Igtk => "IGTK",
            KeyAlgorithm::Dgtk => "DGTK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_preference() {
        assert_eq!(Some(Cipher::Ccmp), (CipherSuites::TKIP | CipherSuites::CCMP).preferred_pairwise());
        assert_eq!(Some(Cipher::Tkip), CipherSuites::TKIP.preferred_pairwise());
        assert_eq!(None, CipherSuites::WEP40.preferred_pairwise());
        assert_eq!(vec![Cipher::Ccmp, Cipher::Tkip], (CipherSuites::TKIP | CipherSuites::WEP40 | CipherSuites::CCMP).advertised());
    }

    #[test]
    fn akm_preference() {
        assert_eq!(Some(Akm::Ieee8021X), AkmSuites::all().preferred());
        assert_eq!(Some(Akm::Psk), AkmSuites::PSK.preferred());
        assert_eq!(None, AkmSuites::empty().preferred());
    }

    #[test]
    fn suite_type_round_trip() {
        for c in [Cipher::None, Cipher::Wep40, Cipher::Tkip, Cipher::Wrap, Cipher::Ccmp, Cipher::Wep104, Cipher::AesCmac] {
            assert_eq!(Some(c), Cipher::from_suite_type(c.suite_type()));
        }
        assert_eq!(None, Cipher::from_suite_type(7));
        assert_eq!(None, Akm::from_suite_type(3));
    }
}
