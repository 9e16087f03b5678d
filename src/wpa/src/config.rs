use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::AuthError;
use crate::suite::{AkmSuites, Cipher, CipherSuites, MgmtFrameProtection, WpaVersions};

// Helper functions for default values
fn default_wpa() -> WpaVersions { WpaVersions::WPA2 }
fn default_key_mgmt() -> AkmSuites { AkmSuites::PSK }
fn default_pairwise() -> CipherSuites { CipherSuites::CCMP }
fn default_group_rekey() -> u32 { 600 }
fn default_gmk_rekey() -> u32 { 86400 }
fn default_eapol_version() -> u8 { 2 }
fn default_update_count() -> u32 { DEFAULT_UPDATE_COUNT }
fn default_update_timeout() -> u64 { DEFAULT_UPDATE_TIMEOUT_MS }
fn default_pmk_lifetime() -> u32 { DEFAULT_PMK_LIFETIME }
fn default_reauth_threshold() -> u32 { DEFAULT_REAUTH_THRESHOLD }
fn default_sa_timeout() -> u32 { DEFAULT_SA_TIMEOUT }

/// Authenticator policy for one BSS.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Enabled protocol versions.
    #[serde(default = "default_wpa")]
    pub wpa: WpaVersions,
    #[serde(default = "default_key_mgmt")]
    pub wpa_key_mgmt: AkmSuites,
    #[serde(default = "default_pairwise")]
    pub wpa_pairwise: CipherSuites,
    /// Group cipher; derived from the pairwise set when absent.
    #[serde(default)]
    pub wpa_group: Option<Cipher>,
    /// GTK rekey interval in seconds, 0 disables.
    #[serde(default = "default_group_rekey")]
    pub wpa_group_rekey: u32,
    /// GMK rekey interval in seconds, 0 disables.
    #[serde(default = "default_gmk_rekey")]
    pub wpa_gmk_rekey: u32,
    /// Rekey the GTK whenever a station that held it leaves.
    #[serde(default)]
    pub wpa_strict_rekey: bool,
    #[serde(default)]
    pub rsn_preauth: bool,
    #[serde(default)]
    pub peerkey: bool,
    #[serde(default)]
    pub wme_enabled: bool,
    #[serde(default)]
    pub ieee80211w: MgmtFrameProtection,
    #[serde(default = "default_eapol_version")]
    pub eapol_version: u8,

    #[serde(default = "default_update_count")]
    pub group_update_count: u32,
    #[serde(default = "default_update_timeout")]
    pub group_update_timeout_ms: u64,
    #[serde(default = "default_update_count")]
    pub pairwise_update_count: u32,
    #[serde(default = "default_update_timeout")]
    pub pairwise_update_timeout_ms: u64,

    #[serde(default = "default_pmk_lifetime")]
    pub pmk_lifetime: u32,
    #[serde(default = "default_reauth_threshold")]
    pub pmk_reauth_threshold: u32,
    #[serde(default = "default_sa_timeout")]
    pub sa_timeout: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            wpa: default_wpa(),
            wpa_key_mgmt: default_key_mgmt(),
            wpa_pairwise: default_pairwise(),
            wpa_group: None,
            wpa_group_rekey: default_group_rekey(),
            wpa_gmk_rekey: default_gmk_rekey(),
            wpa_strict_rekey: false,
            rsn_preauth: false,
            peerkey: false,
            wme_enabled: false,
            ieee80211w: MgmtFrameProtection::Disabled,
            eapol_version: default_eapol_version(),
            group_update_count: default_update_count(),
            group_update_timeout_ms: default_update_timeout(),
            pairwise_update_count: default_update_count(),
            pairwise_update_timeout_ms: default_update_timeout(),
            pmk_lifetime: default_pmk_lifetime(),
            pmk_reauth_threshold: default_reauth_threshold(),
            sa_timeout: default_sa_timeout(),
        }
    }
}

impl AuthConfig {
    /// TKIP when any station may pick TKIP, CCMP otherwise.
    pub fn group_cipher(&self) -> Cipher {
        match self.wpa_group {
            Some(cipher) => cipher,
            None if self.wpa_pairwise.contains(CipherSuites::TKIP) => Cipher::Tkip,
            None => Cipher::Ccmp,
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.wpa.is_empty() {
            return Err(AuthError::Config("no WPA version enabled"));
        }
        if self.wpa_key_mgmt.is_empty() {
            return Err(AuthError::Config("no key management suite"));
        }
        if self.wpa_pairwise.advertised().is_empty() {
            return Err(AuthError::Config("no pairwise cipher"));
        }
        match self.group_cipher() {
            Cipher::Ccmp | Cipher::Tkip | Cipher::Wep104 | Cipher::Wep40 => {}
            _ => return Err(AuthError::Config("invalid group cipher")),
        }
        if self.eapol_version == 0 {
            return Err(AuthError::Config("invalid EAPOL version"));
        }
        if self.ieee80211w == MgmtFrameProtection::Required && !self.wpa.contains(WpaVersions::WPA2) {
            return Err(AuthError::Config("management frame protection requires WPA2"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_toml() {
        let config: AuthConfig = toml::from_str("").unwrap();
        assert_eq!(AuthConfig::default(), config);
        assert_eq!(Cipher::Ccmp, config.group_cipher());
        assert_eq!(3, config.pairwise_update_count);
        assert_eq!(1000, config.group_update_timeout_ms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_mixed_mode() {
        let toml_str = r#"
            wpa = "WPA | WPA2"
            wpa_key_mgmt = "IEEE8021X | PSK"
            wpa_pairwise = "TKIP | CCMP"
            wpa_group_rekey = 3600
            wpa_strict_rekey = true
            ieee80211w = "optional"
            wme_enabled = true
        "#;
        let config: AuthConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(WpaVersions::all(), config.wpa);
        assert_eq!(AkmSuites::all(), config.wpa_key_mgmt);
        assert_eq!(Cipher::Tkip, config.group_cipher());
        assert_eq!(3600, config.wpa_group_rekey);
        assert_eq!(86400, config.wpa_gmk_rekey);
        assert!(config.wpa_strict_rekey);
        assert_eq!(MgmtFrameProtection::Optional, config.ieee80211w);
    }

    #[test]
    fn explicit_group_cipher() {
        let config: AuthConfig = toml::from_str(r#"wpa_group = "WEP104""#).unwrap();
        assert_eq!(Cipher::Wep104, config.group_cipher());
    }

    #[test]
    fn validate_rejects_empty_sets() {
        let mut config = AuthConfig { wpa_pairwise: CipherSuites::WEP40, ..Default::default() };
        assert_eq!(Err(AuthError::Config("no pairwise cipher")), config.validate());
        config.wpa_pairwise = CipherSuites::CCMP;
        config.wpa_key_mgmt = AkmSuites::empty();
        assert_eq!(Err(AuthError::Config("no key management suite")), config.validate());
        config.wpa_key_mgmt = AkmSuites::PSK;
        config.wpa_group = Some(Cipher::AesCmac);
        assert_eq!(Err(AuthError::Config("invalid group cipher")), config.validate());
    }
}
