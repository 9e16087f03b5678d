
// ELEMENT IDENTIFICATIONS
pub const RSN_TAG_ID: u8 = 0x30;
pub const VENDOR_TAG_ID: u8 = 0xdd;
pub const RSN_OUI: [u8; 3] = [0x00, 0x0f, 0xac];
pub const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
pub const WPA_OUI_TYPE: u8 = 1;
pub const WPA_VERSION: u16 = 1;
pub const RSN_VERSION: u16 = 1;
pub const SELECTOR_LEN: usize = 4;

// CIPHER SUITE TYPES
pub const CIPHER_NONE: u8 = 0;
pub const CIPHER_WEP40: u8 = 1;
pub const CIPHER_TKIP: u8 = 2;
pub const CIPHER_WRAP: u8 = 3;
pub const CIPHER_CCMP: u8 = 4;
pub const CIPHER_WEP104: u8 = 5;
pub const CIPHER_AES_128_CMAC: u8 = 6;

// AKM SUITE TYPES
pub const AKM_IEEE8021X: u8 = 1;
pub const AKM_PSK: u8 = 2;

// RSN CAPABILITIES
pub const RSN_CAP_PREAUTH: u16 = 0x0001;
pub const RSN_CAP_PTKSA_REPLAY_COUNTERS_SHIFT: u16 = 2;
pub const RSN_CAP_MGMT_FRAME_PROTECTION: u16 = 0x0080;
pub const RSN_CAP_PEERKEY: u16 = 0x0200;
// 16 PTKSA replay counters when WME is enabled
pub const RSN_NUM_REPLAY_COUNTERS_16: u16 = 3;

// KDE DATA TYPES
pub const KDE_GROUPKEY: u8 = 1;
pub const KDE_MAC_ADDR: u8 = 3;
pub const KDE_PMKID: u8 = 4;
pub const KDE_DHV: u8 = 9;
pub const KDE_IGTK: u8 = 10;

// EAPOL
pub const IEEE802_1X_TYPE_EAPOL_KEY: u8 = 3;
pub const EAPOL_HEADER_LEN: usize = 4;
pub const EAPOL_KEY_TYPE_RSN: u8 = 2;
pub const EAPOL_KEY_TYPE_WPA: u8 = 254;
// descriptor type through key data length
pub const EAPOL_KEY_FIXED_LEN: usize = 95;

// FIELD OFFSETS (from the start of the 802.1X header)
pub const KEY_INFO_OFFSET: usize = 5;
pub const KEY_LENGTH_OFFSET: usize = 7;
pub const REPLAY_COUNTER_OFFSET: usize = 9;
pub const NONCE_OFFSET: usize = 17;
pub const KEY_IV_OFFSET: usize = 49;
pub const KEY_RSC_OFFSET: usize = 65;
pub const KEY_ID_OFFSET: usize = 73;
pub const KEY_MIC_OFFSET: usize = 81;
pub const KEY_DATA_LEN_OFFSET: usize = 97;
pub const KEY_DATA_OFFSET: usize = 99;

// LENGTHS
pub const NONCE_LEN: usize = 32;
pub const PMK_LEN: usize = 32;
pub const GMK_LEN: usize = 32;
pub const PMKID_LEN: usize = 16;
pub const KEY_RSC_LEN: usize = 8;
pub const KEY_IV_LEN: usize = 16;
pub const IGTK_LEN: usize = 16;
pub const DGTK_LEN: usize = 16;
pub const DHV_LEN: usize = 16;
pub const IGTK_PN_LEN: usize = 6;

// REASON CODES
pub const REASON_PREV_AUTH_NOT_VALID: u16 = 2;

// RETRY AND LIFETIME DEFAULTS
pub const DEFAULT_UPDATE_COUNT: u32 = 3;
pub const DEFAULT_UPDATE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_PMK_LIFETIME: u32 = 43200;
pub const DEFAULT_REAUTH_THRESHOLD: u32 = 70;
pub const DEFAULT_SA_TIMEOUT: u32 = 60;
pub const STRICT_REKEY_DELAY_MS: u64 = 500;
