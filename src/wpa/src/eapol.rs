//! EAPOL-Key frame codec: key info fields, frame layout, MIC handling and
//! key data encryption.
use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use crypto::{HmacMd5, HmacSha1, IntegrityAlgorithm, MIC_LEN};

use crate::consts::*;
use crate::error::{BuildError, CryptoError, FrameError};
use crate::keys::{Nonce, Ptk};
use crate::suite::{Cipher, Proto};

const KEY_INFO_TYPE_MASK: u16 = 0x0007;
const KEY_INFO_KEY_TYPE: u16 = 0x0008;
const KEY_INFO_KEY_INDEX_MASK: u16 = 0x0030;
const KEY_INFO_KEY_INDEX_SHIFT: u16 = 4;
const RC4_SKIP: usize = 256;

/// Key descriptor version, selecting the MIC and key data algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDescriptorVersion {
    /// HMAC-MD5 MIC, RC4 key data encryption.
    HmacMd5Rc4 = 1,
    /// HMAC-SHA1-128 MIC, AES Key Wrap key data encryption.
    HmacSha1Aes = 2,
}

impl KeyDescriptorVersion {
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits & KEY_INFO_TYPE_MASK {
            1 => Some(KeyDescriptorVersion::HmacMd5Rc4),
            2 => Some(KeyDescriptorVersion::HmacSha1Aes),
            _ => None,
        }
    }

    /// CCMP pairwise suites use the AES based version.
    pub fn for_pairwise(pairwise: Cipher) -> Self {
        match pairwise {
            Cipher::Ccmp => KeyDescriptorVersion::HmacSha1Aes,
            _ => KeyDescriptorVersion::HmacMd5Rc4,
        }
    }

    pub fn integrity_algorithm(self) -> &'static dyn IntegrityAlgorithm {
        match self {
            KeyDescriptorVersion::HmacMd5Rc4 => &HmacMd5,
            KeyDescriptorVersion::HmacSha1Aes => &HmacSha1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Group,
    Pairwise,
}

bitflags! {
    /// Control bits of the key information field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyInfoFlags: u16 {
        const INSTALL = 0x0040;
        const ACK = 0x0080;
        const MIC = 0x0100;
        const SECURE = 0x0200;
        const ERROR = 0x0400;
        const REQUEST = 0x0800;
        const ENCRYPTED_KEY_DATA = 0x1000;
        const SMK_MESSAGE = 0x2000;
    }
}

/// The key information field split into its typed parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub version: Option<KeyDescriptorVersion>,
    pub key_type: KeyType,
    /// Only meaningful for WPA; RSN carries the index in the GTK KDE.
    pub key_index: u8,
    pub flags: KeyInfoFlags,
}

impl KeyInfo {
    pub fn from_bits(bits: u16) -> Self {
        KeyInfo {
            version: KeyDescriptorVersion::from_bits(bits),
            key_type: if bits & KEY_INFO_KEY_TYPE != 0 { KeyType::Pairwise } else { KeyType::Group },
            key_index: ((bits & KEY_INFO_KEY_INDEX_MASK) >> KEY_INFO_KEY_INDEX_SHIFT) as u8,
            flags: KeyInfoFlags::from_bits_truncate(bits),
        }
    }

    pub fn to_bits(&self) -> u16 {
        let mut bits = self.flags.bits();
        if let Some(version) = self.version {
            bits |= version as u16;
        }
        if self.key_type == KeyType::Pairwise {
            bits |= KEY_INFO_KEY_TYPE;
        }
        bits | ((self.key_index as u16) << KEY_INFO_KEY_INDEX_SHIFT) & KEY_INFO_KEY_INDEX_MASK
    }

    pub fn is_pairwise(&self) -> bool {
        self.key_type == KeyType::Pairwise
    }
}

/// Which message of which handshake an inbound frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Pairwise2,
    Pairwise4,
    Group2,
    Request,
    SmkM1,
    SmkM3,
    SmkError,
}

impl MessageKind {
    pub fn classify(frame: &EapolKeyFrame) -> Self {
        let flags = frame.key_info.flags;
        let smk_request = KeyInfoFlags::SMK_MESSAGE | KeyInfoFlags::REQUEST;
        if flags.contains(smk_request) {
            if flags.contains(KeyInfoFlags::ERROR) {
                MessageKind::SmkError
            } else {
                MessageKind::SmkM1
            }
        } else if flags.contains(KeyInfoFlags::SMK_MESSAGE) {
            MessageKind::SmkM3
        } else if flags.contains(KeyInfoFlags::REQUEST) {
            MessageKind::Request
        } else if !frame.key_info.is_pairwise() {
            MessageKind::Group2
        } else if frame.key_data.is_empty() {
            MessageKind::Pairwise4
        } else {
            MessageKind::Pairwise2
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Pairwise2 => "2/4 Pairwise",
            MessageKind::Pairwise4 => "4/4 Pairwise",
            MessageKind::Group2 => "2/2 Group",
            MessageKind::Request => "Request",
            MessageKind::SmkM1 => "SMK M1",
            MessageKind::SmkM3 => "SMK M3",
            MessageKind::SmkError => "SMK Error",
        }
    }
}

/// A decoded EAPOL-Key frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapolKeyFrame {
    pub protocol_version: u8,
    pub descriptor_type: u8,
    pub key_info: KeyInfo,
    pub key_length: u16,
    pub replay_counter: u64,
    pub nonce: Nonce,
    pub iv: [u8; KEY_IV_LEN],
    pub rsc: [u8; KEY_RSC_LEN],
    pub key_id: [u8; 8],
    pub mic: [u8; MIC_LEN],
    pub key_data: Vec<u8>,
}

impl EapolKeyFrame {
    pub fn new(proto: Proto, key_info: KeyInfo) -> Self {
        EapolKeyFrame {
            protocol_version: 2,
            descriptor_type: match proto {
                Proto::Rsn => EAPOL_KEY_TYPE_RSN,
                Proto::Wpa => EAPOL_KEY_TYPE_WPA,
            },
            key_info,
            key_length: 0,
            replay_counter: 0,
            nonce: [0; NONCE_LEN],
            iv: [0; KEY_IV_LEN],
            rsc: [0; KEY_RSC_LEN],
            key_id: [0; 8],
            mic: [0; MIC_LEN],
            key_data: vec![],
        }
    }

    /// Size of the encoded frame, EAPOL header included.
    pub fn encoded_len(&self) -> usize {
        EAPOL_HEADER_LEN + EAPOL_KEY_FIXED_LEN + self.key_data.len()
    }

    /// Serializes the frame, 802.1X header included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        buf[0] = self.protocol_version;
        buf[1] = IEEE802_1X_TYPE_EAPOL_KEY;
        BigEndian::write_u16(&mut buf[2..4], (self.encoded_len() - EAPOL_HEADER_LEN) as u16);
        buf[4] = self.descriptor_type;
        BigEndian::write_u16(&mut buf[KEY_INFO_OFFSET..], self.key_info.to_bits());
        BigEndian::write_u16(&mut buf[KEY_LENGTH_OFFSET..], self.key_length);
        BigEndian::write_u64(&mut buf[REPLAY_COUNTER_OFFSET..], self.replay_counter);
        buf[NONCE_OFFSET..KEY_IV_OFFSET].copy_from_slice(&self.nonce);
        buf[KEY_IV_OFFSET..KEY_RSC_OFFSET].copy_from_slice(&self.iv);
        buf[KEY_RSC_OFFSET..KEY_ID_OFFSET].copy_from_slice(&self.rsc);
        buf[KEY_ID_OFFSET..KEY_MIC_OFFSET].copy_from_slice(&self.key_id);
        buf[KEY_MIC_OFFSET..KEY_DATA_LEN_OFFSET].copy_from_slice(&self.mic);
        BigEndian::write_u16(&mut buf[KEY_DATA_LEN_OFFSET..], self.key_data.len() as u16);
        buf[KEY_DATA_OFFSET..].copy_from_slice(&self.key_data);
        buf
    }
}

/// Validates the framing of an EAPOL-Key frame and decodes its fields.
/// Bytes past the 802.1X body length (link layer padding) are ignored.
pub fn parse_header(bytes: &[u8]) -> Result<EapolKeyFrame, FrameError> {
    let min = EAPOL_HEADER_LEN + EAPOL_KEY_FIXED_LEN;
    if bytes.len() < min {
        return Err(FrameError::TruncatedFrame { len: bytes.len(), min });
    }
    if bytes[1] != IEEE802_1X_TYPE_EAPOL_KEY {
        return Err(FrameError::NotEapolKey(bytes[1]));
    }
    let body_len = BigEndian::read_u16(&bytes[2..4]) as usize;
    if EAPOL_HEADER_LEN + body_len > bytes.len() {
        return Err(FrameError::LengthMismatch { declared: body_len, available: bytes.len() - EAPOL_HEADER_LEN });
    }
    if body_len < EAPOL_KEY_FIXED_LEN {
        return Err(FrameError::TruncatedFrame { len: EAPOL_HEADER_LEN + body_len, min });
    }
    let descriptor_type = bytes[4];
    if descriptor_type != EAPOL_KEY_TYPE_RSN && descriptor_type != EAPOL_KEY_TYPE_WPA {
        return Err(FrameError::UnknownDescriptor(descriptor_type));
    }
    let key_data_len = BigEndian::read_u16(&bytes[KEY_DATA_LEN_OFFSET..]) as usize;
    let available = body_len - EAPOL_KEY_FIXED_LEN;
    if key_data_len > available {
        return Err(FrameError::LengthMismatch { declared: key_data_len, available });
    }

    let mut frame = EapolKeyFrame::new(Proto::Rsn, KeyInfo::from_bits(BigEndian::read_u16(&bytes[KEY_INFO_OFFSET..])));
    frame.protocol_version = bytes[0];
    frame.descriptor_type = descriptor_type;
    frame.key_length = BigEndian::read_u16(&bytes[KEY_LENGTH_OFFSET..]);
    frame.replay_counter = BigEndian::read_u64(&bytes[REPLAY_COUNTER_OFFSET..]);
    frame.nonce.copy_from_slice(&bytes[NONCE_OFFSET..KEY_IV_OFFSET]);
    frame.iv.copy_from_slice(&bytes[KEY_IV_OFFSET..KEY_RSC_OFFSET]);
    frame.rsc.copy_from_slice(&bytes[KEY_RSC_OFFSET..KEY_ID_OFFSET]);
    frame.key_id.copy_from_slice(&bytes[KEY_ID_OFFSET..KEY_MIC_OFFSET]);
    frame.mic.copy_from_slice(&bytes[KEY_MIC_OFFSET..KEY_DATA_LEN_OFFSET]);
    frame.key_data = bytes[KEY_DATA_OFFSET..KEY_DATA_OFFSET + key_data_len].to_vec();
    Ok(frame)
}

/// Zeroes the MIC field, computes the MIC over the whole frame and writes it.
pub fn write_mic(version: KeyDescriptorVersion, kck: &[u8], frame: &mut [u8]) -> Result<(), CryptoError> {
    if frame.len() < KEY_DATA_LEN_OFFSET {
        return Err(CryptoError::InvalidDataLength(frame.len()));
    }
    frame[KEY_MIC_OFFSET..KEY_DATA_LEN_OFFSET].fill(0);
    let mic = version.integrity_algorithm().compute(kck, frame)?;
    frame[KEY_MIC_OFFSET..KEY_DATA_LEN_OFFSET].copy_from_slice(&mic);
    Ok(())
}

/// Recomputes the MIC of a serialized frame with its MIC field zeroed and
/// compares it to the carried one. The algorithm follows the frame's own
/// descriptor version; an unknown version never verifies.
pub fn verify_mic(kck: &[u8], frame: &[u8]) -> bool {
    if frame.len() < KEY_DATA_LEN_OFFSET {
        return false;
    }
    let version = match KeyDescriptorVersion::from_bits(BigEndian::read_u16(&frame[KEY_INFO_OFFSET..])) {
        Some(version) => version,
        None => return false,
    };
    let mut zeroed = frame.to_vec();
    zeroed[KEY_MIC_OFFSET..KEY_DATA_LEN_OFFSET].fill(0);
    version
        .integrity_algorithm()
        .verify(kck, &zeroed, &frame[KEY_MIC_OFFSET..KEY_DATA_LEN_OFFSET])
}

/// Encrypts key data. Version 2 pads with `0xdd 00..` to a multiple of 8
/// (at least 16) and wraps; version 1 runs RC4 keyed with `iv || kek`.
pub fn encrypt_key_data(
    version: KeyDescriptorVersion,
    kek: &[u8],
    iv: &[u8; KEY_IV_LEN],
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match version {
        KeyDescriptorVersion::HmacSha1Aes => {
            let mut padded = data.to_vec();
            if padded.len() % 8 != 0 || padded.len() < 16 {
                padded.push(VENDOR_TAG_ID);
                let target = std::cmp::max(16, (padded.len() + 7) / 8 * 8);
                padded.resize(target, 0);
            }
            crypto::aes_wrap(kek, &padded)
        }
        KeyDescriptorVersion::HmacMd5Rc4 => {
            let mut out = data.to_vec();
            crypto::rc4_skip(&[&iv[..], kek].concat(), RC4_SKIP, &mut out);
            Ok(out)
        }
    }
}

/// Inverse of [`encrypt_key_data`]. Padding is left in place; the KDE
/// parser stops at it.
pub fn decrypt_key_data(
    version: KeyDescriptorVersion,
    kek: &[u8],
    iv: &[u8; KEY_IV_LEN],
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match version {
        KeyDescriptorVersion::HmacSha1Aes => crypto::aes_unwrap(kek, data),
        KeyDescriptorVersion::HmacMd5Rc4 => {
            let mut out = data.to_vec();
            crypto::rc4_skip(&[&iv[..], kek].concat(), RC4_SKIP, &mut out);
            Ok(out)
        }
    }
}

/// What to send; one per outbound EAPOL-Key message.
#[derive(Debug, Clone, Copy)]
pub struct FrameRequest<'a> {
    pub key_type: KeyType,
    pub flags: KeyInfoFlags,
    pub nonce: Option<&'a Nonce>,
    pub key_rsc: Option<&'a [u8; KEY_RSC_LEN]>,
    pub key_data: Option<&'a [u8]>,
    pub key_idx: u8,
    pub encrypt: bool,
    pub force_version: Option<KeyDescriptorVersion>,
}

/// The per-station and per-group state a frame is built against.
pub struct FrameContext<'a> {
    pub proto: Proto,
    pub eapol_version: u8,
    pub pairwise: Cipher,
    pub group: Cipher,
    pub ptk: Option<&'a Ptk>,
    /// Station replay counter, incremented for every frame built.
    pub replay_counter: &'a mut u64,
    /// Group nonce counter, the source of RC4 IVs.
    pub iv_counter: &'a mut Nonce,
}

/// Builds an EAPOL-Key frame
/// ## Description
/// Assembles the 802.1X header and fixed fields, encrypts the key data
/// when asked to, increments and stores the replay counter, and finally
/// computes the MIC over the complete frame when the MIC bit is set.
pub fn build_frame(ctx: FrameContext<'_>, req: &FrameRequest<'_>) -> Result<Vec<u8>, BuildError> {
    let version = req.force_version.unwrap_or_else(|| KeyDescriptorVersion::for_pairwise(ctx.pairwise));
    let needs_ptk = req.flags.contains(KeyInfoFlags::MIC) || (req.encrypt && req.key_data.is_some());
    if needs_ptk && ctx.ptk.is_none() {
        return Err(BuildError::MissingPtk);
    }

    let mut flags = req.flags;
    if req.encrypt && ctx.proto == Proto::Rsn {
        flags |= KeyInfoFlags::ENCRYPTED_KEY_DATA;
    }
    let key_info = KeyInfo {
        version: Some(version),
        key_type: req.key_type,
        key_index: if ctx.proto == Proto::Rsn { 0 } else { req.key_idx },
        flags,
    };
    let mut frame = EapolKeyFrame::new(ctx.proto, key_info);
    frame.protocol_version = ctx.eapol_version;
    frame.key_length = if flags.contains(KeyInfoFlags::SMK_MESSAGE) {
        0
    } else {
        match req.key_type {
            KeyType::Pairwise => ctx.pairwise.key_len() as u16,
            KeyType::Group => ctx.group.key_len() as u16,
        }
    };

    *ctx.replay_counter = ctx.replay_counter.wrapping_add(1);
    frame.replay_counter = *ctx.replay_counter;
    if let Some(nonce) = req.nonce {
        frame.nonce = *nonce;
    }
    if let Some(rsc) = req.key_rsc {
        frame.rsc = *rsc;
    }

    match (req.key_data, ctx.ptk) {
        (Some(data), Some(ptk)) if req.encrypt => {
            if version == KeyDescriptorVersion::HmacMd5Rc4 {
                frame.iv.copy_from_slice(&ctx.iv_counter[NONCE_LEN - KEY_IV_LEN..]);
                aux::inc_byte_array(ctx.iv_counter);
            }
            frame.key_data = encrypt_key_data(version, ptk.kek(), &frame.iv, data)?;
        }
        (Some(data), _) => frame.key_data = data.to_vec(),
        (None, _) => {}
    }

    let mut bytes = frame.to_bytes();
    if let (true, Some(ptk)) = (flags.contains(KeyInfoFlags::MIC), ctx.ptk) {
        write_mic(version, ptk.kck(), &mut bytes)?;
    }
    Ok(bytes)
}
