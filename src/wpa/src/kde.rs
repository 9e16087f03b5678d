//! Key Data Encapsulations carried in the EAPOL-Key key data field.
use aux::MacAddr;
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::*;
use crate::error::FrameError;
use crate::keys::Pmkid;

/// Element header: id, length, OUI and data type.
const HDR_LEN: usize = 6;
const HDR_OUI_TYPE_LEN: usize = 4;
const GTK_FIXED_LEN: usize = 2;
const IGTK_FIXED_LEN: usize = 2 + IGTK_PN_LEN;

/// Appends one KDE: `0xdd, len, 00-0f-ac, data_type, payload...`.
pub fn add_kde(buf: &mut Vec<u8>, data_type: u8, payload: &[&[u8]]) {
    let data_len: usize = payload.iter().map(|p| p.len()).sum();
    buf.reserve(HDR_LEN + data_len);
    buf.push(VENDOR_TAG_ID);
    buf.push((HDR_OUI_TYPE_LEN + data_len) as u8);
    buf.extend_from_slice(&RSN_OUI);
    buf.push(data_type);
    for part in payload {
        buf.extend_from_slice(part);
    }
}

/// Writer assembling the key data of an outbound message.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies an already encoded WPA or RSN IE.
    pub fn write_ie(&mut self, ie: &[u8]) {
        self.buf.extend_from_slice(ie);
    }

    pub fn write_gtk(&mut self, key_id: u8, gtk: &[u8]) {
        add_kde(&mut self.buf, KDE_GROUPKEY, &[&[key_id & 0x03, 0], gtk]);
    }

    pub fn write_igtk(&mut self, key_id: u16, pn: &[u8; IGTK_PN_LEN], igtk: &[u8]) {
        let mut id = [0u8; 2];
        LittleEndian::write_u16(&mut id, key_id);
        add_kde(&mut self.buf, KDE_IGTK, &[&id, pn, igtk]);
    }

    pub fn write_pmkid(&mut self, pmkid: &Pmkid) {
        add_kde(&mut self.buf, KDE_PMKID, &[pmkid]);
    }

    pub fn write_mac_addr(&mut self, addr: &MacAddr) {
        add_kde(&mut self.buf, KDE_MAC_ADDR, &[addr.as_bytes()]);
    }

    pub fn write_dhv(&mut self, dhv: &[u8; DHV_LEN]) {
        add_kde(&mut self.buf, KDE_DHV, &[dhv]);
    }

    /// Key data is padded when it gets encrypted, not here.
    pub fn finalize(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtkKde {
    pub key_id: u8,
    pub gtk: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgtkKde {
    pub key_id: u16,
    pub pn: [u8; IGTK_PN_LEN],
    pub igtk: Vec<u8>,
}

/// Everything recognized in a key data field. Each slot keeps the last
/// occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KdeSet {
    /// Complete RSN IE, header included.
    pub rsn_ie: Option<Vec<u8>>,
    /// Complete WPA vendor IE, header included.
    pub wpa_ie: Option<Vec<u8>>,
    pub gtk: Option<GtkKde>,
    pub igtk: Option<IgtkKde>,
    pub mac_addr: Option<MacAddr>,
    pub pmkid: Option<Pmkid>,
    pub dhv: Option<[u8; DHV_LEN]>,
}

/// Walks the element list
/// ## Description
/// A vendor element id as the final byte, or a vendor element of length
/// zero, starts the padding and ends the walk. An element running past the
/// end of the buffer is an underflow. Unrecognized elements are skipped.
pub fn parse_kde_list(data: &[u8]) -> Result<KdeSet, FrameError> {
    let mut set = KdeSet::default();
    let mut pos = 0;
    while pos + 1 < data.len() {
        let (id, len) = (data[pos], data[pos + 1] as usize);
        if id == VENDOR_TAG_ID && len == 0 {
            break;
        }
        let end = pos + 2 + len;
        if end > data.len() {
            return Err(FrameError::KdeUnderflow(pos));
        }
        let element = &data[pos..end];
        match id {
            RSN_TAG_ID => set.rsn_ie = Some(element.to_vec()),
            VENDOR_TAG_ID => parse_vendor(element, &mut set),
            _ => log::debug!("unrecognized key data element {} ({} bytes)", id, len),
        }
        pos = end;
    }
    Ok(set)
}

fn parse_vendor(element: &[u8], set: &mut KdeSet) {
    let body = &element[2..];
    if body.len() >= 6 && body[..3] == WPA_OUI && body[3] == WPA_OUI_TYPE && body[4..6] == [1, 0] {
        set.wpa_ie = Some(element.to_vec());
        return;
    }
    if body.len() < HDR_OUI_TYPE_LEN || body[..3] != RSN_OUI {
        log::debug!("unrecognized vendor key data element ({} bytes)", body.len());
        return;
    }
    let payload = &body[HDR_OUI_TYPE_LEN..];
    match body[3] {
        KDE_GROUPKEY if payload.len() > GTK_FIXED_LEN => {
            set.gtk = Some(GtkKde { key_id: payload[0] & 0x03, gtk: payload[GTK_FIXED_LEN..].to_vec() });
        }
        KDE_IGTK if payload.len() > IGTK_FIXED_LEN => {
            let mut pn = [0u8; IGTK_PN_LEN];
            pn.copy_from_slice(&payload[2..IGTK_FIXED_LEN]);
            set.igtk = Some(IgtkKde {
                key_id: LittleEndian::read_u16(payload),
                pn,
                igtk: payload[IGTK_FIXED_LEN..].to_vec(),
            });
        }
        KDE_MAC_ADDR if payload.len() >= 6 => {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(&payload[..6]);
            set.mac_addr = Some(MacAddr(addr));
        }
        KDE_PMKID if payload.len() >= PMKID_LEN => {
            let mut pmkid = [0u8; PMKID_LEN];
            pmkid.copy_from_slice(&payload[..PMKID_LEN]);
            set.pmkid = Some(pmkid);
        }
        KDE_DHV if payload.len() >= DHV_LEN => {
            let mut dhv = [0u8; DHV_LEN];
            dhv.copy_from_slice(&payload[..DHV_LEN]);
            set.dhv = Some(dhv);
        }
        data_type => log::debug!("unsupported KDE type {} ({} bytes)", data_type, payload.len()),
    }
}
