use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use aux::MacAddr;
use rand::RngCore;

use crate::consts::*;
use crate::error::CryptoError;
use crate::suite::Cipher;

pub type Pmk = [u8; PMK_LEN];
pub type Nonce = [u8; NONCE_LEN];
pub type Pmkid = [u8; PMKID_LEN];

const KCK_LEN: usize = 16;
const KEK_LEN: usize = 16;

/// Pairwise Transient Key
/// ## Description
/// The PTK is split into the key confirmation key (MIC key), the key
/// encryption key and the temporal key. CCMP uses a 48 byte PTK with a 16
/// byte TK, TKIP a 64 byte PTK with a 32 byte TK.
#[derive(Clone, PartialEq, Eq)]
pub struct Ptk {
    bytes: Vec<u8>,
}

impl Ptk {
    pub fn kck(&self) -> &[u8] {
        &self.bytes[..KCK_LEN]
    }

    pub fn kek(&self) -> &[u8] {
        &self.bytes[KCK_LEN..KCK_LEN + KEK_LEN]
    }

    pub fn tk(&self) -> &[u8] {
        &self.bytes[KCK_LEN + KEK_LEN..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// key material stays out of debug output
impl fmt::Debug for Ptk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ptk").field("len", &self.bytes.len()).finish()
    }
}

pub fn ptk_len(pairwise: Cipher) -> usize {
    match pairwise {
        Cipher::Tkip => 64,
        _ => 48,
    }
}

/// Derives the PTK from the PMK
/// ## Description
/// `PTK = PRF(PMK, "Pairwise key expansion", min(AA,SPA) || max(AA,SPA) ||
/// min(ANonce,SNonce) || max(ANonce,SNonce))`. The inputs are ordered by
/// byte value so the two parties get the same key regardless of role.
/// ## Example
/// **Basic usage:**
/// ```
///     use wpa::{derive_ptk, Cipher};
///     let aa = aux::MacAddr([2, 0, 0, 0, 0, 1]);
///     let spa = aux::MacAddr([2, 0, 0, 0, 0, 2]);
///     let ptk = derive_ptk(&[1u8; 32], &aa, &spa, &[3u8; 32], &[4u8; 32], Cipher::Ccmp).unwrap();
///     assert_eq!(16, ptk.tk().len());
/// ```
pub fn derive_ptk(
    pmk: &Pmk,
    aa: &MacAddr,
    spa: &MacAddr,
    anonce: &Nonce,
    snonce: &Nonce,
    pairwise: Cipher,
) -> Result<Ptk, CryptoError> {
    let mut data = Vec::with_capacity(2 * 6 + 2 * NONCE_LEN);
    data.extend_from_slice(aa.min(spa).as_bytes());
    data.extend_from_slice(aa.max(spa).as_bytes());
    data.extend_from_slice(anonce.min(snonce));
    data.extend_from_slice(anonce.max(snonce));
    let bytes = crypto::sha1_prf(pmk, "Pairwise key expansion", &data, ptk_len(pairwise))?;
    Ok(Ptk { bytes })
}

/// `GTK = PRF(GMK, "Group key expansion", AA || GNonce)`, as long as the
/// group cipher's key.
pub fn derive_gtk(gmk: &[u8; GMK_LEN], aa: &MacAddr, gnonce: &Nonce, group: Cipher) -> Result<Vec<u8>, CryptoError> {
    let mut data = Vec::with_capacity(6 + NONCE_LEN);
    data.extend_from_slice(aa.as_bytes());
    data.extend_from_slice(gnonce);
    crypto::sha1_prf(gmk, "Group key expansion", &data, group.key_len())
}

/// `PMKID = HMAC-SHA1-128(PMK, "PMK Name" || AA || SPA)`
pub fn pmkid(pmk: &Pmk, aa: &MacAddr, spa: &MacAddr) -> Result<Pmkid, CryptoError> {
    let digest = crypto::hmac_sha1(pmk, &[b"PMK Name", aa.as_bytes(), spa.as_bytes()])?;
    let mut id = [0u8; PMKID_LEN];
    id.copy_from_slice(&digest[..PMKID_LEN]);
    Ok(id)
}

/// Derived hash value carried in the DHV KDE: `SHA-256(AA || SPA || DGTK)`.
pub fn derive_dhv(aa: &MacAddr, spa: &MacAddr, dgtk: &[u8; DGTK_LEN]) -> [u8; DHV_LEN] {
    let digest = crypto::sha256(&[aa.as_bytes(), spa.as_bytes(), dgtk]);
    let mut dhv = [0u8; DHV_LEN];
    dhv.copy_from_slice(&digest[..DHV_LEN]);
    dhv
}

/// Seeds a group's nonce counter:
/// `Counter = PRF-256(Random number, "Init Counter", AA || Time)`.
pub fn init_counter(aa: &MacAddr, vlan_id: u16) -> Result<Nonce, CryptoError> {
    let mut rkey = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut rkey);
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let mut data = Vec::with_capacity(6 + 8 + 2);
    data.extend_from_slice(aa.as_bytes());
    data.extend_from_slice(&now.as_secs().to_be_bytes()[4..]);
    data.extend_from_slice(&now.subsec_nanos().to_be_bytes());
    data.extend_from_slice(&vlan_id.to_be_bytes());
    let out = crypto::sha1_prf(&rkey, "Init Counter", &data, NONCE_LEN)?;
    let mut counter = [0u8; NONCE_LEN];
    counter.copy_from_slice(&out);
    Ok(counter)
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}
