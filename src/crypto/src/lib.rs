//! # crypto
//! Cryptographic primitives used by the WPA/RSN key hierarchy:
//! PSK generation, the SHA-1 based PRF, the EAPOL-Key integrity algorithms
//! and the two key-data ciphers (AES Key Wrap and RC4).
use hmac::{Hmac, Mac};
use md5::Md5;
use pbkdf2::pbkdf2_hmac_array;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

mod integrity;
mod keywrap;
mod rc4;

pub use integrity::{HmacMd5, HmacSha1, IntegrityAlgorithm, MIC_LEN};
pub use keywrap::{aes_unwrap, aes_wrap};
pub use rc4::{rc4_skip, Rc4};

const ITERATIONS: u32 = 4096;
const SHA1_LEN: usize = 20;

pub type HmacSha1Mac = Hmac<Sha1>;
pub type HmacMd5Mac = Hmac<Md5>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length {0}")]
    InvalidKeyLength(usize),
    #[error("key data length {0} is not a multiple of 8 or too short")]
    InvalidDataLength(usize),
    #[error("AES key unwrap integrity check failed")]
    UnwrapIntegrity,
}

// ---------------------------- Public Functions -----------------------------

/// Generates the PSK (PMK) from a passphrase
/// ## Description
/// Runs PBKDF2-HMAC-SHA1 over the passphrase with the SSID as salt and
/// 4096 iterations, producing the 256-bit pairwise master key.
/// ## Example
/// **Basic usage:**
/// ```
///     let pmk = crypto::generate_psk("testpassword", b"testnet");
///     assert_eq!(32, pmk.len());
/// ```
pub fn generate_psk(passphrase: &str, ssid: &[u8]) -> [u8; 32] {
    pbkdf2_hmac_array::<Sha1, 32>(passphrase.as_bytes(), ssid, ITERATIONS)
}

/// HMAC-SHA1 over the concatenation of `parts`.
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<[u8; SHA1_LEN], CryptoError> {
    let mut mac = HmacSha1Mac::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; SHA1_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// HMAC-MD5 over `data`.
pub fn hmac_md5(key: &[u8], data: &[u8]) -> Result<[u8; 16], CryptoError> {
    let mut mac = HmacMd5Mac::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    mac.update(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// IEEE 802.11i PRF based on HMAC-SHA1
/// ## Description
/// Produces `out_len` bytes as the concatenation of
/// `HMAC-SHA1(key, label || 0x00 || data || i)` for `i = 0, 1, ...`,
/// truncated to the requested length. The output for a shorter length is a
/// prefix of the output for a longer one.
/// ## Example
/// **Basic usage:**
/// ```
///     let ptk = crypto::sha1_prf(&[0u8; 32], "Pairwise key expansion", &[0u8; 76], 64).unwrap();
///     assert_eq!(64, ptk.len());
/// ```
pub fn sha1_prf(key: &[u8], label: &str, data: &[u8], out_len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(out_len + SHA1_LEN);
    let mut counter: u8 = 0;
    while out.len() < out_len {
        let block = hmac_sha1(key, &[label.as_bytes(), &[0u8], data, &[counter]])?;
        out.extend_from_slice(&block);
        counter = counter.wrapping_add(1);
    }
    out.truncate(out_len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex::FromHex;

    // IEEE 802.11i-2004 H.4.1 test vector
    #[test]
    fn psk_from_passphrase() {
        let pmk = generate_psk("password", b"IEEE");
        let expected = Vec::from_hex("f42c6fc52df0ebef9ebb4b90b38a5f902e83fe1b135a70e23aed762e9710a12e").unwrap();
        assert_eq!(&expected[..], &pmk[..]);
    }

    // RFC 2202 test case 2 for HMAC-SHA1
    #[test]
    fn hmac_sha1_vector() {
        let mac = hmac_sha1(b"Jefe", &[b"what do ya want ", b"for nothing?"]).unwrap();
        assert_eq!("effcdf6ae5eb2fa2d27416d5f184df9c259a7c79", hex::encode(mac));
    }

    // RFC 2202 test case 2 for HMAC-MD5
    #[test]
    fn hmac_md5_vector() {
        let mac = hmac_md5(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!("750c783e6ab0b503eaa86e310a5db738", hex::encode(mac));
    }

    #[test]
    fn prf_prefix_property() {
        let key = [0x0bu8; 20];
        let long = sha1_prf(&key, "prefix", b"Hi There", 80).unwrap();
        let short = sha1_prf(&key, "prefix", b"Hi There", 48).unwrap();
        assert_eq!(80, long.len());
        assert_eq!(&long[..48], &short[..]);
    }

    // IEEE 802.11i-2004 H.3 PRF test vector 1
    #[test]
    fn prf_vector() {
        let key = [0x0bu8; 20];
        let out = sha1_prf(&key, "prefix", b"Hi There", 64).unwrap();
        assert_eq!(
            "bcd4c650b30b9684951829e0d75f9d54b862175ed9f00606e17d8da35402ffee\
             75df78c3d31e0f889f012120c0862beb67753e7439ae242edb8373698356cf5a",
            hex::encode(out)
        );
    }
}
