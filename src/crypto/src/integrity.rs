use crate::{hmac_md5, hmac_sha1, CryptoError};

pub const MIC_LEN: usize = 16;

/// An algorithm computing and verifying the EAPOL-Key MIC.
pub trait IntegrityAlgorithm {
    fn compute(&self, key: &[u8], data: &[u8]) -> Result<[u8; MIC_LEN], CryptoError>;

    fn verify(&self, key: &[u8], data: &[u8], expected: &[u8]) -> bool {
        match self.compute(key, data) {
            Ok(mic) => aux::ct_eq(&mic, expected),
            Err(_) => false,
        }
    }
}

/// HMAC-MD5, used with key descriptor version 1.
pub struct HmacMd5;

impl IntegrityAlgorithm for HmacMd5 {
    fn compute(&self, key: &[u8], data: &[u8]) -> Result<[u8; MIC_LEN], CryptoError> {
        hmac_md5(key, data)
    }
}

/// HMAC-SHA1 truncated to 128 bits, used with key descriptor version 2.
pub struct HmacSha1;

impl IntegrityAlgorithm for HmacSha1 {
    fn compute(&self, key: &[u8], data: &[u8]) -> Result<[u8; MIC_LEN], CryptoError> {
        let digest = hmac_sha1(key, &[data])?;
        let mut mic = [0u8; MIC_LEN];
        mic.copy_from_slice(&digest[..MIC_LEN]);
        Ok(mic)
    }
}
