// AES Key Wrap (RFC 3394) with the default initial value.
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::CryptoError;

const IV: [u8; 8] = [0xa6; 8];
const ROUNDS: u64 = 6;

fn cipher(kek: &[u8]) -> Result<Aes128, CryptoError> {
    Aes128::new_from_slice(kek).map_err(|_| CryptoError::InvalidKeyLength(kek.len()))
}

/// Wraps `plain` (a multiple of 8 bytes, at least 16) with the KEK. The
/// output is 8 bytes longer than the input.
pub fn aes_wrap(kek: &[u8], plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plain.len() % 8 != 0 || plain.len() < 16 {
        return Err(CryptoError::InvalidDataLength(plain.len()));
    }
    let aes = cipher(kek)?;
    let n = plain.len() / 8;
    let mut a = IV;
    let mut r: Vec<[u8; 8]> = plain
        .chunks_exact(8)
        .map(|c| {
            let mut block = [0u8; 8];
            block.copy_from_slice(c);
            block
        })
        .collect();

    for j in 0..ROUNDS {
        for (i, ri) in r.iter_mut().enumerate() {
            let mut b = GenericArray::from([0u8; 16]);
            b[..8].copy_from_slice(&a);
            b[8..].copy_from_slice(ri);
            aes.encrypt_block(&mut b);
            let t = n as u64 * j + i as u64 + 1;
            a.copy_from_slice(&b[..8]);
            for (x, y) in a.iter_mut().zip(t.to_be_bytes()) {
                *x ^= y;
            }
            ri.copy_from_slice(&b[8..]);
        }
    }

    let mut out = Vec::with_capacity(plain.len() + 8);
    out.extend_from_slice(&a);
    r.iter().for_each(|block| out.extend_from_slice(block));
    Ok(out)
}

/// Unwraps `wrapped` with the KEK, failing closed when the integrity value
/// does not match.
pub fn aes_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wrapped.len() % 8 != 0 || wrapped.len() < 24 {
        return Err(CryptoError::InvalidDataLength(wrapped.len()));
    }
    let aes = cipher(kek)?;
    let n = wrapped.len() / 8 - 1;
    let mut a = [0u8; 8];
    a.copy_from_slice(&wrapped[..8]);
    let mut r: Vec<[u8; 8]> = wrapped[8..]
        .chunks_exact(8)
        .map(|c| {
            let mut block = [0u8; 8];
            block.copy_from_slice(c);
            block
        })
        .collect();

    for j in (0..ROUNDS).rev() {
        for (i, ri) in r.iter_mut().enumerate().rev() {
            let t = n as u64 * j + i as u64 + 1;
            let mut b = GenericArray::from([0u8; 16]);
            for (k, (x, y)) in a.iter().zip(t.to_be_bytes()).enumerate() {
                b[k] = x ^ y;
            }
            b[8..].copy_from_slice(ri);
            aes.decrypt_block(&mut b);
            a.copy_from_slice(&b[..8]);
            ri.copy_from_slice(&b[8..]);
        }
    }

    if !aux::ct_eq(&a, &IV) {
        return Err(CryptoError::UnwrapIntegrity);
    }
    Ok(r.concat())
}
