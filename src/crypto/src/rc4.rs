/// RC4 stream cipher state.
///
/// Only used for the legacy (descriptor version 1) key data encryption,
/// where the key is `IV || KEK` and the first 256 keystream bytes are
/// discarded.
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (k, v) in s.iter_mut().enumerate() {
            *v = k as u8;
        }
        if !key.is_empty() {
            let mut j: u8 = 0;
            for i in 0..256 {
                j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
                s.swap(i, j as usize);
            }
        }
        Rc4 { s, i: 0, j: 0 }
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[idx as usize]
    }

    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.next_byte();
        }
    }

    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.next_byte();
        }
    }
}

/// XORs `data` with the RC4 keystream of `key` after dropping `skip` bytes.
pub fn rc4_skip(key: &[u8], skip: usize, data: &mut [u8]) {
    let mut rc4 = Rc4::new(key);
    rc4.skip(skip);
    rc4.apply_keystream(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keystream() {
        let mut data = *b"Plaintext";
        rc4_skip(b"Key", 0, &mut data);
        assert_eq!("bbf316e8d940af0ad3", hex::encode(data));
    }

    #[test]
    fn skip_is_symmetric() {
        let key = [0x11u8; 32];
        let mut data = b"group temporal key material".to_vec();
        rc4_skip(&key, 256, &mut data);
        assert_ne!(&data[..], &b"group temporal key material"[..]);
        rc4_skip(&key, 256, &mut data);
        assert_eq!(&data[..], &b"group temporal key material"[..]);
    }
}
