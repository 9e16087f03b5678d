//! # aux
//! `aux` is a collection of utilities shared by the key-management crates:
//! MAC address handling, constant-time comparison, big-endian counters and
//! the replay windows used to filter EAPOL-Key frames.

use std::fmt;
use std::str::FromStr;

// ---------------------------- Aux Types -------------------------------------

/// 48-bit IEEE 802 MAC address
/// ## Description
/// Wraps the raw six bytes of an address. Addresses are ordered by their
/// byte value, which is the ordering used by the pairwise key derivation.
/// ## Example
/// **Basic usage:**
/// ```
///     let addr: aux::MacAddr = "02:00:00:00:01:00".parse().unwrap();
///     assert_eq!("02:00:00:00:01:00", addr.to_string());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMacError(String);

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address: {}", self.0)
    }
}

impl std::error::Error for ParseMacError {}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    // accepts "aabbccddeeff" as well as ':' or '-' separated octets
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let mut addr = [0u8; 6];
        hex::decode_to_slice(&digits, &mut addr).map_err(|_| ParseMacError(s.to_owned()))?;
        Ok(MacAddr(addr))
    }
}

// ---------------------------- Aux Functions ---------------------------------

/// Check if two byte slices are the same without an early exit
/// ## Description
/// Receives 2 slices and returns whether they are equal. Every byte is
/// visited regardless of where the first difference is, so the running time
/// only depends on the length. Slices of different length are never equal.
/// ## Example
/// **Basic usage:**
/// ```
///     let a = [10, 4, 8];
///     let b = [10, 4, 8];
///     let c = [20, 6, 8];
///
///     assert!(aux::ct_eq(&a, &b));
///     assert!(!aux::ct_eq(&a, &c));
/// ```
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Increments a big-endian byte counter in place
/// ## Description
/// The last byte is the least significant one. The counter wraps around to
/// zero after all bytes reach 0xff.
/// ## Example
/// **Basic usage:**
/// ```
///     let mut counter = [0x00, 0xff];
///     aux::inc_byte_array(&mut counter);
///     assert_eq!([0x01, 0x00], counter);
/// ```
pub fn inc_byte_array(counter: &mut [u8]) {
    for byte in counter.iter_mut().rev() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            break;
        }
    }
}

/// Replay window over 64-bit EAPOL-Key replay counters
/// ## Description
/// A strict window only accepts counters greater than the last accepted
/// one. A non-decreasing window also accepts a repeat of the last accepted
/// counter. Counters below the last accepted one are always rejected.
/// ## Example
/// **Basic usage:**
/// ```
///     let mut window = aux::ReplayWindow::strict();
///     assert!(window.accept(5));
///     assert!(!window.accept(5));
///     assert!(window.accept(6));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayWindow {
    last: Option<u64>,
    allow_repeat: bool,
}

impl ReplayWindow {
    pub fn strict() -> Self {
        ReplayWindow { last: None, allow_repeat: false }
    }

    pub fn non_decreasing() -> Self {
        ReplayWindow { last: None, allow_repeat: true }
    }

    /// Whether `counter` would be accepted, without recording it.
    pub fn is_fresh(&self, counter: u64) -> bool {
        match self.last {
            None => true,
            Some(last) if self.allow_repeat => counter >= last,
            Some(last) => counter > last,
        }
    }

    /// Records `counter` as the last accepted value.
    pub fn update(&mut self, counter: u64) {
        self.last = Some(counter);
    }

    /// Checks and records in one go. Returns false (and records nothing)
    /// for a replayed counter.
    pub fn accept(&mut self, counter: u64) -> bool {
        if !self.is_fresh(counter) {
            return false;
        }
        self.update(counter);
        true
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
