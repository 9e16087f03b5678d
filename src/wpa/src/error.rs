use aux::MacAddr;
use thiserror::Error;

pub use crypto::CryptoError;

/// Malformed EAPOL-Key frames and key data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: {len} bytes, need at least {min}")]
    TruncatedFrame { len: usize, min: usize },
    #[error("declared length {declared} exceeds the {available} bytes available")]
    LengthMismatch { declared: usize, available: usize },
    #[error("not an EAPOL-Key frame (802.1X type {0})")]
    NotEapolKey(u8),
    #[error("unknown key descriptor type {0}")]
    UnknownDescriptor(u8),
    #[error("key data element underflow at offset {0}")]
    KdeUnderflow(usize),
}

/// Malformed WPA or RSN information elements.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IeError {
    #[error("malformed IE: {0}")]
    Malformed(&'static str),
    #[error("unsupported IE version {0}")]
    UnsupportedVersion(u16),
}

/// A well formed IE that the local policy does not accept.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("protocol version not enabled")]
    ProtoNotEnabled,
    #[error("invalid group cipher")]
    InvalidGroupCipher,
    #[error("no acceptable key management suite")]
    InvalidAkm,
    #[error("no acceptable pairwise cipher")]
    InvalidPairwise,
    #[error("management frame protection required but not usable")]
    MgmtFrameProtectionViolation,
    #[error("unsupported management group cipher")]
    InvalidMgmtGroupCipher,
}

/// Errors from building an EAPOL-Key frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("PTK not valid when sending EAPOL-Key frame")]
    MissingPtk,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Why an inbound EAPOL-Key frame was dropped. None of these terminate
/// the station's session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RxError {
    #[error("no state machine for station {0}")]
    UnknownStation(MacAddr),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("replayed counter {received} (last accepted {last:?})")]
    ReplayViolation { received: u64, last: Option<u64> },
    #[error("invalid MIC")]
    MicMismatch,
    #[error("invalid key info: {0}")]
    InvalidKeyInfo(&'static str),
    #[error("{0} in invalid state - dropped")]
    UnexpectedState(&'static str),
    #[error("IE from (Re)AssocReq did not match with msg 2/4")]
    IeMismatch,
    #[error("SMK messages are not supported")]
    Unsupported,
}

/// Fatal per-station errors. Each one ends the station's session with a
/// disconnect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("4-way handshake timed out")]
    HandshakeTimeout,
    #[error("group key handshake timed out")]
    GroupHandshakeTimeout,
    #[error("no PMK available")]
    NoPmk,
    #[error("no PSK configured for the STA")]
    NoPsk,
    #[error("key material error: {0}")]
    Crypto(#[from] BuildError),
}

/// Errors from the station management API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no state machine for station {0}")]
    UnknownStation(MacAddr),
    #[error("station {0} has no validated WPA/RSN IE")]
    NotNegotiated(MacAddr),
    #[error("station {0} did not negotiate RSN")]
    NotRsn(MacAddr),
    #[error(transparent)]
    Ie(#[from] IeError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}
