//! A minimal supplicant answering the authenticator's key messages. It
//! drives the handshakes in simulations and tests; it does not implement
//! any supplicant side policy.
use aux::{MacAddr, ReplayWindow};
use thiserror::Error;

use crate::eapol::{self, EapolKeyFrame, KeyDescriptorVersion, KeyInfo, KeyInfoFlags, KeyType};
use crate::error::{CryptoError, FrameError, IeError};
use crate::ie;
use crate::kde;
use crate::keys::{self, Nonce, Pmk, Ptk};
use crate::suite::{Cipher, Proto};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupplicantError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Ie(#[from] IeError),
    #[error("replayed counter {0}")]
    Replay(u64),
    #[error("invalid MIC")]
    MicMismatch,
    #[error("unexpected message: {0}")]
    Unexpected(&'static str),
}

/// Supplicant half of the 4-Way and Group Key Handshakes.
#[derive(Debug)]
pub struct Supplicant {
    addr: MacAddr,
    aa: MacAddr,
    pmk: Pmk,
    ie: Vec<u8>,
    proto: Proto,
    pairwise: Cipher,
    snonce: Nonce,
    anonce: Option<Nonce>,
    ptk: Option<Ptk>,
    gtk: Option<(u8, Vec<u8>)>,
    igtk: Option<kde::IgtkKde>,
    replay: ReplayWindow,
    request_counter: u64,
}

impl Supplicant {
    /// `ie` is the IE the station sent in its association request.
    pub fn new(addr: MacAddr, aa: MacAddr, pmk: Pmk, ie: Vec<u8>) -> Result<Self, SupplicantError> {
        let parsed = ie::parse_ie(&ie)?;
        let pairwise = parsed
            .pairwise
            .preferred_pairwise()
            .ok_or(SupplicantError::Unexpected("no pairwise cipher in own IE"))?;
        Ok(Supplicant {
            addr,
            aa,
            pmk,
            ie,
            proto: parsed.proto,
            pairwise,
            snonce: keys::random_bytes(),
            anonce: None,
            ptk: None,
            gtk: None,
            igtk: None,
            replay: ReplayWindow::strict(),
            request_counter: 0,
        })
    }

    pub fn with_snonce(mut self, snonce: Nonce) -> Self {
        self.snonce = snonce;
        self
    }

    pub fn addr(&self) -> &MacAddr {
        &self.addr
    }

    pub fn ie(&self) -> &[u8] {
        &self.ie
    }

    pub fn ptk(&self) -> Option<&Ptk> {
        self.ptk.as_ref()
    }

    /// Key id and key of the last GTK received.
    pub fn gtk(&self) -> Option<(u8, &[u8])> {
        self.gtk.as_ref().map(|(id, key)| (*id, key.as_slice()))
    }

    pub fn igtk(&self) -> Option<&kde::IgtkKde> {
        self.igtk.as_ref()
    }

    /// Handles one frame from the authenticator and returns the reply.
    pub fn process(&mut self, bytes: &[u8]) -> Result<Vec<u8>, SupplicantError> {
        let frame = eapol::parse_header(bytes)?;
        let flags = frame.key_info.flags;
        if !flags.contains(KeyInfoFlags::ACK) {
            return Err(SupplicantError::Unexpected("Key Ack not set"));
        }
        if !self.replay.is_fresh(frame.replay_counter) {
            return Err(SupplicantError::Replay(frame.replay_counter));
        }
        let reply = match (frame.key_info.key_type, flags.contains(KeyInfoFlags::MIC)) {
            (KeyType::Pairwise, false) => self.message_one(&frame)?,
            (KeyType::Pairwise, true) => self.message_three(&frame, bytes)?,
            (KeyType::Group, true) => self.group_message_one(&frame, bytes)?,
            (KeyType::Group, false) => return Err(SupplicantError::Unexpected("group message without MIC")),
        };
        self.replay.update(frame.replay_counter);
        Ok(reply)
    }

    /// Builds an EAPOL-Key request, for a new PTK when `pairwise` is set or
    /// a Michael MIC failure report when `error` is set.
    pub fn request(&mut self, pairwise: bool, error: bool) -> Result<Vec<u8>, SupplicantError> {
        let ptk = self.ptk.as_ref().ok_or(SupplicantError::Unexpected("no PTK"))?;
        let version = KeyDescriptorVersion::for_pairwise(self.pairwise);
        let mut flags = KeyInfoFlags::REQUEST | KeyInfoFlags::MIC | KeyInfoFlags::SECURE;
        if error {
            flags |= KeyInfoFlags::ERROR;
        }
        let key_type = if pairwise { KeyType::Pairwise } else { KeyType::Group };
        self.request_counter += 1;
        let mut reply = EapolKeyFrame::new(self.proto, KeyInfo { version: Some(version), key_type, key_index: 0, flags });
        reply.replay_counter = self.request_counter;
        let mut bytes = reply.to_bytes();
        eapol::write_mic(version, ptk.kck(), &mut bytes)?;
        Ok(bytes)
    }

    fn reply(&self, to: &EapolKeyFrame, key_type: KeyType, flags: KeyInfoFlags) -> EapolKeyFrame {
        let key_info = KeyInfo {
            version: to.key_info.version,
            key_type,
            key_index: if self.proto == Proto::Wpa { to.key_info.key_index } else { 0 },
            flags,
        };
        let mut reply = EapolKeyFrame::new(self.proto, key_info);
        reply.protocol_version = to.protocol_version;
        reply.replay_counter = to.replay_counter;
        reply
    }

    fn seal(&self, reply: &EapolKeyFrame, ptk: &Ptk) -> Result<Vec<u8>, SupplicantError> {
        let version = reply.key_info.version.ok_or(SupplicantError::Unexpected("unknown descriptor version"))?;
        let mut bytes = reply.to_bytes();
        eapol::write_mic(version, ptk.kck(), &mut bytes)?;
        Ok(bytes)
    }

    fn message_one(&mut self, frame: &EapolKeyFrame) -> Result<Vec<u8>, SupplicantError> {
        let ptk = keys::derive_ptk(&self.pmk, &self.aa, &self.addr, &frame.nonce, &self.snonce, self.pairwise)?;
        let mut reply = self.reply(frame, KeyType::Pairwise, KeyInfoFlags::MIC);
        reply.nonce = self.snonce;
        reply.key_data = self.ie.clone();
        let bytes = self.seal(&reply, &ptk)?;
        self.anonce = Some(frame.nonce);
        self.ptk = Some(ptk);
        Ok(bytes)
    }

    fn verify(&self, bytes: &[u8]) -> Result<&Ptk, SupplicantError> {
        let ptk = self.ptk.as_ref().ok_or(SupplicantError::Unexpected("no PTK"))?;
        if !eapol::verify_mic(ptk.kck(), bytes) {
            return Err(SupplicantError::MicMismatch);
        }
        Ok(ptk)
    }

    fn key_data(&self, frame: &EapolKeyFrame, ptk: &Ptk) -> Result<Vec<u8>, SupplicantError> {
        let encrypted = frame.key_info.flags.contains(KeyInfoFlags::ENCRYPTED_KEY_DATA)
            || (self.proto == Proto::Wpa && frame.key_info.key_type == KeyType::Group);
        if !encrypted {
            return Ok(frame.key_data.clone());
        }
        let version = frame.key_info.version.ok_or(SupplicantError::Unexpected("unknown descriptor version"))?;
        Ok(eapol::decrypt_key_data(version, ptk.kek(), &frame.iv, &frame.key_data)?)
    }

    fn message_three(&mut self, frame: &EapolKeyFrame, bytes: &[u8]) -> Result<Vec<u8>, SupplicantError> {
        if self.anonce != Some(frame.nonce) {
            return Err(SupplicantError::Unexpected("ANonce changed in message 3"));
        }
        let ptk = self.verify(bytes)?.clone();
        let data = self.key_data(frame, &ptk)?;
        let kdes = kde::parse_kde_list(&data)?;
        if self.proto == Proto::Rsn {
            if let Some(gtk) = kdes.gtk {
                self.gtk = Some((gtk.key_id, gtk.gtk));
            }
            self.igtk = kdes.igtk.or(self.igtk.take());
        }
        let mut flags = KeyInfoFlags::MIC;
        if self.proto == Proto::Rsn {
            flags |= KeyInfoFlags::SECURE;
        }
        let reply = self.reply(frame, KeyType::Pairwise, flags);
        self.seal(&reply, &ptk)
    }

    fn group_message_one(&mut self, frame: &EapolKeyFrame, bytes: &[u8]) -> Result<Vec<u8>, SupplicantError> {
        let ptk = self.verify(bytes)?.clone();
        let data = self.key_data(frame, &ptk)?;
        match self.proto {
            Proto::Rsn => {
                let kdes = kde::parse_kde_list(&data)?;
                let gtk = kdes.gtk.ok_or(SupplicantError::Unexpected("no GTK KDE"))?;
                self.gtk = Some((gtk.key_id, gtk.gtk));
                self.igtk = kdes.igtk.or(self.igtk.take());
            }
            Proto::Wpa => {
                let len = (frame.key_length as usize).min(data.len());
                self.gtk = Some((frame.key_info.key_index, data[..len].to_vec()));
            }
        }
        let reply = self.reply(frame, KeyType::Group, KeyInfoFlags::MIC | KeyInfoFlags::SECURE);
        self.seal(&reply, &ptk)
    }
}
