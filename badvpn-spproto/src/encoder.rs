use crate::aead::{self, AeadKey};
use crate::kdf::{hkdf_expand, nonce_for_seq};
use crate::otp::OtpPad;
use crate::{Error, Result};

/// Record-count threshold past which [`Encoder::needs_rekey`] reports true
/// for the AEAD suite.
const DEFAULT_REKEY_INTERVAL: u64 = 1 << 20;

enum Suite {
    Aead { key: AeadKey, base_nonce: [u8; 12] },
    Otp(OtpPad),
}

/// A warning the owner should act on (typically: schedule or force a
/// rekey) without the encode itself failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    RekeyDue,
    OtpNearExhaustion,
}

/// The send side of an SPProto record pipe: assigns the next sequence
/// number, seals (AEAD) or XORs (OTP) the frame, and prefixes the 8-byte
/// little-endian sequence number the decoder needs for nonce derivation
/// and replay-window bookkeeping.
pub struct Encoder {
    suite: Suite,
    seq: u64,
    rekey_interval: u64,
}

impl Encoder {
    pub fn new_aead(key: [u8; 32], base_nonce: [u8; 12]) -> Self {
        Self {
            suite: Suite::Aead {
                key: AeadKey(key),
                base_nonce,
            },
            seq: 0,
            rekey_interval: DEFAULT_REKEY_INTERVAL,
        }
    }

    pub fn new_otp(pad: Vec<u8>) -> Self {
        Self {
            suite: Suite::Otp(OtpPad::new(pad)),
            seq: 0,
            rekey_interval: DEFAULT_REKEY_INTERVAL,
        }
    }

    pub fn with_rekey_interval(mut self, interval: u64) -> Self {
        self.rekey_interval = interval.max(1);
        self
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn needs_rekey(&self) -> bool {
        matches!(self.suite, Suite::Aead { .. }) && self.seq >= self.rekey_interval
    }

    /// Derives the next generation's key and base nonce from the current
    /// ones via HKDF and resets the sequence counter. No-op for OTP (the
    /// pad has no rekey concept; it is replaced out of band).
    pub fn rekey(&mut self) {
        if let Suite::Aead { key, base_nonce } = &mut self.suite {
            let mut new_key = [0u8; 32];
            hkdf_expand(&key.0, b"badvpn-spproto/rekey/key", &mut new_key);
            let mut new_nonce = [0u8; 12];
            hkdf_expand(&key.0, b"badvpn-spproto/rekey/nonce", &mut new_nonce);
            *key = AeadKey(new_key);
            *base_nonce = new_nonce;
        }
        self.seq = 0;
    }

    /// Encodes one frame, returning the wire record and, if this is the
    /// moment a warning first becomes true, which one.
    pub fn encode(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Option<Warning>)> {
        let seq = self.seq;
        self.seq = self.seq.checked_add(1).ok_or(Error::SequenceExhausted)?;

        let mut out = Vec::with_capacity(8 + plaintext.len() + 16);
        out.extend_from_slice(&seq.to_le_bytes());

        let warning = match &mut self.suite {
            Suite::Aead { key, base_nonce } => {
                let nonce = nonce_for_seq(base_nonce, seq);
                out.extend_from_slice(&aead::seal(key, &nonce, aad, plaintext)?);
                if self.seq >= self.rekey_interval {
                    Some(Warning::RekeyDue)
                } else {
                    None
                }
            }
            Suite::Otp(pad) => {
                let mut buf = plaintext.to_vec();
                let near_exhaustion = pad.apply(&mut buf)?;
                out.extend_from_slice(&buf);
                near_exhaustion.then_some(Warning::OtpNearExhaustion)
            }
        };
        Ok((out, warning))
    }
}
