use crate::aead::{self, AeadKey};
use crate::encoder::Warning;
use crate::kdf::{hkdf_expand, nonce_for_seq};
use crate::otp::OtpPad;
use crate::replay::ReplayWindow;
use crate::{Error, Result};

enum Suite {
    Aead { key: AeadKey, base_nonce: [u8; 12] },
    Otp(OtpPad),
}

/// The receive side of an SPProto record pipe: strips the sequence
/// prefix, opens (AEAD) or XORs (OTP) the record, and rejects replays via
/// a sliding replay window.
pub struct Decoder {
    suite: Suite,
    replay: ReplayWindow,
    rekey_interval: u64,
}

impl Decoder {
    pub fn new_aead(key: [u8; 32], base_nonce: [u8; 12]) -> Self {
        Self {
            suite: Suite::Aead {
                key: AeadKey(key),
                base_nonce,
            },
            replay: ReplayWindow::new(),
            rekey_interval: 1 << 20,
        }
    }

    pub fn new_otp(pad: Vec<u8>) -> Self {
        Self {
            suite: Suite::Otp(OtpPad::new(pad)),
            replay: ReplayWindow::new(),
            rekey_interval: 1 << 20,
        }
    }

    pub fn with_rekey_interval(mut self, interval: u64) -> Self {
        self.rekey_interval = interval.max(1);
        self
    }

    /// Mirrors [`crate::Encoder::rekey`] so both sides derive the same
    /// next-generation key deterministically.
    pub fn rekey(&mut self) {
        if let Suite::Aead { key, base_nonce } = &mut self.suite {
            let mut new_key = [0u8; 32];
            hkdf_expand(&key.0, b"badvpn-spproto/rekey/key", &mut new_key);
            let mut new_nonce = [0u8; 12];
            hkdf_expand(&key.0, b"badvpn-spproto/rekey/nonce", &mut new_nonce);
            *key = AeadKey(new_key);
            *base_nonce = new_nonce;
        }
        self.replay = ReplayWindow::new();
    }

    /// Decodes one wire record. Returns `Error::Replay` for a duplicate or
    /// too-old sequence number, `Error::Mac` for a failed AEAD tag, and
    /// the plaintext plus an optional [`Warning`] on success.
    pub fn decode_with_warning(&mut self, aad: &[u8], record: &[u8]) -> Result<(Vec<u8>, Option<Warning>)> {
        if record.len() < 8 {
            return Err(Error::Truncated);
        }
        let seq = u64::from_le_bytes(record[..8].try_into().expect("checked length"));
        let body = &record[8..];

        if !self.replay.check_and_update(seq) {
            return Err(Error::Replay);
        }

        match &mut self.suite {
            Suite::Aead { key, base_nonce } => {
                let nonce = nonce_for_seq(base_nonce, seq);
                let plaintext = aead::open(key, &nonce, aad, body)?;
                let warning = (seq + 1 >= self.rekey_interval).then_some(Warning::RekeyDue);
                Ok((plaintext, warning))
            }
            Suite::Otp(pad) => {
                let mut buf = body.to_vec();
                let near_exhaustion = pad.apply(&mut buf)?;
                Ok((buf, near_exhaustion.then_some(Warning::OtpNearExhaustion)))
            }
        }
    }

    pub fn decode(&mut self, aad: &[u8], record: &[u8]) -> Result<Vec<u8>> {
        self.decode_with_warning(aad, record).map(|(pt, _)| pt)
    }
}
