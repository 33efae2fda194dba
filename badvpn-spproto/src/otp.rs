use zeroize::Zeroize;

use crate::{Error, Result};

/// A one-time pad: a finite, pre-shared blob of random bytes consumed
/// strictly once per offset to XOR against plaintext. This is the legacy
/// "none"-suite SPProto mode the original supports alongside AEAD — cheap,
/// but the pad must never be reused, so callers are warned well before
/// exhaustion via a separate warning callback, rather than the pad running
/// out becoming a fatal error with no notice.
pub struct OtpPad {
    pad: Vec<u8>,
    offset: usize,
    warned: bool,
}

/// Once fewer than this many bytes remain, [`OtpPad::apply`] reports a
/// warning alongside its result so the owner can schedule a rekey.
const WARNING_THRESHOLD: usize = 4096;

impl OtpPad {
    pub fn new(pad: Vec<u8>) -> Self {
        Self {
            pad,
            offset: 0,
            warned: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pad.len() - self.offset
    }

    /// XORs `data` in place against the next `data.len()` pad bytes.
    /// Returns `true` exactly once, the first call after which fewer than
    /// [`WARNING_THRESHOLD`] bytes remain (including this call's
    /// consumption) — the edge the caller should treat as "rotate now".
    pub fn apply(&mut self, data: &mut [u8]) -> Result<bool> {
        if data.len() > self.remaining() {
            return Err(Error::OtpExhausted);
        }
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.pad[self.offset + i];
        }
        self.offset += data.len();
        if !self.warned && self.remaining() < WARNING_THRESHOLD {
            self.warned = true;
            return Ok(true);
        }
        Ok(false)
    }
}

impl Drop for OtpPad {
    fn drop(&mut self) {
        self.pad.zeroize();
    }
}
