use hkdf::Hkdf;
use sha2::Sha256;

/// HKDF-SHA256 expand from a pre-shared key into `out`, used to derive the
/// next generation's AEAD key and base nonce on rekey.
pub fn hkdf_expand(key: &[u8; 32], info: &[u8], out: &mut [u8]) {
    let hk = Hkdf::<Sha256>::from_prk(key).expect("32-byte key is a valid HKDF PRK");
    hk.expand(info, out).expect("requested output within HKDF's 255x hash-length limit");
}

/// Derives a 96-bit per-record nonce from a base nonce and a sequence
/// number, XORing the sequence into the last 8 bytes (RFC 8439-style).
pub fn nonce_for_seq(base: &[u8; 12], seq: u64) -> [u8; 12] {
    let mut nonce = *base;
    let ctr = seq.to_be_bytes();
    for i in 0..8 {
        nonce[4 + i] ^= ctr[i];
    }
    nonce
}
