#![forbid(unsafe_code)]

//! SPProto: the security/crypto framing layer between FragmentProto and the
//! socket. Provides AEAD and legacy OTP record encode/decode, a replay
//! window on the decode side, and key rotation warnings surfaced out of
//! band rather than as fatal errors until truly exhausted.

pub mod aead;
mod decoder;
mod encoder;
mod kdf;
mod otp;
mod replay;

pub use aead::AeadKey;
pub use decoder::Decoder;
pub use encoder::{Encoder, Warning};
pub use replay::ReplayWindow;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("record truncated")]
    Truncated,
    #[error("AEAD authentication failed")]
    Mac,
    #[error("replayed or too-old sequence number")]
    Replay,
    #[error("one-time pad exhausted")]
    OtpExhausted,
    #[error("encoder sequence space exhausted")]
    SequenceExhausted,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
