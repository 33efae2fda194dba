use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Chunk- and slot-level failures. All of them are handled by dropping the
/// offending chunk or slot — nothing here is fatal to the assembler itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("chunk header truncated")]
    Truncated,
    #[error("chunk [{start}, {end}) does not fit within output_mtu {mtu}")]
    OutOfBounds { start: usize, end: usize, mtu: usize },
    #[error("chunk overlaps a previously received chunk in frame {frame_id}")]
    Overlap { frame_id: u16 },
    #[error("frame {frame_id} received a second is_last chunk")]
    DuplicateLast { frame_id: u16 },
    #[error("frame {frame_id} chunk is inconsistent with its declared length")]
    LengthMismatch { frame_id: u16 },
    #[error("frame {frame_id} exceeded the maximum chunk count")]
    TooManyChunks { frame_id: u16 },
}
