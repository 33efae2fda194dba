use crate::error::{Error, Result};

/// On-wire chunk header: 7 bytes, little-endian, followed by `chunk_len`
/// bytes of payload.
pub const HEADER_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub frame_id: u16,
    pub chunk_start: u16,
    pub chunk_len: u16,
    pub is_last: bool,
}

impl ChunkHeader {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.frame_id.to_le_bytes());
        out.extend_from_slice(&self.chunk_start.to_le_bytes());
        out.extend_from_slice(&self.chunk_len.to_le_bytes());
        out.push(u8::from(self.is_last));
    }

    /// Decodes one chunk header plus its payload from the front of `data`,
    /// returning the header, the payload slice, and whatever follows it
    /// (so callers can keep decoding chunks out of the same datagram).
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8], &[u8])> {
        if data.len() < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let frame_id = u16::from_le_bytes([data[0], data[1]]);
        let chunk_start = u16::from_le_bytes([data[2], data[3]]);
        let chunk_len = u16::from_le_bytes([data[4], data[5]]);
        let is_last = match data[6] {
            0 => false,
            1 => true,
            _ => return Err(Error::Truncated),
        };
        let payload_end = HEADER_LEN + chunk_len as usize;
        if data.len() < payload_end {
            return Err(Error::Truncated);
        }
        Ok((
            Self {
                frame_id,
                chunk_start,
                chunk_len,
                is_last,
            },
            &data[HEADER_LEN..payload_end],
            &data[payload_end..],
        ))
    }
}
