/// PacketProto stream framing used by [`crate::stream_peer_io::StreamPeerIo`]
/// on top of an authenticated byte stream: a u16 LE length prefix followed
/// by that many payload bytes, back-to-back.
pub const HEADER_LEN: usize = 2;

pub fn encode(payload: &[u8], out: &mut Vec<u8>) {
    debug_assert!(payload.len() <= u16::MAX as usize, "PacketProto payload exceeds u16 length");
    out.reserve(HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Incrementally reassembles PacketProto records out of an arbitrarily
/// chunked byte stream: stream transports have no framing of their own, so
/// a single `recv` may deliver a partial record, several whole records, or
/// a record split across two calls.
#[derive(Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly-received bytes and extracts every record that is now
    /// complete, in order, appending each to `out`.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<Vec<u8>>) {
        self.buf.extend_from_slice(data);
        let mut consumed = 0;
        loop {
            let rest = &self.buf[consumed..];
            if rest.len() < HEADER_LEN {
                break;
            }
            let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
            if rest.len() < HEADER_LEN + len {
                break;
            }
            out.push(rest[HEADER_LEN..HEADER_LEN + len].to_vec());
            consumed += HEADER_LEN + len;
        }
        self.buf.drain(..consumed);
    }
}
