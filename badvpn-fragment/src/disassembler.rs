use crate::chunk::{ChunkHeader, HEADER_LEN};

/// Splits frames into FragmentProto chunks and batches them into
/// `carrier_mtu`-sized datagrams. A pure, synchronous
/// packer: it has no notion of time itself. The owning pipeline node is
/// responsible for the `latency` timer — call [`Disassembler::pending_len`]
/// after each [`Disassembler::push_frame`] to decide whether to (re)arm a
/// flush timer, and [`Disassembler::take_pending`] from that timer's
/// handler to flush whatever is still buffered.
pub struct Disassembler {
    payload_mtu: usize,
    carrier_mtu: usize,
    next_frame_id: u16,
    current: Vec<u8>,
}

impl Disassembler {
    pub fn new(payload_mtu: usize, carrier_mtu: usize) -> Self {
        assert!(
            carrier_mtu > HEADER_LEN,
            "carrier_mtu must fit at least one chunk header"
        );
        Self {
            payload_mtu,
            carrier_mtu,
            next_frame_id: 0,
            current: Vec::new(),
        }
    }

    /// Splits `frame` into one or more chunks, appending every completed
    /// `carrier_mtu` datagram to `out_datagrams`. Any trailing partial
    /// datagram is left buffered (see [`Disassembler::pending_len`]) rather
    /// than appended, so callers can batch further frames into it.
    pub fn push_frame(&mut self, frame: &[u8], out_datagrams: &mut Vec<Vec<u8>>) {
        assert!(frame.len() <= self.payload_mtu, "frame exceeds payload_mtu");
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let max_chunk_payload = self.carrier_mtu - HEADER_LEN;
        assert!(max_chunk_payload > 0, "carrier_mtu too small for any payload");

        let mut offset = 0usize;
        loop {
            if self.carrier_mtu - self.current.len() <= HEADER_LEN {
                out_datagrams.push(std::mem::take(&mut self.current));
            }
            let remaining_in_frame = frame.len() - offset;
            let space = self.carrier_mtu - self.current.len() - HEADER_LEN;
            let chunk_len = remaining_in_frame.min(space).min(max_chunk_payload);
            let is_last = offset + chunk_len == frame.len();

            let header = ChunkHeader {
                frame_id,
                chunk_start: offset as u16,
                chunk_len: chunk_len as u16,
                is_last,
            };
            header.encode_into(&mut self.current);
            self.current.extend_from_slice(&frame[offset..offset + chunk_len]);
            offset += chunk_len;

            if is_last {
                break;
            }
            out_datagrams.push(std::mem::take(&mut self.current));
        }
    }

    /// Bytes currently buffered in the not-yet-flushed datagram. Zero means
    /// there is nothing pending and no flush timer is needed.
    pub fn pending_len(&self) -> usize {
        self.current.len()
    }

    /// Takes whatever partial datagram is buffered, if any, for the caller
    /// to push downstream (normally from a latency-timeout handler).
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        if self.current.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.current))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;

    fn decode_all(datagram: &[u8]) -> Vec<(ChunkHeader, Vec<u8>)> {
        let mut rest = datagram;
        let mut out = Vec::new();
        while !rest.is_empty() {
            let (header, payload, tail) = ChunkHeader::decode(rest).expect("decode");
            out.push((header, payload.to_vec()));
            rest = tail;
        }
        out
    }

    #[test]
    fn single_small_frame_fits_one_chunk_and_stays_pending() {
        let mut dis = Disassembler::new(1500, 200);
        let mut out = Vec::new();
        dis.push_frame(b"hello", &mut out);
        assert!(out.is_empty());
        assert!(dis.pending_len() > 0);
        let pending = dis.take_pending().expect("pending datagram");
        let chunks = decode_all(&pending);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.is_last);
        assert_eq!(chunks[0].1, b"hello");
        assert_eq!(dis.pending_len(), 0);
    }

    #[test]
    fn large_frame_splits_across_chunks_and_round_trips() {
        let mut dis = Disassembler::new(1500, 32);
        let frame: Vec<u8> = (0..100u16).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        dis.push_frame(&frame, &mut out);
        if let Some(p) = dis.take_pending() {
            out.push(p);
        }
        assert!(out.len() > 1);

        let mut asm = Assembler::new(4, 1500, 1000, 64);
        let mut reassembled = None;
        for datagram in &out {
            for (header, payload) in decode_all(datagram) {
                if let Some(frame) = asm.process_chunk(header, &payload).unwrap() {
                    reassembled = Some(frame);
                }
            }
        }
        assert_eq!(reassembled, Some(frame));
    }

    #[test]
    fn multiple_small_frames_share_one_datagram() {
        let mut dis = Disassembler::new(1500, 200);
        let mut out = Vec::new();
        dis.push_frame(b"aaa", &mut out);
        dis.push_frame(b"bbb", &mut out);
        assert!(out.is_empty(), "both frames should still fit in one pending datagram");
        let pending = dis.take_pending().unwrap();
        let chunks = decode_all(&pending);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0.frame_id, 0);
        assert_eq!(chunks[1].0.frame_id, 1);
    }

    #[test]
    fn frame_ids_increment_and_wrap() {
        let mut dis = Disassembler::new(1500, 200);
        dis.next_frame_id = u16::MAX;
        let mut out = Vec::new();
        dis.push_frame(b"a", &mut out);
        dis.take_pending();
        dis.push_frame(b"b", &mut out);
        assert_eq!(dis.next_frame_id, 1);
    }
}
