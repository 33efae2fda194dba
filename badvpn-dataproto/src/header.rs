use badvpn_core::PeerId;

/// Set when the sender has heard from its peer within the peer's configured
/// tolerance interval.
pub const RECEIVING_KEEPALIVES: u8 = 0x01;

/// `flags + from_id + num_peer_ids`, present on every frame.
const FIXED_LEN: usize = 1 + 2 + 2;

/// Size of one peer id as carried in the header.
const PEER_ID_LEN: usize = 2;

/// Bytes reserved ahead of the frame payload so routing can prepend the
/// header without a second allocation: the fixed header plus room for one
/// `dest_id` (unicast is the only non-keepalive shape this header has).
pub const MAX_OVERHEAD: usize = FIXED_LEN + PEER_ID_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    pub from_id: PeerId,
    /// `None` encodes a keepalive (`num_peer_ids = 0`); `Some(id)` encodes
    /// unicast (`num_peer_ids = 1`).
    pub dest_id: Option<PeerId>,
}

impl Header {
    pub fn wire_len(self) -> usize {
        FIXED_LEN + if self.dest_id.is_some() { PEER_ID_LEN } else { 0 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("DataProto header truncated: {0} bytes available")]
    Truncated(usize),
    #[error("DataProto num_peer_ids {0} is neither 0 nor 1")]
    InvalidNumPeerIds(u16),
}

/// Appends `header` followed by `payload` to `out`.
pub fn encode(header: Header, payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(header.wire_len() + payload.len());
    out.push(header.flags);
    out.extend_from_slice(&header.from_id.get().to_le_bytes());
    match header.dest_id {
        Some(dest_id) => {
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend_from_slice(&dest_id.get().to_le_bytes());
        }
        None => out.extend_from_slice(&0u16.to_le_bytes()),
    }
    out.extend_from_slice(payload);
}

/// Parses the header prefix of `data`, returning it along with the
/// remaining frame payload.
pub fn decode(data: &[u8]) -> Result<(Header, &[u8]), DecodeError> {
    if data.len() < FIXED_LEN {
        return Err(DecodeError::Truncated(data.len()));
    }
    let flags = data[0];
    let from_id = PeerId::new(u16::from_le_bytes([data[1], data[2]]));
    let num_peer_ids = u16::from_le_bytes([data[3], data[4]]);
    match num_peer_ids {
        0 => Ok((Header { flags, from_id, dest_id: None }, &data[FIXED_LEN..])),
        1 => {
            if data.len() < FIXED_LEN + PEER_ID_LEN {
                return Err(DecodeError::Truncated(data.len()));
            }
            let dest_id = PeerId::new(u16::from_le_bytes([data[5], data[6]]));
            Ok((
                Header { flags, from_id, dest_id: Some(dest_id) },
                &data[FIXED_LEN + PEER_ID_LEN..],
            ))
        }
        other => Err(DecodeError::InvalidNumPeerIds(other)),
    }
}

/// Patches the `RECEIVING_KEEPALIVES` bit of an already-encoded frame in
/// place. Used by [`crate::dest`]'s outgoing notifier, which doesn't care
/// whether the frame it's patching is itself a keepalive.
pub fn set_receiving_keepalives(frame: &mut [u8], receiving: bool) {
    let Some(flags) = frame.first_mut() else { return };
    if receiving {
        *flags |= RECEIVING_KEEPALIVES;
    } else {
        *flags &= !RECEIVING_KEEPALIVES;
    }
}
