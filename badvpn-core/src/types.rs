use std::fmt;
use std::num::NonZeroU16;

/// Identifies a peer within a VPN network, as carried in DataProto headers
/// and the control-plane peer list (`from_id` / `dest_id` / peer-id lists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u16);

impl PeerId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

impl From<u16> for PeerId {
    fn from(id: u16) -> Self {
        Self::new(id)
    }
}

/// Identifies a reassembly slot / frame within a single FragmentProto stream.
///
/// Frame ids wrap at `u16::MAX`; comparisons between them must go through
/// [`FrameId::precedes`] rather than the derived `Ord`, since the wire value
/// wraps while logical ordering does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u16);

impl FrameId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// Sequence-number comparison that tolerates a single wraparound, as
    /// FragmentProto's `frame_id_comparator` does for its LRU eviction order.
    pub fn precedes(self, other: Self) -> bool {
        self.0 != other.0 && self.0.wrapping_sub(other.0) > u16::MAX / 2
    }
}

/// A non-zero stream identifier, used by StreamPeerIO's PacketProto framing
/// layer and by the control-plane connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(NonZeroU16);

impl StreamId {
    pub fn new(id: u16) -> Option<Self> {
        NonZeroU16::new(id).map(Self)
    }

    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_id_precedes_handles_wraparound() {
        let a = FrameId::new(u16::MAX);
        let b = FrameId::new(0);
        assert!(a.precedes(b));
        assert!(!b.precedes(a));
    }

    #[test]
    fn stream_id_rejects_zero() {
        assert!(StreamId::new(0).is_none());
        assert!(StreamId::new(1).is_some());
    }
}
