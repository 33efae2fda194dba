//! The local virtual-interface boundary.
//!
//! Binding an actual TUN/TAP device is OS-specific driver plumbing, out of
//! scope here the same way the SOCKS5 handshake is in `badvpn-socks`: this
//! module only defines the contract `DataProtoDevice` and each peer's
//! inbound path need in order to talk to "the local machine" at all, plus a
//! trivial in-memory stand-in so the wiring below compiles and runs without
//! one.

use std::collections::VecDeque;

use badvpn_pipeline::{PacketPassSink, PacketRecvSource};

/// A local network interface: accepts frames to inject into the host's
/// network stack ([`PacketPassSink`]) and produces frames the host wants
/// sent out over the tunnel ([`PacketRecvSource`]). A real implementation
/// wraps a `/dev/net/tun` (or platform equivalent) fd registered with the
/// reactor; this trait has no body beyond what's needed to compile the
/// example wiring.
pub trait TapDevice: PacketPassSink + PacketRecvSource {}

impl<T: PacketPassSink + PacketRecvSource> TapDevice for T {}

/// An in-memory loopback interface used when no platform TAP binding is
/// wired up: frames written to it via `send` are simply queued to be read
/// back out via `recv`. Useful for exercising the rest of the pipeline
/// (and for tests) without root or a real network device.
#[derive(Debug, Default)]
pub struct LoopbackTap {
    mtu: usize,
    pending: VecDeque<Vec<u8>>,
    recv_done: Option<Box<dyn FnMut(Vec<u8>)>>,
}

impl LoopbackTap {
    pub fn new(mtu: usize) -> Self {
        Self { mtu, pending: VecDeque::new(), recv_done: None }
    }
}

impl PacketPassSink for LoopbackTap {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, data: &[u8]) -> bool {
        debug_assert!(data.len() <= self.mtu);
        self.pending.push_back(data.to_vec());
        true
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {
        // send() never reports busy.
    }
}

impl PacketRecvSource for LoopbackTap {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.pending.pop_front()
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.recv_done = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_written_are_read_back_in_order() {
        let mut tap = LoopbackTap::new(1500);
        assert!(tap.send(b"one"));
        assert!(tap.send(b"two"));
        assert_eq!(tap.recv(), Some(b"one".to_vec()));
        assert_eq!(tap.recv(), Some(b"two".to_vec()));
        assert_eq!(tap.recv(), None);
    }
}
