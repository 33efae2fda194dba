//! Exercises `SocksUdpRelay` against its own `udp_header` codec: a payload
//! sent through the relay must come out the raw side wrapped in the RFC
//! 1928 §7 header addressed to the session's target, and a raw datagram
//! arriving from that target must be unwrapped back into the plain
//! payload the relay hands to its caller.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use badvpn_core::Reactor;
use badvpn_pipeline::capability::{PacketPassSink, PacketRecvSource};
use badvpn_socks::{udp_header, SocksUdpRelay};

#[derive(Clone, Default)]
struct RawOut {
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl PacketPassSink for RawOut {
    fn mtu(&self) -> usize {
        65507
    }

    fn send(&mut self, data: &[u8]) -> bool {
        self.sent.borrow_mut().push(data.to_vec());
        true
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {}
}

/// A raw inbound source the test can push datagrams into synchronously,
/// same shape as `badvpn-dataproto`'s test doubles for `PacketRecvSource`.
#[derive(Default)]
struct RawIn {
    pending: VecDeque<Vec<u8>>,
    done: Option<Box<dyn FnMut(Vec<u8>)>>,
}

impl RawIn {
    fn deliver(&mut self, datagram: Vec<u8>) {
        if let Some(h) = self.done.as_mut() {
            h(datagram);
        } else {
            self.pending.push_back(datagram);
        }
    }
}

impl PacketRecvSource for RawIn {
    fn mtu(&self) -> usize {
        65507
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.pending.pop_front()
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.done = Some(handler);
    }
}

#[test]
fn outbound_payload_is_wrapped_with_the_target_address() {
    let reactor = Reactor::new().expect("reactor");
    let target = "203.0.113.9:9050".parse().unwrap();
    let raw_out = RawOut::default();
    let sent = raw_out.sent.clone();
    let raw_in = Box::new(RawIn::default());

    let mut relay = SocksUdpRelay::new(&reactor, target, Box::new(raw_out), raw_in, Duration::from_secs(30), || {});

    assert!(relay.send(b"ping"));

    let sent = sent.borrow();
    assert_eq!(sent.len(), 1);
    let (decoded_target, payload) = udp_header::decode(&sent[0]).expect("valid socks udp header");
    assert_eq!(decoded_target, target);
    assert_eq!(payload, b"ping");
}

#[test]
fn inbound_datagram_is_unwrapped_into_plain_payload() {
    let reactor = Reactor::new().expect("reactor");
    let target = "203.0.113.9:9050".parse().unwrap();
    let raw_out = RawOut::default();
    let mut raw_in = Box::new(RawIn::default());

    let mut wrapped = Vec::new();
    udp_header::encode(target, b"pong", &mut wrapped);
    raw_in.deliver(wrapped);

    let mut relay = SocksUdpRelay::new(&reactor, target, Box::new(raw_out), raw_in, Duration::from_secs(30), || {});

    assert_eq!(relay.recv(), Some(b"pong".to_vec()));
}
