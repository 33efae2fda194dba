//! Wires two peers the way `badvpn-client::session` wires one, but both
//! ends on a single reactor talking over real loopback UDP sockets, and
//! checks a frame routed on one side is decoded and delivered on the
//! other — exercising `DataProtoLocalSource`/`DataProtoDest` fan-out,
//! `DatagramPeerIo`'s SPProto+FragmentProto framing, and the DataProto
//! header codec together rather than each in isolation.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use badvpn_core::{PeerId, Reactor};
use badvpn_dataproto::{header, DataProtoDest, DataProtoLocalSource};
use badvpn_peerio::DatagramPeerIo;
use badvpn_pipeline::capability::{PacketPassSink, PacketRecvSource};
use badvpn_pipeline::split::{split, RecvHalf};
use badvpn_spproto::{Decoder as SpDecoder, Encoder as SpEncoder};
use mio::net::UdpSocket;

const FRAME_MTU: usize = 1400;
const WIRE_MTU: usize = FRAME_MTU + 64 + badvpn_peerio::MAX_SPPROTO_OVERHEAD;

/// Records whatever payload reaches "the host" on a peer's inbound path.
#[derive(Clone, Default)]
struct RecordingHost {
    received: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl PacketPassSink for RecordingHost {
    fn mtu(&self) -> usize {
        FRAME_MTU
    }

    fn send(&mut self, data: &[u8]) -> bool {
        self.received.borrow_mut().push(data.to_vec());
        true
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {}
}

/// Mirrors `badvpn-client::session::InboundState`/`pump_inbound`/
/// `deliver_inbound`: pulls every reassembled frame off a peer's receive
/// half, decodes the DataProto header, hands the payload to the host sink
/// and feeds the receiving-keepalives bit back into the peer's `DataProtoDest`.
struct Inbound {
    recv: RecvHalf<DatagramPeerIo>,
    host: RecordingHost,
    dest: DataProtoDest,
}

fn pump_inbound(state: &Rc<RefCell<Inbound>>) {
    loop {
        let frame = {
            let mut guard = state.borrow_mut();
            match guard.recv.recv() {
                Some(frame) => frame,
                None => return,
            }
        };
        deliver_inbound(state, &frame);
    }
}

fn deliver_inbound(state: &Rc<RefCell<Inbound>>, frame: &[u8]) {
    let mut guard = state.borrow_mut();
    let (hdr, payload) = header::decode(frame).expect("valid DataProto header");
    guard.host.send(payload);
    let receiving = hdr.flags & header::RECEIVING_KEEPALIVES != 0;
    guard.dest.received(receiving);
}

fn wire_inbound(recv: RecvHalf<DatagramPeerIo>, host: RecordingHost, dest: DataProtoDest) -> Rc<RefCell<Inbound>> {
    let state = Rc::new(RefCell::new(Inbound { recv, host, dest }));
    let weak: Weak<RefCell<Inbound>> = Rc::downgrade(&state);
    state.borrow_mut().recv.set_done_handler(Box::new(move |frame| {
        if let Some(strong) = weak.upgrade() {
            deliver_inbound(&strong, &frame);
            pump_inbound(&strong);
        }
    }));
    pump_inbound(&state);
    state
}

#[test]
fn frame_routed_on_one_peer_is_decoded_and_delivered_on_the_other() {
    let reactor = Reactor::new().expect("reactor");
    let key = [7u8; 32];

    let id_a = PeerId::new(1);
    let id_b = PeerId::new(2);

    let socket_a = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).expect("bind a");
    let addr_a = socket_a.local_addr().unwrap();
    let socket_b = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).expect("bind b");
    let addr_b = socket_b.local_addr().unwrap();

    let peer_io_a = DatagramPeerIo::connect(
        &reactor,
        socket_a,
        addr_b,
        FRAME_MTU,
        WIRE_MTU,
        SpEncoder::new_aead(key, [0u8; 12]),
        SpDecoder::new_aead(key, [0u8; 12]),
        Duration::from_millis(1),
        4,
        15,
        16,
    )
    .expect("peer io a");

    let peer_io_b = DatagramPeerIo::connect(
        &reactor,
        socket_b,
        addr_a,
        FRAME_MTU,
        WIRE_MTU,
        SpEncoder::new_aead(key, [0u8; 12]),
        SpDecoder::new_aead(key, [0u8; 12]),
        Duration::from_millis(1),
        4,
        15,
        16,
    )
    .expect("peer io b");

    let (pass_a, _recv_a) = split(peer_io_a);
    let (pass_b, recv_b) = split(peer_io_b);

    let dest_a = DataProtoDest::new(&reactor, Box::new(pass_a), id_a, Duration::from_secs(15), Duration::from_secs(60));
    let local_source_a = DataProtoLocalSource::new(id_a, id_b, FRAME_MTU);
    assert!(local_source_a.attach(&dest_a, FRAME_MTU));

    let dest_b = DataProtoDest::new(&reactor, Box::new(pass_b), id_b, Duration::from_secs(15), Duration::from_secs(60));
    let host_b = RecordingHost::default();
    let _inbound_b = wire_inbound(recv_b, host_b.clone(), dest_b);

    assert!(local_source_a.route(b"hello from a"));

    let quit = reactor.clone();
    let _timer = reactor.create_timer(Duration::from_millis(200), move || quit.quit(0));
    reactor.run().expect("run");

    assert_eq!(*host_b.received.borrow(), vec![b"hello from a".to_vec()]);
    assert_eq!(local_source_a.dropped_count(), 0);
}
