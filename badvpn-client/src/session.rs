//! Turns configured peers into live DataProto plumbing.
//!
//! Each [`PeerConfig`] becomes a [`DataProtoLocalSource`], registered with
//! the shared [`DataProtoDevice`] immediately so outbound routing has
//! somewhere to go the moment the reactor starts, even before the transport
//! underneath is attached. Transports that are available synchronously
//! (`ConnectUdp`, `ListenUdp`, `ConnectTcp`) get a [`DataProtoDest`] wired up
//! right away; `ListenTcp` peers attach lazily once a connection carrying
//! the right password is accepted.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use badvpn_core::{CryptoMode, KeepaliveConfig, PeerConfig, PeerId, PeerTransport, Reactor};
use badvpn_dataproto::{header, DataProtoDest, DataProtoDevice, DataProtoLocalSource};
use badvpn_peerio::{DatagramPeerIo, PasswordListener, StreamPeerIo, TcpTransport};
use badvpn_pipeline::{split, PacketPassSink, PacketRecvSource, PassHalf};
use badvpn_spproto::{Decoder as SpDecoder, Encoder as SpEncoder};
use mio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{info, warn};

use crate::tap::LoopbackTap;

const REASSEMBLY_FRAMES: usize = 4;
const MAX_CHUNKS_PER_FRAME: usize = 16;
const FLUSH_LATENCY: Duration = Duration::from_millis(5);

fn crypto_codecs(mode: &CryptoMode) -> (SpEncoder, SpDecoder) {
    match mode {
        CryptoMode::Aead { key } => (SpEncoder::new_aead(*key, [0u8; 12]), SpDecoder::new_aead(*key, [0u8; 12])),
        CryptoMode::Otp { send_pad, recv_pad } => {
            (SpEncoder::new_otp(send_pad.clone()), SpDecoder::new_otp(recv_pad.clone()))
        }
    }
}

/// Keeps one attached peer's `DataProtoDest` and inbound pump alive for as
/// long as the session runs. Nothing reads these fields back out; they
/// exist purely so the `Rc`-backed state behind them isn't dropped.
struct ActivePeer {
    #[allow(dead_code)]
    dest: DataProtoDest,
    #[allow(dead_code)]
    inbound: Rc<RefCell<InboundState>>,
}

struct InboundState {
    recv: Box<dyn PacketRecvSource>,
    tap_pass: PassHalf<LoopbackTap>,
    dest: DataProtoDest,
    peer: PeerId,
}

fn pump_inbound(state: &Rc<RefCell<InboundState>>) {
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

fn deliver_inbound(state: &Rc<RefCell<InboundState>>, frame: &[u8]) {
    let mut guard = state.borrow_mut();
    let (hdr, payload) = match header::decode(frame) {
        Ok(v) => v,
        Err(e) => {
            warn!(peer = %guard.peer, "dropping malformed inbound frame: {e}");
            return;
        }
    };
    if !guard.tap_pass.send(payload) {
        warn!(peer = %guard.peer, "tap refused inbound frame");
    }
    let receiving = hdr.flags & header::RECEIVING_KEEPALIVES != 0;
    guard.dest.received(receiving);
}

/// Shared state every peer's wiring is built against.
pub struct SessionContext {
    reactor: Reactor,
    local_id: PeerId,
    keepalive: KeepaliveConfig,
    frame_mtu: usize,
    max_overhead: usize,
    device: DataProtoDevice,
    tap_pass: PassHalf<LoopbackTap>,
    active: RefCell<Vec<ActivePeer>>,
    listeners: RefCell<HashMap<SocketAddr, Rc<PasswordListener>>>,
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reactor: Reactor,
        local_id: PeerId,
        keepalive: KeepaliveConfig,
        frame_mtu: usize,
        max_overhead: usize,
        device: DataProtoDevice,
        tap_pass: PassHalf<LoopbackTap>,
    ) -> Rc<Self> {
        Rc::new(Self {
            reactor,
            local_id,
            keepalive,
            frame_mtu,
            max_overhead,
            device,
            tap_pass,
            active: RefCell::new(Vec::new()),
            listeners: RefCell::new(HashMap::new()),
        })
    }

    fn listener_for(self: &Rc<Self>, bind: SocketAddr) -> badvpn_core::Result<Rc<PasswordListener>> {
        if let Some(existing) = self.listeners.borrow().get(&bind) {
            return Ok(existing.clone());
        }
        let listener = Rc::new(PasswordListener::new(&self.reactor, TcpListener::bind(bind)?)?);
        self.listeners.borrow_mut().insert(bind, listener.clone());
        Ok(listener)
    }

    fn attach_duplex<T>(self: &Rc<Self>, local_source: DataProtoLocalSource, peer_io: T, dest_id: PeerId)
    where
        T: PacketPassSink + PacketRecvSource + 'static,
    {
        let (pass_half, recv_half) = split(peer_io);
        let dest = DataProtoDest::new(
            &self.reactor,
            Box::new(pass_half),
            self.local_id,
            self.keepalive.keepalive_interval,
            self.keepalive.receive_timeout,
        );
        if !local_source.attach(&dest, self.frame_mtu) {
            warn!(peer = %dest_id, "destination refused attach");
        }
        self.device.add_source(local_source);

        let inbound = Rc::new(RefCell::new(InboundState {
            recv: Box::new(recv_half),
            tap_pass: self.tap_pass.clone(),
            dest: dest.clone(),
            peer: dest_id,
        }));
        let weak: Weak<RefCell<InboundState>> = Rc::downgrade(&inbound);
        inbound.borrow_mut().recv.set_done_handler(Box::new(move |frame| {
            if let Some(strong) = weak.upgrade() {
                deliver_inbound(&strong, &frame);
                pump_inbound(&strong);
            }
        }));
        pump_inbound(&inbound);

        self.active.borrow_mut().push(ActivePeer { dest, inbound });
    }

    /// Wires one configured peer against this context's reactor and device.
    pub fn wire_peer(self: &Rc<Self>, peer: &PeerConfig) -> badvpn_core::Result<()> {
        let dest_id = PeerId::new(peer.id);
        let local_source = DataProtoLocalSource::new(self.local_id, dest_id, self.frame_mtu);
        let wire_mtu = self.frame_mtu + self.max_overhead;

        match &peer.transport {
            PeerTransport::ConnectUdp { bind, remote, crypto } => {
                let socket = UdpSocket::bind(*bind)?;
                let (encoder, decoder) = crypto_codecs(crypto);
                let peer_io = DatagramPeerIo::connect(
                    &self.reactor,
                    socket,
                    *remote,
                    self.frame_mtu,
                    wire_mtu,
                    encoder,
                    decoder,
                    FLUSH_LATENCY,
                    REASSEMBLY_FRAMES,
                    self.keepalive.fragment_timeout_ticks,
                    MAX_CHUNKS_PER_FRAME,
                )?;
                info!(peer = %dest_id, %remote, "connect-udp peer wired");
                self.attach_duplex(local_source, peer_io, dest_id);
            }
            PeerTransport::ListenUdp { bind, crypto } => {
                let socket = UdpSocket::bind(*bind)?;
                let (encoder, decoder) = crypto_codecs(crypto);
                let peer_io = DatagramPeerIo::bind(
                    &self.reactor,
                    socket,
                    self.frame_mtu,
                    wire_mtu,
                    encoder,
                    decoder,
                    FLUSH_LATENCY,
                    REASSEMBLY_FRAMES,
                    self.keepalive.fragment_timeout_ticks,
                    MAX_CHUNKS_PER_FRAME,
                )?;
                info!(peer = %dest_id, %bind, "listen-udp peer wired");
                self.attach_duplex(local_source, peer_io, dest_id);
            }
            PeerTransport::ConnectTcp { remote, password } => {
                let stream = TcpStream::connect(*remote)?;
                let transport = TcpTransport::new(&self.reactor, stream)?;
                let peer_io = StreamPeerIo::connect(transport, *password, self.frame_mtu);
                info!(peer = %dest_id, %remote, "connect-tcp peer wired");
                self.attach_duplex(local_source, peer_io, dest_id);
            }
            PeerTransport::ListenTcp { bind, password } => {
                self.device.add_source(local_source);
                let listener = self.listener_for(*bind)?;
                let ctx = self.clone();
                let password = *password;
                let bind = *bind;
                let frame_mtu = self.frame_mtu;
                listener.add_password(password, move |stream, addr| {
                    info!(peer = %dest_id, %addr, %bind, "listen-tcp peer authenticated");
                    let transport = match TcpTransport::new(&ctx.reactor, stream) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(peer = %dest_id, "tcp transport setup failed: {e}");
                            return;
                        }
                    };
                    let peer_io = StreamPeerIo::from_authenticated(transport, frame_mtu);
                    if let Some(local_source) = ctx.device.remove_source(dest_id) {
                        ctx.attach_duplex(local_source, peer_io, dest_id);
                    }
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badvpn_core::KeepaliveConfig;
    use badvpn_dataproto::DataProtoDevice;

    #[test]
    fn connect_udp_peer_attaches_synchronously() {
        let reactor = Reactor::new().expect("reactor");
        let tap = LoopbackTap::new(1500);
        let (tap_pass, tap_recv) = split(tap);
        let device = DataProtoDevice::new(Box::new(tap_recv), |_frame| Some(PeerId::new(2)));
        let ctx = SessionContext::new(reactor, PeerId::new(1), KeepaliveConfig::default(), 1400, 5, device, tap_pass);

        let remote = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind probe").local_addr().unwrap();
        let peer = PeerConfig {
            id: 2,
            transport: PeerTransport::ConnectUdp {
                bind: "127.0.0.1:0".parse().unwrap(),
                remote,
                crypto: CryptoMode::Aead { key: [9u8; 32] },
            },
        };
        ctx.wire_peer(&peer).expect("wire connect-udp peer");
        assert_eq!(ctx.active.borrow().len(), 1);
    }

    #[test]
    fn listen_tcp_peer_defers_attachment_until_authenticated() {
        let reactor = Reactor::new().expect("reactor");
        let tap = LoopbackTap::new(1500);
        let (tap_pass, tap_recv) = split(tap);
        let device = DataProtoDevice::new(Box::new(tap_recv), |_frame| Some(PeerId::new(5)));
        let ctx = SessionContext::new(reactor, PeerId::new(1), KeepaliveConfig::default(), 1400, 5, device, tap_pass);

        let peer = PeerConfig {
            id: 5,
            transport: PeerTransport::ListenTcp { bind: "127.0.0.1:0".parse().unwrap(), password: 7 },
        };
        ctx.wire_peer(&peer).expect("wire listen-tcp peer");
        assert_eq!(ctx.active.borrow().len(), 0);
        assert!(ctx.device.remove_source(PeerId::new(5)).is_some());
    }
}
