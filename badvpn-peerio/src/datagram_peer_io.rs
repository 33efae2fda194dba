use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use badvpn_core::{IoInterest, IoToken, ReadySet, Reactor, Timer};
use badvpn_fragment::{Assembler, ChunkHeader, Disassembler};
use badvpn_pipeline::{PacketPassSink, PacketRecvSource};
use badvpn_spproto::{Decoder as SpDecoder, Encoder as SpEncoder, Warning as SpWarning};
use mio::net::UdpSocket;
use tracing::{debug, trace, warn};

/// Per-datagram overhead SPProto adds on top of a FragmentProto chunk: an
/// 8-byte sequence prefix plus, for the AEAD suite, a 16-byte tag. Callers
/// size the wire MTU down by this much before it reaches the
/// [`Disassembler`], so the sealed record still fits on the wire.
pub const MAX_SPPROTO_OVERHEAD: usize = 8 + 16;

#[derive(Debug, Clone, Copy)]
enum Mode {
    Connect(SocketAddr),
    /// No destination until the first datagram arrives; then whoever sent
    /// it, updated on every subsequent receive.
    BindAndLearn(Option<SocketAddr>),
}

struct Inner {
    reactor: Reactor,
    socket: UdpSocket,
    io_token: Option<IoToken>,
    mode: Mode,
    encoder: SpEncoder,
    decoder: SpDecoder,
    disassembler: Disassembler,
    assembler: Assembler,
    flush_timer: Option<Timer>,
    recv_pending: VecDeque<Vec<u8>>,
    recv_waiting: bool,
    recv_done: Option<Box<dyn FnMut(Vec<u8>)>>,
    warning_handler: Option<Box<dyn FnMut(SpWarning)>>,
}

/// UDP peer transport: wraps a socket with SPProto encode/decode and
/// FragmentProto disassemble/assemble, in either connected-client or
/// bind-and-learn-server mode.
///
/// Implements both [`PacketPassSink`] (send a frame out) and
/// [`PacketRecvSource`] (receive a reassembled frame) directly.
pub struct DatagramPeerIo {
    inner: Rc<RefCell<Inner>>,
    payload_mtu: usize,
}

fn send_datagram(inner: &mut Inner, datagram: &[u8]) {
    let dest = match &mut inner.mode {
        Mode::Connect(_) => None,
        Mode::BindAndLearn(Some(addr)) => Some(*addr),
        Mode::BindAndLearn(None) => {
            trace!("dropping outbound datagram: no peer learned yet");
            return;
        }
    };
    let result = match dest {
        Some(addr) => inner.socket.send_to(datagram, addr),
        None => inner.socket.send(datagram),
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::WouldBlock {
            warn!("udp send failed: {e}");
        }
    }
}

fn flush_disassembler(inner: &mut Inner) {
    if let Some(pending) = inner.disassembler.take_pending() {
        encode_and_send(inner, &pending);
    }
}

fn encode_and_send(inner: &mut Inner, chunk_datagram: &[u8]) {
    match inner.encoder.encode(&[], chunk_datagram) {
        Ok((record, warning)) => {
            if let Some(w) = warning {
                if let Some(h) = inner.warning_handler.as_mut() {
                    h(w);
                }
            }
            send_datagram(inner, &record);
        }
        Err(e) => warn!("spproto encode failed: {e}"),
    }
}

fn arm_flush_timer_if_needed(inner_rc: &Rc<RefCell<Inner>>) {
    let pending = inner_rc.borrow().disassembler.pending_len();
    if pending > 0 {
        if let Some(timer) = inner_rc.borrow().flush_timer.as_ref() {
            timer.schedule();
        }
    }
}

fn on_readable(inner_rc: &Rc<RefCell<Inner>>) {
    let mut buf = [0u8; 65536];
    loop {
        let (len, from) = {
            let mut inner = inner_rc.borrow_mut();
            match inner.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("udp recv failed: {e}");
                    return;
                }
            }
        };
        let mut inner = inner_rc.borrow_mut();
        if let Mode::BindAndLearn(dest) = &mut inner.mode {
            *dest = Some(from);
        }
        let decoded = inner.decoder.decode_with_warning(&[], &buf[..len]);
        let (plaintext, warning) = match decoded {
            Ok(v) => v,
            Err(e) => {
                debug!("spproto decode rejected datagram from {from}: {e}");
                continue;
            }
        };
        if let Some(w) = warning {
            if let Some(h) = inner.warning_handler.as_mut() {
                h(w);
            }
        }
        let mut rest: &[u8] = &plaintext;
        while !rest.is_empty() {
            let (header, payload, tail) = match ChunkHeader::decode(rest) {
                Ok(v) => v,
                Err(e) => {
                    debug!("fragmentproto chunk decode failed: {e}");
                    break;
                }
            };
            match inner.assembler.process_chunk(header, payload) {
                Ok(Some(frame)) => {
                    if inner.recv_waiting && inner.recv_pending.is_empty() {
                        inner.recv_waiting = false;
                        if let Some(h) = inner.recv_done.as_mut() {
                            h(frame);
                        } else {
                            inner.recv_pending.push_back(frame);
                        }
                    } else {
                        inner.recv_pending.push_back(frame);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("fragmentproto reassembly rejected chunk: {e}"),
            }
            rest = tail;
        }
    }
}

impl DatagramPeerIo {
    fn new(
        reactor: &Reactor,
        socket: UdpSocket,
        mode: Mode,
        payload_mtu: usize,
        wire_mtu: usize,
        encoder: SpEncoder,
        decoder: SpDecoder,
        flush_latency: Duration,
        num_reassembly_frames: usize,
        reassembly_tolerance: u32,
        max_chunks_per_frame: usize,
    ) -> badvpn_core::Result<Self> {
        let carrier_mtu = wire_mtu.saturating_sub(MAX_SPPROTO_OVERHEAD);
        let inner = Rc::new(RefCell::new(Inner {
            reactor: reactor.clone(),
            socket,
            io_token: None,
            mode,
            encoder,
            decoder,
            disassembler: Disassembler::new(payload_mtu, carrier_mtu),
            assembler: Assembler::new(num_reassembly_frames, payload_mtu, reassembly_tolerance, max_chunks_per_frame),
            flush_timer: None,
            recv_pending: VecDeque::new(),
            recv_waiting: false,
            recv_done: None,
            warning_handler: None,
        }));

        let weak_for_io: Weak<RefCell<Inner>> = Rc::downgrade(&inner);
        let token = {
            let mut guard = inner.borrow_mut();
            reactor.register_io(&mut guard.socket, IoInterest::READABLE, move |ready: ReadySet| {
                if ready.readable {
                    if let Some(strong) = weak_for_io.upgrade() {
                        on_readable(&strong);
                    }
                }
            })?
        };
        inner.borrow_mut().io_token = Some(token);

        let weak_for_timer = Rc::downgrade(&inner);
        let timer = reactor.create_timer(flush_latency, move || {
            if let Some(strong) = weak_for_timer.upgrade() {
                flush_disassembler(&mut strong.borrow_mut());
            }
        });
        inner.borrow_mut().flush_timer = Some(timer);

        Ok(Self { inner, payload_mtu })
    }

    /// Connected-client mode: `addr` is the fixed peer destination.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        reactor: &Reactor,
        socket: UdpSocket,
        peer: SocketAddr,
        payload_mtu: usize,
        wire_mtu: usize,
        encoder: SpEncoder,
        decoder: SpDecoder,
        flush_latency: Duration,
        num_reassembly_frames: usize,
        reassembly_tolerance: u32,
        max_chunks_per_frame: usize,
    ) -> badvpn_core::Result<Self> {
        socket.connect(peer).map_err(badvpn_core::Error::Io)?;
        Self::new(
            reactor,
            socket,
            Mode::Connect(peer),
            payload_mtu,
            wire_mtu,
            encoder,
            decoder,
            flush_latency,
            num_reassembly_frames,
            reassembly_tolerance,
            max_chunks_per_frame,
        )
    }

    /// Bind-and-learn server mode: cannot send until the first datagram is
    /// received, after which the sender's address becomes the destination
    /// and is refreshed on every subsequent receive.
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        reactor: &Reactor,
        socket: UdpSocket,
        payload_mtu: usize,
        wire_mtu: usize,
        encoder: SpEncoder,
        decoder: SpDecoder,
        flush_latency: Duration,
        num_reassembly_frames: usize,
        reassembly_tolerance: u32,
        max_chunks_per_frame: usize,
    ) -> badvpn_core::Result<Self> {
        Self::new(
            reactor,
            socket,
            Mode::BindAndLearn(None),
            payload_mtu,
            wire_mtu,
            encoder,
            decoder,
            flush_latency,
            num_reassembly_frames,
            reassembly_tolerance,
            max_chunks_per_frame,
        )
    }

    /// Installs the callback fired whenever SPProto reports a key-rotation
    /// (or OTP-near-exhaustion) warning on either the send or receive path.
    pub fn set_warning_handler(&self, handler: impl FnMut(SpWarning) + 'static) {
        self.inner.borrow_mut().warning_handler = Some(Box::new(handler));
    }

    /// The peer address currently in use, if any (always `Some` once
    /// connected; populated lazily for bind-and-learn).
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self.inner.borrow().mode {
            Mode::Connect(addr) => Some(addr),
            Mode::BindAndLearn(addr) => addr,
        }
    }
}

impl PacketPassSink for DatagramPeerIo {
    fn mtu(&self) -> usize {
        self.payload_mtu
    }

    /// Disassembles `data` into FragmentProto chunks, seals each completed
    /// carrier datagram with SPProto and writes it to the socket. UDP sends
    /// don't participate in the busy/done back-pressure contract the way a
    /// stream write does — a full kernel send buffer just drops the
    /// datagram, matching UDP's own unreliability — so this always
    /// completes synchronously.
    fn send(&mut self, data: &[u8]) -> bool {
        let mut inner = self.inner.borrow_mut();
        let mut chunks = Vec::new();
        inner.disassembler.push_frame(data, &mut chunks);
        for chunk in &chunks {
            encode_and_send(&mut inner, chunk);
        }
        drop(inner);
        arm_flush_timer_if_needed(&self.inner);
        true
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {
        // Never invoked: send() never returns false.
    }
}

impl PacketRecvSource for DatagramPeerIo {
    fn mtu(&self) -> usize {
        self.payload_mtu
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        let mut inner = self.inner.borrow_mut();
        match inner.recv_pending.pop_front() {
            Some(frame) => Some(frame),
            None => {
                inner.recv_waiting = true;
                None
            }
        }
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.inner.borrow_mut().recv_done = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badvpn_spproto::{Decoder as SpDecoder, Encoder as SpEncoder};
    use std::time::Duration as StdDuration;

    fn bound_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0".parse().unwrap()).expect("bind")
    }

    #[test]
    fn connect_mode_round_trips_a_small_frame() {
        let reactor = Reactor::new().expect("reactor");

        let a_sock = bound_socket();
        let a_addr = a_sock.local_addr().unwrap();
        let b_sock = bound_socket();
        let b_addr = b_sock.local_addr().unwrap();

        let key = [7u8; 32];
        let nonce = [0u8; 12];
        let mut a = DatagramPeerIo::connect(
            &reactor,
            a_sock,
            b_addr,
            1400,
            1400,
            SpEncoder::new_aead(key, nonce),
            SpDecoder::new_aead(key, nonce),
            StdDuration::from_millis(5),
            4,
            1000,
            16,
        )
        .expect("peer a");

        let mut b = DatagramPeerIo::connect(
            &reactor,
            b_sock,
            a_addr,
            1400,
            1400,
            SpEncoder::new_aead(key, nonce),
            SpDecoder::new_aead(key, nonce),
            StdDuration::from_millis(5),
            4,
            1000,
            16,
        )
        .expect("peer b");

        assert!(PacketPassSink::send(&mut a, b"hello peer"));

        let received = Rc::new(RefCell::new(None));
        let received_clone = received.clone();
        PacketRecvSource::set_done_handler(
            &mut b,
            Box::new(move |frame| *received_clone.borrow_mut() = Some(frame)),
        );
        assert_eq!(PacketRecvSource::recv(&mut b), None);

        let reactor_quit = reactor.clone();
        let timer = reactor.create_timer(StdDuration::from_millis(200), move || reactor_quit.quit(0));
        timer.schedule();
        reactor.run().expect("run");

        assert_eq!(*received.borrow(), Some(b"hello peer".to_vec()));
    }
}
