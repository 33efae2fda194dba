use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use badvpn_core::Reactor;
use badvpn_pipeline::capability::{PacketPassSink, PacketRecvSource};
use badvpn_pipeline::inactivity_monitor::PacketPassInactivityMonitor;
use tracing::warn;

use crate::udp_header::{self, MAX_OVERHEAD};

struct Inner {
    target: SocketAddr,
    out: PacketPassInactivityMonitor,
    out_done: Option<Box<dyn FnMut()>>,
    raw_in: Box<dyn PacketRecvSource>,
    in_pending: VecDeque<Vec<u8>>,
    in_waiting: bool,
    in_done: Option<Box<dyn FnMut(Vec<u8>)>>,
}

fn deliver_incoming(inner: &Rc<RefCell<Inner>>, raw: Vec<u8>) {
    let (from, payload) = match udp_header::decode(&raw) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "dropping malformed SOCKS UDP datagram");
            return;
        }
    };
    let mut guard = inner.borrow_mut();
    if from != guard.target {
        warn!(?from, expected = ?guard.target, "SOCKS UDP datagram source mismatch, accepting anyway");
    }
    let payload = payload.to_vec();
    if guard.in_waiting {
        guard.in_waiting = false;
        let handler = guard.in_done.take();
        drop(guard);
        if let Some(mut h) = handler {
            h(payload);
            inner.borrow_mut().in_done = Some(h);
        }
    } else {
        guard.in_pending.push_back(payload);
    }
}

/// One SOCKS5 UDP ASSOCIATE session: wraps an already-established raw UDP
/// datagram pair (the socket bound after the control-stream handshake
/// completed and returned `BND.ADDR`) and handles only the RFC 1928 §7
/// per-datagram header, presenting plain `PacketPassSink`/`PacketRecvSource`
/// ends so it composes into the same pipeline as [`crate::header`] does for
/// DataProto.
///
/// Grounded on `original_source/socks_udp_client/SocksUdpClient.c`'s
/// per-connection struct (`send_if`/`recv_if` wrapping one UDP socket plus
/// a `PacketPassInactivityMonitor` for idle teardown). The SOCKS5 *control*
/// handshake that produces the relay socket and `target` address is out of
/// scope here — it's a boundary contract (see `crate::handshake`) — and the
/// original's pool-of-connections-by-local-address is simplified to one
/// relay per session, since that's the granularity this crate's pipeline
/// contracts operate at.
pub struct SocksUdpRelay {
    inner: Rc<RefCell<Inner>>,
}

impl SocksUdpRelay {
    /// `target` is the remote address datagrams sent through this session
    /// are addressed to (`DST.ADDR`/`DST.PORT` in RFC 1928 terms). `raw_out`
    /// and `raw_in` are the relay UDP socket's send/receive ends, already
    /// pointed at the SOCKS server's `BND.ADDR`. `on_idle` fires once no
    /// datagram has been sent for `keepalive_interval`, mirroring the
    /// original's `send_monitor_handler` removing the connection.
    pub fn new(
        reactor: &Reactor,
        target: SocketAddr,
        raw_out: Box<dyn PacketPassSink>,
        raw_in: Box<dyn PacketRecvSource>,
        keepalive_interval: Duration,
        on_idle: impl FnMut() + 'static,
    ) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            target,
            out: PacketPassInactivityMonitor::new(reactor, raw_out, keepalive_interval, on_idle),
            out_done: None,
            raw_in,
            in_pending: VecDeque::new(),
            in_waiting: false,
            in_done: None,
        }));

        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&inner);
        inner.borrow_mut().out.set_done_handler(Box::new(move || {
            if let Some(strong) = weak.upgrade() {
                let handler = strong.borrow_mut().out_done.take();
                if let Some(mut h) = handler {
                    h();
                    strong.borrow_mut().out_done = Some(h);
                }
            }
        }));

        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&inner);
        inner.borrow_mut().raw_in.set_done_handler(Box::new(move |raw| {
            if let Some(strong) = weak.upgrade() {
                deliver_incoming(&strong, raw);
            }
        }));

        Self { inner }
    }

    pub fn target(&self) -> SocketAddr {
        self.inner.borrow().target
    }
}

impl PacketPassSink for SocksUdpRelay {
    fn mtu(&self) -> usize {
        self.inner.borrow().out.mtu().saturating_sub(MAX_OVERHEAD)
    }

    fn send(&mut self, data: &[u8]) -> bool {
        let mut inner = self.inner.borrow_mut();
        let mut buf = Vec::with_capacity(MAX_OVERHEAD + data.len());
        let target = inner.target;
        udp_header::encode(target, data, &mut buf);
        inner.out.send(&buf)
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
        self.inner.borrow_mut().out_done = Some(handler);
    }
}

impl PacketRecvSource for SocksUdpRelay {
    fn mtu(&self) -> usize {
        self.inner.borrow().raw_in.mtu().saturating_sub(MAX_OVERHEAD)
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        let mut inner = self.inner.borrow_mut();
        if let Some(packet) = inner.in_pending.pop_front() {
            return Some(packet);
        }
        let raw = inner.raw_in.recv();
        drop(inner);
        match raw {
            Some(raw) => {
                let inner_ref = &self.inner;
                let before = inner_ref.borrow().in_pending.len();
                deliver_incoming(inner_ref, raw);
                let mut inner = inner_ref.borrow_mut();
                if inner.in_pending.len() > before {
                    inner.in_pending.pop_front()
                } else {
                    None
                }
            }
            None => {
                self.inner.borrow_mut().in_waiting = true;
                None
            }
        }
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.inner.borrow_mut().in_done = Some(handler);
    }
}
