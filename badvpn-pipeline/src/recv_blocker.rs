use std::cell::RefCell;
use std::rc::Rc;

use badvpn_core::{Job, Reactor};

use crate::capability::PacketRecvSource;

struct Inner {
    upstream: Box<dyn PacketRecvSource>,
    handler: Option<Box<dyn FnMut(Vec<u8>)>>,
}

/// Gates an upstream [`PacketRecvSource`] so it only ever produces a packet
/// when explicitly told to via [`PacketRecvBlocker::allow_once`].
///
/// Grounded on the original `PacketRecvBlocker`, used by `DataProtoDest` to
/// turn its always-ready keepalive payload generator into something that
/// only emits when a keepalive is actually due, without the keepalive
/// source itself needing to know about that policy.
///
/// Cheaply `Clone`: every clone is a handle onto the same gated source, so
/// a caller can hand one clone to a composition helper that consumes a
/// `Box<dyn PacketRecvSource>` while keeping another to call
/// [`Self::allow_once`] directly.
#[derive(Clone)]
pub struct PacketRecvBlocker {
    inner: Rc<RefCell<Inner>>,
    job: Rc<Job>,
}

impl PacketRecvBlocker {
    pub fn new(reactor: &Reactor, upstream: Box<dyn PacketRecvSource>) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            upstream,
            handler: None,
        }));
        let weak = Rc::downgrade(&inner);
        let job = Rc::new(reactor.pending_group().add_job(move || {
            if let Some(strong) = weak.upgrade() {
                deliver(&strong);
            }
        }));
        Self { inner, job }
    }

    /// Lets exactly one packet through on the next job dispatch.
    pub fn allow_once(&self) {
        self.job.set();
    }
}

fn deliver(inner: &Rc<RefCell<Inner>>) {
    let packet = inner.borrow_mut().upstream.recv();
    let Some(packet) = packet else { return };
    let handler = inner.borrow_mut().handler.take();
    if let Some(mut h) = handler {
        h(packet);
        inner.borrow_mut().handler = Some(h);
    }
}

impl PacketRecvSource for PacketRecvBlocker {
    fn mtu(&self) -> usize {
        self.inner.borrow().upstream.mtu()
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.inner.borrow_mut().handler = Some(handler);
    }
}
