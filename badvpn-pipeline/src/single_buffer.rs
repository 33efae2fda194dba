use std::cell::RefCell;
use std::rc::Rc;

use badvpn_core::{Job, Reactor};

use crate::capability::{PacketPassSink, PacketRecvSource};

struct Inner {
    input: Box<dyn PacketRecvSource>,
    output: Box<dyn PacketPassSink>,
    pending: Option<Vec<u8>>,
}

/// Buffers exactly one packet between a [`PacketRecvSource`] and a
/// [`PacketPassSink`], pumping it through whenever both sides are ready.
///
/// Grounded on the original `SinglePacketBuffer`: a terminal piece of
/// plumbing used to connect a source and a sink that would otherwise have
/// to coordinate busy/done handshakes themselves. The initial pump attempt
/// is deferred to a pending job rather than run synchronously inside
/// `new`, so a caller that hasn't finished wiring up surrounding state yet
/// never observes a callback before construction returns.
pub struct SinglePacketBuffer {
    inner: Rc<RefCell<Inner>>,
    #[allow(dead_code)]
    job: Rc<Job>,
}

impl SinglePacketBuffer {
    pub fn new(
        reactor: &Reactor,
        input: Box<dyn PacketRecvSource>,
        output: Box<dyn PacketPassSink>,
    ) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            input,
            output,
            pending: None,
        }));

        let group = reactor.pending_group();
        let weak_for_pump = Rc::downgrade(&inner);
        let job = Rc::new(group.add_job(move || {
            if let Some(strong) = weak_for_pump.upgrade() {
                pump(&strong);
            }
        }));

        {
            let mut st = inner.borrow_mut();
            let weak_inner = Rc::downgrade(&inner);
            let job_for_recv = job.clone();
            st.input.set_done_handler(Box::new(move |packet| {
                if let Some(strong) = weak_inner.upgrade() {
                    strong.borrow_mut().pending = Some(packet);
                    job_for_recv.set();
                }
            }));
            let job_for_send = job.clone();
            st.output.set_done_handler(Box::new(move || {
                job_for_send.set();
            }));
        }

        job.set();
        Self { inner, job }
    }

    /// True while a packet has been received and is waiting for the output
    /// side to accept it.
    pub fn has_pending_packet(&self) -> bool {
        self.inner.borrow().pending.is_some()
    }
}

fn pump(inner: &Rc<RefCell<Inner>>) {
    loop {
        let packet = {
            let mut st = inner.borrow_mut();
            if st.pending.is_some() {
                st.pending.take()
            } else {
                match st.input.recv() {
                    Some(p) => Some(p),
                    None => return,
                }
            }
        };
        let Some(packet) = packet else { return };
        let accepted = inner.borrow_mut().output.send(&packet);
        if !accepted {
            inner.borrow_mut().pending = Some(packet);
            return;
        }
    }
}
