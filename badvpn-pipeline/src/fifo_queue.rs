use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::capability::PacketPassSink;

struct Inner {
    output: Box<dyn PacketPassSink>,
    sending: bool,
    queue: VecDeque<Vec<u8>>,
}

/// Multiplexes many registered flows into one [`PacketPassSink`] in strict
/// arrival order across all flows combined — unlike
/// [`crate::fair_queue::PacketPassFairQueue`], there is no per-flow
/// fairness, just a single shared FIFO.
///
/// Grounded on the original `PacketPassFifoQueue`.
pub struct PacketPassFifoQueue {
    inner: Rc<RefCell<Inner>>,
}

impl PacketPassFifoQueue {
    pub fn new(output: Box<dyn PacketPassSink>) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            output,
            sending: false,
            queue: VecDeque::new(),
        }));
        let weak = Rc::downgrade(&inner);
        inner.borrow_mut().output.set_done_handler(Box::new(move || {
            if let Some(strong) = weak.upgrade() {
                strong.borrow_mut().sending = false;
                dispatch(&strong);
            }
        }));
        Self { inner }
    }

    pub fn add_flow(&self) -> FifoFlow {
        FifoFlow {
            queue: Rc::downgrade(&self.inner),
        }
    }
}

fn dispatch(inner: &Rc<RefCell<Inner>>) {
    loop {
        let packet = {
            let mut i = inner.borrow_mut();
            if i.sending {
                return;
            }
            match i.queue.pop_front() {
                Some(p) => p,
                None => return,
            }
        };
        let accepted = inner.borrow_mut().output.send(&packet);
        if !accepted {
            let mut i = inner.borrow_mut();
            i.queue.push_front(packet);
            i.sending = true;
            return;
        }
    }
}

/// A flow's sink handle on a [`PacketPassFifoQueue`]; all flows share one
/// underlying buffer.
pub struct FifoFlow {
    queue: Weak<RefCell<Inner>>,
}

impl PacketPassSink for FifoFlow {
    fn mtu(&self) -> usize {
        self.queue.upgrade().map(|q| q.borrow().output.mtu()).unwrap_or(0)
    }

    fn send(&mut self, data: &[u8]) -> bool {
        let Some(inner) = self.queue.upgrade() else {
            return true;
        };
        inner.borrow_mut().queue.push_back(data.to_vec());
        dispatch(&inner);
        true
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {}
}
