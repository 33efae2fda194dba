use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

use crate::capability::PacketPassSink;

struct Inner {
    output: Box<dyn PacketPassSink>,
    sending: bool,
    /// Lower numeric priority is serviced first; within a priority, FIFO.
    lanes: BTreeMap<u8, VecDeque<Vec<u8>>>,
}

/// Multiplexes many registered flows into one [`PacketPassSink`], always
/// preferring the lowest-numbered non-empty priority lane over higher
/// ones — a lower-priority lane only makes progress when every lane ahead
/// of it is empty.
///
/// Grounded on the original `PacketPassPriorityQueue`.
pub struct PacketPassPriorityQueue {
    inner: Rc<RefCell<Inner>>,
}

impl PacketPassPriorityQueue {
    pub fn new(output: Box<dyn PacketPassSink>) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            output,
            sending: false,
            lanes: BTreeMap::new(),
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

    pub fn add_flow(&self, priority: u8) -> PriorityFlow {
        self.inner
            .borrow_mut()
            .lanes
            .entry(priority)
            .or_insert_with(VecDeque::new);
        PriorityFlow {
            queue: Rc::downgrade(&self.inner),
            priority,
        }
    }
}

fn dispatch(inner: &Rc<RefCell<Inner>>) {
    loop {
        let (priority, packet) = {
            let mut i = inner.borrow_mut();
            if i.sending {
                return;
            }
            let mut found = None;
            for (&priority, lane) in i.lanes.iter_mut() {
                if let Some(p) = lane.pop_front() {
                    found = Some((priority, p));
                    break;
                }
            }
            match found {
                Some(found) => found,
                None => return,
            }
        };
        let accepted = inner.borrow_mut().output.send(&packet);
        if !accepted {
            let mut i = inner.borrow_mut();
            i.lanes.entry(priority).or_insert_with(VecDeque::new).push_front(packet);
            i.sending = true;
            return;
        }
    }
}

/// A flow's sink handle on a [`PacketPassPriorityQueue`], bound to one
/// priority lane at registration time.
pub struct PriorityFlow {
    queue: Weak<RefCell<Inner>>,
    priority: u8,
}

impl PacketPassSink for PriorityFlow {
    fn mtu(&self) -> usize {
        self.queue.upgrade().map(|q| q.borrow().output.mtu()).unwrap_or(0)
    }

    fn send(&mut self, data: &[u8]) -> bool {
        let Some(inner) = self.queue.upgrade() else {
            return true;
        };
        {
            let mut i = inner.borrow_mut();
            i.lanes.entry(self.priority).or_insert_with(VecDeque::new).push_back(data.to_vec());
        }
        dispatch(&inner);
        true
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {}
}
