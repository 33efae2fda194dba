use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::capability::{PacketPassSink, PacketRecvSource};

/// A [`PacketRecvSource`] that hands back a pre-scripted list of packets,
/// one per `recv` call, and never goes through the async done-handler
/// path.
pub(crate) struct ScriptedSource {
    queue: VecDeque<Vec<u8>>,
    handler: Option<Box<dyn FnMut(Vec<u8>)>>,
}

impl ScriptedSource {
    pub(crate) fn new(packets: Vec<Vec<u8>>) -> Self {
        Self {
            queue: packets.into(),
            handler: None,
        }
    }
}

impl PacketRecvSource for ScriptedSource {
    fn mtu(&self) -> usize {
        65536
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.handler = Some(handler);
    }
}

/// A [`PacketPassSink`] that records everything it accepts. Can be toggled
/// busy so tests can exercise the backpressure path; `release` then
/// simulates the sink becoming ready again.
pub(crate) struct RecordingSink {
    received: Rc<RefCell<Vec<Vec<u8>>>>,
    busy: Rc<Cell<bool>>,
    handler: Rc<RefCell<Option<Box<dyn FnMut()>>>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            received: Rc::new(RefCell::new(Vec::new())),
            busy: Rc::new(Cell::new(false)),
            handler: Rc::new(RefCell::new(None)),
        }
    }

    pub(crate) fn received(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
        self.received.clone()
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.set(busy);
    }

    pub(crate) fn release(&self) {
        self.busy.set(false);
        if let Some(mut h) = self.handler.borrow_mut().take() {
            h();
        }
    }
}

impl PacketPassSink for RecordingSink {
    fn mtu(&self) -> usize {
        65536
    }

    fn send(&mut self, data: &[u8]) -> bool {
        if self.busy.get() {
            return false;
        }
        self.received.borrow_mut().push(data.to_vec());
        true
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
        *self.handler.borrow_mut() = Some(handler);
    }
}
