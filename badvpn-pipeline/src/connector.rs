use std::cell::RefCell;
use std::rc::Rc;

use crate::capability::{PacketPassSink, PacketRecvSource};

struct PassInner {
    target: Option<Box<dyn PacketPassSink>>,
    done_handler: Option<Box<dyn FnMut()>>,
}

/// A [`PacketPassSink`] whose underlying target can be swapped at runtime.
///
/// Grounded on the original `PacketPassConnector`. `DatagramPeerIO` sits
/// one of these in front of its send path so a peer's socket can be torn
/// down and replaced (address changes, reconnects) without the rest of the
/// pipeline feeding it needing to be rebuilt. `send` must only be called
/// while connected, matching the original's contract.
pub struct PacketPassConnector {
    inner: Rc<RefCell<PassInner>>,
}

impl PacketPassConnector {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(PassInner {
                target: None,
                done_handler: None,
            })),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().target.is_some()
    }

    pub fn connect(&self, mut target: Box<dyn PacketPassSink>) {
        let weak = Rc::downgrade(&self.inner);
        target.set_done_handler(Box::new(move || {
            if let Some(strong) = weak.upgrade() {
                let handler = strong.borrow_mut().done_handler.take();
                if let Some(mut h) = handler {
                    h();
                    strong.borrow_mut().done_handler = Some(h);
                }
            }
        }));
        self.inner.borrow_mut().target = Some(target);
    }

    pub fn disconnect(&self) {
        self.inner.borrow_mut().target = None;
    }
}

impl Default for PacketPassConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketPassSink for PacketPassConnector {
    fn mtu(&self) -> usize {
        self.inner.borrow().target.as_ref().map(|t| t.mtu()).unwrap_or(0)
    }

    fn send(&mut self, data: &[u8]) -> bool {
        let mut i = self.inner.borrow_mut();
        debug_assert!(i.target.is_some(), "PacketPassConnector::send called while disconnected");
        match i.target.as_mut() {
            Some(t) => t.send(data),
            None => false,
        }
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
        self.inner.borrow_mut().done_handler = Some(handler);
    }
}

struct RecvInner {
    source: Option<Box<dyn PacketRecvSource>>,
    done_handler: Option<Box<dyn FnMut(Vec<u8>)>>,
}

/// A [`PacketRecvSource`] whose underlying source can be swapped at
/// runtime. Grounded on the original `PacketRecvConnector`.
pub struct PacketRecvConnector {
    inner: Rc<RefCell<RecvInner>>,
}

impl PacketRecvConnector {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(RecvInner {
                source: None,
                done_handler: None,
            })),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().source.is_some()
    }

    pub fn connect(&self, mut source: Box<dyn PacketRecvSource>) {
        let weak = Rc::downgrade(&self.inner);
        source.set_done_handler(Box::new(move |packet| {
            if let Some(strong) = weak.upgrade() {
                let handler = strong.borrow_mut().done_handler.take();
                if let Some(mut h) = handler {
                    h(packet);
                    strong.borrow_mut().done_handler = Some(h);
                }
            }
        }));
        self.inner.borrow_mut().source = Some(source);
    }

    pub fn disconnect(&self) {
        self.inner.borrow_mut().source = None;
    }
}

impl Default for PacketRecvConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRecvSource for PacketRecvConnector {
    fn mtu(&self) -> usize {
        self.inner.borrow().source.as_ref().map(|s| s.mtu()).unwrap_or(0)
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        let mut i = self.inner.borrow_mut();
        debug_assert!(i.source.is_some(), "PacketRecvConnector::recv called while disconnected");
        i.source.as_mut().and_then(|s| s.recv())
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.inner.borrow_mut().done_handler = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingSink;

    #[test]
    fn retargets_without_losing_the_done_handler_hookup() {
        let mut connector = PacketPassConnector::new();
        assert!(!connector.is_connected());

        let sink_a = RecordingSink::new();
        let received_a = sink_a.received();
        connector.connect(Box::new(sink_a));
        assert!(connector.send(&[1]));
        assert_eq!(*received_a.borrow(), vec![vec![1u8]]);

        connector.disconnect();
        assert!(!connector.is_connected());

        let sink_b = RecordingSink::new();
        let received_b = sink_b.received();
        connector.connect(Box::new(sink_b));
        assert!(connector.send(&[2]));
        assert_eq!(*received_b.borrow(), vec![vec![2u8]]);
    }
}
