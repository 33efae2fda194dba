use std::cell::RefCell;
use std::rc::Rc;

use crate::capability::{PacketPassSink, PacketRecvSource};

/// Splits a type that is both a [`PacketPassSink`] and a [`PacketRecvSource`]
/// (a duplex transport such as a peer-io object) into two independently
/// owned halves sharing the same underlying value. Needed whenever a duplex
/// object has to be handed to two different owners at once — e.g. a peer
/// transport's send half goes into a `DataProtoDest`'s output while its recv
/// half is pumped by a separate inbound-routing loop.
pub fn split<T: PacketPassSink + PacketRecvSource>(value: T) -> (PassHalf<T>, RecvHalf<T>) {
    let inner = Rc::new(RefCell::new(value));
    (PassHalf { inner: inner.clone() }, RecvHalf { inner })
}

/// The send half of a [`split`] duplex transport. Cheap to clone — every
/// clone shares the same underlying value, the same way the two halves
/// produced by [`split`] already do.
pub struct PassHalf<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> Clone for PassHalf<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// The receive half of a [`split`] duplex transport.
pub struct RecvHalf<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> Clone for RecvHalf<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: PacketPassSink> PacketPassSink for PassHalf<T> {
    fn mtu(&self) -> usize {
        self.inner.borrow().mtu()
    }

    fn send(&mut self, data: &[u8]) -> bool {
        self.inner.borrow_mut().send(data)
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
        self.inner.borrow_mut().set_done_handler(handler);
    }
}

impl<T: PacketRecvSource> PacketRecvSource for RecvHalf<T> {
    fn mtu(&self) -> usize {
        self.inner.borrow().mtu()
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.inner.borrow_mut().recv()
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.inner.borrow_mut().set_done_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingSink, ScriptedSource};

    #[test]
    fn both_halves_observe_the_same_underlying_state() {
        struct Duplex {
            sink: RecordingSink,
            source: ScriptedSource,
        }
        impl PacketPassSink for Duplex {
            fn mtu(&self) -> usize {
                self.sink.mtu()
            }
            fn send(&mut self, data: &[u8]) -> bool {
                self.sink.send(data)
            }
            fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
                self.sink.set_done_handler(handler);
            }
        }
        impl PacketRecvSource for Duplex {
            fn mtu(&self) -> usize {
                self.source.mtu()
            }
            fn recv(&mut self) -> Option<Vec<u8>> {
                self.source.recv()
            }
            fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
                self.source.set_done_handler(handler);
            }
        }

        let duplex = Duplex {
            sink: RecordingSink::new(),
            source: ScriptedSource::new(vec![b"hi".to_vec()]),
        };
        let (mut pass, mut recv) = split(duplex);
        assert!(pass.send(b"out"));
        assert_eq!(recv.recv(), Some(b"hi".to_vec()));
    }
}
