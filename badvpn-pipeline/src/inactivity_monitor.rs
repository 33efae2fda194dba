use std::time::Duration;

use badvpn_core::{Reactor, Timer};

use crate::capability::PacketPassSink;

/// Wraps a [`PacketPassSink`] and fires a handler whenever no packet has
/// been offered to it for longer than `interval`.
///
/// Grounded on the original `PacketPassInactivityMonitor`. `DataProtoDest`
/// sits one of these in front of its outgoing fair queue so sustained
/// silence on a peer's send path schedules a keepalive.
pub struct PacketPassInactivityMonitor {
    inner: Box<dyn PacketPassSink>,
    timer: Timer,
}

impl PacketPassInactivityMonitor {
    pub fn new(
        reactor: &Reactor,
        inner: Box<dyn PacketPassSink>,
        interval: Duration,
        on_idle: impl FnMut() + 'static,
    ) -> Self {
        let timer = reactor.create_timer(interval, on_idle);
        timer.schedule();
        Self { inner, timer }
    }
}

impl PacketPassSink for PacketPassInactivityMonitor {
    fn mtu(&self) -> usize {
        self.inner.mtu()
    }

    fn send(&mut self, data: &[u8]) -> bool {
        self.timer.schedule();
        self.inner.send(data)
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
        self.inner.set_done_handler(handler);
    }
}
