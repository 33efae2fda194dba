use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use badvpn_core::{Job, PeerId, Reactor, Timer};
use badvpn_pipeline::capability::{PacketPassSink, PacketRecvSource};
use badvpn_pipeline::fair_queue::{FairFlow, PacketPassFairQueue};
use badvpn_pipeline::inactivity_monitor::PacketPassInactivityMonitor;
use badvpn_pipeline::notifier::PacketPassNotifier;
use badvpn_pipeline::recv_blocker::PacketRecvBlocker;
use badvpn_pipeline::single_buffer::SinglePacketBuffer;

use crate::header::{self, Header};

/// A `PacketRecvSource` that always has exactly one packet ready: a
/// zero-payload, zero-flags DataProto keepalive (`dest_id = None`). Pairs
/// with [`PacketRecvBlocker`] so a keepalive is only actually produced when
/// the blocker is told to let one through.
struct KeepaliveSource {
    from_id: PeerId,
}

impl PacketRecvSource for KeepaliveSource {
    fn mtu(&self) -> usize {
        Header { flags: 0, from_id: self.from_id, dest_id: None }.wire_len()
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        header::encode(Header { flags: 0, from_id: self.from_id, dest_id: None }, &[], &mut out);
        Some(out)
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut(Vec<u8>)>) {
        // Never suspends: recv() above always returns Some immediately.
    }
}

type ForwardRef = Rc<RefCell<Option<Weak<RefCell<Inner>>>>>;

struct Inner {
    from_id: PeerId,
    tolerance_interval: Duration,
    up: bool,
    freeing: bool,
    up_changed: Option<Box<dyn FnMut(bool)>>,

    // Declared in reverse construction order so the default field-drop
    // order tears the pipeline down the same way `free()` would: receive
    // timer first, then the keepalive plumbing, then the fair queue (which
    // itself owns the inactivity monitor, notifier and peer sink).
    receive_timer: Timer,
    single_packet_buffer: SinglePacketBuffer,
    blocker: PacketRecvBlocker,
    fair_queue: PacketPassFairQueue,
    keepalive_job: Rc<Job>,
}

fn fire_up_changed(inner: &Rc<RefCell<Inner>>, up: bool) {
    let mut guard = inner.borrow_mut();
    if guard.up == up {
        return;
    }
    guard.up = up;
    if let Some(h) = guard.up_changed.as_mut() {
        h(up);
    }
}

fn upgrade(forward: &ForwardRef) -> Option<Rc<RefCell<Inner>>> {
    forward.borrow().as_ref().and_then(Weak::upgrade)
}

/// Per-peer transmit endpoint: multiplexes attached local sources onto the
/// peer sink, drives outgoing keepalives, and tracks inbound liveness.
///
/// Grounded on the original `DataProtoDest`. Construction wires, in order,
/// a flags-patching notifier, an inactivity monitor, a fair queue, the
/// keepalive job, a recv blocker around the keepalive source, a
/// single-packet buffer connecting the blocker to the fair queue's
/// keepalive flow, and the receive timer — torn down in the reverse of
/// that order when dropped.
#[derive(Clone)]
pub struct DataProtoDest {
    inner: Rc<RefCell<Inner>>,
}

impl DataProtoDest {
    pub fn new(
        reactor: &Reactor,
        output: Box<dyn PacketPassSink>,
        from_id: PeerId,
        keepalive_interval: Duration,
        tolerance_interval: Duration,
    ) -> Self {
        let forward: ForwardRef = Rc::new(RefCell::new(None));

        let mut notifier = PacketPassNotifier::new(output);
        {
            let forward = forward.clone();
            notifier.set_handler(move |buf| {
                if let Some(strong) = upgrade(&forward) {
                    let receiving = strong.borrow().receive_timer.is_active();
                    header::set_receiving_keepalives(buf, receiving);
                }
            });
        }

        let monitor = {
            let forward = forward.clone();
            PacketPassInactivityMonitor::new(reactor, Box::new(notifier), keepalive_interval, move || {
                if let Some(strong) = upgrade(&forward) {
                    strong.borrow().keepalive_job.set();
                }
            })
        };

        let fair_queue = PacketPassFairQueue::new(Box::new(monitor));
        let keepalive_flow = fair_queue.add_flow();

        let keepalive_job = {
            let forward = forward.clone();
            Rc::new(reactor.pending_group().add_job(move || {
                if let Some(strong) = upgrade(&forward) {
                    strong.borrow().blocker.allow_once();
                }
            }))
        };

        let blocker = PacketRecvBlocker::new(reactor, Box::new(KeepaliveSource { from_id }));
        let single_packet_buffer =
            SinglePacketBuffer::new(reactor, Box::new(blocker.clone()), Box::new(keepalive_flow));

        let receive_timer = {
            let forward = forward.clone();
            reactor.create_timer(tolerance_interval, move || {
                if let Some(strong) = upgrade(&forward) {
                    fire_up_changed(&strong, false);
                }
            })
        };

        let inner = Rc::new(RefCell::new(Inner {
            from_id,
            tolerance_interval,
            up: false,
            freeing: false,
            up_changed: None,
            receive_timer,
            single_packet_buffer,
            blocker,
            fair_queue,
            keepalive_job,
        }));
        *forward.borrow_mut() = Some(Rc::downgrade(&inner));

        Self { inner }
    }

    /// Registers a new local-source flow feeding this destination's fair
    /// queue. Returns `None` once [`Self::prepare_free`] has been called.
    pub fn new_flow(&self) -> Option<FairFlow> {
        let inner = self.inner.borrow();
        if inner.freeing {
            return None;
        }
        Some(inner.fair_queue.add_flow())
    }

    pub fn from_id(&self) -> PeerId {
        self.inner.borrow().from_id
    }

    pub fn is_up(&self) -> bool {
        self.inner.borrow().up
    }

    pub fn set_up_changed_handler(&self, handler: impl FnMut(bool) + 'static) {
        self.inner.borrow_mut().up_changed = Some(Box::new(handler));
    }

    /// Called once per validated incoming datagram from this peer.
    pub fn received(&self, peer_receiving: bool) {
        {
            let inner = self.inner.borrow();
            inner.receive_timer.schedule_after(inner.tolerance_interval);
        }
        if peer_receiving {
            fire_up_changed(&self.inner, true);
        } else {
            // Routing both the monitor's idle-fire and this path through
            // the same job means two near-simultaneous triggers coalesce
            // into a single outgoing keepalive instead of two.
            self.inner.borrow().keepalive_job.set();
            fire_up_changed(&self.inner, false);
        }
    }

    /// Marks this destination as tearing down: further [`Self::new_flow`]
    /// calls are refused, and existing flows are dropped without waiting
    /// for the underlying sink's `done`.
    pub fn prepare_free(&self) {
        self.inner.borrow_mut().freeing = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct RecordingSink {
        received: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { received: Rc::new(RefCell::new(Vec::new())) }
        }

        fn received(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
            self.received.clone()
        }
    }

    impl PacketPassSink for RecordingSink {
        fn mtu(&self) -> usize {
            65536
        }

        fn send(&mut self, data: &[u8]) -> bool {
            self.received.borrow_mut().push(data.to_vec());
            true
        }

        fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {}
    }

    #[test]
    fn received_true_then_false_toggles_up_and_fires_exactly_once_each() {
        let reactor = Reactor::new().expect("reactor");
        let sink = RecordingSink::new();
        let dest = DataProtoDest::new(
            &reactor,
            Box::new(sink),
            PeerId::new(1),
            Duration::from_secs(30),
            Duration::from_secs(30),
        );

        let transitions = Rc::new(RefCell::new(Vec::new()));
        let transitions_clone = transitions.clone();
        dest.set_up_changed_handler(move |up| transitions_clone.borrow_mut().push(up));

        assert!(!dest.is_up());
        dest.received(true);
        assert!(dest.is_up());
        dest.received(true);
        dest.received(false);
        assert!(!dest.is_up());

        assert_eq!(*transitions.borrow(), vec![true, false]);
    }

    #[test]
    fn receive_timeout_without_traffic_forces_down() {
        let reactor = Reactor::new().expect("reactor");
        let sink = RecordingSink::new();
        let dest = DataProtoDest::new(
            &reactor,
            Box::new(sink),
            PeerId::new(1),
            Duration::from_secs(30),
            Duration::from_millis(10),
        );
        dest.received(true);
        assert!(dest.is_up());

        let went_down = Rc::new(Cell::new(false));
        let went_down_clone = went_down.clone();
        dest.set_up_changed_handler(move |up| {
            if !up {
                went_down_clone.set(true);
            }
        });

        let reactor_quit = reactor.clone();
        let timer = reactor.create_timer(Duration::from_millis(50), move || reactor_quit.quit(0));
        timer.schedule();
        reactor.run().expect("run");

        assert!(went_down.get());
        assert!(!dest.is_up());
    }

    #[test]
    fn silence_past_keepalive_interval_emits_exactly_one_keepalive() {
        let reactor = Reactor::new().expect("reactor");
        let sink = RecordingSink::new();
        let received = sink.received();
        let dest = DataProtoDest::new(
            &reactor,
            Box::new(sink),
            PeerId::new(7),
            Duration::from_millis(10),
            Duration::from_secs(30),
        );
        let _ = &dest;

        let reactor_quit = reactor.clone();
        let timer = reactor.create_timer(Duration::from_millis(60), move || reactor_quit.quit(0));
        timer.schedule();
        reactor.run().expect("run");

        let packets = received.borrow();
        assert!(!packets.is_empty());
        let (header, payload) = header::decode(&packets[0]).expect("decode keepalive");
        assert_eq!(header.dest_id, None);
        assert!(payload.is_empty());
    }

    #[test]
    fn new_flow_refused_once_preparing_to_free() {
        let reactor = Reactor::new().expect("reactor");
        let sink = RecordingSink::new();
        let dest = DataProtoDest::new(
            &reactor,
            Box::new(sink),
            PeerId::new(1),
            Duration::from_secs(30),
            Duration::from_secs(30),
        );
        assert!(dest.new_flow().is_some());
        dest.prepare_free();
        assert!(dest.new_flow().is_none());
    }
}
