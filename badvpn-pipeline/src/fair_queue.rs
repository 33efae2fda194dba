use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use crate::capability::PacketPassSink;

struct FlowState {
    queue: VecDeque<Vec<u8>>,
}

struct Inner {
    output: Box<dyn PacketPassSink>,
    sending: bool,
    /// The packet most recently taken off a flow's queue but rejected by
    /// `output.send`. Kept here rather than dropped so the retry offers the
    /// sink the identical packet, per `PacketPassSink::send`'s contract.
    pending: Option<(u64, Vec<u8>)>,
    /// Flows with at least one queued packet, in the order they'll next be
    /// serviced. A flow is pushed to the back after it's given a turn, so
    /// no single flow can starve the others — the round-robin fairness the
    /// type is named for.
    order: VecDeque<u64>,
    flows: HashMap<u64, FlowState>,
    next_flow_id: u64,
}

/// Multiplexes many registered flows into one [`PacketPassSink`], servicing
/// them round-robin so a busy flow can't starve its peers.
///
/// Grounded on the original `PacketPassFairQueue`. `DataProtoDest` uses one
/// of these to interleave each local data source's outgoing packets with
/// the keepalive flow fairly, ahead of the per-peer inactivity monitor and
/// notifier.
pub struct PacketPassFairQueue {
    inner: Rc<RefCell<Inner>>,
}

impl PacketPassFairQueue {
    pub fn new(output: Box<dyn PacketPassSink>) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            output,
            sending: false,
            pending: None,
            order: VecDeque::new(),
            flows: HashMap::new(),
            next_flow_id: 0,
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

    /// Registers a new flow and returns a sink handle for it. Dropping the
    /// handle unregisters the flow and discards anything still queued for
    /// it.
    pub fn add_flow(&self) -> FairFlow {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_flow_id;
        inner.next_flow_id += 1;
        inner.flows.insert(
            id,
            FlowState {
                queue: VecDeque::new(),
            },
        );
        FairFlow {
            queue: Rc::downgrade(&self.inner),
            id,
        }
    }
}

fn dispatch(inner: &Rc<RefCell<Inner>>) {
    loop {
        let (flow_id, packet) = {
            let mut i = inner.borrow_mut();
            if i.sending {
                return;
            }
            if let Some(pending) = i.pending.take() {
                pending
            } else {
                let Some(flow_id) = i.order.front().copied() else { return };
                let Some(flow) = i.flows.get_mut(&flow_id) else {
                    i.order.pop_front();
                    continue;
                };
                let Some(packet) = flow.queue.pop_front() else {
                    i.order.pop_front();
                    continue;
                };
                if flow.queue.is_empty() {
                    i.order.pop_front();
                } else {
                    // Give other flows a turn before this one comes up again.
                    i.order.pop_front();
                    i.order.push_back(flow_id);
                }
                (flow_id, packet)
            }
        };
        let accepted = {
            let mut i = inner.borrow_mut();
            i.output.send(&packet)
        };
        if !accepted {
            let mut i = inner.borrow_mut();
            i.pending = Some((flow_id, packet));
            i.sending = true;
            return;
        }
    }
}

/// A single flow's sink handle on a [`PacketPassFairQueue`].
pub struct FairFlow {
    queue: Weak<RefCell<Inner>>,
    id: u64,
}

impl PacketPassSink for FairFlow {
    fn mtu(&self) -> usize {
        self.queue.upgrade().map(|q| q.borrow().output.mtu()).unwrap_or(0)
    }

    fn send(&mut self, data: &[u8]) -> bool {
        let Some(inner) = self.queue.upgrade() else {
            return true;
        };
        {
            let mut i = inner.borrow_mut();
            let was_empty = i
                .flows
                .get(&self.id)
                .map(|f| f.queue.is_empty())
                .unwrap_or(true);
            if let Some(flow) = i.flows.get_mut(&self.id) {
                flow.queue.push_back(data.to_vec());
                if was_empty {
                    i.order.push_back(self.id);
                }
            }
        }
        dispatch(&inner);
        true
    }

    fn set_done_handler(&mut self, _handler: Box<dyn FnMut()>) {
        // Flows never report busy: the queue buffers internally instead.
    }
}

impl Drop for FairFlow {
    fn drop(&mut self) {
        if let Some(inner) = self.queue.upgrade() {
            let mut i = inner.borrow_mut();
            i.flows.remove(&self.id);
            i.order.retain(|&id| id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingSink;

    #[test]
    fn services_flows_round_robin() {
        let sink = RecordingSink::new();
        let received = sink.received();
        sink.set_busy(true);
        let sink_handle = SinkHandle(Rc::new(RefCell::new(sink)));
        let queue = PacketPassFairQueue::new(Box::new(sink_handle.clone()));
        let mut a = queue.add_flow();
        let mut b = queue.add_flow();

        // Both flows build up a backlog while the sink is busy.
        a.send(&[1]);
        a.send(&[2]);
        b.send(&[10]);

        // The done-handler callback resumes dispatch: the flow that
        // re-queued data first (`a`, with packet `2`) is serviced before
        // `b`, since it re-entered the fair-share order ahead of `b`.
        sink_handle.0.borrow().release();

        assert_eq!(*received.borrow(), vec![vec![1u8], vec![2u8], vec![10u8]]);
    }

    #[derive(Clone)]
    struct SinkHandle(Rc<RefCell<RecordingSink>>);

    impl PacketPassSink for SinkHandle {
        fn mtu(&self) -> usize {
            self.0.borrow().mtu()
        }
        fn send(&mut self, data: &[u8]) -> bool {
            self.0.borrow_mut().send(data)
        }
        fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
            self.0.borrow_mut().set_done_handler(handler);
        }
    }
}
