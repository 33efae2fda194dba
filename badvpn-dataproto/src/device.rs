use std::cell::RefCell;
use std::rc::{Rc, Weak};

use badvpn_core::PeerId;
use badvpn_pipeline::capability::{PacketPassSink, PacketRecvSource};
use badvpn_pipeline::connector::PacketPassConnector;
use tracing::{trace, warn};

use crate::dest::DataProtoDest;
use crate::header::{self, Header, MAX_OVERHEAD};

struct LocalInner {
    source_id: PeerId,
    dest_id: PeerId,
    frame_mtu: usize,
    connector: PacketPassConnector,
    dropped: u64,
}

/// A per-(source, dest) outgoing flow: writes the DataProto header into a
/// fresh prefix ahead of each routed frame and forwards it through a
/// [`PacketPassConnector`] onto whichever [`DataProtoDest`] it's currently
/// attached to.
///
/// Grounded on the original `DataProtoLocalSource`. The original reuses a
/// small ring of TAP-provided buffers pre-offset by `MAX_OVERHEAD` so the
/// header can be written in place; this crate's [`PacketRecvSource`]
/// contract already hands back owned `Vec<u8>` per packet (see
/// `badvpn-pipeline::capability`), so `route` instead allocates one fresh
/// buffer per frame. Same bytes on the wire, same back-pressure contract —
/// a copy in place of pointer reuse, matching how the rest of this
/// workspace treats buffers as owned values rather than pooled slices.
pub struct DataProtoLocalSource {
    inner: Rc<RefCell<LocalInner>>,
}

impl DataProtoLocalSource {
    pub fn new(source_id: PeerId, dest_id: PeerId, frame_mtu: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LocalInner {
                source_id,
                dest_id,
                frame_mtu,
                connector: PacketPassConnector::new(),
                dropped: 0,
            })),
        }
    }

    pub fn dest_id(&self) -> PeerId {
        self.inner.borrow().dest_id
    }

    pub fn is_attached(&self) -> bool {
        self.inner.borrow().connector.is_connected()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.borrow().dropped
    }

    /// Attaches to `dest`, which must share this source's own identity
    /// (`source_id`) — a dest's `from_id` is the identity it stamps on its
    /// own keepalives, so every source routed into it has to be sending as
    /// that same identity. Requires `frame_mtu <= dest.frame_mtu`, matching
    /// the original invariant.
    pub fn attach(&self, dest: &DataProtoDest, dest_frame_mtu: usize) -> bool {
        debug_assert_eq!(dest.from_id(), self.inner.borrow().source_id, "attaching dest for a different local identity");
        debug_assert!(
            self.inner.borrow().frame_mtu <= dest_frame_mtu,
            "local source frame_mtu exceeds destination frame_mtu"
        );
        let Some(flow) = dest.new_flow() else {
            return false;
        };
        self.inner.borrow_mut().connector.connect(Box::new(flow));
        true
    }

    pub fn detach(&self) {
        self.inner.borrow().connector.disconnect();
    }

    /// Writes the DataProto header (`num_peer_ids = 1`, flags left zero —
    /// patched later by the destination's notifier) ahead of `frame` and
    /// routes it to the attached destination. Returns `false` if nothing
    /// is attached; the drop is counted but does not otherwise propagate.
    pub fn route(&self, frame: &[u8]) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !inner.connector.is_connected() {
            inner.dropped += 1;
            trace!(dest = ?inner.dest_id, "dropping frame: local source not attached");
            return false;
        }
        let mut buf = Vec::with_capacity(MAX_OVERHEAD + frame.len());
        header::encode(
            Header { flags: 0, from_id: inner.source_id, dest_id: Some(inner.dest_id) },
            frame,
            &mut buf,
        );
        let accepted = inner.connector.send(&buf);
        if !accepted {
            inner.dropped += 1;
            warn!(dest = ?inner.dest_id, "dropping frame: destination queue refused it");
        }
        accepted
    }
}

struct DeviceInner {
    tap: Box<dyn PacketRecvSource>,
    router: Box<dyn FnMut(&[u8]) -> Option<PeerId>>,
    sources: std::collections::HashMap<PeerId, DataProtoLocalSource>,
    unrouted_dropped: u64,
}

/// Wraps the TAP `PacketRecvSource` and routes every received link-layer
/// frame to whichever attached [`DataProtoLocalSource`] the `router`
/// closure resolves it to, pulling as many frames as TAP has ready before
/// waiting again (the original's `route(more)` chaining).
///
/// Grounded on the original `DataProtoDevice`. The routing decision itself
/// (frame → destination peer id) is deployment-specific — a MAC/IP table
/// built from the running configuration — so it's taken as a parameter
/// rather than implemented here.
pub struct DataProtoDevice {
    inner: Rc<RefCell<DeviceInner>>,
}

fn pump(inner: &Rc<RefCell<DeviceInner>>) {
    loop {
        let frame = {
            let mut guard = inner.borrow_mut();
            match guard.tap.recv() {
                Some(frame) => frame,
                None => return,
            }
        };
        route_one(inner, &frame);
    }
}

fn route_one(inner: &Rc<RefCell<DeviceInner>>, frame: &[u8]) {
    let mut guard = inner.borrow_mut();
    let dest_id = (guard.router)(frame);
    match dest_id.and_then(|id| guard.sources.get(&id)) {
        Some(source) => {
            source.route(frame);
        }
        None => {
            guard.unrouted_dropped += 1;
            trace!("dropping frame: no route to any attached destination");
        }
    }
}

impl DataProtoDevice {
    pub fn new(
        tap: Box<dyn PacketRecvSource>,
        router: impl FnMut(&[u8]) -> Option<PeerId> + 'static,
    ) -> Self {
        let inner = Rc::new(RefCell::new(DeviceInner {
            tap,
            router: Box::new(router),
            sources: std::collections::HashMap::new(),
            unrouted_dropped: 0,
        }));

        let weak: Weak<RefCell<DeviceInner>> = Rc::downgrade(&inner);
        inner.borrow_mut().tap.set_done_handler(Box::new(move |frame| {
            if let Some(strong) = weak.upgrade() {
                route_one(&strong, &frame);
                pump(&strong);
            }
        }));

        pump(&inner);

        Self { inner }
    }

    pub fn add_source(&self, source: DataProtoLocalSource) {
        let dest_id = source.dest_id();
        self.inner.borrow_mut().sources.insert(dest_id, source);
    }

    pub fn remove_source(&self, dest_id: PeerId) -> Option<DataProtoLocalSource> {
        self.inner.borrow_mut().sources.remove(&dest_id)
    }

    pub fn unrouted_dropped(&self) -> u64 {
        self.inner.borrow().unrouted_dropped
    }
}
