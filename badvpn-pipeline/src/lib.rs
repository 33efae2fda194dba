#![forbid(unsafe_code)]

//! Back-pressured packet/stream interfaces and the composition helpers
//! built on them: buffering, fan-in queues (FIFO, fair, priority),
//! notification hooks and runtime-reconnectable endpoints. Every helper
//! here is driven entirely by the [`badvpn_core::Reactor`] it's built on
//! — nothing in this crate spawns a thread or awaits a future.

pub mod capability;
pub mod connector;
pub mod errors;
pub mod fair_queue;
pub mod fifo_queue;
pub mod inactivity_monitor;
pub mod notifier;
pub mod priority_queue;
pub mod recv_blocker;
pub mod single_buffer;
pub mod split;

#[cfg(test)]
mod test_helpers;

pub use capability::{PacketPassSink, PacketRecvSource, StreamPassSink, StreamRecvSource};
pub use connector::{PacketPassConnector, PacketRecvConnector};
pub use errors::{Error, Result};
pub use fair_queue::{FairFlow, PacketPassFairQueue};
pub use fifo_queue::{FifoFlow, PacketPassFifoQueue};
pub use inactivity_monitor::PacketPassInactivityMonitor;
pub use notifier::PacketPassNotifier;
pub use priority_queue::{PacketPassPriorityQueue, PriorityFlow};
pub use recv_blocker::PacketRecvBlocker;
pub use single_buffer::SinglePacketBuffer;
pub use split::{split, PassHalf, RecvHalf};
