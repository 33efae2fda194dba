#![forbid(unsafe_code)]

//! DataProto: the dataplane frame format carried inside SPProto/FragmentProto,
//! and the per-peer objects that drive it.
//!
//! * [`header`] — the wire header (`flags`, `from_id`, `num_peer_ids`, an
//!   optional `dest_id`) and its codec.
//! * [`dest::DataProtoDest`] — one peer's transmit endpoint: multiplexes
//!   attached local sources, patches the receiving-keepalives flag, drives
//!   outgoing keepalives on silence, and tracks inbound liveness.
//! * [`device::DataProtoDevice`] / [`device::DataProtoLocalSource`] — pumps
//!   frames off a TAP-like source and routes each to whichever attached
//!   destination the caller's routing closure resolves.

pub mod dest;
pub mod device;
pub mod header;

pub use dest::DataProtoDest;
pub use device::{DataProtoDevice, DataProtoLocalSource};
pub use header::{DecodeError, Header, MAX_OVERHEAD, RECEIVING_KEEPALIVES};
