#![forbid(unsafe_code)]

//! Shared runtime for the BadVPN flow pipeline: the cooperative reactor,
//! pending-job scheduling, timers, wire-level identifier types, and the
//! configuration/error plumbing every other crate in the workspace builds
//! on.

mod config;
mod error;
mod job;
mod reactor;
mod timer;
mod types;

pub use config::{watch_file, ClientConfig, ConfigEvent, CryptoMode, KeepaliveConfig, PeerConfig, PeerTransport};
pub use error::{Error, Result};
pub use job::{Job, PendingGroup};
pub use reactor::{IoInterest, IoToken, Reactor, ReadySet};
pub use timer::Timer;
pub use types::{FrameId, PeerId, StreamId};
