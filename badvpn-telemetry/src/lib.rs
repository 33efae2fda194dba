#![forbid(unsafe_code)]

//! Ambient logging setup and a handful of process-wide counters.
//!
//! The reactor core takes a log handle at construction and never consults
//! globals on its own, so this crate only has two jobs: wire up
//! `tracing-subscriber` once at process start, and give the pipeline and
//! peer-io layers somewhere cheap to bump a counter when a frame is
//! dropped, a fragment slot is evicted, or a keepalive fires.

use std::sync::atomic::{AtomicU64, Ordering};

/// Installs a `tracing-subscriber` formatter honoring `RUST_LOG`.
///
/// Call once from a binary's `main`. Safe to call more than once in tests;
/// later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Process-wide counters for the handful of events worth tallying outside
/// of the log stream: dropped frames, evicted reassembly slots, and
/// keepalives sent or received. Each field is independent; callers pick
/// whichever fits the event they just logged.
#[derive(Debug, Default)]
pub struct Counters {
    pub frames_dropped: AtomicU64,
    pub slots_evicted: AtomicU64,
    pub keepalives_sent: AtomicU64,
    pub keepalives_received: AtomicU64,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            frames_dropped: AtomicU64::new(0),
            slots_evicted: AtomicU64::new(0),
            keepalives_sent: AtomicU64::new(0),
            keepalives_received: AtomicU64::new(0),
        }
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn slot_evicted(&self) {
        self.slots_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_received(&self) {
        self.keepalives_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            slots_evicted: self.slots_evicted.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            keepalives_received: self.keepalives_received.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time read of [`Counters`], for logging or a status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    pub frames_dropped: u64,
    pub slots_evicted: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
}

/// The process-wide instance. Crates that want a shared counter set import
/// this directly rather than threading one through every constructor.
pub static COUNTERS: Counters = Counters::new();
