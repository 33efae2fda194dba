use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors raised by pipeline composition helpers. Most of this crate's
/// operations can't fail at runtime (back-pressure is signalled through
/// the capability traits themselves, not `Result`); this type exists for
/// the handful of construction-time invariants that can be violated by a
/// caller, such as mismatched MTUs between a source and a sink.
#[derive(Debug, Error)]
pub enum Error {
    #[error("source mtu {source_mtu} exceeds sink mtu {sink_mtu}")]
    MtuMismatch { source_mtu: usize, sink_mtu: usize },
}
