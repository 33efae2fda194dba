/// A back-pressured packet sink: `PacketPassInterface` in the original.
///
/// There is no async/await here by design (the runtime this crate sits on
/// is a single-threaded cooperative reactor, not a futures executor): a
/// busy sink signals that by returning `false` from [`send`](Self::send)
/// and later calling the handler installed by
/// [`set_done_handler`](Self::set_done_handler) exactly once, from within
/// the reactor, when it can accept the next packet. The caller keeps
/// ownership of the rejected data and is expected to offer the identical
/// packet again once the done handler fires.
pub trait PacketPassSink {
    /// Largest packet this sink will accept.
    fn mtu(&self) -> usize;

    /// Offers `data` to the sink. `data.len()` must not exceed `mtu()`.
    ///
    /// Returns `true` if accepted immediately — the caller may call `send`
    /// again right away. Returns `false` if the sink is busy; the caller
    /// must not call `send` again until the done handler fires.
    fn send(&mut self, data: &[u8]) -> bool;

    /// Installs the callback fired when a busy sink becomes ready again.
    /// Implementations call this at most once per busy `send`, and never
    /// synchronously from within `send` itself.
    fn set_done_handler(&mut self, handler: Box<dyn FnMut()>);
}

/// A back-pressured packet source: `PacketRecvInterface` in the original.
///
/// The original interface fills a caller-supplied buffer, including on the
/// asynchronous path where the buffer pointer is retained until the done
/// callback fires. That shape doesn't translate to a safe Rust borrow (the
/// buffer reference can't outlive the `recv` call that supplied it), so
/// this crate's sources hand back owned buffers instead — the same
/// by-value-packet style the rest of the workspace already uses.
pub trait PacketRecvSource {
    /// Largest packet this source may deliver.
    fn mtu(&self) -> usize;

    /// Requests the next packet. Returns `Some(packet)` if one was
    /// available immediately. Returns `None` if none is available yet;
    /// the done handler installed via
    /// [`set_done_handler`](Self::set_done_handler) fires exactly once,
    /// with the packet, when one arrives.
    fn recv(&mut self) -> Option<Vec<u8>>;

    /// Installs the callback fired when a packet becomes available after
    /// a `recv` returned `None`.
    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>);
}

/// A back-pressured byte-stream sink: `StreamPassInterface` in the
/// original. Unlike [`PacketPassSink`], a partial write is itself a normal,
/// synchronous outcome (no busy/done handshake) — only a zero-acceptance
/// write is asynchronous.
pub trait StreamPassSink {
    /// Offers `data`. Returns the number of bytes accepted (which may be
    /// less than `data.len()`, or zero if the sink is momentarily full —
    /// in the zero case the done handler fires once more room is free).
    fn send(&mut self, data: &[u8]) -> usize;

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(usize)>);
}

/// A back-pressured byte-stream source: `StreamRecvInterface` in the
/// original.
pub trait StreamRecvSource {
    /// Requests up to `max_len` bytes. Returns the bytes read (possibly
    /// empty if none are available yet; the done handler then fires once
    /// data arrives).
    fn recv(&mut self, max_len: usize) -> Vec<u8>;

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>);
}
