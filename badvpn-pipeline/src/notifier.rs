use crate::capability::PacketPassSink;

/// Wraps a [`PacketPassSink`] with a hook that can rewrite each packet
/// just before it reaches the wrapped sink.
///
/// Grounded on the original `PacketPassNotifier`. `DataProtoDest` uses one
/// of these to patch the `RECEIVING_KEEPALIVES` flag into every outgoing
/// DataProto header right before it's sent, without the fair queue feeding
/// it needing to know about that flag at all.
pub struct PacketPassNotifier {
    inner: Box<dyn PacketPassSink>,
    handler: Option<Box<dyn FnMut(&mut [u8])>>,
}

impl PacketPassNotifier {
    pub fn new(inner: Box<dyn PacketPassSink>) -> Self {
        Self {
            inner,
            handler: None,
        }
    }

    /// Installs the rewrite hook, replacing any previous one.
    pub fn set_handler(&mut self, handler: impl FnMut(&mut [u8]) + 'static) {
        self.handler = Some(Box::new(handler));
    }
}

impl PacketPassSink for PacketPassNotifier {
    fn mtu(&self) -> usize {
        self.inner.mtu()
    }

    fn send(&mut self, data: &[u8]) -> bool {
        let mut buf = data.to_vec();
        if let Some(h) = self.handler.as_mut() {
            h(&mut buf);
        }
        self.inner.send(&buf)
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut()>) {
        self.inner.set_done_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingSink;

    #[test]
    fn patches_every_outgoing_packet() {
        let sink = RecordingSink::new();
        let received = sink.received();
        let mut notifier = PacketPassNotifier::new(Box::new(sink));
        notifier.set_handler(|buf| buf[0] |= 0x80);

        assert!(notifier.send(&[0x00, 1, 2]));
        assert!(notifier.send(&[0x01, 3, 4]));

        assert_eq!(*received.borrow(), vec![vec![0x80, 1, 2], vec![0x81, 3, 4]]);
    }
}
