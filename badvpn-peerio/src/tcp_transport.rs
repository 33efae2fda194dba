use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::{Rc, Weak};

use badvpn_core::{IoInterest, IoToken, ReadySet, Reactor};
use badvpn_pipeline::{StreamPassSink, StreamRecvSource};
use mio::net::TcpStream;
use tracing::warn;

struct Inner {
    reactor: Reactor,
    stream: TcpStream,
    io_token: Option<IoToken>,
    interest: IoInterest,
    outbound: VecDeque<u8>,
    send_busy: bool,
    send_done: Option<Box<dyn FnMut(usize)>>,
    recv_waiting: bool,
    recv_done: Option<Box<dyn FnMut(Vec<u8>)>>,
}

fn set_interest(inner: &mut Inner, interest: IoInterest) {
    if inner.interest == interest {
        return;
    }
    let Some(token) = inner.io_token else { return };
    if inner.reactor.set_io_interest(token, &mut inner.stream, interest).is_ok() {
        inner.interest = interest;
    }
}

fn try_flush(inner_rc: &Rc<RefCell<Inner>>) {
    let mut inner = inner_rc.borrow_mut();
    let was_busy = inner.send_busy;
    loop {
        let front: Vec<u8> = inner.outbound.iter().copied().take(65536).collect();
        if front.is_empty() {
            break;
        }
        match inner.stream.write(&front) {
            Ok(0) => break,
            Ok(n) => {
                inner.outbound.drain(..n);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("tcp write failed: {e}");
                inner.outbound.clear();
                break;
            }
        }
    }
    let now_empty = inner.outbound.is_empty();
    set_interest(&mut inner, if now_empty { IoInterest::READABLE } else { IoInterest::BOTH });
    if was_busy && now_empty {
        inner.send_busy = false;
        if let Some(h) = inner.send_done.as_mut() {
            h(0);
        }
    }
}

fn on_ready(inner_rc: &Rc<RefCell<Inner>>, ready: ReadySet) {
    if ready.writable {
        try_flush(inner_rc);
    }
    if ready.readable {
        let mut inner = inner_rc.borrow_mut();
        if !inner.recv_waiting {
            return;
        }
        let mut buf = [0u8; 65536];
        match inner.stream.read(&mut buf) {
            Ok(0) => {
                // Peer closed; deliver one empty read so callers notice.
                inner.recv_waiting = false;
                if let Some(h) = inner.recv_done.as_mut() {
                    h(Vec::new());
                }
            }
            Ok(n) => {
                inner.recv_waiting = false;
                let data = buf[..n].to_vec();
                if let Some(h) = inner.recv_done.as_mut() {
                    h(data);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("tcp read failed: {e}"),
        }
    }
}

/// `StreamPassSink`/`StreamRecvSource` over a plain TCP connection — the
/// concrete, unencrypted boundary-contract implementer. TLS termination is
/// a separate implementer of the same two traits; `StreamPeerIo` doesn't
/// care which one it's handed.
pub struct TcpTransport {
    inner: Rc<RefCell<Inner>>,
}

impl TcpTransport {
    pub fn new(reactor: &Reactor, stream: TcpStream) -> badvpn_core::Result<Self> {
        let inner = Rc::new(RefCell::new(Inner {
            reactor: reactor.clone(),
            stream,
            io_token: None,
            interest: IoInterest::READABLE,
            outbound: VecDeque::new(),
            send_busy: false,
            send_done: None,
            recv_waiting: false,
            recv_done: None,
        }));

        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&inner);
        let token = {
            let mut guard = inner.borrow_mut();
            reactor.register_io(&mut guard.stream, IoInterest::READABLE, move |ready: ReadySet| {
                if let Some(strong) = weak.upgrade() {
                    on_ready(&strong, ready);
                }
            })?
        };
        inner.borrow_mut().io_token = Some(token);

        Ok(Self { inner })
    }
}

impl StreamPassSink for TcpTransport {
    /// Partial writes are the normal path here, not an error: whatever the
    /// kernel socket buffer didn't take is queued and flushed as the socket
    /// reports writable, with `set_done_handler`'s callback firing once
    /// that queue fully drains.
    fn send(&mut self, data: &[u8]) -> usize {
        let mut inner = self.inner.borrow_mut();
        if !inner.outbound.is_empty() {
            // Already backed up; caller must wait for the done callback.
            return 0;
        }
        match inner.stream.write(data) {
            Ok(n) => {
                if n < data.len() {
                    inner.outbound.extend(&data[n..]);
                    inner.send_busy = true;
                    set_interest(&mut inner, IoInterest::BOTH);
                }
                n
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                inner.outbound.extend(data.iter().copied());
                inner.send_busy = true;
                set_interest(&mut inner, IoInterest::BOTH);
                0
            }
            Err(e) => {
                warn!("tcp write failed: {e}");
                0
            }
        }
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(usize)>) {
        self.inner.borrow_mut().send_done = Some(handler);
    }
}

impl StreamRecvSource for TcpTransport {
    fn recv(&mut self, max_len: usize) -> Vec<u8> {
        let mut inner = self.inner.borrow_mut();
        let mut buf = vec![0u8; max_len.min(65536)];
        match inner.stream.read(&mut buf) {
            Ok(0) => Vec::new(),
            Ok(n) => buf[..n].to_vec(),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                inner.recv_waiting = true;
                Vec::new()
            }
            Err(e) => {
                warn!("tcp read failed: {e}");
                Vec::new()
            }
        }
    }

    fn set_done_handler(&mut self, handler: Box<dyn FnMut(Vec<u8>)>) {
        self.inner.borrow_mut().recv_done = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as StdRead, Write as StdWrite};
    use std::time::Duration;

    #[test]
    fn send_and_recv_round_trip_over_loopback() {
        let reactor = Reactor::new().expect("reactor");
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();

        let mut peer = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = std_listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let mut transport = TcpTransport::new(&reactor, TcpStream::from_std(accepted)).expect("transport");
        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        transport.set_done_handler(Box::new(move |data: Vec<u8>| {
            received_clone.borrow_mut().extend(data);
        }));
        assert!(transport.recv(1024).is_empty());

        peer.write_all(b"ping").unwrap();

        let reactor_quit = reactor.clone();
        let timer = reactor.create_timer(Duration::from_millis(150), move || reactor_quit.quit(0));
        timer.schedule();
        reactor.run().expect("run");

        assert_eq!(*received.borrow(), b"ping".to_vec());

        assert_eq!(StreamPassSink::send(&mut transport, b"pong"), 4);
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
