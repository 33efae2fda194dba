use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use badvpn_core::{IoInterest, IoToken, ReadySet, Reactor};
use mio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn};

struct PendingAuth {
    stream: TcpStream,
    io_token: IoToken,
    buf: Vec<u8>,
}

struct Inner {
    reactor: Reactor,
    listener: TcpListener,
    listener_token: Option<IoToken>,
    passwords: HashMap<u64, Box<dyn FnOnce(TcpStream, SocketAddr)>>,
    pending: HashMap<usize, PendingAuth>,
    next_pending_id: usize,
}

/// Port-level accept demultiplexer. Holds an ordered mapping
/// from 64-bit password to handler; accepts connections, reads exactly 8
/// bytes, and on a matching password removes the entry (single-use) and
/// delivers the socket to its handler. Closes silently on an unknown
/// password or a connection that closes before 8 bytes arrive. Optional TLS
/// termination ahead of the read is a boundary contract this crate doesn't
/// implement — wrap the listener's accepted stream before handing it here
/// if TLS is required.
pub struct PasswordListener {
    inner: Rc<RefCell<Inner>>,
}

fn accept_all(inner_rc: &Rc<RefCell<Inner>>) {
    loop {
        let accepted = {
            let mut inner = inner_rc.borrow_mut();
            match inner.listener.accept() {
                Ok(v) => v,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("password listener accept failed: {e}");
                    return;
                }
            }
        };
        start_pending_auth(inner_rc, accepted);
    }
}

fn start_pending_auth(inner_rc: &Rc<RefCell<Inner>>, (mut stream, addr): (TcpStream, SocketAddr)) {
    let mut inner = inner_rc.borrow_mut();
    let id = inner.next_pending_id;
    inner.next_pending_id += 1;

    let weak = Rc::downgrade(inner_rc);
    let token = match inner
        .reactor
        .register_io(&mut stream, IoInterest::READABLE, move |ready: ReadySet| {
            if ready.readable {
                if let Some(strong) = weak.upgrade() {
                    on_pending_readable(&strong, id);
                }
            }
        }) {
        Ok(t) => t,
        Err(e) => {
            warn!("failed to register pending auth connection from {addr}: {e}");
            return;
        }
    };

    inner.pending.insert(
        id,
        PendingAuth {
            stream,
            io_token: token,
            buf: Vec::with_capacity(8),
        },
    );
    trace!("password listener: new connection from {addr}, awaiting password");
}

fn on_pending_readable(inner_rc: &Rc<RefCell<Inner>>, id: usize) {
    use std::io::Read;

    let mut inner = inner_rc.borrow_mut();
    let Some(pending) = inner.pending.get_mut(&id) else {
        return;
    };

    let mut chunk = [0u8; 8];
    let remaining = 8 - pending.buf.len();
    let n = match pending.stream.read(&mut chunk[..remaining]) {
        Ok(0) => {
            drop_pending(&mut inner, id);
            return;
        }
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
        Err(e) => {
            debug!("password listener read error: {e}");
            drop_pending(&mut inner, id);
            return;
        }
    };
    pending.buf.extend_from_slice(&chunk[..n]);
    if pending.buf.len() < 8 {
        return;
    }

    let password = u64::from_le_bytes(pending.buf[..8].try_into().expect("exactly 8 bytes"));
    let handler = inner.passwords.remove(&password);
    let mut auth = inner.pending.remove(&id).expect("just looked it up");
    let _ = inner.reactor.deregister_io(auth.io_token, &mut auth.stream);
    drop(inner);

    match handler {
        Some(handler) => {
            let addr = auth.stream.peer_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
            handler(auth.stream, addr);
        }
        None => {
            trace!("password listener: unknown password, closing silently");
            // `auth.stream` drops here, closing the connection.
        }
    }
}

fn drop_pending(inner: &mut Inner, id: usize) {
    if let Some(mut auth) = inner.pending.remove(&id) {
        let _ = inner.reactor.deregister_io(auth.io_token, &mut auth.stream);
    }
}

impl PasswordListener {
    pub fn new(reactor: &Reactor, listener: TcpListener) -> badvpn_core::Result<Self> {
        let inner = Rc::new(RefCell::new(Inner {
            reactor: reactor.clone(),
            listener,
            listener_token: None,
            passwords: HashMap::new(),
            pending: HashMap::new(),
            next_pending_id: 0,
        }));

        let weak = Rc::downgrade(&inner);
        let token = {
            let mut guard = inner.borrow_mut();
            reactor.register_io(&mut guard.listener, IoInterest::READABLE, move |ready: ReadySet| {
                if ready.readable {
                    if let Some(strong) = weak.upgrade() {
                        accept_all(&strong);
                    }
                }
            })?
        };
        inner.borrow_mut().listener_token = Some(token);

        Ok(Self { inner })
    }

    /// Registers a single-use handler for `password`. Overwrites any
    /// existing handler for the same password.
    pub fn add_password(&self, password: u64, handler: impl FnOnce(TcpStream, SocketAddr) + 'static) {
        self.inner.borrow_mut().passwords.insert(password, Box::new(handler));
    }

    /// Withdraws a not-yet-matched password, if still registered.
    pub fn remove_password(&self, password: u64) {
        self.inner.borrow_mut().passwords.remove(&password);
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.borrow().listener.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn matching_password_is_delivered_once() {
        let reactor = Reactor::new().expect("reactor");
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let listener = PasswordListener::new(&reactor, TcpListener::from_std(std_listener)).expect("listener");

        let delivered = Rc::new(RefCell::new(false));
        let delivered_clone = delivered.clone();
        listener.add_password(0x1122334455667788, move |_stream, _addr| {
            *delivered_clone.borrow_mut() = true;
        });

        let mut client = std::net::TcpStream::connect(addr).expect("connect");
        client.write_all(&0x1122334455667788u64.to_le_bytes()).unwrap();

        let reactor_quit = reactor.clone();
        let timer = reactor.create_timer(Duration::from_millis(200), move || reactor_quit.quit(0));
        timer.schedule();
        reactor.run().expect("run");

        assert!(*delivered.borrow());
    }

    #[test]
    fn unknown_password_closes_silently_without_panicking() {
        let reactor = Reactor::new().expect("reactor");
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let _listener = PasswordListener::new(&reactor, TcpListener::from_std(std_listener)).expect("listener");

        let mut client = std::net::TcpStream::connect(addr).expect("connect");
        client.write_all(&0xdeadbeefu64.to_le_bytes()).unwrap();

        let reactor_quit = reactor.clone();
        let timer = reactor.create_timer(Duration::from_millis(100), move || reactor_quit.quit(0));
        timer.schedule();
        reactor.run().expect("run");
    }
}
