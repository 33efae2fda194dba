use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest as MioInterest, Poll, Token};

use crate::error::{Error, Result};
use crate::job::{JobState, PendingGroup};
use crate::timer::{Timer, TimerState};

/// Read/write interest for an I/O registration, mirroring
/// `BREACTOR_READ` / `BREACTOR_WRITE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoInterest {
    pub readable: bool,
    pub writable: bool,
}

impl IoInterest {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };

    fn to_mio(self) -> MioInterest {
        match (self.readable, self.writable) {
            (true, true) => MioInterest::READABLE | MioInterest::WRITABLE,
            (true, false) => MioInterest::READABLE,
            (false, true) => MioInterest::WRITABLE,
            (false, false) => MioInterest::READABLE,
        }
    }
}

/// The readiness bits reported for a single I/O event, mirroring
/// `BREACTOR_READ` / `BREACTOR_WRITE` / `BREACTOR_ERROR` at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadySet {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

type IoHandler = Box<dyn FnMut(ReadySet)>;

struct IoRegistration {
    handler: RefCell<Option<IoHandler>>,
}

/// Token handed back by [`Reactor::register_io`]; pass it to
/// [`Reactor::deregister_io`] or [`Reactor::set_io_interest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoToken(usize);

struct Inner {
    poll: RefCell<Poll>,
    io: RefCell<HashMap<usize, IoRegistration>>,
    next_token: Cell<usize>,
    snapshot: RefCell<Vec<(usize, ReadySet)>>,
    snapshot_pos: Cell<usize>,
    cancelled_in_snapshot: RefCell<HashSet<usize>>,
    jobs: Rc<RefCell<JobState>>,
    timers: RefCell<TimerState>,
    running: Cell<bool>,
    exit_code: Cell<i32>,
}

/// The single-threaded cooperative event loop underlying the BadVPN flow
/// runtime: a pending-job FIFO, a timer heap, and `mio`-driven I/O
/// readiness, dispatched in that strict order every iteration so that no
/// handler ever observes stale jobs or re-fires a cancelled timer or
/// registration.
///
/// Cheap to clone: every clone shares the same reactor state via `Rc`, the
/// same way a `tokio::runtime::Handle` shares its runtime. Only one clone
/// should ever call [`Reactor::run`].
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<Inner>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let poll = Poll::new().map_err(Error::Io)?;
        Ok(Self {
            inner: Rc::new(Inner {
                poll: RefCell::new(poll),
                io: RefCell::new(HashMap::new()),
                next_token: Cell::new(0),
                snapshot: RefCell::new(Vec::new()),
                snapshot_pos: Cell::new(0),
                cancelled_in_snapshot: RefCell::new(HashSet::new()),
                jobs: Rc::new(RefCell::new(JobState::default())),
                timers: RefCell::new(TimerState::default()),
                running: Cell::new(false),
                exit_code: Cell::new(0),
            }),
        })
    }

    /// Returns a handle for scheduling [`crate::job::Job`]s on this reactor.
    pub fn pending_group(&self) -> PendingGroup {
        PendingGroup {
            state: self.inner.jobs.clone(),
        }
    }

    /// Creates a new, unscheduled timer with the given default duration
    /// (used by [`Timer::schedule`]).
    pub fn create_timer(&self, default_duration: Duration, handler: impl FnMut() + 'static) -> Timer {
        let id = self.inner.timers.borrow_mut().create(handler);
        Timer::new(self.clone(), default_duration, id)
    }

    pub(crate) fn schedule_timer_at(&self, id: u64, deadline: Instant) {
        self.inner.timers.borrow_mut().schedule_at(id, deadline);
    }

    pub(crate) fn cancel_timer(&self, id: u64) {
        self.inner.timers.borrow_mut().cancel(id);
    }

    pub(crate) fn remove_timer(&self, id: u64) {
        self.inner.timers.borrow_mut().remove(id);
    }

    pub(crate) fn timer_is_active(&self, id: u64) -> bool {
        self.inner.timers.borrow().is_active(id)
    }

    /// Registers an I/O source for readiness notification. The caller
    /// retains ownership of `source` and must pass it again to
    /// [`Reactor::deregister_io`] / [`Reactor::set_io_interest`], mirroring
    /// `BFileDescriptor`'s model where the fd owner also owns registration.
    pub fn register_io(
        &self,
        source: &mut dyn Source,
        interest: IoInterest,
        handler: impl FnMut(ReadySet) + 'static,
    ) -> Result<IoToken> {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token + 1);
        self.inner
            .poll
            .borrow()
            .registry()
            .register(source, Token(token), interest.to_mio())
            .map_err(Error::Io)?;
        self.inner.io.borrow_mut().insert(
            token,
            IoRegistration {
                handler: RefCell::new(Some(Box::new(handler))),
            },
        );
        Ok(IoToken(token))
    }

    pub fn set_io_interest(&self, token: IoToken, source: &mut dyn Source, interest: IoInterest) -> Result<()> {
        self.inner
            .poll
            .borrow()
            .registry()
            .reregister(source, Token(token.0), interest.to_mio())
            .map_err(Error::Io)
    }

    /// Deregisters `token`. Any instance of this token still sitting in the
    /// current I/O snapshot (queued for dispatch but not yet handled) is
    /// discarded rather than delivered, so a handler that deregisters
    /// itself or a peer never sees a use-after-cancel callback.
    pub fn deregister_io(&self, token: IoToken, source: &mut dyn Source) -> Result<()> {
        self.inner
            .poll
            .borrow()
            .registry()
            .deregister(source)
            .map_err(Error::Io)?;
        self.inner.io.borrow_mut().remove(&token.0);
        self.inner.cancelled_in_snapshot.borrow_mut().insert(token.0);
        Ok(())
    }

    /// Requests that [`Reactor::run`] return `code` once the handler that
    /// called `quit` finishes, without dispatching any further timers or
    /// I/O events.
    pub fn quit(&self, code: i32) {
        self.inner.running.set(false);
        self.inner.exit_code.set(code);
    }

    fn drain_jobs(&self) {
        JobState::drain(&self.inner.jobs, &self.inner.running);
    }

    fn drain_expired_timers(&self) {
        loop {
            if !self.inner.running.get() {
                return;
            }
            let id = match self.inner.timers.borrow_mut().expired.pop_front() {
                Some(id) => id,
                None => return,
            };
            let handler = {
                let timers = self.inner.timers.borrow();
                timers.slots.get(&id).and_then(|s| s.handler.borrow_mut().take())
            };
            if let Some(mut h) = handler {
                h();
                let timers = self.inner.timers.borrow();
                if let Some(slot) = timers.slots.get(&id) {
                    *slot.handler.borrow_mut() = Some(h);
                }
            }
            self.drain_jobs();
        }
    }

    fn drain_io_snapshot(&self) {
        loop {
            if !self.inner.running.get() {
                return;
            }
            let next = {
                let snapshot = self.inner.snapshot.borrow();
                let pos = self.inner.snapshot_pos.get();
                snapshot.get(pos).copied()
            };
            let Some((token, ready)) = next else {
                return;
            };
            self.inner.snapshot_pos.set(self.inner.snapshot_pos.get() + 1);
            if self.inner.cancelled_in_snapshot.borrow().contains(&token) {
                continue;
            }
            let handler = {
                let io = self.inner.io.borrow();
                io.get(&token).and_then(|r| r.handler.borrow_mut().take())
            };
            if let Some(mut h) = handler {
                h(ready);
                let io = self.inner.io.borrow();
                if let Some(reg) = io.get(&token) {
                    *reg.handler.borrow_mut() = Some(h);
                }
            }
            self.drain_jobs();
        }
    }

    fn wait_and_collect(&self) -> Result<()> {
        let timeout = self.inner.timers.borrow_mut().next_deadline().map(|deadline| {
            deadline.saturating_duration_since(Instant::now())
        });
        let mut events = Events::with_capacity(256);
        self.inner
            .poll
            .borrow_mut()
            .poll(&mut events, timeout)
            .map_err(Error::Io)?;
        let mut snapshot = Vec::new();
        for event in events.iter() {
            let ready = ReadySet {
                readable: event.is_readable(),
                writable: event.is_writable(),
                error: event.is_error(),
            };
            snapshot.push((event.token().0, ready));
        }
        *self.inner.snapshot.borrow_mut() = snapshot;
        self.inner.snapshot_pos.set(0);
        self.inner.cancelled_in_snapshot.borrow_mut().clear();
        Ok(())
    }

    /// Runs the event loop until [`Reactor::quit`] is called, dispatching in
    /// strict order every iteration: pending jobs to exhaustion, then
    /// expired timers (each followed by draining jobs again), then the
    /// previous `poll()`'s ready I/O events (likewise), then a bounded wait
    /// for the next thing to happen.
    pub fn run(&self) -> Result<i32> {
        self.inner.running.set(true);
        loop {
            self.drain_jobs();
            if !self.inner.running.get() {
                break;
            }
            let now = Instant::now();
            self.inner.timers.borrow_mut().advance(now);
            self.drain_expired_timers();
            if !self.inner.running.get() {
                break;
            }
            self.drain_io_snapshot();
            if !self.inner.running.get() {
                break;
            }
            self.wait_and_collect()?;
        }
        Ok(self.inner.exit_code.get())
    }

    /// Runs pending jobs until `reference` is next in line (without running
    /// it) or [`Reactor::quit`] is called. Mirrors `BReactor_Synchronize`,
    /// letting a component flush everything queued ahead of a marker job.
    pub fn synchronize(&self, reference: &crate::job::Job) -> bool {
        loop {
            if !self.inner.running.get() {
                return false;
            }
            let front = self.inner.jobs.borrow().queue.front().copied();
            match front {
                Some(id) if id == reference.id() => return true,
                Some(_) => {
                    JobState::drain_one(&self.inner.jobs);
                }
                None => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn timers_fire_in_deadline_order() {
        let reactor = Reactor::new().expect("poll creation");
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let order1 = order.clone();
        let t1 = reactor.create_timer(Duration::from_millis(0), move || order1.borrow_mut().push(1));
        let order2 = order.clone();
        let t2 = reactor.create_timer(Duration::from_millis(0), move || order2.borrow_mut().push(2));

        let reactor_quit = reactor.clone();
        let order3 = order.clone();
        let t3 = reactor.create_timer(Duration::from_millis(0), move || {
            order3.borrow_mut().push(3);
            reactor_quit.quit(0);
        });

        let now = Instant::now();
        t2.schedule_at(now + Duration::from_millis(20));
        t1.schedule_at(now + Duration::from_millis(5));
        t3.schedule_at(now + Duration::from_millis(40));

        let code = reactor.run().expect("run");
        assert_eq!(code, 0);
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn quit_stops_dispatch_immediately() {
        let reactor = Reactor::new().expect("poll creation");
        let ran_second = Rc::new(Cell::new(false));

        let reactor_quit = reactor.clone();
        let t1 = reactor.create_timer(Duration::from_millis(0), move || {
            reactor_quit.quit(7);
        });
        let ran_second_clone = ran_second.clone();
        let t2 = reactor.create_timer(Duration::from_millis(0), move || {
            ran_second_clone.set(true);
        });

        let now = Instant::now();
        t1.schedule_at(now);
        t2.schedule_at(now);

        let code = reactor.run().expect("run");
        assert_eq!(code, 7);
        assert!(!ran_second.get());
    }
}
