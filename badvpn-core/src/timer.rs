use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

type TimerHandler = Box<dyn FnMut()>;

pub(crate) struct TimerSlot {
    pub(crate) active: bool,
    /// The deadline of the single live heap entry for this timer, if any.
    /// Any popped heap entry whose deadline doesn't match this is stale
    /// (the timer was cancelled or rescheduled since it was pushed) and is
    /// discarded without running, per the lazy-deletion scheme below.
    pub(crate) current_deadline: Option<Instant>,
    pub(crate) handler: RefCell<Option<TimerHandler>>,
}

#[derive(Default)]
pub(crate) struct TimerState {
    pub(crate) heap: BinaryHeap<Reverse<(Instant, u64)>>,
    pub(crate) expired: VecDeque<u64>,
    pub(crate) slots: HashMap<u64, TimerSlot>,
    pub(crate) next_id: u64,
}

impl TimerState {
    pub(crate) fn create(&mut self, handler: impl FnMut() + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(
            id,
            TimerSlot {
                active: false,
                current_deadline: None,
                handler: RefCell::new(Some(Box::new(handler))),
            },
        );
        id
    }

    pub(crate) fn schedule_at(&mut self, id: u64, deadline: Instant) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.active = true;
            slot.current_deadline = Some(deadline);
            self.heap.push(Reverse((deadline, id)));
        }
    }

    pub(crate) fn cancel(&mut self, id: u64) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.active = false;
            slot.current_deadline = None;
        }
        self.expired.retain(|&x| x != id);
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.cancel(id);
        self.slots.remove(&id);
    }

    pub(crate) fn is_active(&self, id: u64) -> bool {
        self.slots.get(&id).map(|s| s.active).unwrap_or(false)
    }

    /// Earliest still-live deadline, used to size the reactor's poll timeout.
    /// Stale heap entries are popped and discarded as part of the search so
    /// callers never see them; cheap since lazy deletion bounds the amount
    /// of garbage to at most one entry per `schedule_at`/`cancel` call.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((deadline, id))) = self.heap.peek() {
            match self.slots.get(&id) {
                Some(slot) if slot.active && slot.current_deadline == Some(deadline) => {
                    return Some(deadline);
                }
                _ => {
                    self.heap.pop();
                }
            }
        }
        None
    }

    /// Moves every timer with `deadline <= now` from the heap into the
    /// expired FIFO, clearing `active` as it does (a timer under dispatch
    /// is "not running" until rescheduled, exactly like `BTimer`).
    pub(crate) fn advance(&mut self, now: Instant) {
        while let Some(&Reverse((deadline, id))) = self.heap.peek() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(slot) = self.slots.get_mut(&id) {
                if slot.active && slot.current_deadline == Some(deadline) {
                    slot.active = false;
                    slot.current_deadline = None;
                    self.expired.push_back(id);
                }
            }
        }
    }
}

/// A single countdown timer scheduled on a [`crate::Reactor`].
///
/// Owns its slot for as long as the `Timer` value lives; dropping it cancels
/// and releases the slot, matching `BTimer`'s embedded-struct lifetime.
pub struct Timer {
    reactor: crate::Reactor,
    id: u64,
    default_duration: Duration,
}

impl Timer {
    pub(crate) fn new(reactor: crate::Reactor, default_duration: Duration, id: u64) -> Self {
        Self {
            reactor,
            id,
            default_duration,
        }
    }

    /// Schedules using this timer's default duration, relative to now.
    pub fn schedule(&self) {
        self.schedule_after(self.default_duration);
    }

    pub fn schedule_after(&self, duration: Duration) {
        self.schedule_at(Instant::now() + duration);
    }

    pub fn schedule_at(&self, deadline: Instant) {
        self.reactor.schedule_timer_at(self.id, deadline);
    }

    pub fn cancel(&self) {
        self.reactor.cancel_timer(self.id);
    }

    pub fn is_active(&self) -> bool {
        self.reactor.timer_is_active(self.id)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.reactor.remove_timer(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_deadline_skips_stale_entries() {
        let mut state = TimerState::default();
        let id = state.create(|| {});
        let now = Instant::now();
        state.schedule_at(id, now + Duration::from_secs(5));
        state.schedule_at(id, now + Duration::from_secs(1)); // reschedules, old entry goes stale
        assert_eq!(state.next_deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn cancel_removes_from_expired_queue() {
        let mut state = TimerState::default();
        let id = state.create(|| {});
        let now = Instant::now();
        state.schedule_at(id, now);
        state.advance(now);
        assert_eq!(state.expired.len(), 1);
        state.cancel(id);
        assert!(state.expired.is_empty());
    }
}
