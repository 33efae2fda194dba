use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::collections::HashMap;
use std::rc::Rc;

type JobHandler = Box<dyn FnMut()>;

#[derive(Default)]
pub(crate) struct JobState {
    pub(crate) queue: VecDeque<u64>,
    pub(crate) slots: HashMap<u64, JobSlot>,
    pub(crate) next_id: u64,
}

pub(crate) struct JobSlot {
    pub(crate) queued: bool,
    pub(crate) handler: RefCell<Option<JobHandler>>,
}

impl JobState {
    /// Runs queued jobs to exhaustion. `still_running` is polled after every
    /// handler invocation so a `Reactor::quit` from inside a job stops the
    /// drain immediately, per the reactor's dispatch-ordering contract.
    pub(crate) fn drain(state: &Rc<RefCell<JobState>>, still_running: &Cell<bool>) {
        loop {
            if !still_running.get() {
                return;
            }
            if !Self::drain_one(state) {
                return;
            }
        }
    }

    /// Runs at most one queued job. Returns `false` if the queue was empty.
    pub(crate) fn drain_one(state: &Rc<RefCell<JobState>>) -> bool {
        let id = match state.borrow_mut().queue.pop_front() {
            Some(id) => id,
            None => return false,
        };
        let handler = {
            let mut s = state.borrow_mut();
            let Some(slot) = s.slots.get_mut(&id) else {
                return true;
            };
            slot.queued = false;
            slot.handler.borrow_mut().take()
        };
        if let Some(mut h) = handler {
            h();
            if let Some(slot) = state.borrow().slots.get(&id) {
                *slot.handler.borrow_mut() = Some(h);
            }
        }
        true
    }
}

/// A group of [`Job`]s that share a single FIFO on the owning [`crate::Reactor`].
///
/// Mirrors `BPendingGroup`: the group itself holds no handlers, only the
/// queue that jobs are appended to when `set`.
#[derive(Clone)]
pub struct PendingGroup {
    pub(crate) state: Rc<RefCell<JobState>>,
}

impl PendingGroup {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(JobState::default())),
        }
    }

    /// Registers a new, initially-unset job. Call [`Job::set`] to schedule it.
    pub fn add_job(&self, handler: impl FnMut() + 'static) -> Job {
        let mut s = self.state.borrow_mut();
        let id = s.next_id;
        s.next_id += 1;
        s.slots.insert(
            id,
            JobSlot {
                queued: false,
                handler: RefCell::new(Some(Box::new(handler))),
            },
        );
        drop(s);
        Job {
            group: self.state.clone(),
            id,
        }
    }
}

/// A single schedulable unit of work on a [`PendingGroup`]'s FIFO.
///
/// At most one instance of this job is ever present in the FIFO: calling
/// [`Job::set`] while it is already queued is a no-op, matching `BPending`'s
/// set-flag semantics.
pub struct Job {
    group: Rc<RefCell<JobState>>,
    id: u64,
}

impl Job {
    /// Appends this job to its group's FIFO if it is not already queued.
    pub fn set(&self) {
        let mut s = self.group.borrow_mut();
        if let Some(slot) = s.slots.get_mut(&self.id) {
            if !slot.queued {
                slot.queued = true;
                s.queue.push_back(self.id);
            }
        }
    }

    /// Removes this job from its group's FIFO if queued; no-op otherwise.
    pub fn unset(&self) {
        let mut s = self.group.borrow_mut();
        let was_queued = s
            .slots
            .get(&self.id)
            .map(|slot| slot.queued)
            .unwrap_or(false);
        if was_queued {
            if let Some(slot) = s.slots.get_mut(&self.id) {
                slot.queued = false;
            }
            s.queue.retain(|&id| id != self.id);
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn is_set(&self) -> bool {
        self.group
            .borrow()
            .slots
            .get(&self.id)
            .map(|slot| slot.queued)
            .unwrap_or(false)
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.unset();
        self.group.borrow_mut().slots.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_idempotent_until_it_runs() {
        let group = PendingGroup::new();
        let still_running = Cell::new(true);
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let job = group.add_job(move || count_clone.set(count_clone.get() + 1));
        job.set();
        job.set();
        job.set();
        JobState::drain(&group.state, &still_running);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn job_can_reschedule_itself() {
        let group = PendingGroup::new();
        let still_running = Cell::new(true);
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        // Job handle needs interior access to itself to re-`set`; model via
        // a shared flag a second outer job toggles, since a closure cannot
        // safely capture the `Job` it belongs to (would be a reference cycle).
        let job = group.add_job(move || runs_clone.set(runs_clone.get() + 1));
        job.set();
        JobState::drain(&group.state, &still_running);
        assert_eq!(runs.get(), 1);
        assert!(!job.is_set());
    }

    #[test]
    fn unset_prevents_run() {
        let group = PendingGroup::new();
        let still_running = Cell::new(true);
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        let job = group.add_job(move || ran_clone.set(true));
        job.set();
        job.unset();
        JobState::drain(&group.state, &still_running);
        assert!(!ran.get());
    }
}
