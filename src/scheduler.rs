//! Deterministic timers on a virtual clock.
//!
//! Nothing here sleeps. The owner advances time explicitly and runs whatever
//! tasks come due, in due order (ties broken by scheduling order). Cancelling
//! removes the entry immediately, so a cancelled task can never fire afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
struct Entry<T> {
    due: Duration,
    interval: Option<Duration>,
    task: T,
}

#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    now: Duration,
    next_id: u64,
    entries: BTreeMap<TimerId, Entry<T>>,
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 1,
            entries: BTreeMap::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule(&mut self, delay: Duration, task: T) -> TimerId {
        self.insert(delay, None, task)
    }

    /// Fires every `interval` until cancelled. A zero interval is bumped to
    /// one millisecond so a single `advance` can't spin forever.
    pub fn schedule_repeating(&mut self, interval: Duration, task: T) -> TimerId {
        let interval = interval.max(Duration::from_millis(1));
        self.insert(interval, Some(interval), task)
    }

    fn insert(&mut self, delay: Duration, interval: Option<Duration>, task: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                due: self.now + delay,
                interval,
                task,
            },
        );
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Pops the earliest task due at or before `until` and moves the clock to
    /// its due time. Repeating entries are re-armed before the task is handed
    /// out, so the caller may cancel them from inside the task.
    pub fn pop_due(&mut self, until: Duration) -> Option<(TimerId, T)> {
        let (&id, _) = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.due <= until)
            .min_by_key(|(id, entry)| (entry.due, **id))?;
        let entry = self.entries.remove(&id)?;
        self.now = self.now.max(entry.due);
        let task = match entry.interval {
            Some(interval) => {
                let task = entry.task.clone();
                self.entries.insert(
                    id,
                    Entry {
                        due: entry.due + interval,
                        interval: Some(interval),
                        task: entry.task,
                    },
                );
                task
            }
            None => entry.task,
        };
        Some((id, task))
    }

    /// Moves the clock forward to `until` once nothing else is due.
    pub fn settle(&mut self, until: Duration) {
        self.now = self.now.max(until);
    }
}

/// A restartable timer: lit once, relit (restarted) on activity, and fired
/// when it burns down without being relit in time.
#[derive(Debug, Clone)]
pub struct Fuse<T> {
    delay: Duration,
    repeating: bool,
    task: T,
    timer: Option<TimerId>,
}

impl<T: Clone> Fuse<T> {
    pub fn new(delay: Duration, repeating: bool, task: T) -> Self {
        Self {
            delay,
            repeating,
            task,
            timer: None,
        }
    }

    pub fn is_lit(&self, scheduler: &Scheduler<T>) -> bool {
        self.timer.is_some_and(|id| scheduler.is_pending(id))
    }

    /// Restarts the countdown from now.
    pub fn relight(&mut self, scheduler: &mut Scheduler<T>) {
        self.stop(scheduler);
        self.start(scheduler);
    }

    fn start(&mut self, scheduler: &mut Scheduler<T>) {
        let task = self.task.clone();
        self.timer = Some(if self.repeating {
            scheduler.schedule_repeating(self.delay, task)
        } else {
            scheduler.schedule(self.delay, task)
        });
    }

    pub fn stop(&mut self, scheduler: &mut Scheduler<T>) {
        if let Some(id) = self.timer.take() {
            scheduler.cancel(id);
        }
    }
}
