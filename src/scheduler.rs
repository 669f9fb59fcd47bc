use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Cancellation token for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    /// A handle that refers to no timer; cancelling it does nothing.
    pub fn detached() -> Self {
        Self(0)
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    handle: TaskHandle,
    task: T,
    every: Option<Duration>,
}

/// Single-threaded timer queue driven by the host clock.
///
/// Nothing runs on its own: the render loop calls [`drain_due`](Self::drain_due)
/// once per tick and dispatches the returned tasks in order. Tasks due at the
/// same instant come out in the order they were scheduled.
#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    queue: BTreeMap<(Duration, u64), Entry<T>>,
    keys: HashMap<TaskHandle, (Duration, u64)>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            keys: HashMap::new(),
            next_seq: 1,
        }
    }
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_once(&mut self, at: Duration, task: T) -> TaskHandle {
        let handle = TaskHandle(self.next_seq);
        self.insert(at, handle, task, None);
        handle
    }

    /// Runs `task` at `first`, then every `interval` after that.
    pub fn schedule_every(&mut self, first: Duration, interval: Duration, task: T) -> TaskHandle {
        let handle = TaskHandle(self.next_seq);
        let interval = interval.max(Duration::from_millis(1));
        self.insert(first, handle, task, Some(interval));
        handle
    }

    /// Returns `false` if the task already ran or was never scheduled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.keys.remove(&handle) {
            Some(key) => self.queue.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn due_at(&self, handle: TaskHandle) -> Option<Duration> {
        self.keys.get(&handle).map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pops every task due at or before `now`.
    ///
    /// Repeating tasks fire at most once per call; missed slots are skipped
    /// and the task is rearmed on the next slot after `now`.
    pub fn drain_due(&mut self, now: Duration) -> Vec<T> {
        let mut fired = Vec::new();
        let mut rearm = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            let (at, _) = *entry.key();
            if at > now {
                break;
            }
            let entry = entry.remove();
            self.keys.remove(&entry.handle);
            fired.push(entry.task.clone());
            if let Some(every) = entry.every {
                let mut next = at + every;
                if next <= now {
                    let step = every.as_nanos();
                    let skip = ((now - at).as_nanos() / step + 1) * step;
                    next = at + Duration::new(
                        (skip / 1_000_000_000) as u64,
                        (skip % 1_000_000_000) as u32,
                    );
                }
                rearm.push((next, entry));
            }
        }
        for (at, entry) in rearm {
            self.insert(at, entry.handle, entry.task, entry.every);
        }
        fired
    }

    fn insert(&mut self, at: Duration, handle: TaskHandle, task: T, every: Option<Duration>) {
        let key = (at, self.next_seq);
        self.next_seq += 1;
        self.keys.insert(handle, key);
        self.queue.insert(key, Entry {
            handle,
            task,
            every,
        });
    }
}
