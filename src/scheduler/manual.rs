//! Virtual-time scheduler.

use super::{Clock, RepeatingTask, Scheduler, Task, TimerId};
use crate::types::Timestamp;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

enum TimerTask {
    Once(Task),
    Repeating { interval: u64, task: RepeatingTask },
}

/// Scheduler driven by explicit calls to [`ManualScheduler::advance`].
///
/// Tasks run on the calling thread, in due-time order, with the clock set
/// to each task's due time while it runs.
pub struct ManualScheduler {
    now: AtomicU64,
    /// Pending tasks keyed by (due time, id) so ties run in scheduling order.
    timers: Mutex<BTreeMap<(u64, TimerId), TimerTask>>,
    next_id: AtomicU64,
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at zero.
    pub fn new() -> Self {
        Self::starting_at(Timestamp(0))
    }

    /// Create a scheduler whose clock starts at `start`.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.0),
            timers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Move the clock forward by `millis`, running every task that falls due.
    pub fn advance(&self, millis: u64) {
        let target = self.now.load(Ordering::SeqCst).saturating_add(millis);
        self.advance_to(Timestamp(target));
    }

    /// Move the clock to `target`, running every task that falls due.
    pub fn advance_to(&self, target: Timestamp) {
        loop {
            let next = {
                let mut timers = self.timers.lock();
                let key = match timers.keys().next() {
                    Some(&(due, id)) if due <= target.0 => (due, id),
                    _ => break,
                };
                let task = timers.remove(&key);
                // Re-arm before running so the task may cancel itself.
                if let Some(TimerTask::Repeating { interval, task }) = &task {
                    timers.insert(
                        (key.0 + (*interval).max(1), key.1),
                        TimerTask::Repeating {
                            interval: *interval,
                            task: task.clone(),
                        },
                    );
                }
                task.map(|t| (key.0, t))
            };

            let Some((due, task)) = next else { break };
            self.now.fetch_max(due, Ordering::SeqCst);
            match task {
                TimerTask::Once(f) => f(),
                TimerTask::Repeating { task, .. } => task(),
            }
        }
        self.now.fetch_max(target.0, Ordering::SeqCst);
    }

    /// Number of tasks waiting to run.
    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualScheduler {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay_ms: u64, task: Task) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let due = self.now().plus(delay_ms).0;
        self.timers.lock().insert((due, id), TimerTask::Once(task));
        id
    }

    fn schedule_repeating(&self, interval_ms: u64, task: RepeatingTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let interval = interval_ms.max(1);
        let due = self.now().plus(interval).0;
        self.timers
            .lock()
            .insert((due, id), TimerTask::Repeating { interval, task });
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut timers = self.timers.lock();
        let key = timers.keys().find(|(_, tid)| *tid == id).copied();
        match key {
            Some(key) => timers.remove(&key).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_runs_in_due_order() {
        let scheduler = ManualScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (delay, tag) in [(30, "c"), (10, "a"), (20, "b")] {
            let log = Arc::clone(&log);
            scheduler.schedule(delay, Box::new(move || log.lock().push(tag)));
        }

        scheduler.advance(15);
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(scheduler.now(), Timestamp(15));

        scheduler.advance(100);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_clock_is_due_time_while_running() {
        let scheduler = Arc::new(ManualScheduler::new());
        let seen = Arc::new(AtomicU64::new(0));
        {
            let s = Arc::clone(&scheduler);
            let seen = Arc::clone(&seen);
            scheduler.schedule(40, Box::new(move || seen.store(s.now().0, Ordering::SeqCst)));
        }
        scheduler.advance(100);
        assert_eq!(seen.load(Ordering::SeqCst), 40);
        assert_eq!(scheduler.now(), Timestamp(100));
    }

    #[test]
    fn test_cancel() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicU64::new(0));
        let f = Arc::clone(&fired);
        let id = scheduler.schedule(10, Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        scheduler.advance(50);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_repeating_until_cancelled() {
        let scheduler = ManualScheduler::new();
        let ticks = Arc::new(AtomicU64::new(0));
        let t = Arc::clone(&ticks);
        let id = scheduler.schedule_repeating(
            100,
            Arc::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        );

        scheduler.advance(350);
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        assert!(scheduler.cancel(id));
        scheduler.advance(1000);
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_task_scheduled_during_advance_runs_if_due() {
        let scheduler = Arc::new(ManualScheduler::new());
        let fired = Arc::new(AtomicU64::new(0));
        {
            let s = Arc::clone(&scheduler);
            let f = Arc::clone(&fired);
            scheduler.schedule(10, Box::new(move || {
                s.schedule(10, Box::new(move || {
                    f.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        }
        scheduler.advance(25);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
