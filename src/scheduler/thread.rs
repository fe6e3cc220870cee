//! Wall-clock scheduler backed by a worker thread.

use super::{Clock, RepeatingTask, Scheduler, Task, TimerId};
use crate::types::Timestamp;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

/// Longest idle wait before the worker re-checks its queue.
const IDLE_WAIT: Duration = Duration::from_secs(60);

enum Command {
    Schedule {
        id: TimerId,
        due: u64,
        interval: Option<u64>,
        task: WorkerTask,
    },
    Shutdown,
}

enum WorkerTask {
    Once(Task),
    Repeating(RepeatingTask),
}

/// Scheduler running tasks on a dedicated thread.
///
/// Tasks must be `Send`; they run one at a time, in due order.
pub struct ThreadScheduler {
    sender: Sender<Command>,
    /// Ids of tasks that have not run (once) or not been cancelled (repeating).
    live: Arc<Mutex<HashSet<TimerId>>>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

type Queue = BTreeMap<(u64, TimerId), (Option<u64>, WorkerTask)>;

struct Worker {
    receiver: Receiver<Command>,
    queue: Queue,
    live: Arc<Mutex<HashSet<TimerId>>>,
}

impl Worker {
    fn run(mut self) {
        while self.step() {}
        debug!("scheduler worker stopped");
    }

    /// Wait for a command or the next due time, admit the commands queued
    /// so far, then run everything due. Returns false once stopped.
    fn step(&mut self) -> bool {
        let now = Timestamp::wall_clock().0;
        let wait = match self.queue.keys().next() {
            Some(&(due, _)) => Duration::from_millis(due.saturating_sub(now)),
            None => IDLE_WAIT,
        };

        let first = match self.receiver.recv_timeout(wait) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => return false,
        };
        // Bounded so a steady stream of commands cannot starve due tasks.
        let backlog = self.receiver.len();
        for command in first.into_iter().chain(self.receiver.try_iter().take(backlog)) {
            match command {
                Command::Schedule {
                    id,
                    due,
                    interval,
                    task,
                } => {
                    self.queue.insert((due, id), (interval, task));
                }
                Command::Shutdown => return false,
            }
        }

        self.run_due(Timestamp::wall_clock().0);
        true
    }

    fn run_due(&mut self, now: u64) {
        let due_keys: Vec<(u64, TimerId)> = self
            .queue
            .range(..=(now, TimerId(u64::MAX)))
            .map(|(k, _)| *k)
            .collect();

        for key in due_keys {
            let Some((interval, task)) = self.queue.remove(&key) else {
                continue;
            };
            let id = key.1;
            match (interval, task) {
                (None, WorkerTask::Once(f)) => {
                    if self.live.lock().remove(&id) {
                        f();
                    }
                }
                (Some(interval), WorkerTask::Repeating(f)) => {
                    if self.live.lock().contains(&id) {
                        f();
                        self.queue.insert(
                            (now + interval, id),
                            (Some(interval), WorkerTask::Repeating(f)),
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

impl ThreadScheduler {
    /// Spawn the worker thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Command>();
        let live: Arc<Mutex<HashSet<TimerId>>> = Arc::new(Mutex::new(HashSet::new()));
        let worker = Worker {
            receiver,
            queue: BTreeMap::new(),
            live: Arc::clone(&live),
        };

        let worker = std::thread::Builder::new()
            .name("viewstream-scheduler".into())
            .spawn(move || worker.run())
            .ok();

        Self {
            sender,
            live,
            next_id: AtomicU64::new(1),
            worker: Mutex::new(worker),
        }
    }

    fn submit(&self, delay_ms: u64, interval: Option<u64>, task: WorkerTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.lock().insert(id);
        let due = self.now().plus(delay_ms).0;
        if self
            .sender
            .send(Command::Schedule {
                id,
                due,
                interval,
                task,
            })
            .is_err()
        {
            self.live.lock().remove(&id);
            debug!(id = id.0, "task dropped, scheduler stopped");
        }
        id
    }

    /// Stop the worker. Pending tasks are discarded.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            // A task dropping the last handle runs on the worker itself.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        self.live.lock().clear();
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Clock for ThreadScheduler {
    fn now(&self) -> Timestamp {
        Timestamp::wall_clock()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay_ms: u64, task: Task) -> TimerId {
        self.submit(delay_ms, None, WorkerTask::Once(task))
    }

    fn schedule_repeating(&self, interval_ms: u64, task: RepeatingTask) -> TimerId {
        let interval = interval_ms.max(1);
        self.submit(interval, Some(interval), WorkerTask::Repeating(task))
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.live.lock().remove(&id)
    }
}
