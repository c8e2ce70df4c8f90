//! The thread pool: global priority queue, per-worker deques, stealing.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::task::{Task, TaskId, TaskPriority};

/// How long an idle worker sleeps on the global-queue condvar before
/// re-checking local queues and steal targets.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Heap entry ordering: lowest (priority, sequence) pops first.
struct QueuedTask(Task);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the lowest priority
        // value (most urgent) and the oldest sequence on top
        (other.0.priority(), other.0.sequence).cmp(&(self.0.priority(), self.0.sequence))
    }
}

/// Snapshot of pool counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStats {
    /// Tasks executed to completion
    pub completed: u64,
    /// Tasks taken from another worker's deque
    pub stolen: u64,
    /// Tasks cancelled before execution
    pub cancelled: u64,
    /// Sum of submit-to-start latency in microseconds
    pub total_wait_us: u64,
    /// Sum of execution time in microseconds
    pub total_exec_us: u64,
    /// Workers currently executing a task
    pub active_workers: u32,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    stolen: AtomicU64,
    cancelled: AtomicU64,
    total_wait_us: AtomicU64,
    total_exec_us: AtomicU64,
    active_workers: AtomicU32,
}

struct Shared {
    global: Mutex<BinaryHeap<QueuedTask>>,
    condvar: Condvar,
    /// Per-worker deques for CRITICAL tasks: LIFO from the owner, FIFO
    /// from a stealer.
    locals: Vec<Mutex<VecDeque<Task>>>,
    cancel_flags: Mutex<HashMap<TaskId, Weak<AtomicBool>>>,
    shutdown: AtomicBool,
    work_stealing: AtomicBool,
    next_sequence: AtomicU64,
    counters: Counters,
}

impl Shared {
    fn try_get_task(&self, worker_index: usize) -> Option<Task> {
        if let Some(task) = self.locals[worker_index].lock().pop_back() {
            return Some(task);
        }

        if let Some(task) = self.global.lock().pop() {
            return Some(task.0);
        }

        if self.work_stealing.load(Ordering::Acquire) {
            return self.try_steal(worker_index);
        }

        None
    }

    fn try_steal(&self, worker_index: usize) -> Option<Task> {
        let count = self.locals.len();
        if count <= 1 {
            return None;
        }

        let mut victim = rand::thread_rng().gen_range(0..count);
        for _ in 0..count - 1 {
            if victim == worker_index {
                victim = (victim + 1) % count;
                continue;
            }

            if let Some(task) = self.locals[victim].lock().pop_front() {
                self.counters.stolen.fetch_add(1, Ordering::Relaxed);
                return Some(task);
            }
            victim = (victim + 1) % count;
        }

        None
    }

    fn worker_loop(&self, worker_index: usize) {
        debug!(worker_index, "worker started");

        while !self.shutdown.load(Ordering::Acquire) {
            let Some(task) = self.try_get_task(worker_index) else {
                let mut global = self.global.lock();
                if global.is_empty() && !self.shutdown.load(Ordering::Acquire) {
                    self.condvar.wait_for(&mut global, IDLE_WAIT);
                }
                continue;
            };

            let task_id = task.id();
            if task.cancel_token().is_cancelled() {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                self.cancel_flags.lock().remove(&task_id);
                continue;
            }

            let wait_us = task.submitted_at.elapsed().as_micros() as u64;
            self.counters.active_workers.fetch_add(1, Ordering::Relaxed);

            let exec_start = Instant::now();
            let ran = task.run();
            let exec_us = exec_start.elapsed().as_micros() as u64;

            self.counters.active_workers.fetch_sub(1, Ordering::Relaxed);

            if ran {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.counters.total_wait_us.fetch_add(wait_us, Ordering::Relaxed);
                self.counters.total_exec_us.fetch_add(exec_us, Ordering::Relaxed);
            } else {
                // Cancellation raced the entry check inside Task::run
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            }

            self.cancel_flags.lock().remove(&task_id);
        }

        debug!(worker_index, "worker exiting");
    }
}

/// Handle for a result produced on the pool.
pub struct TaskFuture<T> {
    receiver: Receiver<T>,
}

impl<T> TaskFuture<T> {
    /// Block until the result is available.
    ///
    /// Returns `None` if the task was cancelled or the pool shut down
    /// before it ran.
    pub fn wait(self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Block up to `timeout` for the result.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// Priority-aware, work-stealing thread pool.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool with `thread_count` workers.
    ///
    /// A count of 0 selects `max(2, available_parallelism)`.
    pub fn new(thread_count: usize) -> Self {
        let thread_count = if thread_count == 0 {
            std::thread::available_parallelism()
                .map_or(2, std::num::NonZeroUsize::get)
                .max(2)
        } else {
            thread_count
        };

        info!(thread_count, "initializing thread pool");

        let shared = Arc::new(Shared {
            global: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            locals: (0..thread_count).map(|_| Mutex::new(VecDeque::new())).collect(),
            cancel_flags: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            work_stealing: AtomicBool::new(true),
            next_sequence: AtomicU64::new(0),
            counters: Counters::default(),
        });

        let workers = (0..thread_count)
            .map(|index| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("quarry-worker-{index}"))
                    .spawn(move || shared.worker_loop(index))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Submit a task for execution. Returns its id for later cancellation.
    pub fn submit(&self, mut task: Task) -> TaskId {
        if self.shared.shutdown.load(Ordering::Acquire) {
            warn!(name = task.name(), "task submitted after shutdown, dropping");
            return task.id();
        }

        task.sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
        task.submitted_at = Instant::now();

        let task_id = task.id();
        self.shared
            .cancel_flags
            .lock()
            .insert(task_id, task.cancel_token().downgrade());

        if task.priority() == TaskPriority::Critical {
            // Critical tasks bypass the global queue: place on the least
            // loaded local deque
            let target = self
                .shared
                .locals
                .iter()
                .enumerate()
                .min_by_key(|(_, queue)| queue.lock().len())
                .map_or(0, |(index, _)| index);
            self.shared.locals[target].lock().push_back(task);
        } else {
            self.shared.global.lock().push(QueuedTask(task));
        }

        self.shared.condvar.notify_one();
        task_id
    }

    /// Submit a closure and get a future for its result.
    pub fn submit_with_future<T, F>(
        &self,
        func: F,
        priority: TaskPriority,
        name: impl Into<String>,
    ) -> TaskFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        self.submit(Task::new(
            move || {
                let _ = sender.send(func());
            },
            priority,
            name,
        ));
        TaskFuture { receiver }
    }

    /// Cancel a task by id. Returns whether a live flag was found.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let flags = self.shared.cancel_flags.lock();
        if let Some(flag) = flags.get(&task_id).and_then(Weak::upgrade) {
            flag.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Cancel every queued task with priority at or more urgent than
    /// `max_priority`, re-enqueueing the rest.
    pub fn cancel_by_priority(&self, max_priority: TaskPriority) {
        let mut cancelled_ids = Vec::new();
        {
            let mut global = self.shared.global.lock();
            let drained = std::mem::take(&mut *global);

            for entry in drained {
                if entry.0.priority() <= max_priority {
                    entry.0.cancel_token().cancel();
                    self.shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    cancelled_ids.push(entry.0.id());
                } else {
                    global.push(entry);
                }
            }
        }

        // Taken after releasing the queue lock; submit acquires these in the
        // opposite order
        let mut flags = self.shared.cancel_flags.lock();
        for task_id in cancelled_ids {
            flags.remove(&task_id);
        }
    }

    /// Number of tasks waiting in the global and local queues.
    pub fn pending_count(&self) -> usize {
        let global = self.shared.global.lock().len();
        let locals: usize = self.shared.locals.iter().map(|queue| queue.lock().len()).sum();
        global + locals
    }

    /// Snapshot the pool counters.
    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            completed: counters.completed.load(Ordering::Relaxed),
            stolen: counters.stolen.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            total_wait_us: counters.total_wait_us.load(Ordering::Relaxed),
            total_exec_us: counters.total_exec_us.load(Ordering::Relaxed),
            active_workers: counters.active_workers.load(Ordering::Relaxed),
        }
    }

    /// Enable or disable work stealing at runtime.
    pub fn set_work_stealing(&self, enabled: bool) {
        self.shared.work_stealing.store(enabled, Ordering::Release);
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let _global = self.shared.global.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.condvar.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        let stats = self.stats();
        info!(
            completed = stats.completed,
            stolen = stats.stolen,
            cancelled = stats.cancelled,
            "thread pool shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    /// A pool with one worker plus a gate task occupying it, so that
    /// subsequent submissions queue up in a known state.
    fn gated_single_worker() -> (ThreadPool, crossbeam_channel::Sender<()>) {
        let pool = ThreadPool::new(1);
        let (release, gate) = unbounded::<()>();
        pool.submit(Task::new(
            move || {
                let _ = gate.recv();
            },
            TaskPriority::Critical,
            "gate",
        ));
        // Give the worker time to pick the gate up
        std::thread::sleep(Duration::from_millis(20));
        (pool, release)
    }

    #[test]
    fn fifo_within_priority() {
        let (pool, release) = gated_single_worker();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let order = order.clone();
            pool.submit(Task::new(
                move || order.lock().push(label),
                TaskPriority::Normal,
                label,
            ));
        }

        release.send(()).unwrap();
        let done = pool.submit_with_future(|| (), TaskPriority::Idle, "done");
        done.wait().unwrap();

        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn high_priority_runs_before_low() {
        let (pool, release) = gated_single_worker();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_low = order.clone();
        pool.submit(Task::new(
            move || order_low.lock().push("low"),
            TaskPriority::Low,
            "low",
        ));
        let order_high = order.clone();
        pool.submit(Task::new(
            move || order_high.lock().push("high"),
            TaskPriority::High,
            "high",
        ));

        release.send(()).unwrap();
        let done = pool.submit_with_future(|| (), TaskPriority::Idle, "done");
        done.wait().unwrap();

        assert_eq!(*order.lock(), vec!["high", "low"]);
    }

    #[test]
    fn cancelled_task_is_skipped() {
        let (pool, release) = gated_single_worker();
        let ran = Arc::new(AtomicBool::new(false));

        let ran_inner = ran.clone();
        let task_id = pool.submit(Task::new(
            move || ran_inner.store(true, Ordering::SeqCst),
            TaskPriority::Normal,
            "doomed",
        ));

        assert!(pool.cancel(task_id));

        release.send(()).unwrap();
        let done = pool.submit_with_future(|| (), TaskPriority::Idle, "done");
        done.wait().unwrap();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(pool.stats().cancelled >= 1);
    }

    #[test]
    fn cancel_unknown_task_returns_false() {
        let pool = ThreadPool::new(1);
        assert!(!pool.cancel(u64::MAX));
    }

    #[test]
    fn cancel_by_priority_cancels_up_to_threshold() {
        let (pool, release) = gated_single_worker();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_high = order.clone();
        pool.submit(Task::new(
            move || order_high.lock().push("high"),
            TaskPriority::High,
            "high",
        ));
        let order_idle = order.clone();
        pool.submit(Task::new(
            move || order_idle.lock().push("idle"),
            TaskPriority::Idle,
            "idle",
        ));

        // Everything at Low urgency or above is cancelled; Idle survives
        pool.cancel_by_priority(TaskPriority::Low);

        release.send(()).unwrap();
        let done = pool.submit_with_future(|| (), TaskPriority::Idle, "done");
        done.wait().unwrap();

        assert_eq!(*order.lock(), vec!["idle"]);
    }

    #[test]
    fn future_delivers_result() {
        let pool = ThreadPool::new(2);
        let future = pool.submit_with_future(|| 6 * 7, TaskPriority::Normal, "mul");
        assert_eq!(future.wait(), Some(42));
    }

    #[test]
    fn all_tasks_complete_across_priorities() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicU64::new(0));

        let priorities = [
            TaskPriority::Critical,
            TaskPriority::High,
            TaskPriority::Normal,
            TaskPriority::Low,
            TaskPriority::Idle,
        ];
        for i in 0..100 {
            let counter = counter.clone();
            pool.submit(Task::new(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                priorities[i % priorities.len()],
                "",
            ));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 100 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn pending_count_reflects_queued_work() {
        let (pool, release) = gated_single_worker();
        for _ in 0..5 {
            pool.submit(Task::new(|| {}, TaskPriority::Normal, ""));
        }
        assert_eq!(pool.pending_count(), 5);

        release.send(()).unwrap();
        let done = pool.submit_with_future(|| (), TaskPriority::Idle, "done");
        done.wait().unwrap();
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn zero_requests_auto_thread_count() {
        let pool = ThreadPool::new(0);
        assert!(pool.thread_count() >= 2);
    }
}
