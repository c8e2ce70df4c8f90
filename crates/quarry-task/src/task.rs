//! Task records and cancellation tokens.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Unique, monotonically increasing task identifier.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduling priority. Lower discriminant wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskPriority {
    /// Immediate execution needed (e.g. chunks at the observer position)
    Critical = 0,
    /// High priority (e.g. chunks entering the load radius)
    High = 1,
    /// Normal priority
    #[default]
    Normal = 2,
    /// Low priority (e.g. distant chunks, cleanup)
    Low = 3,
    /// Only run when nothing else is pending
    Idle = 4,
}

/// Shared cancellation flag.
///
/// Cloning shares the underlying atomic; the submitter signals, the worker
/// checks at entry and at safe points inside long-running work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Whether two tokens share the same underlying flag
    pub fn ptr_eq(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<AtomicBool> {
        Arc::downgrade(&self.flag)
    }
}

/// A unit of work with scheduling metadata.
pub struct Task {
    func: Box<dyn FnOnce() + Send>,
    priority: TaskPriority,
    name: String,
    id: TaskId,
    cancel: CancelToken,
    /// Submission order within the pool; breaks priority ties FIFO.
    pub(crate) sequence: u64,
    /// Submission time, for wait statistics.
    pub(crate) submitted_at: Instant,
}

impl Task {
    /// Create a task with the given priority and diagnostic name.
    pub fn new(
        func: impl FnOnce() + Send + 'static,
        priority: TaskPriority,
        name: impl Into<String>,
    ) -> Self {
        Self {
            func: Box::new(func),
            priority,
            name: name.into(),
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            cancel: CancelToken::new(),
            sequence: 0,
            submitted_at: Instant::now(),
        }
    }

    /// Create a task that observes an externally owned cancellation token.
    pub fn with_cancel(
        func: impl FnOnce() + Send + 'static,
        priority: TaskPriority,
        name: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            cancel,
            ..Self::new(func, priority, name)
        }
    }

    /// The task's priority
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// The task's unique id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The diagnostic name (may be empty)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's cancellation token
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn run(self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        (self.func)();
        true
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
