//! Prioritized task scheduler with per-worker deques and work stealing.
//!
//! The pool is the single scheduling authority for CPU work in the engine.
//! Tasks carry a priority, a diagnostic name, and a shared cancellation
//! flag observable by both the submitter and the executing worker.

pub mod pool;
pub mod task;

pub use pool::{PoolStats, TaskFuture, ThreadPool};
pub use task::{CancelToken, Task, TaskId, TaskPriority};
