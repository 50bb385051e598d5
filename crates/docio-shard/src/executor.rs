//! Task execution seam for background cleanup work
//!
//! The metadata manager never blocks a caller on deletion I/O; it posts work
//! to a [`TaskExecutor`] and the worker reschedules itself while ranges
//! remain. Embedders provide their own executor or use
//! [`ThreadSpawnExecutor`].

use std::thread;
use tracing::error;

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Schedules a task to run once on a worker thread.
pub trait TaskExecutor: Send + Sync {
    fn schedule(&self, task: Task);
}

/// Executor that services each task on a freshly spawned thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSpawnExecutor;

impl TaskExecutor for ThreadSpawnExecutor {
    fn schedule(&self, task: Task) {
        let spawned = thread::Builder::new()
            .name("collection-range-deleter".into())
            .spawn(task);
        if let Err(e) = spawned {
            error!("Failed to spawn range deleter worker: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docio_common::Notification;

    #[test]
    fn test_thread_spawn_executor_runs_task() {
        let done: Notification<u32> = Notification::new();
        let signal = done.clone();
        ThreadSpawnExecutor.schedule(Box::new(move || signal.set(7)));
        assert_eq!(done.wait(), 7);
    }
}
