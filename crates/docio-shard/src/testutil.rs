//! Test fixtures: a pumped executor and an in-memory document store.

use crate::deleter::DocumentStore;
use crate::executor::{Task, TaskExecutor};
use docio_common::{ChunkRange, CollectionName, Error, Result, ShardKey};
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::ops::Bound;

/// Executor that queues tasks until the test pumps them, so drains happen at
/// deterministic points.
#[derive(Default)]
pub(crate) struct DeferredExecutor {
    tasks: Mutex<VecDeque<Task>>,
}

impl DeferredExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run queued tasks, including any they reschedule, until none remain.
    pub fn run_until_idle(&self) {
        loop {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }
}

impl TaskExecutor for DeferredExecutor {
    fn schedule(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}

/// In-memory document store keyed by shard key, recording which ranges were
/// deleted to completion and in what order.
#[derive(Default)]
pub(crate) struct MemoryStore {
    docs: Mutex<BTreeSet<ShardKey>>,
    completed: Mutex<Vec<ChunkRange>>,
    fail_next: Mutex<Option<Error>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_docs(&self, keys: impl IntoIterator<Item = u64>) {
        let mut docs = self.docs.lock();
        docs.extend(keys.into_iter().map(ShardKey::from_u64));
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    pub fn count_in(&self, range: &ChunkRange) -> usize {
        self.docs
            .lock()
            .range((Bound::Included(range.min()), Bound::Excluded(range.max())))
            .count()
    }

    /// Ranges whose final (short) batch has run, oldest first.
    pub fn completed(&self) -> Vec<ChunkRange> {
        self.completed.lock().clone()
    }

    /// Make the next `delete_range` call fail with `error`.
    pub fn fail_next(&self, error: Error) {
        *self.fail_next.lock() = Some(error);
    }
}

impl DocumentStore for MemoryStore {
    fn delete_range(
        &self,
        _collection: &CollectionName,
        range: &ChunkRange,
        max_docs: usize,
    ) -> Result<usize> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        let mut docs = self.docs.lock();
        let batch: Vec<ShardKey> = docs
            .range((Bound::Included(range.min()), Bound::Excluded(range.max())))
            .take(max_docs)
            .cloned()
            .collect();
        for key in &batch {
            docs.remove(key);
        }
        if batch.len() < max_docs {
            self.completed.lock().push(range.clone());
        }
        Ok(batch.len())
    }
}
