//! Deferred deletion of orphaned key ranges
//!
//! The [`RangeDeleter`] is the per-collection FIFO of ranges whose documents
//! are no longer owned by this shard and may be physically removed. The
//! metadata manager feeds it only ranges that no running query can still
//! observe; a background worker drains it one bounded batch at a time through
//! the [`DocumentStore`] seam.

use docio_common::{ChunkRange, CollectionName, Error, Notification, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, error};

/// Completion signal for one scheduled range deletion.
///
/// Fulfilled exactly once: with `Ok(())` when the range has been fully
/// deleted, or with an error when the deletion failed or was abandoned
/// ([`Error::Interrupted`]).
pub type CleanupNotification = Notification<Result<()>>;

/// One orphaned range queued for deletion, with its completion signal.
#[derive(Debug)]
pub struct Deletion {
    pub range: ChunkRange,
    pub notification: CleanupNotification,
}

impl Deletion {
    /// Create a deletion with a fresh, unfulfilled notification.
    #[must_use]
    pub fn new(range: ChunkRange) -> Self {
        Self {
            range,
            notification: CleanupNotification::new(),
        }
    }
}

/// Physical removal of documents, performed outside any metadata lock.
///
/// Implementations delete *up to* `max_docs` documents whose keys fall in
/// `range` and report how many they removed; a short count means the range
/// is exhausted.
pub trait DocumentStore: Send + Sync {
    fn delete_range(
        &self,
        collection: &CollectionName,
        range: &ChunkRange,
        max_docs: usize,
    ) -> Result<usize>;
}

/// FIFO of orphan-range deletions awaiting the background worker.
///
/// The queue carries its own lock: the worker synchronizes with the manager
/// only through it, and never takes the manager lock.
#[derive(Debug, Default)]
pub struct RangeDeleter {
    queue: Mutex<VecDeque<Deletion>>,
}

impl RangeDeleter {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append deletions in order. Returns true iff the queue transitioned
    /// from empty to non-empty, the signal that a worker must be scheduled.
    pub fn add(&self, deletions: Vec<Deletion>) -> bool {
        let mut queue = self.queue.lock();
        let was_empty = queue.is_empty();
        queue.extend(deletions);
        was_empty && !queue.is_empty()
    }

    /// Fail every pending deletion with `reason` and empty the queue.
    pub fn clear(&self, reason: Error) {
        let drained: Vec<Deletion> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        for deletion in drained {
            deletion.notification.set(Err(reason.clone()));
        }
    }

    /// Number of pending deletions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.queue.lock().len()
    }

    /// True iff nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// The notification of the newest pending deletion overlapping `range`.
    #[must_use]
    pub fn overlaps(&self, range: &ChunkRange) -> Option<CleanupNotification> {
        self.queue
            .lock()
            .iter()
            .rev()
            .find(|deletion| deletion.range.overlaps(range))
            .map(|deletion| deletion.notification.clone())
    }

    /// The pending ranges, oldest first, for diagnostics.
    #[must_use]
    pub fn ranges(&self) -> Vec<ChunkRange> {
        self.queue
            .lock()
            .iter()
            .map(|deletion| deletion.range.clone())
            .collect()
    }

    /// Delete one batch from the head range. Returns true iff more work
    /// remains, in which case the caller should reschedule itself.
    ///
    /// The physical delete runs with no lock held, so a concurrent `clear`
    /// may empty the queue mid-batch; the head is re-validated before it is
    /// popped, and whichever side removes a deletion from the queue is the
    /// side that fulfils its notification.
    pub fn clean_up_next(
        &self,
        store: &dyn DocumentStore,
        collection: &CollectionName,
        max_docs: usize,
    ) -> bool {
        let (range, notification) = {
            let queue = self.queue.lock();
            let Some(head) = queue.front() else {
                return false;
            };
            (head.range.clone(), head.notification.clone())
        };

        let outcome = store.delete_range(collection, &range, max_docs);

        if let Ok(deleted) = &outcome {
            if *deleted >= max_docs {
                // The range may hold more documents; keep it at the head.
                return true;
            }
        }

        let (popped, more) = {
            let mut queue = self.queue.lock();
            let still_head = queue
                .front()
                .is_some_and(|head| head.notification.same(&notification));
            if still_head {
                queue.pop_front();
            }
            (still_head, !queue.is_empty())
        };

        if popped {
            match outcome {
                Ok(deleted) => {
                    debug!(
                        "Finished deleting documents in {} range {} ({} in final batch)",
                        collection, range, deleted
                    );
                    notification.set(Ok(()));
                }
                Err(e) => {
                    error!(
                        "Failed to delete documents in {} range {}: {}",
                        collection, range, e
                    );
                    notification.set(Err(e));
                }
            }
        }

        more
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryStore;
    use docio_common::ShardKey;

    fn key(n: u64) -> ShardKey {
        ShardKey::from_u64(n)
    }

    fn range(a: u64, b: u64) -> ChunkRange {
        ChunkRange::new(key(a), key(b)).unwrap()
    }

    fn collection() -> CollectionName {
        CollectionName::new("testdb.coll").unwrap()
    }

    #[test]
    fn test_add_reports_empty_transition() {
        let deleter = RangeDeleter::new();
        assert!(deleter.is_empty());
        assert!(deleter.add(vec![Deletion::new(range(0, 10))]));
        assert!(!deleter.add(vec![Deletion::new(range(20, 30))]));
        assert!(!deleter.add(vec![]));
        assert_eq!(deleter.size(), 2);
    }

    #[test]
    fn test_overlaps_prefers_newest() {
        let deleter = RangeDeleter::new();
        let older = Deletion::new(range(0, 10));
        let newer = Deletion::new(range(5, 15));
        let newer_notification = newer.notification.clone();
        deleter.add(vec![older, newer]);

        let found = deleter.overlaps(&range(7, 8)).unwrap();
        assert!(found.same(&newer_notification));
        assert!(deleter.overlaps(&range(40, 50)).is_none());
    }

    #[test]
    fn test_clear_fails_all_pending() {
        let deleter = RangeDeleter::new();
        let first = Deletion::new(range(0, 10));
        let second = Deletion::new(range(20, 30));
        let notifications = [first.notification.clone(), second.notification.clone()];
        deleter.add(vec![first, second]);

        deleter.clear(Error::interrupted("collection dropped"));

        assert!(deleter.is_empty());
        for notification in notifications {
            assert!(notification.get().unwrap().unwrap_err().is_interrupted());
        }
    }

    #[test]
    fn test_clean_up_next_drains_in_batches() {
        let deleter = RangeDeleter::new();
        let store = MemoryStore::new();
        store.insert_docs(0..300);
        let deletion = Deletion::new(range(0, 300));
        let notification = deletion.notification.clone();
        deleter.add(vec![deletion]);

        // two full batches keep the range at the head
        assert!(deleter.clean_up_next(&store, &collection(), 128));
        assert!(!notification.is_set());
        assert!(deleter.clean_up_next(&store, &collection(), 128));
        assert_eq!(store.len(), 300 - 256);

        // the short batch finishes the range
        assert!(!deleter.clean_up_next(&store, &collection(), 128));
        assert_eq!(store.len(), 0);
        assert!(notification.get().unwrap().is_ok());
        assert!(deleter.is_empty());
    }

    #[test]
    fn test_clean_up_next_fifo_across_ranges() {
        let deleter = RangeDeleter::new();
        let store = MemoryStore::new();
        store.insert_docs(0..10);
        store.insert_docs(20..30);
        deleter.add(vec![Deletion::new(range(0, 10)), Deletion::new(range(20, 30))]);

        assert!(deleter.clean_up_next(&store, &collection(), 128));
        assert!(!deleter.clean_up_next(&store, &collection(), 128));
        assert_eq!(store.completed(), vec![range(0, 10), range(20, 30)]);
    }

    #[test]
    fn test_clean_up_next_failure_fails_notification() {
        let deleter = RangeDeleter::new();
        let store = MemoryStore::new();
        store.fail_next(Error::storage("disk unplugged"));
        let deletion = Deletion::new(range(0, 10));
        let notification = deletion.notification.clone();
        deleter.add(vec![deletion]);

        assert!(!deleter.clean_up_next(&store, &collection(), 128));
        assert_eq!(
            notification.get().unwrap(),
            Err(Error::storage("disk unplugged"))
        );
        assert!(deleter.is_empty());
    }

    #[test]
    fn test_clean_up_next_on_empty_queue() {
        let deleter = RangeDeleter::new();
        let store = MemoryStore::new();
        assert!(!deleter.clean_up_next(&store, &collection(), 128));
    }
}
