//! Per-collection shard metadata lifecycle
//!
//! A [`MetadataManager`] tracks, for one sharded collection on this shard
//! node, which metadata snapshot is authoritative, which superseded snapshots
//! are still pinned by running queries, which ranges are being migrated in,
//! and which orphaned ranges await deletion once no query can observe them.
//!
//! Each snapshot lives in a `Tracker` together with a pin count and the list
//! of deletions gated on its retirement. Queries pin the active tracker
//! through a [`ScopedMetadata`]; a refresh rotates the active tracker onto
//! the back of a retirement queue, and a tracker retires once it reaches the
//! front of that queue with no pins left. Retirement hands the tracker's
//! orphan list to the [`RangeDeleter`](crate::RangeDeleter), preserving both
//! per-tracker insertion order and cross-tracker retirement order.
//!
//! Lock discipline: all manager state sits behind one mutex. Each tracker
//! additionally carries a tiny mutex guarding only its back-pointer to the
//! manager, so a pin released after the manager is gone can notice that and
//! do nothing. The fixed order is back-pointer lock first, manager lock
//! second; manager teardown takes back-pointer locks only after releasing
//! the manager lock, so the two never deadlock.

use crate::deleter::{CleanupNotification, Deletion, DocumentStore, RangeDeleter};
use crate::executor::TaskExecutor;
use crate::metadata::{range_map_overlaps, CollectionMetadata};
use docio_common::{ChunkRange, CleanupConfig, CollectionName, Error, Result, ShardKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// One immutable metadata snapshot plus the bookkeeping that decides when
/// ranges only it could observe become deletable.
struct Tracker {
    /// The snapshot; `None` while the collection is unsharded. Never
    /// replaced after construction.
    metadata: Option<CollectionMetadata>,
    /// Number of live pins. Transitions happen only under the manager lock.
    usage_count: AtomicU32,
    /// Deletions gated on this tracker's retirement. Appended to only while
    /// the tracker is active; only touched with the manager lock held.
    orphans: Mutex<Vec<Deletion>>,
    /// Back-pointer to the owning manager, cleared at manager teardown.
    /// Always locked before the manager lock (see `release_pin`).
    back_ref: Mutex<Option<Weak<ManagerInner>>>,
}

impl Tracker {
    fn new(metadata: Option<CollectionMetadata>, manager: Weak<ManagerInner>) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            usage_count: AtomicU32::new(0),
            orphans: Mutex::new(Vec::new()),
            back_ref: Mutex::new(Some(manager)),
        })
    }

    fn in_use(&self) -> bool {
        self.usage_count.load(Ordering::Relaxed) != 0
    }

    fn orphan_count(&self) -> usize {
        self.orphans.lock().len()
    }
}

/// A reader's pin on one metadata snapshot.
///
/// While the pin is held, the snapshot it refers to stays valid even across
/// refreshes and manager teardown. Dropping the pin releases it; releasing
/// the last pin on the oldest superseded snapshot lets deferred orphan
/// deletions flow to the deleter. Pins move but do not clone.
pub struct ScopedMetadata {
    tracker: Option<Arc<Tracker>>,
}

impl ScopedMetadata {
    /// Pin `tracker`. Caller must hold the manager lock.
    fn pin(tracker: &Arc<Tracker>) -> Self {
        tracker.usage_count.fetch_add(1, Ordering::Relaxed);
        Self {
            tracker: Some(Arc::clone(tracker)),
        }
    }

    /// The pinned snapshot, or `None` when the collection was unsharded at
    /// pin time.
    #[must_use]
    pub fn metadata(&self) -> Option<&CollectionMetadata> {
        self.tracker.as_ref().and_then(|t| t.metadata.as_ref())
    }

    /// True iff this pin holds a sharded snapshot.
    #[must_use]
    pub fn is_sharded(&self) -> bool {
        self.metadata().is_some()
    }
}

impl Drop for ScopedMetadata {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            release_pin(tracker);
        }
    }
}

impl fmt::Debug for ScopedMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.metadata() {
            Some(metadata) => write!(f, "ScopedMetadata({})", metadata),
            None => write!(f, "ScopedMetadata(unsharded)"),
        }
    }
}

fn release_pin(tracker: Arc<Tracker>) {
    // Lock order: tracker back-pointer first, then the manager lock. The
    // only other holder of the back-pointer lock is manager teardown, which
    // never holds the manager lock at the same time.
    let back_ref = tracker.back_ref.lock();
    let Some(inner) = back_ref.as_ref().and_then(Weak::upgrade) else {
        // Manager is gone; dropping the Arc is all that remains.
        return;
    };
    let mut state = inner.state.lock();
    drop(back_ref);

    let previous = tracker.usage_count.fetch_sub(1, Ordering::Relaxed);
    assert!(previous != 0, "metadata pin released with a zero usage count");
    if previous == 1 && !state.shutting_down {
        // Any pin hitting zero retires every tracker older than the oldest
        // one still in use; the active tracker's count may rise again.
        inner.retire_expired(&mut state);
    }
}

/// Diagnostics document for one collection's sharding state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDiagnostics {
    /// Orphan ranges queued for deletion, oldest first.
    pub ranges_to_clean: Vec<ChunkRange>,
    /// Ranges currently being migrated in.
    pub pending_chunks: Vec<ChunkRange>,
    /// Chunks owned by the active snapshot.
    pub active_metadata_ranges: Vec<ChunkRange>,
}

struct ManagerState {
    /// The authoritative snapshot. Never absent; wraps `None` metadata while
    /// the collection is unsharded.
    active: Arc<Tracker>,
    /// Superseded trackers, oldest at the front.
    retired: VecDeque<Arc<Tracker>>,
    /// Ranges being migrated in, min → max. Not yet queryable.
    receiving: BTreeMap<ShardKey, ShardKey>,
    shutting_down: bool,
}

impl ManagerState {
    /// True iff `range` intersects a chunk of the active snapshot or of any
    /// superseded snapshot still pinned by a query.
    fn overlaps_in_use_chunk(&self, range: &ChunkRange) -> bool {
        if self
            .active
            .metadata
            .as_ref()
            .is_some_and(|m| m.range_overlaps_chunk(range))
        {
            // Pin count is irrelevant for the active snapshot.
            return true;
        }
        self.retired.iter().any(|tracker| {
            tracker.in_use()
                && tracker
                    .metadata
                    .as_ref()
                    .is_some_and(|m| m.range_overlaps_chunk(range))
        })
    }

    /// The notification of the newest deferred deletion overlapping `range`:
    /// active-tracker orphans first, then retired trackers newest to oldest.
    fn overlaps_in_use_cleanups(&self, range: &ChunkRange) -> Option<CleanupNotification> {
        for deletion in self.active.orphans.lock().iter().rev() {
            if deletion.range.overlaps(range) {
                return Some(deletion.notification.clone());
            }
        }
        for tracker in self.retired.iter().rev() {
            for deletion in tracker.orphans.lock().iter().rev() {
                if deletion.range.overlaps(range) {
                    return Some(deletion.notification.clone());
                }
            }
        }
        None
    }
}

struct ManagerInner {
    collection: CollectionName,
    config: CleanupConfig,
    executor: Arc<dyn TaskExecutor>,
    store: Arc<dyn DocumentStore>,
    /// Self-locked; the background worker synchronizes with the manager only
    /// through this queue.
    ranges_to_clean: RangeDeleter,
    state: Mutex<ManagerState>,
}

impl ManagerInner {
    /// Rotate `metadata` in as the active snapshot and retire whatever the
    /// rotation unblocked. Caller holds the manager lock.
    fn set_active(self: &Arc<Self>, state: &mut ManagerState, metadata: Option<CollectionMetadata>) {
        let fresh = Tracker::new(metadata, Arc::downgrade(self));
        let superseded = std::mem::replace(&mut state.active, fresh);
        state.retired.push_back(superseded);
        self.retire_expired(state);
    }

    /// Pop retired trackers from the front while they have no pins, handing
    /// each one's orphans to the deleter in order. Once the queue is empty
    /// the active tracker's own orphans have no older snapshot left that
    /// could observe them, so they are handed over as well.
    fn retire_expired(self: &Arc<Self>, state: &mut ManagerState) {
        loop {
            let orphans = {
                let Some(front) = state.retired.front() else {
                    break;
                };
                if front.in_use() {
                    break;
                }
                std::mem::take(&mut *front.orphans.lock())
            };
            if !orphans.is_empty() {
                info!(
                    "Queries possibly dependent on {} range(s) finished; scheduling deletion",
                    self.collection
                );
                self.push_list_to_clean(orphans);
            }
            state.retired.pop_front();
        }

        if state.retired.is_empty() {
            let orphans = std::mem::take(&mut *state.active.orphans.lock());
            if !orphans.is_empty() {
                info!(
                    "Queries possibly dependent on {} range(s) finished; scheduling deletion",
                    self.collection
                );
                self.push_list_to_clean(orphans);
            }
        }
    }

    fn push_range_to_clean(self: &Arc<Self>, range: ChunkRange) -> CleanupNotification {
        let deletion = Deletion::new(range);
        let notification = deletion.notification.clone();
        self.push_list_to_clean(vec![deletion]);
        notification
    }

    fn push_list_to_clean(self: &Arc<Self>, deletions: Vec<Deletion>) {
        if self.ranges_to_clean.add(deletions) {
            schedule_cleanup(self);
        }
    }

    /// Move every deferred orphan into the deleter queue, then fail the whole
    /// queue: the collection was dropped, became unsharded, or is shutting
    /// down, so pending deletions are abandoned rather than performed.
    fn clear_all_cleanups(self: &Arc<Self>, state: &mut ManagerState) {
        let mut abandoned = Vec::new();
        for tracker in &state.retired {
            abandoned.append(&mut *tracker.orphans.lock());
        }
        abandoned.append(&mut *state.active.orphans.lock());
        if !abandoned.is_empty() {
            self.push_list_to_clean(abandoned);
        }
        self.ranges_to_clean.clear(Error::interrupted(format!(
            "range deletions in {} abandoned because collection was dropped or became unsharded",
            self.collection
        )));
    }
}

/// Post one cleanup batch to the executor. The task holds only a weak
/// reference, so a torn-down manager simply stops the chain.
fn schedule_cleanup(inner: &Arc<ManagerInner>) {
    let weak = Arc::downgrade(inner);
    inner.executor.schedule(Box::new(move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let limit = inner.config.batch_limit();
        let again = inner
            .ranges_to_clean
            .clean_up_next(inner.store.as_ref(), &inner.collection, limit);
        if again {
            schedule_cleanup(&inner);
        }
    }));
}

/// Per-collection manager of the versioned metadata snapshot lifecycle.
pub struct MetadataManager {
    inner: Arc<ManagerInner>,
}

impl MetadataManager {
    /// Create a manager for `collection`, initially unsharded.
    pub fn new(
        collection: CollectionName,
        config: CleanupConfig,
        executor: Arc<dyn TaskExecutor>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ManagerInner>| ManagerInner {
            collection,
            config,
            executor,
            store,
            ranges_to_clean: RangeDeleter::new(),
            state: Mutex::new(ManagerState {
                active: Tracker::new(None, weak.clone()),
                retired: VecDeque::new(),
                receiving: BTreeMap::new(),
                shutting_down: false,
            }),
        });
        Self { inner }
    }

    /// The collection this manager serves.
    #[must_use]
    pub fn collection(&self) -> &CollectionName {
        &self.inner.collection
    }

    /// Pin the active snapshot. Always succeeds; the pin reports `None`
    /// metadata while the collection is unsharded.
    pub fn get_active_metadata(&self) -> ScopedMetadata {
        let state = self.inner.state.lock();
        ScopedMetadata::pin(&state.active)
    }

    /// Number of superseded snapshots not yet fully retired.
    #[must_use]
    pub fn number_of_metadata_snapshots(&self) -> usize {
        self.inner.state.lock().retired.len()
    }

    /// Install a newer snapshot fetched from the routing authority, or
    /// `None` when the collection is no longer sharded.
    ///
    /// Stale snapshots (same epoch, version not above the active one) are
    /// ignored. An epoch change means the collection was dropped and
    /// recreated: receiving ranges are forgotten and every pending cleanup is
    /// abandoned. Concurrent readers keep whatever snapshot they pinned.
    pub fn refresh_active_metadata(&self, remote: Option<CollectionMetadata>) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let Some(remote) = remote else {
            let active_desc = state.active.metadata.as_ref().map(|m| m.to_string());
            let Some(active_desc) = active_desc else {
                // Never sharded in the first place. Callers refresh
                // unconditionally, so this is not worth logging.
                assert!(
                    state.receiving.is_empty(),
                    "receiving chunks on a collection that was never sharded"
                );
                assert!(
                    inner.ranges_to_clean.is_empty(),
                    "pending range deletions on a collection that was never sharded"
                );
                return;
            };

            info!(
                "Marking collection {} with {} as no longer sharded",
                inner.collection, active_desc
            );
            state.receiving.clear();
            inner.set_active(&mut state, None);
            inner.clear_all_cleanups(&mut state);
            return;
        };

        assert!(
            !remote.coll_version().is_unsharded() && !remote.shard_version().is_unsharded(),
            "refresh must not install an unsharded version marker"
        );

        let active = state
            .active
            .metadata
            .as_ref()
            .map(|m| (m.coll_version(), m.to_string()));
        let Some((active_version, active_desc)) = active else {
            // Collection is becoming sharded.
            info!(
                "Marking collection {} as sharded with {}",
                inner.collection, remote
            );
            assert!(
                state.receiving.is_empty(),
                "receiving chunks on a collection that was not sharded"
            );
            assert!(
                inner.ranges_to_clean.is_empty(),
                "pending range deletions on a collection that was not sharded"
            );
            inner.set_active(&mut state, Some(remote));
            return;
        };

        let remote_version = remote.coll_version();

        if !active_version.same_epoch(&remote_version) {
            // Dropped and recreated: reset the metadata state entirely.
            info!(
                "Overwriting metadata for collection {} from {} to {} due to epoch change",
                inner.collection, active_desc, remote
            );
            state.receiving.clear();
            inner.set_active(&mut state, Some(remote));
            inner.clear_all_cleanups(&mut state);
            return;
        }

        if active_version.major_minor() >= remote_version.major_minor() {
            debug!(
                "Ignoring refresh of active metadata ({}) with an older {}",
                active_desc, remote
            );
            return;
        }

        info!(
            "Refreshing metadata for collection {} from {} to {}",
            inner.collection, active_desc, remote
        );

        // Receiving ranges the new snapshot owns finished migrating while
        // the refresh was in flight.
        state.receiving.retain(|min, max| {
            let chunk = ChunkRange::new_unchecked(min.clone(), max.clone());
            if remote.range_overlaps_chunk(&chunk) {
                debug!(
                    "Chunk {} in collection {} was migrated to this shard earlier",
                    chunk, inner.collection
                );
                false
            } else {
                true
            }
        });

        inner.set_active(&mut state, Some(remote));
    }

    /// Register `range` as migrating in and schedule a pre-deletion clearing
    /// any stale documents it still holds.
    ///
    /// Fails with [`Error::RangeOverlapConflict`] if the range intersects a
    /// chunk of the active snapshot or of any pinned superseded snapshot.
    pub fn begin_receive(&self, range: ChunkRange) -> Result<CleanupNotification> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        assert!(
            state.active.metadata.is_some(),
            "receiving a chunk on an unsharded collection"
        );

        if state.overlaps_in_use_chunk(&range) {
            return Err(Error::range_overlap(
                "documents in the target range may still be in use on this shard",
            ));
        }

        state
            .receiving
            .insert(range.min().clone(), range.max().clone());
        info!(
            "Scheduling deletion of any documents in {} range {} before migrating in a chunk covering it",
            inner.collection, range
        );
        Ok(inner.push_range_to_clean(range))
    }

    /// Abandon an in-migration of `range`, scheduling deletion of whatever
    /// was already copied. Nothing can be using those documents; calling
    /// this with an in-use range is a caller bug.
    pub fn forget_receive(&self, range: &ChunkRange) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        assert!(
            state.active.metadata.is_some(),
            "abandoning a received chunk on an unsharded collection"
        );
        assert!(
            !state.overlaps_in_use_chunk(range),
            "abandoned receive range {range} overlaps an in-use chunk"
        );

        info!(
            "Abandoning in-migration of {} range {}; scheduling deletion of any documents already copied",
            inner.collection, range
        );

        let removed = state.receiving.remove(range.min());
        assert!(
            removed.is_some(),
            "abandoned receive range {range} was not registered"
        );

        // No notification is handed back; abandonment has no observer.
        inner.push_list_to_clean(vec![Deletion::new(range.clone())]);
    }

    /// Schedule deletion of the orphaned documents in `range`.
    ///
    /// If no running query could observe the range it goes straight to the
    /// deleter; otherwise it is deferred on the active tracker and becomes
    /// eligible once every snapshot that could observe it has retired. The
    /// returned notification fires when the deletion completes or is
    /// abandoned.
    pub fn clean_up_range(&self, range: ChunkRange) -> Result<CleanupNotification> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        assert!(
            state.active.metadata.is_some(),
            "cleaning up a range on an unsharded collection"
        );

        if state
            .active
            .metadata
            .as_ref()
            .is_some_and(|m| m.range_overlaps_chunk(&range))
        {
            return Err(Error::range_overlap(
                "requested deletion range overlaps a live shard chunk",
            ));
        }

        if range_map_overlaps(&state.receiving, &range) {
            return Err(Error::range_overlap(
                "requested deletion range overlaps a chunk being migrated in",
            ));
        }

        if !state.overlaps_in_use_chunk(&range) {
            // No running query can depend on it; delete immediately.
            debug!(
                "Scheduling {} range {} for immediate deletion",
                inner.collection, range
            );
            return Ok(inner.push_range_to_clean(range));
        }

        info!(
            "Scheduling {} range {} for deletion after all possibly-dependent queries finish",
            inner.collection, range
        );
        let deletion = Deletion::new(range);
        let notification = deletion.notification.clone();
        state.active.orphans.lock().push(deletion);
        Ok(notification)
    }

    /// Number of ranges handed to the deleter and not yet drained.
    #[must_use]
    pub fn number_of_ranges_to_clean(&self) -> usize {
        self.inner.ranges_to_clean.size()
    }

    /// Number of deferred deletions still gated on snapshot retirement,
    /// including those on the active tracker.
    #[must_use]
    pub fn number_of_ranges_to_clean_still_in_use(&self) -> usize {
        let state = self.inner.state.lock();
        state.active.orphan_count()
            + state
                .retired
                .iter()
                .map(|tracker| tracker.orphan_count())
                .sum::<usize>()
    }

    /// The notification of the newest pending deletion overlapping `range`,
    /// whether still deferred or already queued; `None` if nothing overlaps.
    #[must_use]
    pub fn track_orphaned_data_cleanup(&self, range: &ChunkRange) -> Option<CleanupNotification> {
        let state = self.inner.state.lock();
        state
            .overlaps_in_use_cleanups(range)
            .or_else(|| self.inner.ranges_to_clean.overlaps(range))
    }

    /// The next range at or above `from` owned by neither this shard nor an
    /// in-flight migration. Requires a sharded active snapshot.
    #[must_use]
    pub fn get_next_orphan_range(&self, from: &ShardKey) -> Option<ChunkRange> {
        let state = self.inner.state.lock();
        assert!(
            state.active.metadata.is_some(),
            "requested next orphan range on an unsharded collection"
        );
        state
            .active
            .metadata
            .as_ref()
            .and_then(|m| m.next_orphan_range(&state.receiving, from))
    }

    /// Snapshot of the manager's state for diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> MetadataDiagnostics {
        let state = self.inner.state.lock();
        MetadataDiagnostics {
            ranges_to_clean: self.inner.ranges_to_clean.ranges(),
            pending_chunks: state
                .receiving
                .iter()
                .map(|(min, max)| ChunkRange::new_unchecked(min.clone(), max.clone()))
                .collect(),
            active_metadata_ranges: state
                .active
                .metadata
                .as_ref()
                .map(|m| m.chunk_ranges())
                .unwrap_or_default(),
        }
    }
}

impl Drop for MetadataManager {
    fn drop(&mut self) {
        let trackers: Vec<Arc<Tracker>> = {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            self.inner.clear_all_cleanups(&mut state);
            let mut trackers: Vec<Arc<Tracker>> = state.retired.drain(..).collect();
            trackers.push(Arc::clone(&state.active));
            trackers
        };

        // Outstanding pins may outlive the manager; null each back-pointer
        // under its own lock, with the manager lock released.
        for tracker in trackers {
            *tracker.back_ref.lock() = None;
        }
    }
}

impl fmt::Debug for MetadataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataManager")
            .field("collection", &self.inner.collection)
            .finish_non_exhaustive()
    }
}
