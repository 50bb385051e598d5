//! Immutable collection metadata snapshots
//!
//! A [`CollectionMetadata`] records which chunks of a sharded collection this
//! shard owns, at one placement version. Snapshots are immutable once
//! constructed; a refresh installs a whole new snapshot rather than mutating
//! the current one, so readers can consult a pinned snapshot without locking.

use docio_common::{ChunkRange, ChunkVersion, Error, Result, ShardKey};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// True iff any range in `map` (min → max, pairwise disjoint) intersects
/// `range`.
pub(crate) fn range_map_overlaps(map: &BTreeMap<ShardKey, ShardKey>, range: &ChunkRange) -> bool {
    // The only candidate is the entry with the greatest min below range.max.
    map.range(..range.max())
        .next_back()
        .is_some_and(|(_, max)| max > range.min())
}

/// The end of the range in `map` covering `key`, if one does.
fn covering_max<'a>(map: &'a BTreeMap<ShardKey, ShardKey>, key: &ShardKey) -> Option<&'a ShardKey> {
    map.range(..=key)
        .next_back()
        .and_then(|(_, max)| (max > key).then_some(max))
}

/// The greatest range end at or below `key`. Callers must have established
/// that `key` itself is uncovered.
fn floor_end(map: &BTreeMap<ShardKey, ShardKey>, key: &ShardKey) -> ShardKey {
    map.range(..=key)
        .next_back()
        .map(|(_, max)| max.clone())
        .unwrap_or(ShardKey::MIN)
}

/// The least range start strictly above `key`.
fn ceil_start(map: &BTreeMap<ShardKey, ShardKey>, key: &ShardKey) -> ShardKey {
    map.range((Bound::Excluded(key), Bound::Unbounded))
        .next()
        .map(|(min, _)| min.clone())
        .unwrap_or(ShardKey::MAX)
}

/// One shard's view of a sharded collection at a single placement version.
#[derive(Clone, PartialEq, Eq)]
pub struct CollectionMetadata {
    /// Owned chunks, min → max, pairwise disjoint.
    chunks: BTreeMap<ShardKey, ShardKey>,
    coll_version: ChunkVersion,
    shard_version: ChunkVersion,
}

impl CollectionMetadata {
    /// Build a snapshot from owned chunk ranges and its versions.
    ///
    /// Rejects unsharded version markers, versions from different epochs, a
    /// shard version above the collection version, and overlapping chunks.
    pub fn new(
        ranges: impl IntoIterator<Item = ChunkRange>,
        coll_version: ChunkVersion,
        shard_version: ChunkVersion,
    ) -> Result<Self> {
        if coll_version.is_unsharded() || shard_version.is_unsharded() {
            return Err(Error::InvalidMetadata(
                "chunk versions must describe a sharded collection".into(),
            ));
        }
        if !coll_version.same_epoch(&shard_version) {
            return Err(Error::InvalidMetadata(
                "collection and shard versions must share an epoch".into(),
            ));
        }
        if shard_version.major_minor() > coll_version.major_minor() {
            return Err(Error::InvalidMetadata(
                "shard version cannot exceed the collection version".into(),
            ));
        }

        let mut chunks = BTreeMap::new();
        for range in ranges {
            if range_map_overlaps(&chunks, &range) {
                return Err(Error::InvalidMetadata(format!(
                    "chunk {range} overlaps another owned chunk"
                )));
            }
            chunks.insert(range.min().clone(), range.max().clone());
        }

        Ok(Self {
            chunks,
            coll_version,
            shard_version,
        })
    }

    /// The collection-wide placement version.
    #[must_use]
    pub fn coll_version(&self) -> ChunkVersion {
        self.coll_version
    }

    /// The highest version of any chunk owned by this shard.
    #[must_use]
    pub fn shard_version(&self) -> ChunkVersion {
        self.shard_version
    }

    /// Number of chunks owned by this shard.
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// True iff `range` intersects any chunk owned by this shard.
    #[must_use]
    pub fn range_overlaps_chunk(&self, range: &ChunkRange) -> bool {
        range_map_overlaps(&self.chunks, range)
    }

    /// True iff `key` falls inside a chunk owned by this shard.
    #[must_use]
    pub fn owns_key(&self, key: &ShardKey) -> bool {
        covering_max(&self.chunks, key).is_some()
    }

    /// The owned chunks in key order.
    #[must_use]
    pub fn chunk_ranges(&self) -> Vec<ChunkRange> {
        self.chunks
            .iter()
            .map(|(min, max)| ChunkRange::new_unchecked(min.clone(), max.clone()))
            .collect()
    }

    /// The maximal key range containing `from` that is covered by neither an
    /// owned chunk nor a `receiving` range.
    ///
    /// When `from` lands inside a covered range the search skips forward to
    /// that range's end. Returns `None` once the keyspace is exhausted.
    pub fn next_orphan_range(
        &self,
        receiving: &BTreeMap<ShardKey, ShardKey>,
        from: &ShardKey,
    ) -> Option<ChunkRange> {
        let mut lookup = from.clone();
        loop {
            if lookup >= ShardKey::MAX {
                return None;
            }

            // Owned and receiving ranges are disjoint, so at most one covers
            // the lookup key.
            if let Some(end) =
                covering_max(&self.chunks, &lookup).or_else(|| covering_max(receiving, &lookup))
            {
                lookup = end.clone();
                continue;
            }

            let lower = floor_end(&self.chunks, &lookup).max(floor_end(receiving, &lookup));
            let upper = ceil_start(&self.chunks, &lookup).min(ceil_start(receiving, &lookup));
            return Some(ChunkRange::new_unchecked(lower, upper));
        }
    }
}

impl fmt::Display for CollectionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "collection version {}, shard version {}",
            self.coll_version, self.shard_version
        )
    }
}

impl fmt::Debug for CollectionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionMetadata")
            .field("chunks", &self.chunk_ranges())
            .field("coll_version", &self.coll_version)
            .field("shard_version", &self.shard_version)
            .finish()
    }
}
