//! Core type definitions for docio
//!
//! This module defines the fundamental types used throughout the shard node:
//! shard keys, chunk ranges, chunk versions, and collection names.

use bytes::Bytes;
use derive_more::Display;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// A shard key value: an opaque, totally ordered byte string.
///
/// The keyspace carries two sentinels, [`ShardKey::MIN`] below every byte
/// string and [`ShardKey::MAX`] above, so that chunk arithmetic can express
/// "everything below the first chunk" and "everything above the last chunk"
/// without a separate bound type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardKey(KeyRepr);

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum KeyRepr {
    Min,
    Bytes(Bytes),
    Max,
}

impl ShardKey {
    /// The key below every byte string.
    pub const MIN: ShardKey = ShardKey(KeyRepr::Min);

    /// The key above every byte string.
    pub const MAX: ShardKey = ShardKey(KeyRepr::Max);

    /// Create a key from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(KeyRepr::Bytes(bytes.into()))
    }

    /// Create a key from an integer, big-endian encoded so that numeric
    /// order and key order agree.
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self::new(value.to_be_bytes().to_vec())
    }

    /// The raw bytes of this key, or `None` for the sentinels.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.0 {
            KeyRepr::Bytes(b) => Some(b),
            KeyRepr::Min | KeyRepr::Max => None,
        }
    }

    /// True for [`ShardKey::MIN`] and [`ShardKey::MAX`].
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        matches!(self.0, KeyRepr::Min | KeyRepr::Max)
    }
}

impl From<&[u8]> for ShardKey {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<Vec<u8>> for ShardKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            KeyRepr::Min => write!(f, "$minKey"),
            KeyRepr::Max => write!(f, "$maxKey"),
            KeyRepr::Bytes(b) => write!(f, "{}", hex::encode(b)),
        }
    }
}

impl fmt::Debug for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardKey({})", self)
    }
}

// Keys serialize as strings ("$minKey", "$maxKey", or lowercase hex) so the
// diagnostics document stays readable and round-trips.
impl Serialize for ShardKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ShardKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = ShardKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"$minKey\", \"$maxKey\", or a hex string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ShardKey, E> {
                match v {
                    "$minKey" => Ok(ShardKey::MIN),
                    "$maxKey" => Ok(ShardKey::MAX),
                    hex_str => hex::decode(hex_str)
                        .map(ShardKey::from)
                        .map_err(|_| E::custom(format!("invalid key encoding: {hex_str:?}"))),
                }
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}

/// A half-open key range `[min, max)`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    min: ShardKey,
    max: ShardKey,
}

impl ChunkRange {
    /// Create a range, validating `min < max`.
    pub fn new(min: ShardKey, max: ShardKey) -> Result<Self, KeyRangeError> {
        if min >= max {
            return Err(KeyRangeError::Empty);
        }
        Ok(Self { min, max })
    }

    /// Create a range whose bounds are already known to be ordered.
    #[must_use]
    pub fn new_unchecked(min: ShardKey, max: ShardKey) -> Self {
        debug_assert!(min < max, "chunk range [{min}, {max}) is empty");
        Self { min, max }
    }

    /// The inclusive lower bound.
    #[must_use]
    pub fn min(&self) -> &ShardKey {
        &self.min
    }

    /// The exclusive upper bound.
    #[must_use]
    pub fn max(&self) -> &ShardKey {
        &self.max
    }

    /// True iff the two half-open ranges intersect.
    #[must_use]
    pub fn overlaps(&self, other: &ChunkRange) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// True iff `key` falls within `[min, max)`.
    #[must_use]
    pub fn contains(&self, key: &ShardKey) -> bool {
        *key >= self.min && *key < self.max
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

impl fmt::Debug for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkRange{}", self)
    }
}

/// Errors that can occur when creating a chunk range
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyRangeError {
    #[error("range lower bound must be strictly below its upper bound")]
    Empty,
}

/// Identifier minted when a collection is created or recreated.
///
/// Two epochs compare equal only between incarnations of the same logical
/// collection; a differing epoch on refresh means drop-and-recreate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionEpoch(Uuid);

impl CollectionEpoch {
    /// Mint a fresh epoch.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil epoch, carried only by the unsharded version marker.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// True for the nil epoch.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for CollectionEpoch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CollectionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionEpoch({})", self.0)
    }
}

impl fmt::Display for CollectionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chunk placement version: an epoch plus a `(major, minor)` pair that is
/// monotonically increasing within the epoch.
///
/// Versions from different epochs are incomparable, which is why this type
/// implements [`PartialOrd`] but not `Ord`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkVersion {
    epoch: CollectionEpoch,
    major: u32,
    minor: u32,
}

impl ChunkVersion {
    /// Create a version within an epoch.
    #[must_use]
    pub const fn new(epoch: CollectionEpoch, major: u32, minor: u32) -> Self {
        Self {
            epoch,
            major,
            minor,
        }
    }

    /// The marker version of an unsharded collection.
    #[must_use]
    pub const fn unsharded() -> Self {
        Self::new(CollectionEpoch::nil(), 0, 0)
    }

    /// True for the unsharded marker.
    #[must_use]
    pub fn is_unsharded(&self) -> bool {
        self.epoch.is_nil() && self.major == 0 && self.minor == 0
    }

    /// The epoch this version belongs to.
    #[must_use]
    pub fn epoch(&self) -> CollectionEpoch {
        self.epoch
    }

    /// True iff `other` was minted in the same collection incarnation.
    #[must_use]
    pub fn same_epoch(&self, other: &ChunkVersion) -> bool {
        self.epoch == other.epoch
    }

    /// The `(major, minor)` pair, ordered only within one epoch.
    #[must_use]
    pub fn major_minor(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

impl PartialOrd for ChunkVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.epoch != other.epoch {
            return None;
        }
        Some(self.major_minor().cmp(&other.major_minor()))
    }
}

impl fmt::Display for ChunkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}||{}", self.major, self.minor, self.epoch)
    }
}

impl fmt::Debug for ChunkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkVersion({})", self)
    }
}

/// A fully qualified collection name, `<database>.<collection>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct CollectionName(String);

impl CollectionName {
    /// Create a collection name, validating the `db.collection` form.
    pub fn new(name: impl Into<String>) -> Result<Self, CollectionNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), CollectionNameError> {
        let Some((db, coll)) = name.split_once('.') else {
            return Err(CollectionNameError::MissingSeparator);
        };
        if db.is_empty() {
            return Err(CollectionNameError::EmptyDatabase);
        }
        if coll.is_empty() {
            return Err(CollectionNameError::EmptyCollection);
        }
        Ok(())
    }
}

impl fmt::Debug for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionName({:?})", self.0)
    }
}

/// Errors that can occur when creating a collection name
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollectionNameError {
    #[error("collection name must have the form <database>.<collection>")]
    MissingSeparator,
    #[error("database part of collection name is empty")]
    EmptyDatabase,
    #[error("collection part of collection name is empty")]
    EmptyCollection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let a = ShardKey::from_u64(1);
        let b = ShardKey::from_u64(2);
        assert!(a < b);
        assert!(ShardKey::MIN < a);
        assert!(b < ShardKey::MAX);
        assert!(ShardKey::MIN < ShardKey::MAX);
    }

    #[test]
    fn test_from_u64_preserves_numeric_order() {
        let keys: Vec<ShardKey> = [0u64, 1, 255, 256, 1 << 32, u64::MAX]
            .iter()
            .map(|&n| ShardKey::from_u64(n))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_range_overlap() {
        let r = |a, b| ChunkRange::new(ShardKey::from_u64(a), ShardKey::from_u64(b)).unwrap();
        assert!(r(0, 10).overlaps(&r(5, 15)));
        assert!(r(5, 15).overlaps(&r(0, 10)));
        assert!(r(0, 10).overlaps(&r(0, 10)));
        // adjacent half-open ranges do not overlap
        assert!(!r(0, 10).overlaps(&r(10, 20)));
        assert!(!r(10, 20).overlaps(&r(0, 10)));
    }

    #[test]
    fn test_range_rejects_empty() {
        assert!(ChunkRange::new(ShardKey::from_u64(5), ShardKey::from_u64(5)).is_err());
        assert!(ChunkRange::new(ShardKey::from_u64(6), ShardKey::from_u64(5)).is_err());
        assert!(ChunkRange::new(ShardKey::MAX, ShardKey::MIN).is_err());
    }

    #[test]
    fn test_range_contains() {
        let r = ChunkRange::new(ShardKey::from_u64(10), ShardKey::from_u64(20)).unwrap();
        assert!(r.contains(&ShardKey::from_u64(10)));
        assert!(r.contains(&ShardKey::from_u64(19)));
        assert!(!r.contains(&ShardKey::from_u64(20)));
        assert!(!r.contains(&ShardKey::from_u64(9)));
    }

    #[test]
    fn test_version_ordering_within_epoch() {
        let e = CollectionEpoch::new();
        let v1 = ChunkVersion::new(e, 1, 0);
        let v2 = ChunkVersion::new(e, 1, 5);
        let v3 = ChunkVersion::new(e, 2, 0);
        assert!(v1 < v2);
        assert!(v2 < v3);
        assert!(v3 > v1);
    }

    #[test]
    fn test_version_incomparable_across_epochs() {
        let a = ChunkVersion::new(CollectionEpoch::new(), 5, 0);
        let b = ChunkVersion::new(CollectionEpoch::new(), 1, 0);
        assert_eq!(a.partial_cmp(&b), None);
        assert!(!a.same_epoch(&b));
    }

    #[test]
    fn test_unsharded_marker() {
        assert!(ChunkVersion::unsharded().is_unsharded());
        assert!(!ChunkVersion::new(CollectionEpoch::new(), 0, 0).is_unsharded());
    }

    #[test]
    fn test_key_serde_round_trip() {
        for key in [ShardKey::MIN, ShardKey::MAX, ShardKey::from_u64(42)] {
            let json = serde_json::to_string(&key).unwrap();
            let back: ShardKey = serde_json::from_str(&json).unwrap();
            assert_eq!(key, back);
        }
        assert_eq!(serde_json::to_string(&ShardKey::MIN).unwrap(), "\"$minKey\"");
    }

    #[test]
    fn test_range_serde_round_trip() {
        let r = ChunkRange::new(ShardKey::from_u64(1), ShardKey::MAX).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        let back: ChunkRange = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn test_collection_name_validation() {
        assert!(CollectionName::new("db.coll").is_ok());
        assert!(CollectionName::new("db.system.views").is_ok());
        assert!(CollectionName::new("nodot").is_err());
        assert!(CollectionName::new(".coll").is_err());
        assert!(CollectionName::new("db.").is_err());
    }
}
