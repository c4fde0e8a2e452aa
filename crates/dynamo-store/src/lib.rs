//! Merkle-tree backed key/value store.
//!
//! A [`MerkleStore`] splits a contiguous interval of the 128-bit hash space
//! into `2^depth` equal leaves. Each leaf holds the entries whose key hashes
//! into it and a digest over them; each internal node holds the digest of its
//! two children. Every mutation recomputes the digests on the path from the
//! touched leaf to the root before returning, so two stores with the same
//! geometry can be compared by root alone, and on mismatch by descending only
//! into the subtrees that differ ([`MerkleStore::differing_leaves`]).

use std::collections::BTreeMap;
use std::fmt::{self, Debug};

use dynamo_types::{Key, Value, VectorClock, Versioned};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

mod fingerprint;

pub use fingerprint::Fingerprint;

/// Default tree depth (4096 leaves).
pub const DEFAULT_DEPTH: u32 = 12;

/// Deepest tree accepted.
pub const MAX_DEPTH: u32 = 20;

/// SHA-256 digest of a subtree.
pub type Digest = [u8; 32];

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key {key} hashes to {hash:#034x}, outside [{min:#x}, {max:#x})")]
    KeyOutOfRange {
        key: Key,
        hash: u128,
        min: u128,
        max: u128,
    },

    #[error("cannot compare trees of different shape: {ours:?} vs {theirs:?}")]
    ShapeMismatch { ours: Geometry, theirs: Geometry },

    #[error("invalid tree geometry: {0}")]
    InvalidGeometry(String),
}

// ============================================================================
// Geometry
// ============================================================================

/// Shape of a tree: depth and the half-open hash interval it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    depth: u32,
    min: u128,
    max: u128,
}

impl Geometry {
    pub fn new(depth: u32, min: u128, max: u128) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(StoreError::InvalidGeometry(format!(
                "depth {depth} not in 1..={MAX_DEPTH}"
            )));
        }
        if min >= max {
            return Err(StoreError::InvalidGeometry(format!(
                "empty interval [{min}, {max})"
            )));
        }
        Ok(Self { depth, min, max })
    }

    /// Full hash space at the given depth.
    pub fn with_depth(depth: u32) -> Result<Self> {
        Self::new(depth, 0, u128::MAX)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn leaf_count(&self) -> usize {
        1 << self.depth
    }

    /// Width of the hash interval owned by each leaf.
    pub fn leaf_width(&self) -> u128 {
        (self.max - self.min).div_ceil(1u128 << self.depth)
    }

    /// Leaf owning `hash`, or `None` if it falls outside the interval.
    pub fn leaf_for(&self, hash: u128) -> Option<usize> {
        if hash < self.min || hash >= self.max {
            return None;
        }
        Some(((hash - self.min) / self.leaf_width()) as usize)
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            min: 0,
            max: u128::MAX,
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Key/value map organised as a fixed-depth binary Merkle tree.
#[derive(Clone)]
pub struct MerkleStore<V> {
    geometry: Geometry,
    leaves: Vec<BTreeMap<Key, V>>,
    /// `levels[0]` holds leaf digests, `levels[depth]` holds the root.
    levels: Vec<Vec<Digest>>,
    len: usize,
}

impl<V: Fingerprint> MerkleStore<V> {
    pub fn new(geometry: Geometry) -> Self {
        let leaves = (0..geometry.leaf_count()).map(|_| BTreeMap::new()).collect();
        let mut store = Self {
            geometry,
            leaves,
            levels: Vec::new(),
            len: 0,
        };
        store.rebuild();
        store
    }

    /// Builds a store from initial entries, skipping keys outside the interval.
    pub fn with_entries(geometry: Geometry, entries: impl IntoIterator<Item = (Key, V)>) -> Self {
        let mut store = Self::new(geometry);
        store.extend(entries);
        store
    }

    /// Bulk insert with a single digest rebuild. Keys outside the interval
    /// are skipped; returns how many were.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = (Key, V)>) -> usize {
        let mut skipped = 0;
        for (key, value) in entries {
            match self.geometry.leaf_for(key.digest()) {
                Some(leaf) => {
                    if self.leaves[leaf].insert(key, value).is_none() {
                        self.len += 1;
                    }
                }
                None => skipped += 1,
            }
        }
        self.rebuild();
        skipped
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn locate(&self, key: &Key) -> Result<usize> {
        let hash = key.digest();
        self.geometry
            .leaf_for(hash)
            .ok_or_else(|| StoreError::KeyOutOfRange {
                key: key.clone(),
                hash,
                min: self.geometry.min,
                max: self.geometry.max,
            })
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn insert(&mut self, key: Key, value: V) -> Result<Option<V>> {
        let leaf = self.locate(&key)?;
        let previous = self.leaves[leaf].insert(key, value);
        if previous.is_none() {
            self.len += 1;
        }
        self.refresh_path(leaf);
        Ok(previous)
    }

    pub fn get(&self, key: &Key) -> Result<Option<&V>> {
        let leaf = self.locate(key)?;
        Ok(self.leaves[leaf].get(key))
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.locate(key)
            .is_ok_and(|leaf| self.leaves[leaf].contains_key(key))
    }

    pub fn remove(&mut self, key: &Key) -> Result<Option<V>> {
        let leaf = self.locate(key)?;
        let removed = self.leaves[leaf].remove(key);
        if removed.is_some() {
            self.len -= 1;
            self.refresh_path(leaf);
        }
        Ok(removed)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        for leaf in &mut self.leaves {
            leaf.clear();
        }
        self.len = 0;
        self.rebuild();
    }

    /// Entries in leaf order, then key order within a leaf.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &V)> {
        self.leaves.iter().flat_map(BTreeMap::iter)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.iter().map(|(key, _)| key)
    }

    /// Entries held by one leaf.
    pub fn leaf_entries(&self, leaf: usize) -> impl Iterator<Item = (&Key, &V)> {
        self.leaves.get(leaf).into_iter().flat_map(BTreeMap::iter)
    }

    pub fn root_digest(&self) -> Digest {
        self.digest_at(self.geometry.depth as usize, 0)
    }

    fn digest_at(&self, level: usize, index: usize) -> Digest {
        self.levels[level][index]
    }

    /// Leaves whose contents differ from `other`, found by descending only
    /// into subtrees whose digests disagree.
    pub fn differing_leaves<W: Fingerprint>(&self, other: &MerkleStore<W>) -> Result<Vec<usize>> {
        if self.geometry != other.geometry {
            return Err(StoreError::ShapeMismatch {
                ours: self.geometry,
                theirs: other.geometry,
            });
        }
        let mut differing = Vec::new();
        let mut frontier = vec![(self.geometry.depth as usize, 0usize)];
        while let Some((level, index)) = frontier.pop() {
            if self.digest_at(level, index) == other.digest_at(level, index) {
                continue;
            }
            if level == 0 {
                differing.push(index);
            } else {
                frontier.push((level - 1, 2 * index + 1));
                frontier.push((level - 1, 2 * index));
            }
        }
        Ok(differing)
    }

    fn leaf_digest(&self, leaf: usize) -> Digest {
        let mut hasher = Sha256::new();
        for (key, value) in &self.leaves[leaf] {
            hasher.update((key.as_str().len() as u64).to_be_bytes());
            hasher.update(key.as_str().as_bytes());
            value.fingerprint(&mut hasher);
        }
        hasher.finalize().into()
    }

    fn branch_digest(left: &Digest, right: &Digest) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().into()
    }

    fn refresh_path(&mut self, leaf: usize) {
        self.levels[0][leaf] = self.leaf_digest(leaf);
        let mut index = leaf;
        for level in 1..self.levels.len() {
            index /= 2;
            let below = &self.levels[level - 1];
            let digest = Self::branch_digest(&below[2 * index], &below[2 * index + 1]);
            self.levels[level][index] = digest;
        }
    }

    fn rebuild(&mut self) {
        let mut levels = Vec::with_capacity(self.geometry.depth as usize + 1);
        levels.push((0..self.leaves.len()).map(|leaf| self.leaf_digest(leaf)).collect::<Vec<_>>());
        while let Some(below) = levels.last().filter(|level| level.len() > 1) {
            let above = below
                .chunks_exact(2)
                .map(|pair| Self::branch_digest(&pair[0], &pair[1]))
                .collect();
            levels.push(above);
        }
        self.levels = levels;
    }
}

impl<V: Fingerprint> Default for MerkleStore<V> {
    fn default() -> Self {
        Self::new(Geometry::default())
    }
}

/// Same geometry and same root digest.
impl<V: Fingerprint> PartialEq for MerkleStore<V> {
    fn eq(&self, other: &Self) -> bool {
        self.geometry == other.geometry && self.root_digest() == other.root_digest()
    }
}

impl<V: Debug> Debug for MerkleStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.leaves.iter().flat_map(BTreeMap::iter))
            .finish()
    }
}

impl MerkleStore<Versioned> {
    /// Stores a value with the clock it was written under.
    pub fn put(&mut self, key: Key, value: Value, clock: VectorClock) -> Result<()> {
        self.insert(key, Versioned::new(value, clock))?;
        Ok(())
    }
}
