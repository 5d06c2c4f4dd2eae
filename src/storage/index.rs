//! The Storage Index Contract
//!
//! Every backend maps a hashed key to a [`Bucket`] of records and exposes
//! the same five operations. The store picks one at construction time.
//!
//! Mutating methods take `&mut self`: the only way to reach them through
//! the [`Store`](crate::storage::Store) is the exclusive side of its lock.
//! `gossip_update` takes `&self` because clearing a dirty flag is an atomic
//! per-record operation, not a structural one.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use super::bptree::BPlusTree;
use super::hash_index::HashIndex;
use super::record::Record;
use crate::replication::GossipUpdate;

/// Result of a successful search.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// The matching record.
    pub record: Arc<Record>,
    /// Position of the record inside its collision bucket.
    pub bucket_index: usize,
}

/// What an insert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// A new record was added (new key or new collision entry).
    Created,
    /// An existing record was overwritten in place.
    Updated,
}

/// A broken structural invariant, reported by
/// [`StorageIndex::check_invariants`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("keys out of order in node {node}: {keys:?}")]
    Unordered { node: usize, keys: Vec<u32> },

    #[error("node {node} holds {len} keys, allowed {min}..={max}")]
    Unbalanced {
        node: usize,
        len: usize,
        min: usize,
        max: usize,
    },

    #[error("node {node} key {index} is {found}, subtree max is {expected}")]
    StaleMaxKey {
        node: usize,
        index: usize,
        found: u32,
        expected: u32,
    },

    #[error("node {node} has a wrong parent handle")]
    BrokenParent { node: usize },

    #[error("leaves at different depths ({first} and {other})")]
    UnevenDepth { first: usize, other: usize },

    #[error("leaf chain disagrees with tree order")]
    BrokenLeafChain,

    #[error("node {node} has mismatched keys/slots ({keys} keys, {slots} slots)")]
    SlotMismatch { node: usize, keys: usize, slots: usize },

    #[error("empty bucket under key {key}")]
    EmptyBucket { key: u32 },
}

/// The storage contract shared by all backends.
pub trait StorageIndex: Send + Sync + fmt::Debug {
    /// Finds the record stored under `original_key`, whose hash is `hashed`.
    fn search(&self, hashed: u32, original_key: &str) -> Option<Lookup>;

    /// Inserts `record` under `hashed`.
    ///
    /// If a record with the same original key already exists, its value and
    /// version are overwritten in place and its creation time is kept.
    fn insert(&mut self, hashed: u32, record: Record) -> Insertion;

    /// Removes the record stored under `original_key`. Returns false if it
    /// was not present.
    fn delete(&mut self, hashed: u32, original_key: &str) -> bool;

    /// Number of records (not hashed keys).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects every dirty record and clears its dirty flag.
    fn gossip_update(&self) -> Vec<GossipUpdate>;

    /// Which backend this is.
    fn backend(&self) -> Backend;

    /// Verifies structural invariants. Backends without structure to check
    /// always succeed.
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        Ok(())
    }
}

/// The available storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Ordered B+Tree index.
    BPlusTree,
    /// Unordered hash index.
    HashMap,
}

impl Backend {
    /// The configuration value that selects this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::BPlusTree => "BPTree",
            Backend::HashMap => "Map",
        }
    }

    /// Builds an empty index of this kind.
    pub fn build(&self) -> Box<dyn StorageIndex> {
        match self {
            Backend::BPlusTree => Box::new(BPlusTree::new()),
            Backend::HashMap => Box::new(HashIndex::new()),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognised backend name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown storage backend: {0:?} (expected \"BPTree\" or \"Map\")")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BPTree" => Ok(Backend::BPlusTree),
            "Map" => Ok(Backend::HashMap),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}
