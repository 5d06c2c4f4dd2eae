//! Records, Collision Buckets and Key Hashing
//!
//! A [`Record`] is the unit of storage. Several records may share the same
//! hashed key; they live together in a [`Bucket`] and are told apart by
//! their original key string.
//!
//! ## Field Ownership
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ Record                                           │
//! │   original_key  immutable                        │
//! │   created_at    immutable (survives overwrites)  │
//! │   dirty         AtomicBool, cleared by the drain │
//! │   state         Mutex<{ value, version }>        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The per-record mutex is the second lock tier. It is only ever taken
//! while the global store lock is already held (shared or exclusive).

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::replication::GossipUpdate;

/// Default size of the hashed key space.
///
/// Kept deliberately small so collision buckets are exercised in practice.
pub const DEFAULT_HASH_SPACE: u32 = 100;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes an original key into the ordered key space of the index.
///
/// 32-bit FNV-1a, reduced modulo `space`. A `space` of zero is treated
/// as the full 32-bit range.
pub fn hash_key(key: &str, space: u32) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if space == 0 {
        hash
    } else {
        hash % space
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// The mutable half of a record.
#[derive(Debug, Clone)]
struct RecordState {
    value: Value,
    version: i64,
}

/// A single stored key-value pair.
#[derive(Debug)]
pub struct Record {
    original_key: String,
    created_at: Instant,
    dirty: AtomicBool,
    state: Mutex<RecordState>,
}

/// Records sharing one hashed key.
pub type Bucket = Vec<Arc<Record>>;

impl Record {
    /// Creates a record. It starts dirty so the next gossip round picks it
    /// up, whether it came from a local write or was first seen from a peer.
    pub fn new(original_key: impl Into<String>, value: Value, version: i64) -> Self {
        Self {
            original_key: original_key.into(),
            created_at: Instant::now(),
            dirty: AtomicBool::new(true),
            state: Mutex::new(RecordState { value, version }),
        }
    }

    /// Consumes a freshly built record, returning its value and version.
    pub fn into_write(self) -> (Value, i64) {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        (state.value, state.version)
    }

    fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn original_key(&self) -> &str {
        &self.original_key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns true if the record is older than `ttl`.
    #[inline]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn value(&self) -> Value {
        self.lock().value.clone()
    }

    pub fn version(&self) -> i64 {
        self.lock().version
    }

    /// Applies a local write in place.
    ///
    /// The stored version never goes backwards: it becomes
    /// `max(version, previous + 1)`. Returns the version that was stored.
    pub fn overwrite(&self, value: Value, version: i64) -> i64 {
        let mut state = self.lock();
        state.value = value;
        state.version = version.max(state.version.saturating_add(1));
        self.dirty.store(true, Ordering::Release);
        state.version
    }

    /// Applies a replicated write if it is strictly newer (last writer wins).
    ///
    /// Ties keep the local value. Returns true if the record changed.
    pub fn merge_if_newer(&self, value: Value, version: i64) -> bool {
        let mut state = self.lock();
        if version > state.version {
            state.value = value;
            state.version = version;
            true
        } else {
            false
        }
    }

    /// Takes the dirty flag, returning the gossip payload if it was set.
    ///
    /// The flag is swapped atomically so two concurrent drains never emit
    /// the same change twice.
    pub fn take_dirty(&self) -> Option<GossipUpdate> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        let state = self.lock();
        Some(GossipUpdate {
            key: self.original_key.clone(),
            value: state.value.clone(),
            version: state.version,
        })
    }

    /// A point-in-time copy of the record.
    pub fn snapshot(&self) -> RecordSnapshot {
        let state = self.lock();
        RecordSnapshot {
            key: self.original_key.clone(),
            value: state.value.clone(),
            version: state.version,
            dirty: self.is_dirty(),
            created_at: self.created_at,
        }
    }
}

/// A detached copy of a record's fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub key: String,
    pub value: Value,
    pub version: i64,
    pub dirty: bool,
    pub created_at: Instant,
}

/// Finds the position of `key` inside a bucket.
pub fn find_in_bucket(bucket: &[Arc<Record>], key: &str) -> Option<usize> {
    bucket.iter().position(|r| r.original_key == key)
}
