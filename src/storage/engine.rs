//! Thread-Safe Store with Two-Tier Locking
//!
//! This module implements the concurrency controller around a storage
//! index. It is the only way the rest of the node touches stored data.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Store                              │
//! │  RwLock<Box<dyn StorageIndex>>            (tier 1, global)    │
//! │   ├─ shared:    search, len, gossip drain, overwrite existing │
//! │   └─ exclusive: create record, delete, evict, gossip merge    │
//! │                                                               │
//! │  Record { Mutex<value, version> }         (tier 2, per record)│
//! │   └─ held only around the field writes of an overwrite/merge  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Locks are always taken global first, record second. Any operation that
//! can change the shape of the index (split, merge, borrow, root collapse)
//! runs under the exclusive side, so the index itself never sees two
//! structural writers at once. An upsert of a record that already exists
//! only needs the shared side plus the record's own mutex.
//!
//! ## Expiry Hook
//!
//! Every successful search pushes an [`ExpiredEvent`] onto the access
//! queue consumed by the [`ExpirationMonitor`](super::ExpirationMonitor).
//! A record already past its TTL is reported as missing straight away.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, trace};

use super::expiry::{ExpiredEvent, DEFAULT_TTL};
use super::index::{Backend, Insertion, InvariantViolation, StorageIndex};
use super::record::{hash_key, now_nanos, Record, RecordSnapshot, DEFAULT_HASH_SPACE};
use crate::queue::{Push, QueueSender};
use crate::replication::{GossipMessage, GossipUpdate};

/// Store construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Which index to build.
    pub backend: Backend,
    /// Size of the hashed key space.
    pub hash_space: u32,
    /// Age after which a record is expired.
    pub ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::BPlusTree,
            hash_space: DEFAULT_HASH_SPACE,
            ttl: DEFAULT_TTL,
        }
    }
}

/// What an inbound gossip merge did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Updates for keys that were not present locally.
    pub inserted: usize,
    /// Updates that won last-writer-wins against a local record.
    pub overwritten: usize,
    /// Updates that lost (older or equal version).
    pub stale: usize,
    /// Deletes that removed a record.
    pub deleted: usize,
    /// Deletes for keys that were already gone.
    pub missing: usize,
}

/// Store statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StorageStats {
    /// Number of records currently stored
    pub records: usize,
    /// Total search operations
    pub search_ops: u64,
    /// Searches that returned a value
    pub search_hits: u64,
    /// Records created by local writes
    pub inserts: u64,
    /// Records overwritten by local writes
    pub updates: u64,
    /// Records removed by local deletes
    pub deletes: u64,
    /// Inbound gossip messages merged
    pub merges: u64,
    /// Records removed by expiry
    pub evictions: u64,
}

/// The node's shared, lock-guarded storage.
///
/// Designed to be wrapped in an `Arc` and shared between the request
/// handlers, the expiration monitor and the replication agent.
///
/// # Example
///
/// ```
/// use gossipkv::storage::{Store, StoreConfig};
/// use serde_json::json;
///
/// let store = Store::new(StoreConfig::default());
/// store.upsert("name", json!("Ada"));
/// assert_eq!(store.record("name").unwrap().value, json!("Ada"));
/// assert!(store.delete("name"));
/// assert!(store.is_empty());
/// ```
pub struct Store {
    index: RwLock<Box<dyn StorageIndex>>,
    hash_space: u32,
    ttl: Duration,
    access_events: Option<QueueSender<ExpiredEvent>>,

    search_count: AtomicU64,
    hit_count: AtomicU64,
    insert_count: AtomicU64,
    update_count: AtomicU64,
    delete_count: AtomicU64,
    merge_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend())
            .field("hash_space", &self.hash_space)
            .field("ttl", &self.ttl)
            .field("search_count", &self.search_count.load(Ordering::Relaxed))
            .field("insert_count", &self.insert_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Store {
    /// Creates a store that does not report reads to an expiration monitor.
    pub fn new(config: StoreConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a store that reports every successful read on `events`.
    pub fn with_access_queue(config: StoreConfig, events: QueueSender<ExpiredEvent>) -> Self {
        Self::build(config, Some(events))
    }

    fn build(config: StoreConfig, access_events: Option<QueueSender<ExpiredEvent>>) -> Self {
        Self {
            index: RwLock::new(config.backend.build()),
            hash_space: config.hash_space,
            ttl: config.ttl,
            access_events,
            search_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            insert_count: AtomicU64::new(0),
            update_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
            merge_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
        }
    }

    /// Shared acquisition of the global lock.
    fn shared(&self) -> RwLockReadGuard<'_, Box<dyn StorageIndex>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive acquisition of the global lock.
    fn exclusive(&self) -> RwLockWriteGuard<'_, Box<dyn StorageIndex>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The hashed form of `key` used by the index.
    #[inline]
    pub fn hash(&self, key: &str) -> u32 {
        hash_key(key, self.hash_space)
    }

    pub fn backend(&self) -> Backend {
        self.shared().backend()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up a value.
    ///
    /// A hit is reported to the expiration monitor. Records older than the
    /// TTL are reported as missing even before the monitor evicts them.
    pub async fn search(&self, key: &str) -> Option<Value> {
        self.search_count.fetch_add(1, Ordering::Relaxed);

        let hashed = self.hash(key);
        // The guard is a temporary of this statement and is released before
        // the queue push below can suspend.
        let found = self.shared().search(hashed, key).map(|hit| {
            let record = hit.record;
            (record.value(), record.created_at(), record.is_expired(self.ttl))
        });
        let (value, created_at, expired) = found?;

        if let Some(events) = &self.access_events {
            let event = ExpiredEvent {
                key: key.to_string(),
                created_at,
            };
            if events.push(event).await == Push::Closed {
                trace!(key, "Expiration monitor is not running");
            }
        }

        if expired {
            debug!(key, "Search hit an expired record");
            return None;
        }
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Returns a copy of the record stored under `key`, without touching
    /// expiry bookkeeping.
    pub fn record(&self, key: &str) -> Option<RecordSnapshot> {
        let hashed = self.hash(key);
        self.shared()
            .search(hashed, key)
            .map(|hit| hit.record.snapshot())
    }

    /// Inserts or overwrites a value from a local write.
    ///
    /// Overwrites stay on the shared lock and only take the record's own
    /// mutex. Creating a record may split nodes, so it upgrades to the
    /// exclusive lock and searches again.
    pub fn upsert(&self, key: &str, value: Value) -> Insertion {
        let hashed = self.hash(key);

        {
            let index = self.shared();
            if let Some(hit) = index.search(hashed, key) {
                let version = hit.record.overwrite(value, now_nanos());
                self.update_count.fetch_add(1, Ordering::Relaxed);
                trace!(key, version, "Record overwritten in place");
                return Insertion::Updated;
            }
        }

        let outcome = self
            .exclusive()
            .insert(hashed, Record::new(key, value, now_nanos()));
        match outcome {
            Insertion::Created => self.insert_count.fetch_add(1, Ordering::Relaxed),
            Insertion::Updated => self.update_count.fetch_add(1, Ordering::Relaxed),
        };
        trace!(key, hashed, ?outcome, "Upsert");
        outcome
    }

    /// Removes a record. Returns false if it did not exist.
    pub fn delete(&self, key: &str) -> bool {
        let hashed = self.hash(key);
        let removed = self.exclusive().delete(hashed, key);
        if removed {
            self.delete_count.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.shared().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects every record changed since the last drain and clears its
    /// dirty flag.
    pub fn gossip_update(&self) -> Vec<GossipUpdate> {
        self.shared().gossip_update()
    }

    /// Merges an inbound gossip message using last-writer-wins.
    ///
    /// The whole message is applied under the exclusive lock. Updates for
    /// unknown keys are inserted with the sender's version and marked dirty,
    /// so this node relays them on its next round; updates for known keys
    /// win only with a strictly greater version and are not relayed.
    /// Deletes are unconditional.
    pub fn merge(&self, message: GossipMessage) -> MergeReport {
        let mut report = MergeReport::default();
        let mut index = self.exclusive();

        for update in message.updates {
            let hashed = self.hash(&update.key);
            match index.search(hashed, &update.key) {
                Some(hit) => {
                    if hit.record.merge_if_newer(update.value, update.version) {
                        report.overwritten += 1;
                    } else {
                        report.stale += 1;
                    }
                }
                None => {
                    let record = Record::new(update.key, update.value, update.version);
                    index.insert(hashed, record);
                    report.inserted += 1;
                }
            }
        }

        for key in message.deletes {
            if index.delete(self.hash(&key), &key) {
                report.deleted += 1;
            } else {
                report.missing += 1;
            }
        }
        drop(index);

        self.merge_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            inserted = report.inserted,
            overwritten = report.overwritten,
            stale = report.stale,
            deleted = report.deleted,
            "Merged gossip message"
        );
        report
    }

    /// Deletes `key` if it still exists and is older than the TTL.
    ///
    /// The record may have been deleted, or deleted and created again,
    /// since the read that queued it, so its age is checked again here.
    pub fn evict_expired(&self, key: &str) -> bool {
        let hashed = self.hash(key);
        let mut index = self.exclusive();
        let expired = index
            .search(hashed, key)
            .is_some_and(|hit| hit.record.is_expired(self.ttl));
        if !expired {
            return false;
        }
        index.delete(hashed, key);
        drop(index);

        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Verifies the index's structural invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.shared().check_invariants()
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            records: self.len(),
            search_ops: self.search_count.load(Ordering::Relaxed),
            search_hits: self.hit_count.load(Ordering::Relaxed),
            inserts: self.insert_count.load(Ordering::Relaxed),
            updates: self.update_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
            merges: self.merge_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
        }
    }
}
