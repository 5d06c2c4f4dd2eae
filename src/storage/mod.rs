//! Storage Module
//!
//! This module provides the storage side of a node: ordered indexes keyed
//! by a small hashed key space, the lock-guarded [`Store`] that every other
//! component goes through, and the read-driven [`ExpirationMonitor`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │         RwLock<Box<dyn StorageIndex>>  + per-record Mutex   │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐ │
//! │  │ BPlusTree   ("BPTree")   │  │ HashIndex   ("Map")      │ │
//! │  │ arena nodes, leaf chain  │  │ HashMap<u32, Bucket>     │ │
//! │  └──────────────────────────┘  └──────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ ExpiredEvent on every read
//!                            ▼
//!              ┌───────────────────────────┐
//!              │    ExpirationMonitor      │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Collision Buckets**: keys hash into a space of 100 slots by default;
//!   colliding keys share a bucket and are matched by their original string
//! - **Two Lock Tiers**: shared global lock for reads and in-place
//!   overwrites, exclusive for anything that changes the index shape
//! - **Last Writer Wins**: every record carries a nanosecond version
//! - **Dirty Tracking**: changed records are drained once per gossip round
//!
//! ## Example
//!
//! ```
//! use gossipkv::storage::{Backend, Store, StoreConfig};
//! use serde_json::json;
//!
//! let store = Store::new(StoreConfig {
//!     backend: Backend::BPlusTree,
//!     ..Default::default()
//! });
//!
//! store.upsert("user:1", json!({"name": "Ada"}));
//! store.upsert("user:2", json!({"name": "Grace"}));
//! assert_eq!(store.len(), 2);
//!
//! let changes = store.gossip_update();
//! assert_eq!(changes.len(), 2);
//! assert!(store.gossip_update().is_empty());
//! ```

pub mod bptree;
pub mod engine;
pub mod expiry;
pub mod hash_index;
pub mod index;
pub mod record;

// Re-export commonly used types
pub use bptree::{BPlusTree, TreeConfig, TreeStats};
pub use engine::{MergeReport, StorageStats, Store, StoreConfig};
pub use expiry::{ExpirationMonitor, ExpiredEvent, DEFAULT_TTL};
pub use hash_index::HashIndex;
pub use index::{Backend, Insertion, InvariantViolation, Lookup, StorageIndex, UnknownBackend};
pub use record::{hash_key, Record, RecordSnapshot, DEFAULT_HASH_SPACE};
