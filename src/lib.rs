//! # GossipKV - An Eventually Consistent Key-Value Node
//!
//! GossipKV is a small replicated key-value store. Every node keeps a full
//! copy of the data in an in-memory index, serves a JSON-over-HTTP API, and
//! periodically pushes its local changes to every other node.
//!
//! ## Features
//!
//! - **Ordered Storage**: an arena-backed B+Tree keyed by a small hashed key
//!   space, with collision buckets; a hash index is available as an
//!   alternative backend
//! - **Two-Tier Locking**: a global `RwLock` around the index plus a mutex
//!   per record
//! - **Gossip Replication**: push-based, last-writer-wins by nanosecond
//!   version
//! - **TTL Expiry**: records older than the TTL are evicted after a read
//!   and the eviction is gossiped as a delete
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               GossipKV node                             │
//! │                                                                         │
//! │  ┌─────────────┐   /insert /search /delete /count     ┌──────────────┐  │
//! │  │ axum Router │─────────────────────────────────────>│              │  │
//! │  │             │   /gossip/recv  (Store::merge)       │    Store     │  │
//! │  └─────────────┘─────────────────────────────────────>│  RwLock +    │  │
//! │                                                       │  BPlusTree / │  │
//! │  ┌──────────────────┐  ExpiredEvent (access queue)    │  HashIndex   │  │
//! │  │ ExpirationMonitor│<────────────────────────────────│              │  │
//! │  └────────┬─────────┘                                 └──────┬───────┘  │
//! │           │ evicted key (delete queue)                       │ dirty    │
//! │           ▼                                                  ▼ records  │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │ ReplicationAgent  ── POST /gossip/recv ──> every peer            │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use gossipkv::queue::{bounded, QueueConfig};
//! use gossipkv::replication::{GossipConfig, ReplicationAgent};
//! use gossipkv::storage::{ExpirationMonitor, Store, StoreConfig};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (access_tx, access_rx) = bounded("access", QueueConfig::default());
//!     let (delete_tx, delete_rx) = bounded("delete", QueueConfig::default());
//!
//!     let store = Arc::new(Store::with_access_queue(StoreConfig::default(), access_tx));
//!     let _monitor = ExpirationMonitor::start(Arc::clone(&store), access_rx, delete_tx);
//!     let _agent = ReplicationAgent::new(Arc::clone(&store), delete_rx, GossipConfig::default())
//!         .start();
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     gossipkv::server::serve(listener, store, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: indexes, records, the lock-guarded store and expiry
//! - [`replication`]: gossip wire format and the outbound agent
//! - [`queue`]: bounded queues linking the background tasks
//! - [`server`]: HTTP API
//! - [`config`]: backend selection file
//! - [`bootstrap`]: optional startup data

pub mod bootstrap;
pub mod config;
pub mod queue;
pub mod replication;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{load_backend, ConfigError};
pub use replication::{GossipConfig, GossipMessage, GossipUpdate, ReplicationAgent};
pub use storage::{Backend, ExpirationMonitor, Store, StoreConfig};

/// The default port a node listens on
pub const DEFAULT_PORT: u16 = 8080;

/// The default host a node binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of GossipKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
