//! Read-Driven Expiration Monitor
//!
//! Records do not carry individual expiry times. Every record lives for the
//! same TTL, measured from its creation, and is only considered for
//! eviction after it has been read.
//!
//! ## Flow
//!
//! ```text
//!  Store::search ──ExpiredEvent{key, created_at}──┐
//!                                                 ▼
//!                              ┌──────────────────────────────┐
//!                              │     ExpirationMonitor        │
//!                              │  age > ttl ?                 │
//!                              │    Store::evict_expired(key) │
//!                              └──────────────┬───────────────┘
//!                                             │ key
//!                                             ▼
//!                                  delete queue ──> ReplicationAgent
//! ```
//!
//! A record that expires but is never read again stays in memory until a
//! peer deletes it or it is read. Reads of such a record already report it
//! as missing (see [`Store::search`]).

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::queue::{Push, QueueReceiver, QueueSender};
use crate::storage::Store;

/// Default record lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Emitted by a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredEvent {
    /// The original key that was read
    pub key: String,
    /// Creation time of the record that was read
    pub created_at: Instant,
}

impl ExpiredEvent {
    /// Returns true if the record this event describes had outlived `ttl`.
    #[inline]
    pub fn is_past(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// A handle to the running expiration monitor.
///
/// When this handle is dropped, the monitor task will be stopped.
#[derive(Debug)]
pub struct ExpirationMonitor {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirationMonitor {
    /// Starts the monitor as a background task.
    ///
    /// # Arguments
    ///
    /// * `store` - The store to evict from; its TTL is used
    /// * `events` - Consumer side of the access queue the store reports reads on
    /// * `deletes` - Producer side of the queue the replication agent drains
    ///
    /// # Example
    ///
    /// ```ignore
    /// use gossipkv::queue::{bounded, QueueConfig};
    /// use gossipkv::storage::{ExpirationMonitor, Store, StoreConfig};
    /// use std::sync::Arc;
    ///
    /// let (access_tx, access_rx) = bounded("access", QueueConfig::default());
    /// let (delete_tx, delete_rx) = bounded("delete", QueueConfig::default());
    /// let store = Arc::new(Store::with_access_queue(StoreConfig::default(), access_tx));
    ///
    /// let monitor = ExpirationMonitor::start(Arc::clone(&store), access_rx, delete_tx);
    ///
    /// // Dropping the monitor will stop it
    /// drop(monitor);
    /// ```
    pub fn start(
        store: Arc<Store>,
        events: QueueReceiver<ExpiredEvent>,
        deletes: QueueSender<String>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(monitor_loop(store, events, deletes, shutdown_rx));

        info!("Expiration monitor started");

        Self { shutdown_tx }
    }

    /// Stops the monitor.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Expiration monitor stopped");
    }
}

impl Drop for ExpirationMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main monitor loop.
async fn monitor_loop(
    store: Arc<Store>,
    mut events: QueueReceiver<ExpiredEvent>,
    deletes: QueueSender<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let ttl = store.ttl();

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    debug!("Access queue closed, expiration monitor exiting");
                    return;
                }
            },
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiration monitor received shutdown signal");
                    return;
                }
                continue;
            }
        };

        if !event.is_past(ttl) {
            continue;
        }
        if !store.evict_expired(&event.key) {
            continue;
        }

        debug!(key = %event.key, "Evicted expired record");
        match deletes.push(event.key).await {
            Push::Enqueued => {}
            Push::Dropped => warn!("Delete queue full, eviction will not be gossiped"),
            Push::Closed => debug!("Delete queue closed"),
        }
    }
}
