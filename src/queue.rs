//! Bounded Event Queues
//!
//! The background tasks talk to each other only through bounded queues:
//!
//! ```text
//!   Store::search ──ExpiredEvent──> ExpirationMonitor ──key──> ReplicationAgent
//!                  (access queue)                     (delete queue)
//! ```
//!
//! Both are thin wrappers over `tokio::sync::mpsc` that make the capacity
//! and the behaviour on a full queue explicit.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;

/// Default number of entries a queue holds before the overflow policy
/// applies.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// What a producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait until the consumer makes room.
    #[default]
    Block,
    /// Discard the new item and count it.
    DropNewest,
}

/// An unrecognised overflow policy name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown overflow policy: {0:?} (expected \"block\" or \"drop\")")]
pub struct UnknownOverflowPolicy(pub String);

impl FromStr for OverflowPolicy {
    type Err = UnknownOverflowPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(OverflowPolicy::Block),
            "drop" | "drop-newest" => Ok(OverflowPolicy::DropNewest),
            other => Err(UnknownOverflowPolicy(other.to_string())),
        }
    }
}

/// Capacity and overflow behaviour of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Enqueued,
    /// The queue was full and the policy is [`OverflowPolicy::DropNewest`].
    Dropped,
    /// The consumer is gone.
    Closed,
}

/// Producer side of a bounded queue.
#[derive(Debug)]
pub struct QueueSender<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    overflow: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            overflow: self.overflow,
            dropped: Arc::clone(&self.dropped),
        }
    }
}

/// Consumer side of a bounded queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

/// Creates a named bounded queue.
///
/// # Panics
///
/// Panics if `config.capacity` is zero.
pub fn bounded<T>(name: &'static str, config: QueueConfig) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(config.capacity);
    (
        QueueSender {
            name,
            tx,
            overflow: config.overflow,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        QueueReceiver { rx },
    )
}

impl<T> QueueSender<T> {
    /// Pushes an item, applying the overflow policy if the queue is full.
    pub async fn push(&self, item: T) -> Push {
        match self.overflow {
            OverflowPolicy::Block => match self.tx.send(item).await {
                Ok(()) => Push::Enqueued,
                Err(_) => Push::Closed,
            },
            OverflowPolicy::DropNewest => match self.tx.try_send(item) {
                Ok(()) => Push::Enqueued,
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(queue = self.name, dropped, "Queue full, dropping item");
                    Push::Dropped
                }
                Err(TrySendError::Closed(_)) => Push::Closed,
            },
        }
    }

    /// Number of items discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Items currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> QueueReceiver<T> {
    /// Waits for the next item. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Takes everything that is available right now without waiting.
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        items
    }
}
