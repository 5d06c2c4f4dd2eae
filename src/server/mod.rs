//! HTTP Server Module
//!
//! The client API and the gossip receive endpoint, served by axum.
//!
//! | Method | Path           | Success             | Errors            |
//! |--------|----------------|---------------------|-------------------|
//! | POST   | `/insert`      | 200 `{message}`     | 400               |
//! | GET    | `/search?key=` | 200 `{data}`        | 400, 404          |
//! | DELETE | `/delete?key=` | 200 `{message}`     | 400, 404          |
//! | GET    | `/count`       | 200 `{total}`       |                   |
//! | POST   | `/gossip/recv` | 200 `{message,data}`| 400               |
//! | GET    | `/stats`       | 200 counters        |                   |
//!
//! Client deletes only affect the local node. Deletes reach peers only
//! when they come from TTL eviction.

pub mod handlers;

use axum::{
    extract::Extension,
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::replication::GOSSIP_PATH;
use crate::storage::Store;
pub use handlers::ApiResponse;

/// Request counters shared by every handler.
#[derive(Debug, Default)]
pub struct RequestStats {
    /// Client requests handled
    requests: AtomicU64,
    /// Requests answered with 400
    rejected: AtomicU64,
    /// Gossip pushes received
    gossip_received: AtomicU64,
}

/// A point-in-time copy of [`RequestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStatsSnapshot {
    pub requests: u64,
    pub rejected: u64,
    pub gossip_received: u64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gossip_received(&self) {
        self.gossip_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestStatsSnapshot {
        RequestStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            gossip_received: self.gossip_received.load(Ordering::Relaxed),
        }
    }
}

/// Builds the node's router around a shared store.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/insert", post(handlers::handle_insert))
        .route("/search", get(handlers::handle_search))
        .route("/delete", delete(handlers::handle_delete))
        .route("/count", get(handlers::handle_count))
        .route("/stats", get(handlers::handle_stats))
        .route(GOSSIP_PATH, post(handlers::handle_gossip_recv))
        .layer(Extension(store))
        .layer(Extension(Arc::new(RequestStats::new())))
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, store: Arc<Store>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on {}", addr);
    }
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
}
