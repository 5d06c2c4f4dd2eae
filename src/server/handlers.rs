//! HTTP Request Handlers
//!
//! Every handler answers with a status code and an [`ApiResponse`]. Bad
//! input never reaches the store.

use axum::{
    extract::{rejection::JsonRejection, Extension, Query},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::RequestStats;
use crate::replication::GossipMessage;
use crate::storage::{Insertion, StorageStats, Store};

/// JSON body of every response. Absent fields are omitted.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn total(total: usize) -> Self {
        Self {
            total: Some(total),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn bad_request(stats: &RequestStats, error: impl Into<String>) -> Reply {
    stats.rejected();
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(error)))
}

fn not_found() -> Reply {
    (StatusCode::NOT_FOUND, Json(ApiResponse::message("key not found")))
}

/// Query string of `/search` and `/delete`.
#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

impl KeyQuery {
    fn key(self) -> Option<String> {
        self.key.filter(|key| !key.is_empty())
    }
}

/// `POST /insert` with a body of exactly one `{"key": value}` pair.
pub async fn handle_insert(
    Extension(store): Extension<Arc<Store>>,
    Extension(stats): Extension<Arc<RequestStats>>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Reply {
    stats.request();
    let body = match body {
        Ok(Json(body)) => body,
        Err(e) => return bad_request(&stats, e.body_text()),
    };
    if body.len() != 1 {
        return bad_request(&stats, "body must contain exactly one key");
    }
    let Some((key, value)) = body.into_iter().next() else {
        return bad_request(&stats, "body must contain exactly one key");
    };
    if key.is_empty() {
        return bad_request(&stats, "key is empty");
    }

    let message = match store.upsert(&key, value) {
        Insertion::Created => "insert success",
        Insertion::Updated => "update success",
    };
    debug!(key = %key, message, "Insert");
    (StatusCode::OK, Json(ApiResponse::message(message)))
}

/// `GET /search?key=...`
pub async fn handle_search(
    Extension(store): Extension<Arc<Store>>,
    Extension(stats): Extension<Arc<RequestStats>>,
    Query(query): Query<KeyQuery>,
) -> Reply {
    stats.request();
    let Some(key) = query.key() else {
        return bad_request(&stats, "missing key parameter");
    };

    match store.search(&key).await {
        Some(value) => (StatusCode::OK, Json(ApiResponse::data(value))),
        None => not_found(),
    }
}

/// `DELETE /delete?key=...`
pub async fn handle_delete(
    Extension(store): Extension<Arc<Store>>,
    Extension(stats): Extension<Arc<RequestStats>>,
    Query(query): Query<KeyQuery>,
) -> Reply {
    stats.request();
    let Some(key) = query.key() else {
        return bad_request(&stats, "missing key parameter");
    };

    if store.delete(&key) {
        (StatusCode::OK, Json(ApiResponse::message("delete success")))
    } else {
        not_found()
    }
}

/// `GET /count`
pub async fn handle_count(
    Extension(store): Extension<Arc<Store>>,
    Extension(stats): Extension<Arc<RequestStats>>,
) -> Reply {
    stats.request();
    (StatusCode::OK, Json(ApiResponse::total(store.len())))
}

/// `POST /gossip/recv`: merges a peer's push.
pub async fn handle_gossip_recv(
    Extension(store): Extension<Arc<Store>>,
    Extension(stats): Extension<Arc<RequestStats>>,
    message: Result<Json<GossipMessage>, JsonRejection>,
) -> Reply {
    stats.gossip_received();
    let message = match message {
        Ok(Json(message)) => message,
        Err(e) => {
            warn!(error = %e.body_text(), "Malformed gossip message");
            return bad_request(&stats, e.body_text());
        }
    };

    let report = store.merge(message);
    let data = serde_json::to_value(report).unwrap_or(Value::Null);
    (
        StatusCode::OK,
        Json(ApiResponse {
            message: Some("gossip merged".to_string()),
            data: Some(data),
            ..Default::default()
        }),
    )
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub backend: String,
    pub store: StorageStats,
    pub requests: u64,
    pub rejected: u64,
    pub gossip_received: u64,
}

/// `GET /stats`
pub async fn handle_stats(
    Extension(store): Extension<Arc<Store>>,
    Extension(stats): Extension<Arc<RequestStats>>,
) -> (StatusCode, Json<StatsResponse>) {
    let snapshot = stats.snapshot();
    (
        StatusCode::OK,
        Json(StatsResponse {
            backend: store.backend().to_string(),
            store: store.stats(),
            requests: snapshot.requests,
            rejected: snapshot.rejected,
            gossip_received: snapshot.gossip_received,
        }),
    )
}
