//! HTTP API status mapping, exercised against a live router.

use gossipkv::server::ApiResponse;
use gossipkv::storage::{Backend, Store, StoreConfig};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

struct Node {
    base: String,
    store: Arc<Store>,
    client: reqwest::Client,
}

impl Node {
    async fn start(backend: Backend) -> Self {
        let store = Arc::new(Store::new(StoreConfig {
            backend,
            ..Default::default()
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(gossipkv::server::serve(
            listener,
            Arc::clone(&store),
            std::future::pending(),
        ));
        Self {
            base,
            store,
            client: reqwest::Client::new(),
        }
    }

    async fn insert(&self, body: Value) -> (StatusCode, ApiResponse) {
        let response = self
            .client
            .post(format!("{}/insert", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, ApiResponse) {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (StatusCode, ApiResponse) {
        let response = self
            .client
            .delete(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn post_raw(&self, path: &str, body: &'static str) -> StatusCode {
        self.client
            .post(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
            .status()
    }
}

#[tokio::test]
async fn test_crud_round_trip() {
    for backend in [Backend::BPlusTree, Backend::HashMap] {
        let node = Node::start(backend).await;

        let (status, reply) = node.insert(json!({"user": {"name": "Ada"}})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.message.as_deref(), Some("insert success"));

        let (status, reply) = node.insert(json!({"user": {"name": "Grace"}})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.message.as_deref(), Some("update success"));

        let (status, reply) = node.get("/search?key=user").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.data, Some(json!({"name": "Grace"})));

        let (status, reply) = node.get("/count").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.total, Some(1));

        let (status, reply) = node.delete("/delete?key=user").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.message.as_deref(), Some("delete success"));

        let (status, reply) = node.get("/search?key=user").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(reply.message.as_deref(), Some("key not found"));

        let (status, _) = node.delete("/delete?key=user").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_bad_requests_leave_store_untouched() {
    let node = Node::start(Backend::BPlusTree).await;

    let (status, reply) = node.insert(json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(reply.error.is_some());

    let (status, _) = node.insert(json!({"a": 1, "b": 2})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = node.insert(json!(["a", 1])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(node.post_raw("/insert", "{not json").await, StatusCode::BAD_REQUEST);

    let (status, _) = node.get("/search").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = node.get("/search?key=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = node.delete("/delete").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(node.store.is_empty());
}

#[tokio::test]
async fn test_gossip_endpoint() {
    let node = Node::start(Backend::BPlusTree).await;
    node.store.upsert("old", json!(0));

    let status = node
        .post_raw(
            "/gossip/recv",
            r#"{"Update":[{"Key":"k","Value":{"n":1},"V":42}],"Delete":["old"]}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let record = node.store.record("k").unwrap();
    assert_eq!(record.value, json!({"n": 1}));
    assert_eq!(record.version, 42);
    // Records first learned from a peer are relayed on the next round.
    assert!(record.dirty);
    assert!(node.store.record("old").is_none());

    let status = node
        .post_raw("/gossip/recv", r#"{"Update":null,"Delete":null}"#)
        .await;
    assert_eq!(status, StatusCode::OK);

    let status = node.post_raw("/gossip/recv", r#"{"Update":[{"Key":"x"}]}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(node.store.len(), 1);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let node = Node::start(Backend::HashMap).await;
    node.insert(json!({"a": 1})).await;
    node.get("/search?key=a").await;
    node.get("/search").await;

    let stats: Value = node
        .client
        .get(format!("{}/stats", node.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["backend"], json!("Map"));
    assert_eq!(stats["store"]["records"], json!(1));
    assert_eq!(stats["store"]["search_hits"], json!(1));
    assert_eq!(stats["requests"], json!(3));
    assert_eq!(stats["rejected"], json!(1));
}
