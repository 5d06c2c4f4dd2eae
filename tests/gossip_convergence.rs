//! Multi-node replication tests.
//!
//! Nodes run real axum servers on ephemeral ports; gossip rounds are driven
//! by hand through `ReplicationAgent::gossip_once`.

use axum::{http::StatusCode, routing::post, Router};
use gossipkv::queue::{bounded, QueueConfig, QueueSender};
use gossipkv::replication::{GossipError, GossipRound, GOSSIP_PATH};
use gossipkv::storage::{ExpirationMonitor, Store, StoreConfig};
use gossipkv::{GossipConfig, GossipMessage, ReplicationAgent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move { axum::serve(listener, router).await });
    addr
}

async fn spawn_node(store: Arc<Store>) -> String {
    spawn_server(gossipkv::server::router(store)).await
}

fn agent_for(store: &Arc<Store>, peers: Vec<String>) -> (QueueSender<String>, ReplicationAgent) {
    let (tx, rx) = bounded("delete", QueueConfig::default());
    let agent = ReplicationAgent::new(
        Arc::clone(store),
        rx,
        GossipConfig {
            local_addr: "127.0.0.1:0".into(),
            peers,
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        },
    );
    (tx, agent)
}

/// Exchanges one gossip message in each direction without HTTP.
fn exchange(a: &Store, b: &Store) {
    let from_a = GossipMessage::new(a.gossip_update(), vec![]);
    let from_b = GossipMessage::new(b.gossip_update(), vec![]);
    b.merge(from_a);
    a.merge(from_b);
}

fn assert_same(a: &Store, b: &Store, keys: &[&str]) {
    assert_eq!(a.len(), b.len());
    for key in keys {
        assert_eq!(
            a.record(key).map(|r| (r.value, r.version)),
            b.record(key).map(|r| (r.value, r.version)),
            "diverged on {}",
            key
        );
    }
}

#[test]
fn test_two_nodes_converge_on_disjoint_writes() {
    let a = Store::default();
    let b = Store::default();
    a.upsert("x", json!(1));
    b.upsert("y", json!(2));

    exchange(&a, &b);

    assert_same(&a, &b, &["x", "y"]);
    assert_eq!(a.len(), 2);

    // Each side relays what it learned once; the echoes are stale.
    exchange(&a, &b);
    assert_same(&a, &b, &["x", "y"]);
    assert!(a.gossip_update().is_empty());
    assert!(b.gossip_update().is_empty());
}

/// One round in which every node pushes its drained changes to every other.
fn full_mesh_round(nodes: &[&Store]) {
    let outbound: Vec<_> = nodes
        .iter()
        .map(|node| GossipMessage::new(node.gossip_update(), vec![]))
        .collect();
    for (from, message) in outbound.iter().enumerate() {
        if message.is_empty() {
            continue;
        }
        for (to, node) in nodes.iter().enumerate() {
            if from != to {
                node.merge(message.clone());
            }
        }
    }
}

#[test]
fn test_record_reaches_node_missed_by_origin() {
    let a = Store::default();
    let b = Store::default();
    let c = Store::default();
    a.upsert("x", json!(1));

    // A's round reaches B, then fails before C.
    b.merge(GossipMessage::new(a.gossip_update(), vec![]));
    assert!(c.record("x").is_none());

    full_mesh_round(&[&a, &b, &c]);
    assert_same(&a, &c, &["x"]);
    assert_same(&b, &c, &["x"]);

    // The relay dies out once every node has the record.
    for _ in 0..3 {
        full_mesh_round(&[&a, &b, &c]);
    }
    for node in [&a, &b, &c] {
        assert!(node.gossip_update().is_empty());
    }
}

#[test]
fn test_two_nodes_converge_on_conflicting_writes() {
    let a = Store::default();
    let b = Store::default();
    a.upsert("k", json!("from a"));
    std::thread::sleep(Duration::from_millis(2));
    b.upsert("k", json!("from b"));

    exchange(&a, &b);

    assert_same(&a, &b, &["k"]);
    assert_eq!(a.record("k").unwrap().value, json!("from b"));
}

#[tokio::test]
async fn test_agent_pushes_over_http() {
    let remote = Arc::new(Store::default());
    let remote_addr = spawn_node(Arc::clone(&remote)).await;

    let local = Arc::new(Store::default());
    let (_deletes, mut agent) = agent_for(&local, vec![remote_addr]);

    local.upsert("user:1", json!({"name": "Ada"}));
    local.upsert("user:2", json!({"name": "Grace"}));

    let round = agent.gossip_once().await.unwrap();
    assert_eq!(
        round,
        GossipRound::Sent {
            peers: 1,
            updates: 2,
            deletes: 0
        }
    );
    assert_same(&local, &remote, &["user:1", "user:2"]);

    // Nothing changed since: the next round sends nothing.
    assert_eq!(agent.gossip_once().await.unwrap(), GossipRound::Idle);

    // Replayed pushes are harmless.
    let replay = GossipMessage::new(
        vec![gossipkv::GossipUpdate {
            key: "user:1".into(),
            value: json!("stale"),
            version: local.record("user:1").unwrap().version,
        }],
        vec![],
    );
    let report = remote.merge(replay);
    assert_eq!(report.stale, 1);
    assert_eq!(remote.record("user:1").unwrap().value, json!({"name": "Ada"}));
}

#[tokio::test]
async fn test_rejecting_peer_aborts_round() {
    let failing = spawn_server(Router::new().route(
        GOSSIP_PATH,
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    ))
    .await;

    let healthy = Arc::new(Store::default());
    let healthy_addr = spawn_node(Arc::clone(&healthy)).await;

    let local = Arc::new(Store::default());
    let (_deletes, mut agent) = agent_for(&local, vec![failing.clone(), healthy_addr]);
    local.upsert("k", json!(1));

    match agent.gossip_once().await {
        Err(GossipError::Rejected { peer, status }) => {
            assert_eq!(peer, failing);
            assert_eq!(status, 500);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(healthy.is_empty(), "later peers are skipped after a failure");
}

#[tokio::test]
async fn test_agent_relays_after_failed_round() {
    let b = Arc::new(Store::default());
    let b_addr = spawn_node(Arc::clone(&b)).await;
    let c = Arc::new(Store::default());
    let c_addr = spawn_node(Arc::clone(&c)).await;

    let a = Arc::new(Store::default());
    let (_a_deletes, mut a_agent) = agent_for(&a, vec![b_addr, "127.0.0.1:1".into()]);
    let (_b_deletes, mut b_agent) = agent_for(&b, vec![c_addr]);

    a.upsert("x", json!(1));
    assert!(matches!(
        a_agent.gossip_once().await,
        Err(GossipError::Transport { .. })
    ));
    assert!(b.record("x").is_some());
    assert!(c.record("x").is_none());

    let round = b_agent.gossip_once().await.unwrap();
    assert_eq!(
        round,
        GossipRound::Sent {
            peers: 1,
            updates: 1,
            deletes: 0
        }
    );
    assert_same(&a, &c, &["x"]);
}

#[tokio::test]
async fn test_expired_record_is_deleted_on_peers_once() {
    let remote = Arc::new(Store::default());
    let remote_addr = spawn_node(Arc::clone(&remote)).await;

    let (access_tx, access_rx) = bounded("access", QueueConfig::default());
    let local = Arc::new(Store::with_access_queue(
        StoreConfig {
            ttl: Duration::from_millis(100),
            ..Default::default()
        },
        access_tx,
    ));
    let (delete_tx, delete_rx) = bounded("delete", QueueConfig::default());
    let _monitor = ExpirationMonitor::start(Arc::clone(&local), access_rx, delete_tx);
    let mut agent = ReplicationAgent::new(
        Arc::clone(&local),
        delete_rx,
        GossipConfig {
            local_addr: "127.0.0.1:0".into(),
            peers: vec![remote_addr],
            ..Default::default()
        },
    );

    local.upsert("session", json!("token"));
    agent.gossip_once().await.unwrap();
    assert!(remote.record("session").is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    // Keeps the local store non-empty once "session" is gone.
    local.upsert("keep", json!(true));

    assert_eq!(local.search("session").await, None);
    tokio::time::timeout(Duration::from_secs(2), async {
        while local.record("session").is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let round = agent.gossip_once().await.unwrap();
    assert_eq!(
        round,
        GossipRound::Sent {
            peers: 1,
            updates: 1,
            deletes: 1
        }
    );
    assert!(remote.record("session").is_none());
    assert!(remote.record("keep").is_some());

    local.upsert("keep", json!(false));
    let round = agent.gossip_once().await.unwrap();
    assert_eq!(
        round,
        GossipRound::Sent {
            peers: 1,
            updates: 1,
            deletes: 0
        }
    );
}
