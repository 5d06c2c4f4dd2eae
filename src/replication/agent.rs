//! Outbound Gossip Agent
//!
//! Every gossip interval the agent collects what changed locally and pushes
//! it to every other node in the cluster.
//!
//! ## One Round
//!
//! ```text
//!   store empty? ──yes──> skip (pending deletes stay queued)
//!        │ no
//!        ▼
//!   Store::gossip_update()        drain dirty records
//!   delete queue (non-blocking)   drain evicted keys
//!        │
//!        ▼
//!   nothing to send? ──yes──> idle
//!        │ no
//!        ▼
//!   POST http://<peer>/gossip/recv  for each peer, in order
//!   first failure aborts the rest of the round
//! ```
//!
//! Drained state is not re-queued after a failure. A peer that missed a
//! change still gets it from any peer that did receive it, since records
//! first learned through gossip are relayed on the receiver's next round.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::protocol::{GossipMessage, GOSSIP_PATH};
use crate::queue::QueueReceiver;
use crate::storage::Store;

/// Default time between gossip rounds.
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_secs(10);

/// Default timeout for a single push to one peer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// The cluster a node assumes when no peers are configured.
pub const DEFAULT_PEERS: [&str; 3] = ["127.0.0.1:8080", "127.0.0.1:8081", "127.0.0.1:8082"];

/// Errors that abort a gossip round.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("failed to reach peer {peer}: {source}")]
    Transport {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {peer} rejected gossip with status {status}")]
    Rejected { peer: String, status: u16 },
}

/// Configuration for the replication agent.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Time between rounds
    pub interval: Duration,
    /// This node's own `host:port`, removed from the peer list
    pub local_addr: String,
    /// Every node of the cluster as `host:port`, possibly including this one
    pub peers: Vec<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_GOSSIP_INTERVAL,
            local_addr: DEFAULT_PEERS[0].to_string(),
            peers: DEFAULT_PEERS.iter().map(|p| p.to_string()).collect(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// What a single round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipRound {
    /// The local store was empty.
    Skipped,
    /// Nothing changed since the last round.
    Idle,
    /// The message reached every peer.
    Sent {
        peers: usize,
        updates: usize,
        deletes: usize,
    },
}

/// Pushes local changes to peers.
#[derive(Debug)]
pub struct ReplicationAgent {
    store: Arc<Store>,
    deletes: QueueReceiver<String>,
    client: reqwest::Client,
    config: GossipConfig,
}

impl ReplicationAgent {
    /// Creates an agent draining `deletes` for evicted keys.
    pub fn new(store: Arc<Store>, deletes: QueueReceiver<String>, config: GossipConfig) -> Self {
        Self {
            store,
            deletes,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// The nodes this agent pushes to, in push order.
    pub fn peers(&self) -> Vec<&str> {
        self.config
            .peers
            .iter()
            .map(String::as_str)
            .filter(|peer| !same_node(&self.config.local_addr, peer))
            .collect()
    }

    /// Drains dirty records and pending deletes into one message.
    ///
    /// Returns `None` when the store is empty, leaving pending deletes
    /// queued for a later round.
    pub fn collect(&mut self) -> Option<GossipMessage> {
        if self.store.is_empty() {
            return None;
        }
        let updates = self.store.gossip_update();
        let deletes = self.deletes.drain_ready();
        Some(GossipMessage::new(updates, deletes))
    }

    /// Runs one gossip round.
    pub async fn gossip_once(&mut self) -> Result<GossipRound, GossipError> {
        let Some(message) = self.collect() else {
            return Ok(GossipRound::Skipped);
        };
        if message.is_empty() {
            return Ok(GossipRound::Idle);
        }

        let peers = self.peers();
        for peer in &peers {
            self.push_to(peer, &message).await?;
        }

        debug!(
            peers = peers.len(),
            updates = message.updates.len(),
            deletes = message.deletes.len(),
            "Gossip round complete"
        );
        Ok(GossipRound::Sent {
            peers: peers.len(),
            updates: message.updates.len(),
            deletes: message.deletes.len(),
        })
    }

    async fn push_to(&self, peer: &str, message: &GossipMessage) -> Result<(), GossipError> {
        let url = format!("http://{}{}", peer, GOSSIP_PATH);
        let response = self
            .client
            .post(url)
            .json(message)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| GossipError::Transport {
                peer: peer.to_string(),
                source,
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(GossipError::Rejected {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Runs the agent as a background task, one round per interval.
    ///
    /// The first round happens one full interval after start.
    pub fn start(self) -> GossipHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            peers = ?self.peers(),
            "Replication agent started"
        );
        tokio::spawn(agent_loop(self, shutdown_rx));

        GossipHandle { shutdown_tx }
    }
}

/// Whether two `host:port` strings name the same node.
///
/// Loopback and unspecified hosts are treated as this machine, so a node
/// bound to `0.0.0.0:8081` recognises `127.0.0.1:8081` as itself.
fn same_node(local: &str, peer: &str) -> bool {
    if local == peer {
        return true;
    }
    match (split_host_port(local), split_host_port(peer)) {
        (Some((local_host, local_port)), Some((peer_host, peer_port))) => {
            local_port == peer_port
                && (local_host.eq_ignore_ascii_case(peer_host)
                    || (is_this_machine(local_host) && is_this_machine(peer_host)))
        }
        _ => false,
    }
}

fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host, port.parse().ok()?))
}

fn is_this_machine(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>()
        .map(|ip| ip.is_loopback() || ip.is_unspecified())
        .unwrap_or(false)
}

/// A handle to the running replication agent.
///
/// When this handle is dropped, the agent task will be stopped.
#[derive(Debug)]
pub struct GossipHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl GossipHandle {
    /// Stops the agent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Replication agent stopped");
    }
}

impl Drop for GossipHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn agent_loop(mut agent: ReplicationAgent, mut shutdown_rx: watch::Receiver<bool>) {
    let period = agent.config.interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Replication agent received shutdown signal");
                    return;
                }
                continue;
            }
        }

        match agent.gossip_once().await {
            Ok(GossipRound::Sent { .. }) | Ok(GossipRound::Idle) => {}
            Ok(GossipRound::Skipped) => debug!("Store empty, gossip round skipped"),
            Err(e) => warn!(error = %e, "Gossip round aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{bounded, QueueConfig, QueueSender};
    use crate::storage::StoreConfig;
    use serde_json::json;

    fn agent(config: GossipConfig) -> (Arc<Store>, QueueSender<String>, ReplicationAgent) {
        let store = Arc::new(Store::new(StoreConfig::default()));
        let (tx, rx) = bounded("delete", QueueConfig::default());
        let agent = ReplicationAgent::new(Arc::clone(&store), rx, config);
        (store, tx, agent)
    }

    #[test]
    fn test_peers_exclude_local_node() {
        let (_, _, agent) = agent(GossipConfig {
            local_addr: "127.0.0.1:8081".into(),
            ..Default::default()
        });
        assert_eq!(agent.peers(), vec!["127.0.0.1:8080", "127.0.0.1:8082"]);
    }

    #[test]
    fn test_wildcard_bind_still_excludes_self() {
        for local in ["0.0.0.0:8081", "localhost:8081", "[::]:8081"] {
            let (_, _, agent) = agent(GossipConfig {
                local_addr: local.into(),
                ..Default::default()
            });
            assert_eq!(
                agent.peers(),
                vec!["127.0.0.1:8080", "127.0.0.1:8082"],
                "local_addr {}",
                local
            );
        }
    }

    #[test]
    fn test_same_port_on_other_host_is_a_peer() {
        let (_, _, agent) = agent(GossipConfig {
            local_addr: "10.0.0.1:8080".into(),
            peers: vec!["10.0.0.1:8080".into(), "10.0.0.2:8080".into()],
            ..Default::default()
        });
        assert_eq!(agent.peers(), vec!["10.0.0.2:8080"]);
        assert!(!same_node("0.0.0.0:8080", "10.0.0.2:8080"));
        assert!(!same_node("0.0.0.0:8080", "127.0.0.1:8081"));
    }

    #[tokio::test]
    async fn test_empty_store_keeps_pending_deletes() {
        let (store, deletes, mut agent) = agent(GossipConfig::default());
        deletes.push("gone".to_string()).await;

        assert!(agent.collect().is_none());
        assert_eq!(deletes.len(), 1);

        store.upsert("k", json!(1));
        let message = agent.collect().unwrap();
        assert_eq!(message.updates.len(), 1);
        assert_eq!(message.deletes, vec!["gone".to_string()]);
        assert!(deletes.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_changed_sends_nothing() {
        let (store, _, mut agent) = agent(GossipConfig {
            peers: vec!["127.0.0.1:1".into()],
            ..Default::default()
        });
        store.upsert("k", json!(1));
        store.gossip_update();

        assert_eq!(agent.gossip_once().await.unwrap(), GossipRound::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_peer_aborts_round() {
        let (store, _, mut agent) = agent(GossipConfig {
            local_addr: "127.0.0.1:0".into(),
            peers: vec!["127.0.0.1:1".into()],
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        });
        store.upsert("k", json!(1));

        let err = agent.gossip_once().await.unwrap_err();
        assert!(matches!(err, GossipError::Transport { ref peer, .. } if peer == "127.0.0.1:1"));

        // The drained change is not re-queued.
        assert!(store.gossip_update().is_empty());
    }
}
