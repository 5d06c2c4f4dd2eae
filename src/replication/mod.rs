//! Replication Module
//!
//! Eventually consistent replication by periodic push gossip with
//! last-writer-wins conflict resolution.
//!
//! ```text
//!   node A                                          node B
//! ┌──────────────────┐   POST /gossip/recv    ┌──────────────────┐
//! │ ReplicationAgent │ ─────────────────────> │  Store::merge    │
//! │  dirty records   │   GossipMessage        │  version > local │
//! │  evicted keys    │   {Update, Delete}     │  ? overwrite     │
//! └──────────────────┘                        └──────────────────┘
//! ```
//!
//! The outbound half lives in [`agent`]; the inbound merge is
//! [`Store::merge`](crate::storage::Store::merge), applied by the server's
//! gossip handler.

pub mod agent;
pub mod protocol;

pub use agent::{
    GossipConfig, GossipError, GossipHandle, GossipRound, ReplicationAgent, DEFAULT_GOSSIP_INTERVAL,
    DEFAULT_PEERS,
};
pub use protocol::{GossipMessage, GossipUpdate, GOSSIP_PATH};
