// src/core/elector/mod.rs

//! Leader election and replicated-state mutation, behind one interface.
//!
//! Two implementations exist: the raft elector ([`raft`]) keeps a
//! persistent replicated log and guarantees at most one leader across
//! partitions; the gossip elector ([`gossip`]) derives leadership
//! deterministically from the membership view and keeps no disk state.
//! The role supervisor is polymorphic over [`Elector`] and is selected at
//! boot via `cluster.election_mode`.

pub mod gossip;
pub mod raft;

use crate::core::errors::ClusterError;
use crate::core::state::ClusterState;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub use gossip::GossipElector;
pub use raft::RaftElector;

/// A lazy sequence of leadership booleans. The current value is delivered
/// immediately on subscription; afterwards one value arrives per observed
/// transition. Intermediate transitions may be dropped for a slow
/// consumer, but the final value is always delivered.
pub struct LeadershipObserver {
    rx: watch::Receiver<bool>,
    primed: bool,
}

impl LeadershipObserver {
    /// Wraps a watch receiver; the receiver's current value is delivered
    /// as the first element of the sequence.
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx, primed: false }
    }

    /// The next leadership value. Returns `None` once the elector is gone.
    pub async fn next(&mut self) -> Option<bool> {
        if !self.primed {
            self.primed = true;
            return Some(*self.rx.borrow_and_update());
        }
        match self.rx.changed().await {
            Ok(()) => Some(*self.rx.borrow_and_update()),
            Err(_) => None,
        }
    }

    pub fn current(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Fans leadership transitions out to per-role observers. Shared by both
/// elector implementations.
#[derive(Default)]
pub(crate) struct LeadershipBroadcaster {
    observers: RwLock<Vec<(String, watch::Sender<bool>)>>,
}

impl LeadershipBroadcaster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, role: &str, current: bool) -> LeadershipObserver {
        let (tx, rx) = watch::channel(current);
        self.observers.write().push((role.to_string(), tx));
        LeadershipObserver::new(rx)
    }

    /// Publishes a transition to every observer. `send_replace` never
    /// blocks; watch channels keep only the latest value.
    pub(crate) fn publish(&self, is_leader: bool) {
        self.observers.write().retain(|(_, tx)| {
            tx.send_replace(is_leader);
            tx.receiver_count() > 0
        });
    }
}

/// The capability set both electors expose to the rest of the agent.
#[async_trait]
pub trait Elector: Send + Sync {
    fn is_leader(&self) -> bool;

    /// In both shipped modes the elected leader leads every role.
    fn is_leader_for_role(&self, role: &str) -> bool;

    fn get_leader(&self) -> Option<String>;

    /// Blocks until some node holds leadership, or times out.
    async fn wait_for_leader(&self, timeout: Duration) -> Result<String, ClusterError>;

    fn register_role_leadership_observer(&self, role: &str) -> LeadershipObserver;

    /// Replicates the munge key through the election substrate. Leader-only.
    async fn apply_set_munge_key(&self, key: Vec<u8>, digest: String) -> Result<(), ClusterError>;

    /// Adds a consensus voter. Leader-only; a no-op in gossip mode.
    async fn add_voter(&self, id: &str, addr: SocketAddr) -> Result<(), ClusterError>;

    /// Removes a consensus member. Leader-only; a no-op in gossip mode.
    async fn remove_server(&self, id: &str) -> Result<(), ClusterError>;

    fn get_cluster_state(&self) -> Arc<ClusterState>;

    /// Hands off leadership where possible and closes the transport.
    async fn shutdown(&self) -> Result<(), ClusterError>;
}
