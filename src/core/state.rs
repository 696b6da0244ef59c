// src/core/state.rs

//! The in-memory replicated cluster model: nodes, role leaders, and shared
//! secrets. One readers-writer lock guards the whole aggregate; every public
//! operation acquires it briefly and returns independent copies, so no
//! internal reference ever leaks to a caller.

use crate::core::errors::ClusterError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Fixed length of the munge key required by the external SLURM service.
pub const MUNGE_KEY_LEN: usize = 128;

/// Liveness of a cluster member as observed by the membership layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodeStatus {
    Alive,
    Leaving,
    Left,
    Failed,
    #[default]
    Unknown,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Alive => "alive",
            NodeStatus::Leaving => "leaving",
            NodeStatus::Left => "left",
            NodeStatus::Failed => "failed",
            NodeStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Hardware capabilities a node advertises, as configured plus
/// runtime-detected defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Capabilities {
    pub cpu_count: u32,
    pub ram: String,
    pub gpu: bool,
    pub arch: String,
}

/// The public keys a node publishes through its tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeKeys {
    /// Base58 Ed25519 identity key; also the node ID.
    pub cluster_id_key: String,
    /// Base64 X25519 overlay key.
    pub overlay_key: String,
}

/// One cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub roles: HashSet<String>,
    pub capabilities: Capabilities,
    pub status: NodeStatus,
    pub address: Option<SocketAddr>,
    pub overlay_ip: Option<IpAddr>,
    pub public_keys: NodeKeys,
    pub tags: HashMap<String, String>,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            roles: HashSet::new(),
            capabilities: Capabilities::default(),
            status: NodeStatus::Unknown,
            address: None,
            overlay_ip: None,
            public_keys: NodeKeys::default(),
            tags: HashMap::new(),
            joined_at: now,
            last_seen: now,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// The replicated munge key and its integrity digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MungeKey {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    /// SHA-256 hex digest of `key`.
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl MungeKey {
    /// Wraps raw key bytes, computing the digest.
    pub fn new(key: Vec<u8>) -> Result<Self, ClusterError> {
        if key.len() != MUNGE_KEY_LEN {
            return Err(ClusterError::Consistency(format!(
                "munge key must be exactly {MUNGE_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let digest = hex::encode(Sha256::digest(&key));
        Ok(Self {
            key,
            digest,
            created_at: Utc::now(),
        })
    }

    /// Checks the stored digest against the key bytes.
    pub fn verify(&self) -> bool {
        hex::encode(Sha256::digest(&self.key)) == self.digest
    }
}

/// A serializable copy of everything the electors replicate. Also the
/// snapshot format of the raft state machine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplicatedView {
    pub nodes: BTreeMap<String, Node>,
    pub leaders: BTreeMap<String, String>,
    pub munge_key: Option<MungeKey>,
}

#[derive(Default)]
struct StateInner {
    nodes: HashMap<String, Node>,
    leaders: HashMap<String, String>,
    munge_key: Option<MungeKey>,
}

/// Process-wide cluster state. Constructed once by the daemon and shared
/// behind an `Arc`.
#[derive(Default)]
pub struct ClusterState {
    inner: RwLock<StateInner>,
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ClusterState")
            .field("nodes", &inner.nodes.len())
            .field("leaders", &inner.leaders.len())
            .field("has_munge_key", &inner.munge_key.is_some())
            .finish()
    }
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a node. The original `joined_at` is preserved
    /// when the node is already known; `last_seen` is always refreshed.
    pub fn add_node(&self, mut node: Node) {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.nodes.get(&node.id) {
            node.joined_at = existing.joined_at;
        }
        node.last_seen = Utc::now();
        debug!("Cluster state: upserting node {} ({})", node.name, node.id);
        inner.nodes.insert(node.id.clone(), node);
    }

    pub fn remove_node(&self, id: &str) -> Option<Node> {
        self.inner.write().nodes.remove(id)
    }

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.inner.read().nodes.get(id).cloned()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn nodes_with_role(&self, role: &str) -> Vec<Node> {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|n| n.has_role(role))
            .cloned()
            .collect()
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<Node> {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|n| n.status == status)
            .cloned()
            .collect()
    }

    /// Updates a node's liveness and refreshes `last_seen`. Returns false if
    /// the node is unknown.
    pub fn update_node_status(&self, id: &str, status: NodeStatus) -> bool {
        let mut inner = self.inner.write();
        match inner.nodes.get_mut(id) {
            Some(node) => {
                node.status = status;
                node.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn update_node_tags(&self, id: &str, tags: HashMap<String, String>) -> bool {
        let mut inner = self.inner.write();
        match inner.nodes.get_mut(id) {
            Some(node) => {
                node.tags = tags;
                node.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn set_leader(&self, role: &str, node_id: &str) {
        self.inner
            .write()
            .leaders
            .insert(role.to_string(), node_id.to_string());
    }

    pub fn get_leader(&self, role: &str) -> Option<String> {
        self.inner.read().leaders.get(role).cloned()
    }

    pub fn remove_leader(&self, role: &str) -> Option<String> {
        self.inner.write().leaders.remove(role)
    }

    /// The full Node record of a role's current leader, when both the
    /// assignment and the node exist.
    pub fn leader_node(&self, role: &str) -> Option<Node> {
        let inner = self.inner.read();
        inner
            .leaders
            .get(role)
            .and_then(|id| inner.nodes.get(id))
            .cloned()
    }

    pub fn leaders(&self) -> HashMap<String, String> {
        self.inner.read().leaders.clone()
    }

    /// Stores the munge key. The key is created exactly once; replacing an
    /// existing key with different bytes is a consistency violation.
    pub fn set_munge_key(&self, key: MungeKey) -> Result<(), ClusterError> {
        if !key.verify() {
            return Err(ClusterError::Consistency(
                "munge key digest does not match key bytes".into(),
            ));
        }
        let mut inner = self.inner.write();
        if let Some(existing) = &inner.munge_key {
            if existing.digest == key.digest {
                return Ok(());
            }
            return Err(ClusterError::Consistency(
                "munge key is already set with a different digest".into(),
            ));
        }
        inner.munge_key = Some(key);
        Ok(())
    }

    pub fn get_munge_key(&self) -> Option<MungeKey> {
        self.inner.read().munge_key.clone()
    }

    pub fn has_munge_key(&self) -> bool {
        self.inner.read().munge_key.is_some()
    }

    /// Copies out everything the electors replicate.
    pub fn replicated_view(&self) -> ReplicatedView {
        let inner = self.inner.read();
        ReplicatedView {
            nodes: inner.nodes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            leaders: inner.leaders.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            munge_key: inner.munge_key.clone(),
        }
    }

    /// Replaces the replicated portion wholesale, e.g. when restoring a
    /// raft snapshot. Performed under the write lock in one critical section.
    pub fn restore_replicated_view(&self, view: ReplicatedView) {
        let mut inner = self.inner.write();
        inner.nodes = view.nodes.into_iter().collect();
        inner.leaders = view.leaders.into_iter().collect();
        inner.munge_key = view.munge_key;
    }
}
