// src/core/elector/raft/fsm.rs

//! The replicated state machine: applies committed commands to
//! `ClusterState` and produces/restores snapshots.

use crate::core::errors::ClusterError;
use crate::core::state::{ClusterState, MungeKey, Node, ReplicatedView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// A mutation of the replicated cluster state. Payloads are
/// self-describing; applying the same command twice is harmless.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RaftCommand {
    SetMungeKey {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
        digest: String,
        created_at: DateTime<Utc>,
    },
    AddNode(Node),
    RemoveNode {
        id: String,
    },
    SetLeader {
        role: String,
        node_id: String,
    },
}

/// Applies commands to the shared cluster state, in log order.
pub struct StateMachine {
    state: Arc<ClusterState>,
}

impl StateMachine {
    pub fn new(state: Arc<ClusterState>) -> Self {
        Self { state }
    }

    pub fn apply(&self, command: &RaftCommand) {
        match command {
            RaftCommand::SetMungeKey {
                key,
                digest,
                created_at,
            } => {
                let munge = MungeKey {
                    key: key.clone(),
                    digest: digest.clone(),
                    created_at: *created_at,
                };
                if let Err(e) = self.state.set_munge_key(munge) {
                    // The key is immutable once set; a conflicting command
                    // can only come from a misbehaving peer.
                    warn!("Refusing replicated munge key: {e}");
                }
            }
            RaftCommand::AddNode(node) => {
                debug!("Applying AddNode({})", node.id);
                self.state.add_node(node.clone());
            }
            RaftCommand::RemoveNode { id } => {
                debug!("Applying RemoveNode({id})");
                self.state.remove_node(id);
            }
            RaftCommand::SetLeader { role, node_id } => {
                self.state.set_leader(role, node_id);
            }
        }
    }

    /// Serializes {nodes, leaders, secrets} as canonical JSON.
    pub fn snapshot(&self) -> Result<Vec<u8>, ClusterError> {
        Ok(serde_json::to_vec(&self.state.replicated_view())?)
    }

    /// Replaces the replicated state from a snapshot, in one critical
    /// section under the state write lock.
    pub fn restore(&self, data: &[u8]) -> Result<(), ClusterError> {
        let view: ReplicatedView = serde_json::from_slice(data)?;
        self.state.restore_replicated_view(view);
        Ok(())
    }
}
