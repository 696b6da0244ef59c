// src/core/membership/handler.rs

//! Applies authenticated membership events to the cluster state.
//!
//! Every peer observed by the gossip layer must carry a verifiable join
//! token in its tags before it is admitted to `ClusterState`; rejection is
//! silent from the peer's point of view and only surfaces in our logs.

use crate::core::auth::ClusterAuth;
use crate::core::elector::Elector;
use crate::core::membership::{Member, MemberEventKind, MembershipEvent, tags};
use crate::core::state::{ClusterState, NodeStatus};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Consumes membership events, gates them on join-token verification, and
/// keeps `ClusterState` and the consensus voter set in step.
pub struct ClusterEventHandler {
    state: Arc<ClusterState>,
    auth: ClusterAuth,
    elector: RwLock<Option<Arc<dyn Elector>>>,
    /// Port peers accept consensus connections on, cluster-wide.
    consensus_port: u16,
    local_node_id: String,
}

impl ClusterEventHandler {
    pub fn new(
        state: Arc<ClusterState>,
        auth: ClusterAuth,
        consensus_port: u16,
        local_node_id: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            auth,
            elector: RwLock::new(None),
            consensus_port,
            local_node_id,
        })
    }

    /// Wires in the elector after construction; the elector and membership
    /// layers reference each other, so one side has to be attached late.
    pub fn attach_elector(&self, elector: Arc<dyn Elector>) {
        *self.elector.write() = Some(elector);
    }

    pub fn handle(&self, event: MembershipEvent) {
        let Some(peer_id) = event.member.tags.get(tags::TAG_ID).cloned() else {
            debug!(
                "Ignoring membership event for {} without an id tag",
                event.member.name
            );
            return;
        };
        if peer_id == self.local_node_id {
            return;
        }

        match event.kind {
            MemberEventKind::Join | MemberEventKind::Update => {
                self.handle_join_or_update(&event.member, &peer_id)
            }
            MemberEventKind::Leave => {
                self.state.update_node_status(&peer_id, NodeStatus::Left);
                self.remove_consensus_member(&peer_id);
            }
            MemberEventKind::Failed => {
                // The gossip suspicion timeout is the only grace period; a
                // failed peer is treated exactly like a departed one.
                self.state.update_node_status(&peer_id, NodeStatus::Failed);
                self.remove_consensus_member(&peer_id);
            }
            MemberEventKind::Reap => {
                if self.state.remove_node(&peer_id).is_some() {
                    debug!("Removed reaped node {peer_id} from cluster state");
                }
            }
        }
    }

    fn handle_join_or_update(&self, member: &Member, peer_id: &str) {
        let Some(token) = member.tags.get(tags::TAG_AUTH_TOKEN) else {
            warn!(
                "Rejecting peer {} ({}): no auth token in tags",
                member.name, peer_id
            );
            return;
        };

        let token_node_id = match self.auth.verify_join_token(token) {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Rejecting peer {} ({}): join token verification failed: {e}",
                    member.name, peer_id
                );
                return;
            }
        };
        if token_node_id != *peer_id {
            warn!(
                "Rejecting peer {}: token is for node {} but tags claim {}",
                member.name, token_node_id, peer_id
            );
            return;
        }

        let Some(node) = tags::node_from_tags(
            &member.name,
            member.addr,
            &member.tags,
            NodeStatus::Alive,
        ) else {
            warn!("Rejecting peer {}: unparsable tags", member.name);
            return;
        };
        self.state.add_node(node);

        // The consensus leader tracks admitted peers as voters.
        let elector = self.elector.read().clone();
        if let Some(elector) = elector {
            if elector.is_leader() {
                let voter_addr = SocketAddr::new(member.addr.ip(), self.consensus_port);
                let id = peer_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = elector.add_voter(&id, voter_addr).await {
                        warn!("Failed to add voter {id} at {voter_addr}: {e}");
                    }
                });
            }
        }
    }

    fn remove_consensus_member(&self, peer_id: &str) {
        let elector = self.elector.read().clone();
        if let Some(elector) = elector {
            if elector.is_leader() {
                let id = peer_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = elector.remove_server(&id).await {
                        warn!("Failed to remove consensus member {id}: {e}");
                    }
                });
            }
        }
    }
}
