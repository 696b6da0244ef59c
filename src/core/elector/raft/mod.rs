// src/core/elector/raft/mod.rs

//! The persistent-mode elector: a replicated log and leader election over
//! the subset of cluster state that must survive restarts.

pub mod fsm;
pub mod log;
pub mod message;
pub mod node;
pub mod snapshot;
pub mod transport;

use crate::core::elector::{Elector, LeadershipBroadcaster, LeadershipObserver};
use crate::core::errors::ClusterError;
use crate::core::state::ClusterState;
use async_trait::async_trait;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{info, warn};

use fsm::{RaftCommand, StateMachine};
use log::{LogPayload, LogStore, StableStore};
use node::{ApiRequest, RaftNode, RaftNodeConfig, RaftRole, RaftStatus};
use snapshot::SnapshotStore;
use transport::RaftTransport;

/// Deadline for replicating a command through the log.
const APPLY_TIMEOUT: Duration = Duration::from_secs(10);
const API_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct RaftElectorConfig {
    pub node_id: String,
    pub bind_addr: SocketAddr,
    pub advertise_addr: SocketAddr,
    /// Directory holding the log, stable store, and snapshots.
    pub data_dir: PathBuf,
    /// Whether this node seeds the cluster as the single bootstrap voter.
    pub bootstrap: bool,
}

/// Persistent-mode elector facade. All consensus work happens in the node
/// actor; this type translates the [`Elector`] capability set into actor
/// requests and mirrors leadership into `ClusterState`.
pub struct RaftElector {
    state: Arc<ClusterState>,
    api_tx: mpsc::Sender<ApiRequest>,
    status_rx: watch::Receiver<RaftStatus>,
    broadcaster: Arc<LeadershipBroadcaster>,
    transport: Arc<RaftTransport>,
    advertise_addr: SocketAddr,
}

impl RaftElector {
    /// Opens the on-disk stores, binds the consensus transport, and starts
    /// the consensus actor. With `bootstrap` set and a fresh store, this
    /// node elects itself as a single-voter quorum.
    pub async fn spawn(
        config: RaftElectorConfig,
        state: Arc<ClusterState>,
    ) -> Result<Arc<Self>, ClusterError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let log = LogStore::open(&config.data_dir.join("raft.log"))?;
        let stable = StableStore::open(&config.data_dir.join("raft.stable"));
        let snapshots = SnapshotStore::open(&config.data_dir.join("snapshots"))?;
        let fsm = StateMachine::new(state.clone());

        let (transport, bound_addr, inbound_rx) = RaftTransport::bind(config.bind_addr).await?;
        let mut advertise_addr = config.advertise_addr;
        if advertise_addr.port() == 0 {
            advertise_addr.set_port(bound_addr.port());
        }
        let (status_tx, status_rx) = watch::channel(RaftStatus {
            role: RaftRole::Follower,
            term: 0,
            leader_id: None,
            voter_count: 0,
        });

        let node = RaftNode::recover(
            RaftNodeConfig {
                node_id: config.node_id.clone(),
                advertise_addr,
                bootstrap: config.bootstrap,
            },
            transport.clone(),
            fsm,
            log,
            stable,
            snapshots,
            status_tx,
        )?;

        let (api_tx, api_rx) = mpsc::channel(API_QUEUE_DEPTH);
        tokio::spawn(node.run(inbound_rx, api_rx));

        let elector = Arc::new(Self {
            state,
            api_tx,
            status_rx,
            broadcaster: Arc::new(LeadershipBroadcaster::new()),
            transport,
            advertise_addr,
        });
        tokio::spawn(Self::run_leadership_monitor(
            elector.state.clone(),
            elector.broadcaster.clone(),
            elector.status_rx.clone(),
        ));
        Ok(elector)
    }

    /// Watches consensus status and fans transitions out to role observers,
    /// mirroring the leader assignment into the shared state.
    async fn run_leadership_monitor(
        state: Arc<ClusterState>,
        broadcaster: Arc<LeadershipBroadcaster>,
        mut status_rx: watch::Receiver<RaftStatus>,
    ) {
        let mut last_leader: Option<String> = None;
        let mut was_leader = false;
        loop {
            let status = status_rx.borrow_and_update().clone();

            let is_leader = status.role == RaftRole::Leader;
            if is_leader != was_leader {
                info!(
                    "Leadership transition: this node is {} leader (term {})",
                    if is_leader { "now" } else { "no longer" },
                    status.term
                );
                was_leader = is_leader;
                broadcaster.publish(is_leader);
            }

            if status.leader_id != last_leader {
                if let Some(leader) = &status.leader_id {
                    // The consensus leader leads every role.
                    let mut roles: std::collections::HashSet<String> =
                        crate::core::roles::ALL_ROLES.iter().map(|r| r.to_string()).collect();
                    for node in state.all_nodes() {
                        roles.extend(node.roles.iter().cloned());
                    }
                    for role in roles {
                        state.set_leader(&role, leader);
                    }
                }
                last_leader = status.leader_id.clone();
            }

            if status_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// The consensus address this node announces to its peers.
    pub fn advertise_addr(&self) -> SocketAddr {
        self.advertise_addr
    }

    async fn submit(&self, payload: LogPayload) -> Result<(), ClusterError> {
        if self.status_rx.borrow().role != RaftRole::Leader {
            return Err(ClusterError::NotLeader);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.api_tx
            .send(ApiRequest::Apply {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClusterError::Internal("consensus node is gone".into()))?;
        match time::timeout(APPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClusterError::Internal("consensus node dropped the request".into())),
            Err(_) => Err(ClusterError::Timeout(format!(
                "log apply did not commit within {APPLY_TIMEOUT:?}"
            ))),
        }
    }
}

#[async_trait]
impl Elector for RaftElector {
    fn is_leader(&self) -> bool {
        self.status_rx.borrow().role == RaftRole::Leader
    }

    fn is_leader_for_role(&self, _role: &str) -> bool {
        self.is_leader()
    }

    fn get_leader(&self) -> Option<String> {
        self.status_rx.borrow().leader_id.clone()
    }

    async fn wait_for_leader(&self, timeout: Duration) -> Result<String, ClusterError> {
        let mut rx = self.status_rx.clone();
        let wait = async {
            loop {
                if let Some(leader) = rx.borrow_and_update().leader_id.clone() {
                    return leader;
                }
                if rx.changed().await.is_err() {
                    // Node is gone; let the deadline fire.
                    std::future::pending::<()>().await;
                }
            }
        };
        time::timeout(timeout, wait)
            .await
            .map_err(|_| ClusterError::Timeout(format!("no leader elected within {timeout:?}")))
    }

    fn register_role_leadership_observer(&self, role: &str) -> LeadershipObserver {
        self.broadcaster.register(role, self.is_leader())
    }

    async fn apply_set_munge_key(&self, key: Vec<u8>, digest: String) -> Result<(), ClusterError> {
        self.submit(LogPayload::Command(RaftCommand::SetMungeKey {
            key,
            digest,
            created_at: Utc::now(),
        }))
        .await
    }

    async fn add_voter(&self, id: &str, addr: SocketAddr) -> Result<(), ClusterError> {
        self.submit(LogPayload::AddVoter {
            id: id.to_string(),
            addr,
        })
        .await
    }

    async fn remove_server(&self, id: &str) -> Result<(), ClusterError> {
        self.submit(LogPayload::RemoveServer { id: id.to_string() })
            .await
    }

    fn get_cluster_state(&self) -> Arc<ClusterState> {
        self.state.clone()
    }

    async fn shutdown(&self) -> Result<(), ClusterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .api_tx
            .send(ApiRequest::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            if let Err(e) = time::timeout(Duration::from_secs(2), reply_rx).await {
                warn!("Consensus node did not acknowledge shutdown: {e}");
            }
        }
        self.transport.shutdown();
        Ok(())
    }
}
