// src/core/elector/gossip.rs

//! The stateless elector: deterministic leader selection over the gossip
//! membership, with replicated state carried in versioned snapshots.
//!
//! Every two seconds each node sorts the alive member names and takes the
//! lowest as the leader. No quorum is involved, so a partitioned island
//! will elect its own lowest-named member: consumers must either tolerate
//! duplicate leadership for their role or run the persistent elector.
//! Replicated state only moves forward (snapshots apply in strictly
//! increasing version order), so duplicate leaders cannot regress it.

use crate::core::elector::{Elector, LeadershipBroadcaster, LeadershipObserver};
use crate::core::errors::ClusterError;
use crate::core::membership::{MemberStatus, Membership, QueryFilter, tags};
use crate::core::state::{ClusterState, MungeKey};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

/// How often leadership is recomputed from the membership view.
const ELECTION_INTERVAL: Duration = Duration::from_secs(2);
/// How often the leader rebroadcasts its replicated state.
const BROADCAST_INTERVAL: Duration = Duration::from_secs(30);
/// Gossip user-event name carrying state snapshots.
const STATE_SYNC_EVENT: &str = "state-sync";
/// Gossip query name used by booting followers.
const GET_STATE_QUERY: &str = "get-state";
/// Replicated-map key holding the munge key.
const KEY_MUNGE: &str = "munge_key";

/// The replicated state as broadcast by the leader. Fits in one gossip
/// user-event payload.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StateSnapshot {
    pub version: u64,
    pub entries: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct ReplicatedMap {
    version: u64,
    entries: BTreeMap<String, Vec<u8>>,
}

/// Stateless elector over gossip membership.
pub struct GossipElector {
    local_node_id: String,
    local_name: String,
    state: Arc<ClusterState>,
    membership: Arc<dyn Membership>,
    replicated: Mutex<ReplicatedMap>,
    /// (member name, node id) of the current leader.
    leader: RwLock<Option<(String, String)>>,
    is_leader_flag: AtomicBool,
    broadcaster: Arc<LeadershipBroadcaster>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GossipElector {
    /// Builds the elector over an already-running membership layer and
    /// starts the election and broadcast loops. A boot-time `get-state`
    /// query pulls the current replicated state from the leader.
    pub fn spawn(
        local_node_id: String,
        state: Arc<ClusterState>,
        membership: Arc<dyn Membership>,
    ) -> Arc<Self> {
        let local_name = membership.local_member().name;
        let (shutdown_tx, _) = broadcast::channel(1);
        let elector = Arc::new(Self {
            local_node_id,
            local_name,
            state,
            membership,
            replicated: Mutex::new(ReplicatedMap::default()),
            leader: RwLock::new(None),
            is_leader_flag: AtomicBool::new(false),
            broadcaster: Arc::new(LeadershipBroadcaster::new()),
            shutdown_tx,
        });

        // Handlers hold weak references; the loops keep the elector alive
        // until shutdown.
        let weak = Arc::downgrade(&elector);
        elector.membership.register_user_event_handler(Arc::new(move |event| {
            if event.name != STATE_SYNC_EVENT {
                return;
            }
            if let Some(this) = weak.upgrade() {
                match bincode::serde::decode_from_slice::<StateSnapshot, _>(
                    &event.payload,
                    bincode::config::standard(),
                ) {
                    Ok((snapshot, _)) => {
                        this.apply_snapshot(snapshot);
                    }
                    Err(e) => warn!("Undecodable state snapshot from {}: {e}", event.origin),
                }
            }
        }));

        let weak = Arc::downgrade(&elector);
        elector.membership.register_query_handler(Arc::new(move |name, _payload| {
            if name != GET_STATE_QUERY {
                return None;
            }
            let this = weak.upgrade()?;
            let snapshot = this.current_snapshot();
            bincode::serde::encode_to_vec(&snapshot, bincode::config::standard()).ok()
        }));

        tokio::spawn(elector.clone().run_election_loop());
        tokio::spawn(elector.clone().run_broadcast_loop());
        tokio::spawn(elector.clone().sync_state_from_leader());
        elector
    }

    async fn run_election_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = time::interval(ELECTION_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Gossip elector election loop shutting down.");
                    return;
                }
                _ = tick.tick() => self.recompute_leadership(),
            }
        }
    }

    async fn run_broadcast_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = time::interval(BROADCAST_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Gossip elector broadcast loop shutting down.");
                    return;
                }
                _ = tick.tick() => {
                    if self.is_leader() {
                        self.broadcast_snapshot().await;
                    }
                }
            }
        }
    }

    /// Deterministic selection: the lexicographically lowest alive member
    /// name wins. Recomputable on every node from local state alone.
    fn recompute_leadership(&self) {
        let mut alive: Vec<_> = self
            .membership
            .members()
            .into_iter()
            .filter(|m| m.status == MemberStatus::Alive)
            .collect();
        alive.sort_by(|a, b| a.name.cmp(&b.name));

        let Some(winner) = alive.first() else {
            return;
        };
        let winner_id = match winner.tags.get(tags::TAG_ID) {
            Some(id) => id.clone(),
            None if winner.name == self.local_name => self.local_node_id.clone(),
            None => {
                debug!("Leader candidate {} has no id tag yet", winner.name);
                return;
            }
        };

        let changed = {
            let mut leader = self.leader.write();
            let changed = leader.as_ref().map(|(name, _)| name) != Some(&winner.name);
            if changed {
                *leader = Some((winner.name.clone(), winner_id.clone()));
            }
            changed
        };

        let am_leader = winner.name == self.local_name;
        let was_leader = self.is_leader_flag.swap(am_leader, Ordering::SeqCst);

        if changed {
            info!("Gossip leader is now {} ({})", winner.name, winner_id);
            // One leader for every role in this mode.
            let mut roles: std::collections::HashSet<String> = crate::core::roles::ALL_ROLES
                .iter()
                .map(|r| r.to_string())
                .collect();
            for node in self.state.all_nodes() {
                roles.extend(node.roles.iter().cloned());
            }
            for role in roles {
                self.state.set_leader(&role, &winner_id);
            }
        }
        if am_leader != was_leader {
            self.broadcaster.publish(am_leader);
        }
    }

    fn current_snapshot(&self) -> StateSnapshot {
        let rep = self.replicated.lock();
        StateSnapshot {
            version: rep.version,
            entries: rep.entries.clone(),
        }
    }

    /// Applies a received snapshot if and only if it moves the version
    /// strictly forward.
    pub fn apply_snapshot(&self, snapshot: StateSnapshot) -> bool {
        {
            let mut rep = self.replicated.lock();
            if snapshot.version <= rep.version {
                debug!(
                    "Discarding state snapshot v{} (local v{})",
                    snapshot.version, rep.version
                );
                return false;
            }
            rep.version = snapshot.version;
            rep.entries = snapshot.entries.clone();
        }

        if let Some(raw) = snapshot.entries.get(KEY_MUNGE) {
            match serde_json::from_slice::<MungeKey>(raw) {
                Ok(munge) => {
                    if let Err(e) = self.state.set_munge_key(munge) {
                        warn!("Rejecting replicated munge key: {e}");
                    }
                }
                Err(e) => warn!("Unparsable munge key in state snapshot: {e}"),
            }
        }
        debug!("Applied state snapshot v{}", snapshot.version);
        true
    }

    async fn broadcast_snapshot(&self) {
        let snapshot = self.current_snapshot();
        if snapshot.version == 0 {
            return;
        }
        let payload = match bincode::serde::encode_to_vec(&snapshot, bincode::config::standard()) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to encode state snapshot: {e}");
                return;
            }
        };
        if let Err(e) = self
            .membership
            .send_user_event(STATE_SYNC_EVENT, payload, true)
            .await
        {
            warn!("Failed to broadcast state snapshot: {e}");
        }
    }

    /// Boot-time catch-up: ask the current leader for its state.
    async fn sync_state_from_leader(self: Arc<Self>) {
        let leader_name = {
            match self.wait_for_leader(Duration::from_secs(10)).await {
                Ok(_) => self.leader.read().as_ref().map(|(name, _)| name.clone()),
                Err(_) => None,
            }
        };
        let Some(leader_name) = leader_name else {
            debug!("No gossip leader to sync state from yet");
            return;
        };
        if leader_name == self.local_name {
            return;
        }

        let mut responses = match self
            .membership
            .query(
                GET_STATE_QUERY,
                Vec::new(),
                QueryFilter {
                    names: vec![leader_name.clone()],
                },
            )
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                warn!("State sync query to {leader_name} failed: {e}");
                return;
            }
        };

        while let Some(response) = responses.recv().await {
            match bincode::serde::decode_from_slice::<StateSnapshot, _>(
                &response.payload,
                bincode::config::standard(),
            ) {
                Ok((snapshot, _)) => {
                    if self.apply_snapshot(snapshot) {
                        info!("Synced replicated state from leader {}", response.from);
                    }
                    return;
                }
                Err(e) => warn!("Bad state sync response from {}: {e}", response.from),
            }
        }
    }
}

#[async_trait]
impl Elector for GossipElector {
    fn is_leader(&self) -> bool {
        self.is_leader_flag.load(Ordering::SeqCst)
    }

    fn is_leader_for_role(&self, _role: &str) -> bool {
        self.is_leader()
    }

    fn get_leader(&self) -> Option<String> {
        self.leader.read().as_ref().map(|(_, id)| id.clone())
    }

    async fn wait_for_leader(&self, timeout: Duration) -> Result<String, ClusterError> {
        let deadline = time::Instant::now() + timeout;
        loop {
            if let Some(leader) = self.get_leader() {
                return Ok(leader);
            }
            if time::Instant::now() >= deadline {
                return Err(ClusterError::Timeout(format!(
                    "no gossip leader within {timeout:?}"
                )));
            }
            time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn register_role_leadership_observer(&self, role: &str) -> LeadershipObserver {
        self.broadcaster.register(role, self.is_leader())
    }

    /// Stores the munge key in the replicated map, writes it through to the
    /// cluster state, and broadcasts a new snapshot version.
    async fn apply_set_munge_key(&self, key: Vec<u8>, digest: String) -> Result<(), ClusterError> {
        if !self.is_leader() {
            return Err(ClusterError::NotLeader);
        }
        let munge = MungeKey {
            key,
            digest,
            created_at: Utc::now(),
        };
        if !munge.verify() {
            return Err(ClusterError::Consistency(
                "munge key digest does not match key bytes".into(),
            ));
        }
        self.state.set_munge_key(munge.clone())?;

        {
            let mut rep = self.replicated.lock();
            rep.version += 1;
            rep.entries
                .insert(KEY_MUNGE.to_string(), serde_json::to_vec(&munge)?);
        }
        self.broadcast_snapshot().await;
        Ok(())
    }

    /// No voter set exists in gossip mode.
    async fn add_voter(&self, _id: &str, _addr: SocketAddr) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn remove_server(&self, _id: &str) -> Result<(), ClusterError> {
        Ok(())
    }

    fn get_cluster_state(&self) -> Arc<ClusterState> {
        self.state.clone()
    }

    async fn shutdown(&self) -> Result<(), ClusterError> {
        let _ = self.shutdown_tx.send(());
        Ok(())
    }
}
