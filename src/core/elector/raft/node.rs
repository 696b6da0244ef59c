// src/core/elector/raft/node.rs

//! The consensus core: one actor task owning the log, the durable term and
//! vote, the voter configuration, and the follower/candidate/leader state
//! machine. All protocol messages and API requests are serialized through
//! its inbox, so no protocol state needs a lock.

use crate::core::elector::raft::fsm::StateMachine;
use crate::core::elector::raft::log::{HardState, LogEntry, LogPayload, LogStore, StableStore};
use crate::core::elector::raft::message::RaftMessage;
use crate::core::elector::raft::snapshot::{Snapshot, SnapshotStore};
use crate::core::elector::raft::transport::RaftTransport;
use crate::core::errors::ClusterError;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, info, warn};

/// Follower-side election timeout; randomized up to 2x per round.
pub const ELECTION_TIMEOUT: Duration = Duration::from_secs(1);
/// Leader heartbeat interval. Must be well under both the election
/// timeout and the leader lease, so a healthy leader is neither suspected
/// by its followers nor demoted by its own lease check.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(200);
/// How recently a quorum must have acked for the leader to keep leading.
const LEASE_TIMEOUT: Duration = Duration::from_millis(500);
/// Cadence of the commit-advance and leader-lease checks.
const LEASE_CHECK_INTERVAL: Duration = Duration::from_millis(500);
/// Log entries retained before a snapshot compacts them.
const SNAPSHOT_THRESHOLD: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// What the rest of the agent can see of the consensus state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftStatus {
    pub role: RaftRole,
    pub term: u64,
    pub leader_id: Option<String>,
    pub voter_count: usize,
}

/// Requests from the elector facade into the node task.
pub enum ApiRequest {
    Apply {
        payload: LogPayload,
        reply: oneshot::Sender<Result<(), ClusterError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub struct RaftNodeConfig {
    pub node_id: String,
    pub advertise_addr: SocketAddr,
    pub bootstrap: bool,
}

pub struct RaftNode {
    cfg: RaftNodeConfig,
    transport: Arc<RaftTransport>,
    fsm: StateMachine,
    log: LogStore,
    stable: StableStore,
    snapshots: SnapshotStore,

    role: RaftRole,
    current_term: u64,
    voted_for: Option<String>,
    leader_id: Option<String>,
    /// Voter configuration; includes this node when it is a voter.
    voters: HashMap<String, SocketAddr>,

    commit_index: u64,
    last_applied: u64,

    // Leader volatile state.
    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
    last_ack: HashMap<String, Instant>,
    last_heartbeat: Instant,
    last_lease_check: Instant,

    // Candidate volatile state.
    votes: HashSet<String>,
    election_deadline: Instant,

    /// Apply callers waiting for their entry to commit, keyed by index.
    pending: HashMap<u64, oneshot::Sender<Result<(), ClusterError>>>,

    status_tx: watch::Sender<RaftStatus>,
}

impl RaftNode {
    /// Opens the on-disk stores, restores the latest snapshot and the voter
    /// configuration, and bootstraps a single-node quorum when configured.
    #[allow(clippy::too_many_arguments)]
    pub fn recover(
        cfg: RaftNodeConfig,
        transport: Arc<RaftTransport>,
        fsm: StateMachine,
        mut log: LogStore,
        stable: StableStore,
        snapshots: SnapshotStore,
        status_tx: watch::Sender<RaftStatus>,
    ) -> Result<Self, ClusterError> {
        let hard = stable.load()?;
        let mut voters = HashMap::new();
        let mut commit_index = 0;
        let mut last_applied = 0;

        if let Some(snapshot) = snapshots.latest() {
            info!(
                "Restoring consensus snapshot at index {} term {}",
                snapshot.last_index, snapshot.last_term
            );
            fsm.restore(&snapshot.data)?;
            log.set_base(snapshot.last_index, snapshot.last_term);
            voters = snapshot.voters;
            commit_index = snapshot.last_index;
            last_applied = snapshot.last_index;
        }

        // Voter-set changes take effect when appended, not when committed,
        // so the configuration is rebuilt from the whole surviving log.
        for entry in log.entries_from(log.first_index()) {
            match entry.payload {
                LogPayload::AddVoter { ref id, addr } => {
                    voters.insert(id.clone(), addr);
                }
                LogPayload::RemoveServer { ref id } => {
                    voters.remove(id);
                }
                _ => {}
            }
        }

        let fresh = hard.current_term == 0 && log.is_empty() && voters.is_empty();
        if cfg.bootstrap {
            if fresh {
                info!("Bootstrapping consensus with {} as the sole voter", cfg.node_id);
                // The configuration is a log entry so that a restart (and
                // any later follower) recovers it by replay.
                log.append(&[LogEntry {
                    index: 1,
                    term: 0,
                    payload: LogPayload::AddVoter {
                        id: cfg.node_id.clone(),
                        addr: cfg.advertise_addr,
                    },
                }])?;
                voters.insert(cfg.node_id.clone(), cfg.advertise_addr);
            } else {
                // Re-bootstrap of an existing store is tolerated.
                debug!("Bootstrap requested but state exists; keeping recovered configuration");
            }
        }

        let now = Instant::now();
        let node = Self {
            current_term: hard.current_term,
            voted_for: hard.voted_for,
            cfg,
            transport,
            fsm,
            log,
            stable,
            snapshots,
            role: RaftRole::Follower,
            leader_id: None,
            voters,
            commit_index,
            last_applied,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            last_ack: HashMap::new(),
            last_heartbeat: now,
            last_lease_check: now,
            votes: HashSet::new(),
            election_deadline: now + randomized_election_timeout(),
            pending: HashMap::new(),
            status_tx,
        };
        node.publish_status();
        Ok(node)
    }

    /// The actor loop. Runs until an explicit shutdown request.
    pub async fn run(
        mut self,
        mut inbound_rx: mpsc::Receiver<RaftMessage>,
        mut api_rx: mpsc::Receiver<ApiRequest>,
    ) {
        let mut tick = time::interval(Duration::from_millis(100));
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = inbound_rx.recv() => self.handle_message(msg),
                Some(req) = api_rx.recv() => {
                    if self.handle_api(req) {
                        info!("Consensus node shutting down.");
                        return;
                    }
                }
                _ = tick.tick() => self.handle_tick(),
                else => return,
            }
        }
    }

    // --- Timers ---

    fn handle_tick(&mut self) {
        let now = Instant::now();
        match self.role {
            RaftRole::Leader => {
                if now.duration_since(self.last_heartbeat) >= HEARTBEAT_INTERVAL {
                    self.last_heartbeat = now;
                    self.replicate_all();
                }
                if now.duration_since(self.last_lease_check) >= LEASE_CHECK_INTERVAL {
                    self.last_lease_check = now;
                    self.check_leader_lease();
                    self.maybe_snapshot();
                }
            }
            RaftRole::Follower | RaftRole::Candidate => {
                if now >= self.election_deadline && self.is_voter() {
                    self.start_election();
                }
            }
        }
    }

    fn check_leader_lease(&mut self) {
        if self.voters.len() <= 1 {
            return;
        }
        let live = 1 + self
            .voters
            .keys()
            .filter(|id| **id != self.cfg.node_id)
            .filter(|id| {
                self.last_ack
                    .get(*id)
                    .map(|t| t.elapsed() < LEASE_TIMEOUT)
                    .unwrap_or(false)
            })
            .count();
        if live < self.quorum() {
            warn!(
                "Leader lease lost: only {live}/{} voters reachable; stepping down",
                self.voters.len()
            );
            self.become_follower(self.current_term, None);
        }
    }

    // --- Elections ---

    fn is_voter(&self) -> bool {
        self.voters.contains_key(&self.cfg.node_id)
    }

    fn quorum(&self) -> usize {
        self.voters.len() / 2 + 1
    }

    fn start_election(&mut self) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.cfg.node_id.clone());
        self.leader_id = None;
        if let Err(e) = self.persist_hard_state() {
            warn!("Failed to persist term before election: {e}");
            return;
        }
        self.votes = HashSet::from([self.cfg.node_id.clone()]);
        self.election_deadline = Instant::now() + randomized_election_timeout();
        debug!("Starting election for term {}", self.current_term);

        if self.votes.len() >= self.quorum() {
            self.become_leader();
            return;
        }

        let msg = RaftMessage::RequestVote {
            term: self.current_term,
            candidate_id: self.cfg.node_id.clone(),
            candidate_addr: self.cfg.advertise_addr,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for (id, addr) in &self.voters {
            if *id != self.cfg.node_id {
                self.transport.send(*addr, msg.clone());
            }
        }
        self.publish_status();
    }

    fn become_leader(&mut self) {
        info!(
            "Won election: leading term {} with {} voter(s)",
            self.current_term,
            self.voters.len()
        );
        self.role = RaftRole::Leader;
        self.leader_id = Some(self.cfg.node_id.clone());
        let next = self.log.last_index() + 1;
        self.next_index = self
            .voters
            .keys()
            .map(|id| (id.clone(), next))
            .collect();
        self.match_index.clear();
        // Every peer starts with a full lease so the lease check cannot
        // trip before the first acks arrive.
        let now = Instant::now();
        self.last_ack = self.voters.keys().map(|id| (id.clone(), now)).collect();
        self.last_heartbeat = now;

        // Committing a no-op from the new term commits everything before it.
        self.append_as_leader(LogPayload::Noop, None);
        self.publish_status();
    }

    fn become_follower(&mut self, term: u64, leader_id: Option<String>) {
        let was_leader = self.role == RaftRole::Leader;
        self.role = RaftRole::Follower;
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            if let Err(e) = self.persist_hard_state() {
                warn!("Failed to persist term on step-down: {e}");
            }
        }
        self.leader_id = leader_id;
        self.election_deadline = Instant::now() + randomized_election_timeout();

        if was_leader {
            // Callers waiting on uncommitted entries will never hear a
            // commit from us.
            for (_, reply) in self.pending.drain() {
                let _ = reply.send(Err(ClusterError::NotLeader));
            }
        }
        self.publish_status();
    }

    // --- Message handling ---

    fn handle_message(&mut self, msg: RaftMessage) {
        if msg.term() > self.current_term {
            self.become_follower(msg.term(), None);
        }

        match msg {
            RaftMessage::RequestVote {
                term,
                candidate_id,
                candidate_addr,
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(
                term,
                candidate_id,
                candidate_addr,
                last_log_index,
                last_log_term,
            ),
            RaftMessage::RequestVoteResponse {
                term,
                from,
                vote_granted,
            } => self.handle_vote_response(term, from, vote_granted),
            RaftMessage::AppendEntries {
                term,
                leader_id,
                leader_addr,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.handle_append_entries(
                term,
                leader_id,
                leader_addr,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),
            RaftMessage::AppendEntriesResponse {
                term,
                from,
                from_addr,
                success,
                match_index,
            } => self.handle_append_response(term, from, from_addr, success, match_index),
            RaftMessage::InstallSnapshot {
                term,
                leader_id,
                leader_addr,
                last_index,
                last_term,
                voters,
                data,
            } => self.handle_install_snapshot(
                term, leader_id, leader_addr, last_index, last_term, voters, data,
            ),
            RaftMessage::InstallSnapshotResponse {
                from, last_index, ..
            } => {
                self.last_ack.insert(from.clone(), Instant::now());
                self.match_index.insert(from.clone(), last_index);
                self.next_index.insert(from, last_index + 1);
            }
            RaftMessage::TimeoutNow { term } => {
                if term >= self.current_term && self.is_voter() {
                    info!("Received leadership-transfer hint; starting election");
                    self.start_election();
                }
            }
        }
    }

    fn handle_request_vote(
        &mut self,
        term: u64,
        candidate_id: String,
        candidate_addr: SocketAddr,
        last_log_index: u64,
        last_log_term: u64,
    ) {
        let up_to_date = last_log_term > self.log.last_term()
            || (last_log_term == self.log.last_term() && last_log_index >= self.log.last_index());
        let can_vote = self.voted_for.is_none() || self.voted_for.as_deref() == Some(&candidate_id);
        let grant = term >= self.current_term && can_vote && up_to_date;

        if grant {
            self.voted_for = Some(candidate_id.clone());
            if let Err(e) = self.persist_hard_state() {
                warn!("Failed to persist vote: {e}");
                return;
            }
            self.election_deadline = Instant::now() + randomized_election_timeout();
            debug!("Granted vote to {candidate_id} for term {term}");
        }

        self.transport.send(
            candidate_addr,
            RaftMessage::RequestVoteResponse {
                term: self.current_term,
                from: self.cfg.node_id.clone(),
                vote_granted: grant,
            },
        );
    }

    fn handle_vote_response(&mut self, term: u64, from: String, vote_granted: bool) {
        if self.role != RaftRole::Candidate || term != self.current_term {
            return;
        }
        if vote_granted {
            self.votes.insert(from);
            if self.votes.len() >= self.quorum() {
                self.become_leader();
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_append_entries(
        &mut self,
        term: u64,
        leader_id: String,
        leader_addr: SocketAddr,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) {
        if term < self.current_term {
            self.transport.send(
                leader_addr,
                RaftMessage::AppendEntriesResponse {
                    term: self.current_term,
                    from: self.cfg.node_id.clone(),
                    from_addr: self.cfg.advertise_addr,
                    success: false,
                    match_index: self.log.last_index(),
                },
            );
            return;
        }

        // A valid append from the current term establishes the leader.
        self.become_follower(term, Some(leader_id));

        // Consistency check against the entry preceding the batch.
        if prev_log_index > 0 {
            match self.log.term_at(prev_log_index) {
                Some(t) if t == prev_log_term => {}
                Some(_) => {
                    // Conflicting history; drop it and report how far back
                    // the leader has to go.
                    if let Err(e) = self.log.truncate_from(prev_log_index) {
                        warn!("Failed to truncate conflicting log suffix: {e}");
                    }
                    self.respond_append(leader_addr, false);
                    return;
                }
                None => {
                    self.respond_append(leader_addr, false);
                    return;
                }
            }
        }

        // Append anything new, discarding conflicting suffixes.
        for entry in entries {
            match self.log.term_at(entry.index) {
                Some(t) if t == entry.term => continue,
                Some(_) => {
                    if let Err(e) = self.log.truncate_from(entry.index) {
                        warn!("Failed to truncate conflicting log suffix: {e}");
                        self.respond_append(leader_addr, false);
                        return;
                    }
                }
                None => {}
            }
            self.apply_config_change(&entry.payload);
            if let Err(e) = self.log.append(std::slice::from_ref(&entry)) {
                warn!("Failed to append to consensus log: {e}");
                self.respond_append(leader_addr, false);
                return;
            }
        }

        if leader_commit > self.commit_index {
            self.commit_index = leader_commit.min(self.log.last_index());
            self.apply_committed();
        }
        self.respond_append(leader_addr, true);
    }

    fn respond_append(&self, leader_addr: SocketAddr, success: bool) {
        self.transport.send(
            leader_addr,
            RaftMessage::AppendEntriesResponse {
                term: self.current_term,
                from: self.cfg.node_id.clone(),
                from_addr: self.cfg.advertise_addr,
                success,
                match_index: self.log.last_index(),
            },
        );
    }

    fn handle_append_response(
        &mut self,
        term: u64,
        from: String,
        from_addr: SocketAddr,
        success: bool,
        match_index: u64,
    ) {
        if self.role != RaftRole::Leader || term != self.current_term {
            return;
        }
        self.last_ack.insert(from.clone(), Instant::now());

        if success {
            self.match_index.insert(from.clone(), match_index);
            self.next_index.insert(from, match_index + 1);
            self.advance_commit();
            return;
        }

        // The follower's log diverges or lags; back up toward its tail.
        let next = self
            .next_index
            .get(&from)
            .copied()
            .unwrap_or_else(|| self.log.last_index() + 1);
        let backed_up = next.saturating_sub(1).min(match_index + 1).max(1);
        self.next_index.insert(from.clone(), backed_up);

        if backed_up < self.log.first_index() {
            self.send_snapshot(from_addr);
        } else {
            self.replicate_to(&from, from_addr);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_install_snapshot(
        &mut self,
        term: u64,
        leader_id: String,
        leader_addr: SocketAddr,
        last_index: u64,
        last_term: u64,
        voters: HashMap<String, SocketAddr>,
        data: Vec<u8>,
    ) {
        if term < self.current_term {
            return;
        }
        self.become_follower(term, Some(leader_id));

        if last_index <= self.commit_index {
            // Stale snapshot; everything in it is already applied.
            self.respond_snapshot(leader_addr);
            return;
        }

        info!("Installing consensus snapshot at index {last_index} term {last_term}");
        if let Err(e) = self.fsm.restore(&data) {
            warn!("Failed to restore snapshot: {e}");
            return;
        }
        if let Err(e) = self.log.reset_to(last_index, last_term) {
            warn!("Failed to reset log after snapshot install: {e}");
            return;
        }
        self.voters = voters.clone();
        self.commit_index = last_index;
        self.last_applied = last_index;

        let snapshot = Snapshot {
            last_index,
            last_term,
            voters,
            data,
        };
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!("Failed to persist installed snapshot: {e}");
        }
        self.respond_snapshot(leader_addr);
    }

    fn respond_snapshot(&self, leader_addr: SocketAddr) {
        self.transport.send(
            leader_addr,
            RaftMessage::InstallSnapshotResponse {
                term: self.current_term,
                from: self.cfg.node_id.clone(),
                from_addr: self.cfg.advertise_addr,
                last_index: self.log.last_index(),
            },
        );
    }

    // --- Replication ---

    fn replicate_all(&mut self) {
        let peers: Vec<(String, SocketAddr)> = self
            .voters
            .iter()
            .filter(|(id, _)| **id != self.cfg.node_id)
            .map(|(id, addr)| (id.clone(), *addr))
            .collect();
        for (id, addr) in peers {
            self.replicate_to(&id, addr);
        }
    }

    fn replicate_to(&mut self, peer_id: &str, addr: SocketAddr) {
        let next = self
            .next_index
            .get(peer_id)
            .copied()
            .unwrap_or_else(|| self.log.last_index() + 1);

        if next < self.log.first_index() {
            self.send_snapshot(addr);
            return;
        }

        let prev_log_index = next - 1;
        let Some(prev_log_term) = self.log.term_at(prev_log_index) else {
            self.send_snapshot(addr);
            return;
        };

        self.transport.send(
            addr,
            RaftMessage::AppendEntries {
                term: self.current_term,
                leader_id: self.cfg.node_id.clone(),
                leader_addr: self.cfg.advertise_addr,
                prev_log_index,
                prev_log_term,
                entries: self.log.entries_from(next),
                leader_commit: self.commit_index,
            },
        );
    }

    fn send_snapshot(&self, addr: SocketAddr) {
        let Some(snapshot) = self.snapshots.latest() else {
            warn!("Peer needs a snapshot but none exists");
            return;
        };
        self.transport.send(
            addr,
            RaftMessage::InstallSnapshot {
                term: self.current_term,
                leader_id: self.cfg.node_id.clone(),
                leader_addr: self.cfg.advertise_addr,
                last_index: snapshot.last_index,
                last_term: snapshot.last_term,
                voters: snapshot.voters,
                data: snapshot.data,
            },
        );
    }

    /// Advances the commit index to the highest entry of the current term
    /// replicated on a quorum, then applies.
    fn advance_commit(&mut self) {
        let mut candidate = self.log.last_index();
        while candidate > self.commit_index {
            if self.log.term_at(candidate) == Some(self.current_term) {
                let replicated = 1 + self
                    .match_index
                    .iter()
                    .filter(|(id, m)| **m >= candidate && **id != self.cfg.node_id)
                    .count();
                if replicated >= self.quorum() {
                    self.commit_index = candidate;
                    self.apply_committed();
                    return;
                }
            }
            candidate -= 1;
        }
    }

    fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let Some(entry) = self.log.get(index) else {
                warn!("Committed entry {index} missing from log");
                return;
            };
            if let LogPayload::Command(command) = &entry.payload {
                self.fsm.apply(command);
            }
            self.last_applied = index;
            if let Some(reply) = self.pending.remove(&index) {
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Configuration entries take effect as soon as they are appended.
    fn apply_config_change(&mut self, payload: &LogPayload) {
        match payload {
            LogPayload::AddVoter { id, addr } => {
                if self.voters.insert(id.clone(), *addr).is_none() {
                    info!("Voter added: {id} at {addr}");
                    if self.role == RaftRole::Leader {
                        self.next_index.insert(id.clone(), self.log.last_index() + 1);
                        // A fresh lease until the first ack lands.
                        self.last_ack.insert(id.clone(), Instant::now());
                    }
                }
            }
            LogPayload::RemoveServer { id } => {
                if self.voters.remove(id).is_some() {
                    info!("Voter removed: {id}");
                    self.next_index.remove(id);
                    self.match_index.remove(id);
                    self.last_ack.remove(id);
                }
            }
            _ => {}
        }
    }

    fn maybe_snapshot(&mut self) {
        if self.log.len() < SNAPSHOT_THRESHOLD || self.last_applied < self.log.first_index() {
            return;
        }
        let last_term = match self.log.term_at(self.last_applied) {
            Some(t) => t,
            None => return,
        };
        let data = match self.fsm.snapshot() {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to take snapshot: {e}");
                return;
            }
        };
        let snapshot = Snapshot {
            last_index: self.last_applied,
            last_term,
            voters: self.voters.clone(),
            data,
        };
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!("Failed to save snapshot: {e}");
            return;
        }
        if let Err(e) = self.log.compact_to(self.last_applied, last_term) {
            warn!("Failed to compact log after snapshot: {e}");
        }
    }

    // --- API from the elector facade ---

    /// Returns true when the node should stop.
    fn handle_api(&mut self, req: ApiRequest) -> bool {
        match req {
            ApiRequest::Apply { payload, reply } => {
                if self.role != RaftRole::Leader {
                    let _ = reply.send(Err(ClusterError::NotLeader));
                    return false;
                }
                // Idempotent voter changes complete without a log entry.
                match &payload {
                    LogPayload::AddVoter { id, addr } if self.voters.get(id) == Some(addr) => {
                        let _ = reply.send(Ok(()));
                        return false;
                    }
                    LogPayload::RemoveServer { id } if !self.voters.contains_key(id) => {
                        let _ = reply.send(Ok(()));
                        return false;
                    }
                    _ => {}
                }
                self.append_as_leader(payload, Some(reply));
                false
            }
            ApiRequest::Shutdown { reply } => {
                self.transfer_leadership();
                let _ = reply.send(());
                true
            }
        }
    }

    fn append_as_leader(
        &mut self,
        payload: LogPayload,
        reply: Option<oneshot::Sender<Result<(), ClusterError>>>,
    ) {
        let index = self.log.last_index() + 1;
        let entry = LogEntry {
            index,
            term: self.current_term,
            payload,
        };
        self.apply_config_change(&entry.payload);
        if let Err(e) = self.log.append(std::slice::from_ref(&entry)) {
            if let Some(reply) = reply {
                let _ = reply.send(Err(e));
            }
            return;
        }
        if let Some(reply) = reply {
            self.pending.insert(index, reply);
        }

        if self.voters.len() == 1 {
            // Single-voter quorum: committed the moment it is durable.
            self.commit_index = index;
            self.apply_committed();
        } else {
            self.replicate_all();
        }
    }

    /// Best-effort leadership hand-off: nudge the most caught-up follower.
    fn transfer_leadership(&mut self) {
        if self.role != RaftRole::Leader {
            return;
        }
        let best = self
            .match_index
            .iter()
            .filter(|(id, _)| **id != self.cfg.node_id)
            .max_by_key(|(_, m)| **m)
            .map(|(id, _)| id.clone());
        if let Some(id) = best {
            if let Some(addr) = self.voters.get(&id) {
                info!("Transferring leadership toward {id}");
                self.transport.send(
                    *addr,
                    RaftMessage::TimeoutNow {
                        term: self.current_term,
                    },
                );
            }
        }
    }

    // --- Persistence helpers ---

    fn persist_hard_state(&self) -> Result<(), ClusterError> {
        self.stable.save(&HardState {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
        })
    }

    fn publish_status(&self) {
        let status = RaftStatus {
            role: self.role,
            term: self.current_term,
            leader_id: self.leader_id.clone(),
            voter_count: self.voters.len(),
        };
        // Heartbeats re-establish the same status constantly; observers
        // only hear about actual transitions.
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

fn randomized_election_timeout() -> Duration {
    ELECTION_TIMEOUT + Duration::from_millis(rand::thread_rng().gen_range(0..1000))
}
