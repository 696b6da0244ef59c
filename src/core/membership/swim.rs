// src/core/membership/swim.rs

//! SWIM-style gossip membership over UDP.
//!
//! Each node periodically pings a random sample of peers and piggybacks a
//! digest of its member table on every ping and pong, so the table
//! converges without any central coordination. A peer that stops acking is
//! suspected, then marked failed and reported to the rest of the cluster;
//! failed and departed records are reaped after a grace period. User events
//! and queries ride the same socket.

use crate::core::errors::ClusterError;
use crate::core::membership::wire::Sealer;
use crate::core::membership::{
    Member, MemberEventKind, MemberStatus, Membership, MembershipChangeHandler, MembershipEvent,
    QueryFilter, QueryHandler, QueryResponse, UserEvent, UserEventHandler,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, info, warn};

const UDP_BUFFER_SIZE: usize = 65535;
const GOSSIP_MAX_DIGESTS_IN_PACKET: usize = 10;
/// How many recently seen user events are remembered for deduplication.
const SEEN_EVENT_CAPACITY: usize = 1024;
/// Flush interval for coalescible outgoing user events.
const COALESCE_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Tunables for the gossip protocol.
#[derive(Debug, Clone)]
pub struct SwimConfig {
    pub bind_addr: SocketAddr,
    /// The address other members should use to reach this node.
    pub advertise_addr: SocketAddr,
    pub node_name: String,
    /// Interval between probe rounds.
    pub probe_interval: Duration,
    /// How long a silent member stays Alive before being suspected.
    pub suspicion_timeout: Duration,
    /// How long a Failed or Left record is kept before removal.
    pub reap_timeout: Duration,
    /// How many members are pinged per probe round.
    pub probe_sample: usize,
    /// How long query responses are collected.
    pub query_timeout: Duration,
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7946".parse().expect("static addr"),
            advertise_addr: "127.0.0.1:7946".parse().expect("static addr"),
            node_name: String::new(),
            probe_interval: Duration::from_secs(1),
            suspicion_timeout: Duration::from_secs(5),
            reap_timeout: Duration::from_secs(30),
            probe_sample: 3,
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// A member as carried in ping/pong digests.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct MemberDigest {
    name: String,
    addr: SocketAddr,
    tags: HashMap<String, String>,
    status: MemberStatus,
}

impl From<&Member> for MemberDigest {
    fn from(m: &Member) -> Self {
        Self {
            name: m.name.clone(),
            addr: m.addr,
            tags: m.tags.clone(),
            status: m.status,
        }
    }
}

/// The wire messages gossiped between members.
#[derive(Serialize, Deserialize, Debug, Clone)]
enum GossipMessage {
    Join {
        member: MemberDigest,
    },
    Ping {
        from: MemberDigest,
        digests: Vec<MemberDigest>,
    },
    Pong {
        from: MemberDigest,
        digests: Vec<MemberDigest>,
    },
    Leave {
        name: String,
    },
    FailReport {
        reporter: String,
        failed: String,
    },
    UserEvent {
        origin: String,
        seq: u64,
        name: String,
        payload: Vec<u8>,
    },
    Query {
        origin: String,
        reply_to: SocketAddr,
        id: u64,
        name: String,
        payload: Vec<u8>,
    },
    QueryResponse {
        id: u64,
        from: String,
        payload: Vec<u8>,
    },
}

struct MemberRecord {
    member: Member,
    last_heard: Instant,
    suspected_since: Option<Instant>,
    dead_since: Option<Instant>,
}

/// Tracks recently delivered user events so rebroadcasts do not loop.
struct SeenEvents {
    set: HashSet<(String, u64)>,
    order: VecDeque<(String, u64)>,
}

impl SeenEvents {
    fn new() -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns true the first time an (origin, seq) pair is observed.
    fn insert(&mut self, origin: &str, seq: u64) -> bool {
        let key = (origin.to_string(), seq);
        if !self.set.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > SEEN_EVENT_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// The concrete SWIM membership implementation.
pub struct SwimMembership {
    config: SwimConfig,
    socket: Arc<UdpSocket>,
    sealer: Sealer,
    local: RwLock<Member>,
    members: DashMap<String, MemberRecord>,
    change_handlers: RwLock<Vec<mpsc::UnboundedSender<MembershipEvent>>>,
    event_handlers: RwLock<Vec<mpsc::UnboundedSender<UserEvent>>>,
    query_handler: RwLock<Option<QueryHandler>>,
    seen_events: Mutex<SeenEvents>,
    event_seq: AtomicU64,
    query_seq: AtomicU64,
    pending_queries: Arc<DashMap<u64, mpsc::Sender<QueryResponse>>>,
    coalesce_buf: Mutex<HashMap<String, Vec<u8>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for SwimMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwimMembership")
            .field("name", &self.config.node_name)
            .field("members", &self.members.len())
            .finish()
    }
}

impl SwimMembership {
    /// Binds the gossip socket and spawns the receive, probe, and coalesce
    /// loops. The returned handle owns the background tasks until
    /// `shutdown` is called.
    pub async fn spawn(
        mut config: SwimConfig,
        sealer: Sealer,
        initial_tags: HashMap<String, String>,
    ) -> Result<Arc<Self>, ClusterError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|e| ClusterError::Transport(format!(
                "failed to bind membership socket on {}: {e}",
                config.bind_addr
            )))?;
        let bound = socket.local_addr()?;
        config.bind_addr = bound;
        if config.advertise_addr.port() == 0 {
            config.advertise_addr.set_port(bound.port());
        }
        info!(
            "Membership listening on {} (encrypted: {})",
            config.bind_addr,
            sealer.is_encrypted()
        );

        let local = Member {
            name: config.node_name.clone(),
            addr: config.advertise_addr,
            tags: initial_tags,
            status: MemberStatus::Alive,
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let this = Arc::new(Self {
            config,
            socket: Arc::new(socket),
            sealer,
            local: RwLock::new(local),
            members: DashMap::new(),
            change_handlers: RwLock::new(Vec::new()),
            event_handlers: RwLock::new(Vec::new()),
            query_handler: RwLock::new(None),
            seen_events: Mutex::new(SeenEvents::new()),
            event_seq: AtomicU64::new(0),
            query_seq: AtomicU64::new(0),
            pending_queries: Arc::new(DashMap::new()),
            coalesce_buf: Mutex::new(HashMap::new()),
            shutdown_tx,
        });

        tokio::spawn(this.clone().run_receive_loop());
        tokio::spawn(this.clone().run_probe_loop());
        tokio::spawn(this.clone().run_coalesce_loop());
        Ok(this)
    }

    async fn run_receive_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Membership receive loop shutting down.");
                    return;
                }
                res = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match res {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Error receiving on membership socket: {e}");
                            continue;
                        }
                    };
                    let plaintext = match self.sealer.open(&buf[..len]) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("Dropping undecryptable datagram from {src}: {e}");
                            continue;
                        }
                    };
                    match bincode::serde::decode_from_slice::<GossipMessage, _>(
                        &plaintext,
                        bincode::config::standard(),
                    ) {
                        Ok((msg, _)) => self.handle_message(msg, src).await,
                        Err(e) => warn!("Failed to decode gossip message from {src}: {e}"),
                    }
                }
            }
        }
    }

    async fn run_probe_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut probe_tick = time::interval(self.config.probe_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Membership probe loop shutting down.");
                    return;
                }
                _ = probe_tick.tick() => {
                    self.probe_round().await;
                    self.check_suspects().await;
                    self.reap_dead();
                }
            }
        }
    }

    /// Flushes coalesced user events on a short timer.
    async fn run_coalesce_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut flush_tick = time::interval(COALESCE_FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = flush_tick.tick() => {
                    let pending: Vec<(String, Vec<u8>)> =
                        self.coalesce_buf.lock().drain().collect();
                    for (name, payload) in pending {
                        if let Err(e) = self.broadcast_user_event(&name, payload).await {
                            warn!("Failed to flush coalesced event '{name}': {e}");
                        }
                    }
                }
            }
        }
    }

    async fn probe_round(&self) {
        let sample = self.pick_alive_sample(self.config.probe_sample);
        if sample.is_empty() {
            return;
        }
        let ping = GossipMessage::Ping {
            from: MemberDigest::from(&*self.local.read()),
            digests: self.pick_digest_sample(),
        };
        for member in sample {
            if let Err(e) = self.send_to(&ping, member.addr).await {
                debug!("Failed to ping {}: {e}", member.name);
            }
        }
    }

    /// Advances Alive members that have gone silent to Suspect, and
    /// Suspects past the timeout to Failed. The suspicion timeout is the
    /// only grace period a failing member gets.
    async fn check_suspects(&self) {
        let mut newly_failed = Vec::new();
        for mut entry in self.members.iter_mut() {
            let rec = entry.value_mut();
            match rec.member.status {
                MemberStatus::Alive => {
                    if rec.last_heard.elapsed() > self.config.suspicion_timeout {
                        debug!("Suspecting member {} (no ack)", rec.member.name);
                        rec.member.status = MemberStatus::Suspect;
                        rec.suspected_since = Some(Instant::now());
                    }
                }
                MemberStatus::Suspect => {
                    let since = rec.suspected_since.unwrap_or_else(Instant::now);
                    if since.elapsed() > self.config.suspicion_timeout {
                        info!("Marking member {} as failed", rec.member.name);
                        rec.member.status = MemberStatus::Failed;
                        rec.dead_since = Some(Instant::now());
                        newly_failed.push(rec.member.clone());
                    }
                }
                _ => {}
            }
        }

        for member in newly_failed {
            self.emit(MembershipEvent {
                kind: MemberEventKind::Failed,
                member: member.clone(),
            });
            let report = GossipMessage::FailReport {
                reporter: self.config.node_name.clone(),
                failed: member.name.clone(),
            };
            self.broadcast(&report).await;
        }
    }

    /// Removes Failed/Left records past the reap timeout.
    fn reap_dead(&self) {
        let mut reaped = Vec::new();
        self.members.retain(|_, rec| {
            let expired = matches!(rec.member.status, MemberStatus::Failed | MemberStatus::Left)
                && rec
                    .dead_since
                    .map(|t| t.elapsed() > self.config.reap_timeout)
                    .unwrap_or(false);
            if expired {
                reaped.push(rec.member.clone());
            }
            !expired
        });
        for member in reaped {
            info!("Reaping member record for {}", member.name);
            self.emit(MembershipEvent {
                kind: MemberEventKind::Reap,
                member,
            });
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) {
        match msg {
            GossipMessage::Join { member } => {
                debug!("Join from {} at {}", member.name, src);
                self.merge_digest(member);
                let pong = GossipMessage::Pong {
                    from: MemberDigest::from(&*self.local.read()),
                    digests: self.pick_digest_sample(),
                };
                if let Err(e) = self.send_to(&pong, src).await {
                    warn!("Failed to answer join from {src}: {e}");
                }
            }
            GossipMessage::Ping { from, digests } => {
                let reply_addr = from.addr;
                self.merge_digest(from);
                for digest in digests {
                    self.merge_digest(digest);
                }
                let pong = GossipMessage::Pong {
                    from: MemberDigest::from(&*self.local.read()),
                    digests: self.pick_digest_sample(),
                };
                if let Err(e) = self.send_to(&pong, reply_addr).await {
                    debug!("Failed to pong {reply_addr}: {e}");
                }
            }
            GossipMessage::Pong { from, digests } => {
                self.merge_digest(from);
                for digest in digests {
                    self.merge_digest(digest);
                }
            }
            GossipMessage::Leave { name } => {
                if let Some(mut rec) = self.members.get_mut(&name) {
                    if rec.member.status != MemberStatus::Left {
                        info!("Member {} left gracefully", name);
                        rec.member.status = MemberStatus::Left;
                        rec.dead_since = Some(Instant::now());
                        let member = rec.member.clone();
                        drop(rec);
                        self.emit(MembershipEvent {
                            kind: MemberEventKind::Leave,
                            member,
                        });
                    }
                }
            }
            GossipMessage::FailReport { reporter, failed } => {
                if failed == self.config.node_name {
                    return;
                }
                if let Some(mut rec) = self.members.get_mut(&failed) {
                    if !matches!(rec.member.status, MemberStatus::Failed | MemberStatus::Left) {
                        info!("Member {} reported failed by {}", failed, reporter);
                        rec.member.status = MemberStatus::Failed;
                        rec.dead_since = Some(Instant::now());
                        let member = rec.member.clone();
                        drop(rec);
                        self.emit(MembershipEvent {
                            kind: MemberEventKind::Failed,
                            member,
                        });
                    }
                }
            }
            GossipMessage::UserEvent {
                origin,
                seq,
                name,
                payload,
            } => {
                if !self.seen_events.lock().insert(&origin, seq) {
                    return;
                }
                debug!("User event '{}' from {} (seq {})", name, origin, seq);
                self.deliver_user_event(UserEvent {
                    origin: origin.clone(),
                    name: name.clone(),
                    payload: payload.clone(),
                });
                // One-hop rebroadcast; the seen-set stops loops.
                let msg = GossipMessage::UserEvent {
                    origin,
                    seq,
                    name,
                    payload,
                };
                self.broadcast(&msg).await;
            }
            GossipMessage::Query {
                origin,
                reply_to,
                id,
                name,
                payload,
            } => {
                if origin == self.config.node_name {
                    return;
                }
                let handler = self.query_handler.read().clone();
                if let Some(handler) = handler {
                    if let Some(response) = handler(&name, &payload) {
                        let msg = GossipMessage::QueryResponse {
                            id,
                            from: self.config.node_name.clone(),
                            payload: response,
                        };
                        if let Err(e) = self.send_to(&msg, reply_to).await {
                            warn!("Failed to answer query '{name}' from {origin}: {e}");
                        }
                    }
                }
            }
            GossipMessage::QueryResponse { id, from, payload } => {
                if let Some(tx) = self.pending_queries.get(&id) {
                    let _ = tx.try_send(QueryResponse { from, payload });
                }
            }
        }
    }

    /// Folds a gossiped digest into the member table, emitting Join/Update
    /// events for new information.
    fn merge_digest(&self, digest: MemberDigest) {
        if digest.name == self.config.node_name {
            return;
        }

        let event = match self.members.get_mut(&digest.name) {
            Some(mut rec) => {
                rec.last_heard = Instant::now();
                let was = rec.member.status;
                let tags_changed = rec.member.tags != digest.tags;
                rec.member.addr = digest.addr;
                rec.member.tags = digest.tags;
                // A live digest clears suspicion; dead states are only
                // resurrected by hearing from the member itself.
                if digest.status == MemberStatus::Alive {
                    rec.member.status = MemberStatus::Alive;
                    rec.suspected_since = None;
                    rec.dead_since = None;
                }
                let flapped = matches!(was, MemberStatus::Failed | MemberStatus::Left)
                    && rec.member.status == MemberStatus::Alive;
                if flapped || tags_changed {
                    Some(MembershipEvent {
                        kind: MemberEventKind::Update,
                        member: rec.member.clone(),
                    })
                } else {
                    None
                }
            }
            None => {
                let member = Member {
                    name: digest.name.clone(),
                    addr: digest.addr,
                    tags: digest.tags,
                    status: digest.status,
                };
                self.members.insert(
                    digest.name.clone(),
                    MemberRecord {
                        member: member.clone(),
                        last_heard: Instant::now(),
                        suspected_since: None,
                        dead_since: None,
                    },
                );
                info!("Discovered member {} at {}", member.name, member.addr);
                Some(MembershipEvent {
                    kind: MemberEventKind::Join,
                    member,
                })
            }
        };

        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Hands an event to every registered handler queue. Each handler has
    /// its own dispatcher task, so a slow handler never stalls this loop
    /// while per-peer ordering is preserved.
    fn emit(&self, event: MembershipEvent) {
        self.change_handlers
            .read()
            .iter()
            .for_each(|tx| {
                let _ = tx.send(event.clone());
            });
    }

    fn deliver_user_event(&self, event: UserEvent) {
        self.event_handlers.read().iter().for_each(|tx| {
            let _ = tx.send(event.clone());
        });
    }

    fn pick_alive_sample(&self, n: usize) -> Vec<Member> {
        let mut alive: Vec<Member> = self
            .members
            .iter()
            .filter(|e| e.value().member.status == MemberStatus::Alive)
            .map(|e| e.value().member.clone())
            .collect();
        let mut rng = rand::thread_rng();
        alive.shuffle(&mut rng);
        alive.truncate(n.max(1));
        alive
    }

    fn pick_digest_sample(&self) -> Vec<MemberDigest> {
        let mut digests: Vec<MemberDigest> = self
            .members
            .iter()
            .map(|e| MemberDigest::from(&e.value().member))
            .collect();
        digests.push(MemberDigest::from(&*self.local.read()));
        let mut rng = rand::thread_rng();
        digests.shuffle(&mut rng);
        digests.truncate(GOSSIP_MAX_DIGESTS_IN_PACKET);
        digests
    }

    async fn send_to(&self, msg: &GossipMessage, addr: SocketAddr) -> Result<(), ClusterError> {
        let encoded = bincode::serde::encode_to_vec(msg, bincode::config::standard())?;
        let sealed = self.sealer.seal(&encoded)?;
        self.socket
            .send_to(&sealed, addr)
            .await
            .map_err(|e| ClusterError::Transport(format!("send to {addr} failed: {e}")))?;
        Ok(())
    }

    async fn broadcast(&self, msg: &GossipMessage) {
        let targets: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|e| e.value().member.status == MemberStatus::Alive)
            .map(|e| e.value().member.addr)
            .collect();
        for addr in targets {
            if let Err(e) = self.send_to(msg, addr).await {
                debug!("Broadcast to {addr} failed: {e}");
            }
        }
    }

    async fn broadcast_user_event(&self, name: &str, payload: Vec<u8>) -> Result<(), ClusterError> {
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst);
        let origin = self.config.node_name.clone();
        // Events are delivered locally as well so the origin observes its
        // own broadcasts in the same way followers do.
        self.seen_events.lock().insert(&origin, seq);
        self.deliver_user_event(UserEvent {
            origin: origin.clone(),
            name: name.to_string(),
            payload: payload.clone(),
        });
        let msg = GossipMessage::UserEvent {
            origin,
            seq,
            name: name.to_string(),
            payload,
        };
        self.broadcast(&msg).await;
        Ok(())
    }
}

#[async_trait]
impl Membership for SwimMembership {
    async fn join(&self, peers: &[SocketAddr]) -> Result<usize, ClusterError> {
        let join = GossipMessage::Join {
            member: MemberDigest::from(&*self.local.read()),
        };
        for peer in peers {
            if *peer == self.config.advertise_addr {
                continue;
            }
            if let Err(e) = self.send_to(&join, *peer).await {
                warn!("Join attempt to {peer} failed: {e}");
            }
        }

        // Joins are answered with pongs; give the answers a moment to land.
        time::sleep(Duration::from_millis(1000)).await;
        let joined = self
            .members
            .iter()
            .filter(|e| peers.contains(&e.value().member.addr))
            .count();
        Ok(joined)
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        info!("Broadcasting graceful leave.");
        self.local.write().status = MemberStatus::Left;
        let msg = GossipMessage::Leave {
            name: self.config.node_name.clone(),
        };
        self.broadcast(&msg).await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClusterError> {
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    fn members(&self) -> Vec<Member> {
        let mut all: Vec<Member> = self
            .members
            .iter()
            .map(|e| e.value().member.clone())
            .collect();
        all.push(self.local.read().clone());
        all
    }

    fn local_member(&self) -> Member {
        self.local.read().clone()
    }

    async fn send_user_event(
        &self,
        name: &str,
        payload: Vec<u8>,
        coalesce: bool,
    ) -> Result<(), ClusterError> {
        if coalesce {
            // The newest payload for a name wins; the flush loop sends it.
            self.coalesce_buf.lock().insert(name.to_string(), payload);
            return Ok(());
        }
        self.broadcast_user_event(name, payload).await
    }

    async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        filter: QueryFilter,
    ) -> Result<mpsc::Receiver<QueryResponse>, ClusterError> {
        let id = self.query_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        self.pending_queries.insert(id, tx);

        let msg = GossipMessage::Query {
            origin: self.config.node_name.clone(),
            reply_to: self.config.advertise_addr,
            id,
            name: name.to_string(),
            payload,
        };

        let targets: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|e| e.value().member.status == MemberStatus::Alive)
            .filter(|e| filter.names.is_empty() || filter.names.contains(&e.value().member.name))
            .map(|e| e.value().member.addr)
            .collect();
        for addr in targets {
            if let Err(e) = self.send_to(&msg, addr).await {
                debug!("Query send to {addr} failed: {e}");
            }
        }

        // Drop the sender half once the query window closes so the caller's
        // receive loop terminates.
        let pending = self.pending_queries.clone();
        let timeout = self.config.query_timeout;
        tokio::spawn(async move {
            time::sleep(timeout).await;
            pending.remove(&id);
        });

        Ok(rx)
    }

    async fn update_tags(&self, tags: HashMap<String, String>) -> Result<(), ClusterError> {
        let len = crate::core::membership::tags::encoded_len(&tags);
        if len > crate::core::membership::tags::MAX_TAG_BYTES {
            return Err(ClusterError::Membership(format!(
                "encoded tags are {len} bytes, exceeding the {} byte budget",
                crate::core::membership::tags::MAX_TAG_BYTES
            )));
        }
        self.local.write().tags = tags;
        // Propagate promptly instead of waiting for the next probe round.
        let ping = GossipMessage::Ping {
            from: MemberDigest::from(&*self.local.read()),
            digests: Vec::new(),
        };
        self.broadcast(&ping).await;
        Ok(())
    }

    fn register_user_event_handler(&self, handler: UserEventHandler) {
        let (tx, mut rx) = mpsc::unbounded_channel::<UserEvent>();
        self.event_handlers.write().push(tx);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });
    }

    fn register_membership_change_handler(&self, handler: MembershipChangeHandler) {
        let (tx, mut rx) = mpsc::unbounded_channel::<MembershipEvent>();
        self.change_handlers.write().push(tx);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });
    }

    fn register_query_handler(&self, handler: QueryHandler) {
        *self.query_handler.write() = Some(handler);
    }
}
