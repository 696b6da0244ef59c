// src/core/membership/mod.rs

//! Gossip-based peer discovery, failure detection, and tag propagation.
//!
//! The rest of the agent is polymorphic over the [`Membership`] trait; the
//! concrete implementation is a SWIM-style UDP gossip protocol in
//! [`swim`], with optional symmetric encryption of every datagram.

pub mod discovery;
pub mod handler;
pub mod swim;
pub mod tags;
pub mod wire;

use crate::core::errors::ClusterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use handler::ClusterEventHandler;
pub use swim::{SwimConfig, SwimMembership};

/// Liveness of a member as seen by the gossip layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Alive,
    Suspect,
    Failed,
    Left,
}

/// One gossip member: a name, a transport address, and its tag map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub addr: SocketAddr,
    pub tags: HashMap<String, String>,
    pub status: MemberStatus,
}

/// The kind of a membership transition, in the causal order the gossip
/// layer guarantees per peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEventKind {
    Join,
    Update,
    Leave,
    Failed,
    /// The member's record has been removed after the failure grace period.
    Reap,
}

/// A membership transition delivered to registered handlers.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub kind: MemberEventKind,
    pub member: Member,
}

/// A user event broadcast through the gossip layer.
#[derive(Debug, Clone)]
pub struct UserEvent {
    pub origin: String,
    pub name: String,
    pub payload: Vec<u8>,
}

/// One response to a gossip query.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub from: String,
    pub payload: Vec<u8>,
}

/// Restricts which members a query is sent to.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Only members with these names receive the query. Empty means all.
    pub names: Vec<String>,
}

pub type MembershipChangeHandler = Arc<dyn Fn(MembershipEvent) + Send + Sync>;
pub type UserEventHandler = Arc<dyn Fn(UserEvent) + Send + Sync>;
/// Answers an incoming query with an optional response payload.
pub type QueryHandler = Arc<dyn Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// The capability set the rest of the agent requires from a membership
/// layer.
#[async_trait]
pub trait Membership: Send + Sync {
    /// Attempts to contact the given peers; returns how many joined.
    async fn join(&self, peers: &[SocketAddr]) -> Result<usize, ClusterError>;

    /// Broadcasts a graceful leave.
    async fn leave(&self) -> Result<(), ClusterError>;

    /// Stops all background tasks and closes the socket.
    async fn shutdown(&self) -> Result<(), ClusterError>;

    fn members(&self) -> Vec<Member>;

    fn local_member(&self) -> Member;

    /// Broadcasts a named user event. Coalescible events supersede queued
    /// events of the same name from the same origin.
    async fn send_user_event(
        &self,
        name: &str,
        payload: Vec<u8>,
        coalesce: bool,
    ) -> Result<(), ClusterError>;

    /// Sends a query and returns a stream of responses, bounded by the
    /// membership layer's query timeout.
    async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        filter: QueryFilter,
    ) -> Result<mpsc::Receiver<QueryResponse>, ClusterError>;

    /// Replaces the local member's tags and propagates them.
    async fn update_tags(&self, tags: HashMap<String, String>) -> Result<(), ClusterError>;

    fn register_user_event_handler(&self, handler: UserEventHandler);

    fn register_membership_change_handler(&self, handler: MembershipChangeHandler);

    /// Installs the responder for incoming queries. At most one is active.
    fn register_query_handler(&self, handler: QueryHandler);
}
