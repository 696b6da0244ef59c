// src/core/elector/raft/message.rs

//! Wire messages of the consensus protocol. Messages are fire-and-forget;
//! responses are routed back as separate messages over the same transport.

use crate::core::elector::raft::log::LogEntry;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RaftMessage {
    RequestVote {
        term: u64,
        candidate_id: String,
        candidate_addr: SocketAddr,
        last_log_index: u64,
        last_log_term: u64,
    },
    RequestVoteResponse {
        term: u64,
        from: String,
        vote_granted: bool,
    },
    AppendEntries {
        term: u64,
        leader_id: String,
        leader_addr: SocketAddr,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    AppendEntriesResponse {
        term: u64,
        from: String,
        from_addr: SocketAddr,
        success: bool,
        /// Highest index known replicated on the sender when `success`.
        match_index: u64,
    },
    InstallSnapshot {
        term: u64,
        leader_id: String,
        leader_addr: SocketAddr,
        last_index: u64,
        last_term: u64,
        voters: std::collections::HashMap<String, SocketAddr>,
        data: Vec<u8>,
    },
    InstallSnapshotResponse {
        term: u64,
        from: String,
        from_addr: SocketAddr,
        last_index: u64,
    },
    /// Best-effort hint sent on graceful shutdown so a follower starts an
    /// election without waiting out its timeout.
    TimeoutNow {
        term: u64,
    },
}

impl RaftMessage {
    pub fn term(&self) -> u64 {
        match self {
            RaftMessage::RequestVote { term, .. }
            | RaftMessage::RequestVoteResponse { term, .. }
            | RaftMessage::AppendEntries { term, .. }
            | RaftMessage::AppendEntriesResponse { term, .. }
            | RaftMessage::InstallSnapshot { term, .. }
            | RaftMessage::InstallSnapshotResponse { term, .. }
            | RaftMessage::TimeoutNow { term } => *term,
        }
    }
}
