// src/core/errors.rs

//! Defines the primary error type for the entire agent.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the agent.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Corrupt identity file: {0}")]
    CorruptIdentity(String),

    #[error("Join token expired")]
    AuthExpired,

    #[error("Join token timestamp is too far in the future")]
    AuthSkew,

    #[error("Join token signature mismatch")]
    AuthBadSignature,

    #[error("Malformed join token: {0}")]
    AuthMalformed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation requires leadership; this node is not the leader")]
    NotLeader,

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Role error: {0}")]
    Role(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Membership error: {0}")]
    Membership(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for ClusterError {
    fn clone(&self) -> Self {
        match self {
            ClusterError::Io(e) => ClusterError::Io(Arc::clone(e)),
            ClusterError::Config(s) => ClusterError::Config(s.clone()),
            ClusterError::InvalidKey(s) => ClusterError::InvalidKey(s.clone()),
            ClusterError::CorruptIdentity(s) => ClusterError::CorruptIdentity(s.clone()),
            ClusterError::AuthExpired => ClusterError::AuthExpired,
            ClusterError::AuthSkew => ClusterError::AuthSkew,
            ClusterError::AuthBadSignature => ClusterError::AuthBadSignature,
            ClusterError::AuthMalformed(s) => ClusterError::AuthMalformed(s.clone()),
            ClusterError::Transport(s) => ClusterError::Transport(s.clone()),
            ClusterError::NotLeader => ClusterError::NotLeader,
            ClusterError::Consistency(s) => ClusterError::Consistency(s.clone()),
            ClusterError::Role(s) => ClusterError::Role(s.clone()),
            ClusterError::Timeout(s) => ClusterError::Timeout(s.clone()),
            ClusterError::Membership(s) => ClusterError::Membership(s.clone()),
            ClusterError::Internal(s) => ClusterError::Internal(s.clone()),
        }
    }
}

impl PartialEq for ClusterError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ClusterError::Io(e1), ClusterError::Io(e2)) => e1.to_string() == e2.to_string(),
            (ClusterError::Config(s1), ClusterError::Config(s2)) => s1 == s2,
            (ClusterError::InvalidKey(s1), ClusterError::InvalidKey(s2)) => s1 == s2,
            (ClusterError::CorruptIdentity(s1), ClusterError::CorruptIdentity(s2)) => s1 == s2,
            (ClusterError::AuthMalformed(s1), ClusterError::AuthMalformed(s2)) => s1 == s2,
            (ClusterError::Transport(s1), ClusterError::Transport(s2)) => s1 == s2,
            (ClusterError::Consistency(s1), ClusterError::Consistency(s2)) => s1 == s2,
            (ClusterError::Role(s1), ClusterError::Role(s2)) => s1 == s2,
            (ClusterError::Timeout(s1), ClusterError::Timeout(s2)) => s1 == s2,
            (ClusterError::Membership(s1), ClusterError::Membership(s2)) => s1 == s2,
            (ClusterError::Internal(s1), ClusterError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<bincode::error::EncodeError> for ClusterError {
    fn from(e: bincode::error::EncodeError) -> Self {
        ClusterError::Internal(format!("Failed to encode message: {e}"))
    }
}

impl From<bincode::error::DecodeError> for ClusterError {
    fn from(e: bincode::error::DecodeError) -> Self {
        ClusterError::Internal(format!("Failed to decode message: {e}"))
    }
}

impl From<std::net::AddrParseError> for ClusterError {
    fn from(e: std::net::AddrParseError) -> Self {
        ClusterError::Config(format!("Invalid network address: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for ClusterError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        ClusterError::Timeout(e.to_string())
    }
}
