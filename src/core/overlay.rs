// src/core/overlay.rs

//! The mesh overlay as the agent sees it: an opaque source of peer
//! addresses. The overlay implementation itself lives outside this crate;
//! in production every other wire runs on top of it.

use crate::core::errors::ClusterError;
use async_trait::async_trait;
use std::net::SocketAddr;

/// Enumerates peers reachable on the overlay.
#[async_trait]
pub trait OverlayProvider: Send + Sync {
    async fn peers(&self) -> Result<Vec<SocketAddr>, ClusterError>;
}

/// A fixed peer list, used when the overlay cannot be queried dynamically
/// and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticOverlay {
    peers: Vec<SocketAddr>,
}

impl StaticOverlay {
    pub fn new(peers: Vec<SocketAddr>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl OverlayProvider for StaticOverlay {
    async fn peers(&self) -> Result<Vec<SocketAddr>, ClusterError> {
        Ok(self.peers.clone())
    }
}
