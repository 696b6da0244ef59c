// src/core/roles/k3s.rs

//! The K3s server and agent roles.
//!
//! The server follows the same on-leader/off-leader pattern as the SLURM
//! controller. The agent does not need leadership but refuses to start
//! until a k3s-server leader exists, and restarts itself when the server
//! leader moves to a different address.

use crate::core::elector::Elector;
use crate::core::errors::ClusterError;
use crate::core::roles::process::{ProcessSpec, ProcessSupervisor};
use crate::core::roles::{ROLE_K3S_AGENT, ROLE_K3S_SERVER, Role, RoleContext};
use crate::core::state::{ClusterState, Node};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

const K3S_API_PORT: u16 = 6443;

fn server_url(node: &Node) -> Option<String> {
    let ip = node
        .overlay_ip
        .map(|ip| ip.to_string())
        .or_else(|| node.address.map(|a| a.ip().to_string()))?;
    Some(format!("https://{ip}:{K3S_API_PORT}"))
}

/// Supervises `k3s server` on the role leader.
pub struct K3sServerRole {
    elector: Arc<dyn Elector>,
    node_name: String,
    server: ProcessSupervisor,
    active: AtomicBool,
}

impl K3sServerRole {
    pub fn new(ctx: &RoleContext) -> Self {
        Self {
            elector: ctx.elector.clone(),
            node_name: ctx.node_name.clone(),
            server: ProcessSupervisor::new(ProcessSpec::new(
                "k3s",
                &["server", "--node-name", &ctx.node_name],
            )),
            active: AtomicBool::new(false),
        }
    }

    async fn activate(&self) -> Result<(), ClusterError> {
        self.server.start().await?;
        self.active.store(true, Ordering::SeqCst);
        info!("K3s server is active on {}", self.node_name);
        Ok(())
    }
}

#[async_trait]
impl Role for K3sServerRole {
    fn name(&self) -> &str {
        ROLE_K3S_SERVER
    }

    fn requires_leader(&self) -> bool {
        true
    }

    async fn start(&self, _state: Arc<ClusterState>) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        self.active.store(false, Ordering::SeqCst);
        self.server.stop().await
    }

    async fn reconfigure(&self, _state: Arc<ClusterState>) -> Result<(), ClusterError> {
        if !self.elector.is_leader_for_role(ROLE_K3S_SERVER) {
            return Ok(());
        }
        if !self.active.load(Ordering::SeqCst) {
            return self.activate().await;
        }
        self.server.ensure_running().await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ClusterError> {
        if self.active.load(Ordering::SeqCst) && !self.server.is_running().await {
            return Err(ClusterError::Role("k3s server is not running".into()));
        }
        Ok(())
    }

    async fn on_leadership_change(&self, is_leader: bool) {
        if is_leader {
            if let Err(e) = self.activate().await {
                warn!("K3s server activation failed (will retry on reconcile): {e}");
            }
        } else if self.active.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.server.stop().await {
                warn!("Failed to stop k3s server: {e}");
            }
            info!("K3s server deactivated");
        }
    }
}

/// Supervises `k3s agent`, pointed at the current server leader.
pub struct K3sAgentRole {
    state: Arc<ClusterState>,
    node_name: String,
    /// The running agent and the server URL it was started against.
    agent: Mutex<Option<(Arc<ProcessSupervisor>, String)>>,
}

impl K3sAgentRole {
    pub fn new(ctx: &RoleContext) -> Self {
        Self {
            state: ctx.state.clone(),
            node_name: ctx.node_name.clone(),
            agent: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<(Arc<ProcessSupervisor>, String)> {
        self.agent.lock().clone()
    }

    async fn activate(&self) -> Result<(), ClusterError> {
        // The agent waits for a server leader instead of failing hard.
        let Some(leader) = self.state.leader_node(ROLE_K3S_SERVER) else {
            return Err(ClusterError::Role("no k3s-server leader known yet".into()));
        };
        let Some(url) = server_url(&leader) else {
            return Err(ClusterError::Role(format!(
                "k3s-server leader {} has no reachable address",
                leader.name
            )));
        };

        let supervisor = Arc::new(ProcessSupervisor::new(ProcessSpec::new(
            "k3s",
            &["agent", "--server", &url, "--node-name", &self.node_name],
        )));
        supervisor.start().await?;
        *self.agent.lock() = Some((supervisor, url.clone()));
        info!("K3s agent is active against {url}");
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), ClusterError> {
        let taken = self.agent.lock().take();
        if let Some((supervisor, _)) = taken {
            supervisor.stop().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Role for K3sAgentRole {
    fn name(&self) -> &str {
        ROLE_K3S_AGENT
    }

    fn requires_leader(&self) -> bool {
        false
    }

    async fn start(&self, _state: Arc<ClusterState>) -> Result<(), ClusterError> {
        if let Err(e) = self.activate().await {
            // Fail soft; the reconcile loop retries once a server leader
            // appears.
            warn!("K3s agent not active yet: {e}");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        self.deactivate().await
    }

    async fn reconfigure(&self, state: Arc<ClusterState>) -> Result<(), ClusterError> {
        let Some((supervisor, running_against)) = self.current() else {
            return self.activate().await;
        };

        let desired = state
            .leader_node(ROLE_K3S_SERVER)
            .as_ref()
            .and_then(server_url);
        match desired {
            Some(url) if url != running_against => {
                info!("K3s server leader moved to {url}; restarting agent");
                self.deactivate().await?;
                self.activate().await
            }
            Some(_) => {
                supervisor.ensure_running().await?;
                Ok(())
            }
            None => {
                warn!("K3s server leader disappeared; stopping agent");
                self.deactivate().await
            }
        }
    }

    async fn health_check(&self) -> Result<(), ClusterError> {
        if let Some((supervisor, _)) = self.current() {
            if !supervisor.is_running().await {
                return Err(ClusterError::Role("k3s agent is not running".into()));
            }
        }
        Ok(())
    }

    async fn on_leadership_change(&self, _is_leader: bool) {}
}
