// src/daemon/mod.rs

//! Daemon wiring: boot order, election-mode selection, and shutdown.
//!
//! Construction order breaks the membership/elector reference cycle. In
//! persistent mode the elector comes up first (bootstrapping a single-node
//! quorum when no bootstrap peers are configured) and membership is built
//! with a reference to its voter hooks; in gossip mode membership comes up
//! first and the elector holds the membership handle.

use crate::config::{Config, ElectionMode};
use crate::core::auth::ClusterAuth;
use crate::core::elector::{Elector, GossipElector, RaftElector, raft::RaftElectorConfig};
use crate::core::identity::Identity;
use crate::core::membership::wire::Sealer;
use crate::core::membership::{
    ClusterEventHandler, Membership, SwimConfig, SwimMembership, discovery, tags,
};
use crate::core::overlay::OverlayProvider;
use crate::core::roles::{RoleContext, RoleManager, RolePaths, RoleRegistry};
use crate::core::state::{Capabilities, ClusterState, NodeStatus};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// How long boot waits for a leader before carrying on without one.
const LEADER_WAIT_RAFT: Duration = Duration::from_secs(30);
const LEADER_WAIT_GOSSIP: Duration = Duration::from_secs(10);

/// One running ClusterOS agent.
pub struct Daemon {
    config: Config,
    identity: Identity,
    state: Arc<ClusterState>,
    membership: Arc<SwimMembership>,
    elector: Arc<dyn Elector>,
    role_manager: Arc<RoleManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    /// Boots every subsystem in dependency order and returns the running
    /// daemon.
    pub async fn start(config: Config, overlay: Arc<dyn OverlayProvider>) -> Result<Self> {
        let (identity, was_new) = Identity::load_or_generate(&config.identity.path)
            .context("failed to load node identity")?;
        if was_new {
            info!("First start: generated node identity {}", identity.node_id());
        } else {
            info!("Node identity: {}", identity.node_id());
        }

        let auth_key = config
            .cluster
            .auth_key
            .as_deref()
            .context("cluster auth key missing after validation")?;
        let auth = ClusterAuth::new(auth_key).context("invalid cluster auth key")?;

        let state = Arc::new(ClusterState::new());

        let sealer = match &config.discovery.encrypt_key {
            Some(key) => Sealer::from_base64(key).context("invalid gossip encrypt key")?,
            None => Sealer::plaintext(),
        };

        let capabilities = Capabilities {
            cpu_count: config.roles.capabilities.cpu,
            ram: config.roles.capabilities.ram.clone(),
            gpu: config.roles.capabilities.gpu,
            arch: config.roles.capabilities.arch.clone(),
        };
        let roles: std::collections::HashSet<String> =
            config.roles.enabled.iter().cloned().collect();
        let join_token = auth
            .create_join_token(identity.node_id())
            .context("failed to mint our join token")?;
        let local_tags = tags::build_tags(
            identity.node_id(),
            &roles,
            &capabilities,
            None,
            &identity.overlay_public_key(),
            &join_token,
        )
        .context("local tags exceed the gossip metadata budget")?;

        let swim_config = SwimConfig {
            bind_addr: config.membership_bind_addr()?,
            advertise_addr: config.membership_advertise_addr()?,
            node_name: config.discovery.node_name.clone(),
            probe_interval: config.discovery.probe_interval,
            suspicion_timeout: config.discovery.suspicion_timeout,
            ..SwimConfig::default()
        };

        // Election-mode selection decides construction order.
        let (membership, elector): (Arc<SwimMembership>, Arc<dyn Elector>) =
            match config.cluster.election_mode {
                ElectionMode::Raft => {
                    let raft_config = RaftElectorConfig {
                        node_id: identity.node_id().to_string(),
                        bind_addr: config.consensus_bind_addr()?,
                        advertise_addr: config.consensus_advertise_addr()?,
                        data_dir: config.cluster.raft_dir.clone(),
                        // Exactly one node seeds the quorum: the one that
                        // starts with nobody to join.
                        bootstrap: config.discovery.bootstrap_peers.is_empty(),
                    };
                    let elector = RaftElector::spawn(raft_config, state.clone())
                        .await
                        .context("failed to start consensus elector")?;
                    let membership =
                        SwimMembership::spawn(swim_config, sealer, local_tags.clone())
                            .await
                            .context("failed to start membership")?;
                    (membership, elector as Arc<dyn Elector>)
                }
                ElectionMode::Serf => {
                    let membership =
                        SwimMembership::spawn(swim_config, sealer, local_tags.clone())
                            .await
                            .context("failed to start membership")?;
                    let elector = GossipElector::spawn(
                        identity.node_id().to_string(),
                        state.clone(),
                        membership.clone() as Arc<dyn Membership>,
                    );
                    (membership, elector as Arc<dyn Elector>)
                }
            };

        // Our own record goes into the state the same way peers' do.
        let local_member = membership.local_member();
        if let Some(node) = tags::node_from_tags(
            &local_member.name,
            local_member.addr,
            &local_member.tags,
            NodeStatus::Alive,
        ) {
            state.add_node(node);
        }

        // Membership events flow through the auth gate into the state and
        // the voter set.
        let handler = ClusterEventHandler::new(
            state.clone(),
            auth.clone(),
            config.networking.listen_port,
            identity.node_id().to_string(),
        );
        handler.attach_elector(elector.clone());
        {
            let handler = handler.clone();
            membership.register_membership_change_handler(Arc::new(move |event| {
                handler.handle(event);
            }));
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let bootstrap_peers = config.bootstrap_peer_addrs();
        if bootstrap_peers.is_empty() {
            // No static peers: discover them from the overlay.
            tokio::spawn(discovery::run(
                membership.clone() as Arc<dyn Membership>,
                overlay,
                discovery::DISCOVERY_INTERVAL,
                shutdown_tx.subscribe(),
            ));
        } else {
            match membership.join(&bootstrap_peers).await {
                Ok(n) => info!("Joined {n}/{} bootstrap peer(s)", bootstrap_peers.len()),
                Err(e) => warn!("Bootstrap join failed: {e}"),
            }
        }

        let paths = RolePaths {
            munge_key_path: config
                .roles
                .munge_key_path
                .clone()
                .unwrap_or_else(|| RolePaths::default().munge_key_path),
            slurm_conf_path: config
                .roles
                .slurm_conf_path
                .clone()
                .unwrap_or_else(|| RolePaths::default().slurm_conf_path),
        };
        let role_manager = RoleManager::new(RoleContext {
            node_id: identity.node_id().to_string(),
            node_name: config.discovery.node_name.clone(),
            cluster_name: config.cluster.name.clone(),
            state: state.clone(),
            elector: elector.clone(),
            paths,
        });
        role_manager
            .start_enabled(&RoleRegistry::builtin(), &config.roles.enabled)
            .await
            .context("failed to start roles")?;

        let leader_wait = match config.cluster.election_mode {
            ElectionMode::Raft => LEADER_WAIT_RAFT,
            ElectionMode::Serf => LEADER_WAIT_GOSSIP,
        };
        match elector.wait_for_leader(leader_wait).await {
            Ok(leader) => info!("Cluster leader: {leader}"),
            // Non-fatal: leader-dependent operations fail until one appears.
            Err(e) => warn!("No leader yet: {e}"),
        }

        info!(
            "ClusterOS agent '{}' is up (node {}, mode {:?})",
            config.discovery.node_name,
            identity.node_id(),
            config.cluster.election_mode
        );

        Ok(Self {
            config,
            identity,
            state,
            membership,
            elector,
            role_manager,
            shutdown_tx,
        })
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.state.clone()
    }

    pub fn elector(&self) -> Arc<dyn Elector> {
        self.elector.clone()
    }

    pub fn node_id(&self) -> &str {
        self.identity.node_id()
    }

    pub fn cluster_size(&self) -> usize {
        self.state.node_count()
    }

    /// Blocks until the process receives a termination signal, then shuts
    /// down in reverse boot order.
    pub async fn run(self) -> Result<()> {
        wait_for_signal().await;
        info!("Termination signal received; shutting down.");
        self.shutdown().await
    }

    /// Reverse of the boot order: roles first (bounded), then a graceful
    /// membership leave, then the elector.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());

        if let Err(e) = self.role_manager.shutdown().await {
            warn!("Role shutdown reported an error: {e}");
        }
        if let Err(e) = self.membership.leave().await {
            warn!("Graceful leave failed: {e}");
        }
        if let Err(e) = self.elector.shutdown().await {
            warn!("Elector shutdown failed: {e}");
        }
        if let Err(e) = self.membership.shutdown().await {
            warn!("Membership shutdown failed: {e}");
        }
        info!(
            "ClusterOS agent '{}' stopped.",
            self.config.discovery.node_name
        );
        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
