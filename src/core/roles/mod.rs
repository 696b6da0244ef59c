// src/core/roles/mod.rs

//! The role supervisor: a registry of role factories and a manager that
//! owns live role instances, couples them to leadership transitions, and
//! runs the periodic health and reconcile loops.

pub mod k3s;
pub mod process;
pub mod slurm;

use crate::core::elector::Elector;
use crate::core::errors::ClusterError;
use crate::core::state::ClusterState;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};

pub const ROLE_OVERLAY: &str = "overlay";
pub const ROLE_SLURM_CONTROLLER: &str = "slurm-controller";
pub const ROLE_SLURM_WORKER: &str = "slurm-worker";
pub const ROLE_K3S_SERVER: &str = "k3s-server";
pub const ROLE_K3S_AGENT: &str = "k3s-agent";

/// Every role name this agent knows how to supervise or abbreviate.
pub const ALL_ROLES: &[&str] = &[
    ROLE_OVERLAY,
    ROLE_SLURM_CONTROLLER,
    ROLE_SLURM_WORKER,
    ROLE_K3S_SERVER,
    ROLE_K3S_AGENT,
];

/// Interval between role health checks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Interval between role reconcile passes.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
/// How long one role gets to stop during shutdown.
const ROLE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Filesystem locations role implementations write to.
#[derive(Debug, Clone)]
pub struct RolePaths {
    pub munge_key_path: PathBuf,
    pub slurm_conf_path: PathBuf,
}

impl Default for RolePaths {
    fn default() -> Self {
        Self {
            munge_key_path: PathBuf::from("/etc/munge/munge.key"),
            slurm_conf_path: PathBuf::from("/etc/slurm/slurm.conf"),
        }
    }
}

/// Everything a role factory needs to build a role instance.
#[derive(Clone)]
pub struct RoleContext {
    pub node_id: String,
    pub node_name: String,
    pub cluster_name: String,
    pub state: Arc<ClusterState>,
    pub elector: Arc<dyn Elector>,
    pub paths: RolePaths,
}

/// One unit of external service supervised by this agent.
#[async_trait]
pub trait Role: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the role's external service only runs on the leader.
    fn requires_leader(&self) -> bool;

    /// Idempotent resource acquisition. A leader-gated role may leave its
    /// external service inactive here.
    async fn start(&self, state: Arc<ClusterState>) -> Result<(), ClusterError>;

    async fn stop(&self) -> Result<(), ClusterError>;

    /// Rereads inputs from the cluster state, regenerates derived
    /// configuration, and nudges the external process as needed.
    async fn reconfigure(&self, state: Arc<ClusterState>) -> Result<(), ClusterError>;

    async fn health_check(&self) -> Result<(), ClusterError>;

    /// Activates or deactivates the external service.
    async fn on_leadership_change(&self, is_leader: bool);
}

pub type RoleFactory = Arc<dyn Fn(&RoleContext) -> Arc<dyn Role> + Send + Sync>;

/// Role factories indexed by role name.
#[derive(Default, Clone)]
pub struct RoleRegistry {
    factories: HashMap<String, RoleFactory>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in role.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ROLE_SLURM_CONTROLLER, Arc::new(|ctx| {
            Arc::new(slurm::SlurmControllerRole::new(ctx)) as Arc<dyn Role>
        }));
        registry.register(ROLE_SLURM_WORKER, Arc::new(|ctx| {
            Arc::new(slurm::SlurmWorkerRole::new(ctx)) as Arc<dyn Role>
        }));
        registry.register(ROLE_K3S_SERVER, Arc::new(|ctx| {
            Arc::new(k3s::K3sServerRole::new(ctx)) as Arc<dyn Role>
        }));
        registry.register(ROLE_K3S_AGENT, Arc::new(|ctx| {
            Arc::new(k3s::K3sAgentRole::new(ctx)) as Arc<dyn Role>
        }));
        registry
    }

    pub fn register(&mut self, name: &str, factory: RoleFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&RoleFactory> {
        self.factories.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// Owns the live roles and their background loops.
pub struct RoleManager {
    ctx: RoleContext,
    roles: RwLock<Vec<Arc<dyn Role>>>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RoleManager {
    pub fn new(ctx: RoleContext) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            ctx,
            roles: RwLock::new(Vec::new()),
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
            shutdown_tx,
        })
    }

    /// Instantiates and starts every enabled role, subscribes leader-gated
    /// roles to the elector, and kicks off the health and reconcile loops.
    pub async fn start_enabled(
        self: &Arc<Self>,
        registry: &RoleRegistry,
        enabled: &[String],
    ) -> Result<(), ClusterError> {
        for name in enabled {
            let Some(factory) = registry.get(name) else {
                warn!("No role implementation registered for '{name}'; skipping");
                continue;
            };
            let role = factory(&self.ctx);
            info!("Starting role '{}'", role.name());

            if role.requires_leader() {
                self.subscribe_leadership(role.clone()).await;
            }

            // A failing start leaves the role inactive; the reconcile loop
            // retries it.
            if let Err(e) = role.start(self.ctx.state.clone()).await {
                warn!("Role '{}' failed to start: {e}", role.name());
            }
            self.roles.write().push(role);
        }

        let mut tasks = self.tasks.lock().await;
        tasks.spawn(self.clone().run_health_loop());
        tasks.spawn(self.clone().run_reconcile_loop());
        Ok(())
    }

    /// Feeds every leadership transition to the role, current value first.
    async fn subscribe_leadership(self: &Arc<Self>, role: Arc<dyn Role>) {
        let mut observer = self
            .ctx
            .elector
            .register_role_leadership_observer(role.name());
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.lock().await.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    value = observer.next() => match value {
                        Some(is_leader) => {
                            debug!(
                                "Role '{}' observing leadership={is_leader}",
                                role.name()
                            );
                            role.on_leadership_change(is_leader).await;
                        }
                        None => return,
                    },
                }
            }
        });
    }

    async fn run_health_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = time::interval(HEALTH_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = tick.tick() => {
                    let roles: Vec<_> = self.roles.read().clone();
                    for role in roles {
                        if let Err(e) = role.health_check().await {
                            warn!("Role '{}' failed its health check: {e}", role.name());
                        }
                    }
                }
            }
        }
    }

    /// A failing reconfigure is logged but never stops the loop.
    async fn run_reconcile_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = time::interval(RECONCILE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = tick.tick() => {
                    let roles: Vec<_> = self.roles.read().clone();
                    for role in roles {
                        if let Err(e) = role.reconfigure(self.ctx.state.clone()).await {
                            warn!("Role '{}' failed to reconcile: {e}", role.name());
                        }
                    }
                }
            }
        }
    }

    /// Stops every role in turn and waits for the background tasks. The
    /// first error is propagated; the rest are logged.
    pub async fn shutdown(&self) -> Result<(), ClusterError> {
        let _ = self.shutdown_tx.send(());

        let roles: Vec<_> = self.roles.write().drain(..).collect();
        let mut first_error = None;
        for role in roles {
            match time::timeout(ROLE_STOP_TIMEOUT, role.stop()).await {
                Ok(Ok(())) => info!("Role '{}' stopped", role.name()),
                Ok(Err(e)) => {
                    error!("Role '{}' failed to stop: {e}", role.name());
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    error!(
                        "Role '{}' did not stop within {:?}",
                        role.name(),
                        ROLE_STOP_TIMEOUT
                    );
                    first_error.get_or_insert(ClusterError::Timeout(format!(
                        "role '{}' stop timed out",
                        role.name()
                    )));
                }
            }
        }

        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
