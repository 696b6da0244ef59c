// src/core/roles/slurm.rs

//! The SLURM controller and worker roles.
//!
//! The controller runs only on the role leader. On activation it settles
//! the cluster munge key (generating and replicating it exactly once),
//! writes the derived SLURM configuration from the worker set, and starts
//! the munge daemon and the controller. Workers follow the controller
//! leader and fail soft until the munge key has replicated to them.

use crate::core::elector::Elector;
use crate::core::errors::ClusterError;
use crate::core::roles::process::{ProcessSpec, ProcessSupervisor};
use crate::core::roles::{ROLE_SLURM_CONTROLLER, ROLE_SLURM_WORKER, Role, RoleContext};
use crate::core::state::{ClusterState, MUNGE_KEY_LEN, NodeStatus};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Writes the munge key with owner-only read permission, atomically.
fn write_munge_key_file(path: &Path, key: &[u8]) -> Result<(), ClusterError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o400))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Settles the munge key per the replication lifecycle: fetch it when the
/// cluster already has one, generate-and-replicate when this node leads,
/// and fail soft otherwise.
async fn ensure_munge_key(
    state: &ClusterState,
    elector: &dyn Elector,
    path: &Path,
) -> Result<(), ClusterError> {
    if let Some(munge) = state.get_munge_key() {
        write_munge_key_file(path, &munge.key)?;
        debug!("Munge key written to {} (digest {})", path.display(), munge.digest);
        return Ok(());
    }

    if !elector.is_leader_for_role(ROLE_SLURM_CONTROLLER) {
        return Err(ClusterError::Role(
            "munge key is not yet replicated and this node is not the leader".into(),
        ));
    }

    let mut key = vec![0u8; MUNGE_KEY_LEN];
    getrandom::fill(&mut key[..])
        .map_err(|e| ClusterError::Internal(format!("failed to generate munge key: {e}")))?;
    let digest = hex::encode(Sha256::digest(&key));
    info!("Generated new cluster munge key (digest {digest})");

    elector.apply_set_munge_key(key.clone(), digest).await?;
    write_munge_key_file(path, &key)?;
    Ok(())
}

/// Renders slurm.conf from the replicated state. Returns `None` until a
/// controller leader is known.
fn render_slurm_conf(state: &ClusterState, cluster_name: &str) -> Option<String> {
    let controller = state.leader_node(ROLE_SLURM_CONTROLLER)?;
    let controller_addr = controller
        .overlay_ip
        .map(|ip| ip.to_string())
        .or_else(|| controller.address.map(|a| a.ip().to_string()))?;

    let mut conf = String::new();
    conf.push_str(&format!("ClusterName={cluster_name}\n"));
    conf.push_str(&format!(
        "SlurmctldHost={}({controller_addr})\n",
        controller.name
    ));
    conf.push_str("SlurmctldPort=6817\nSlurmdPort=6818\n");
    conf.push_str("AuthType=auth/munge\nSlurmctldTimeout=30\nSlurmdTimeout=30\n");
    conf.push('\n');

    let mut workers = state.nodes_with_role(ROLE_SLURM_WORKER);
    workers.sort_by(|a, b| a.name.cmp(&b.name));
    for worker in workers
        .iter()
        .filter(|w| !matches!(w.status, NodeStatus::Left | NodeStatus::Failed))
    {
        let cpus = worker.capabilities.cpu_count.max(1);
        let addr = worker
            .overlay_ip
            .map(|ip| ip.to_string())
            .or_else(|| worker.address.map(|a| a.ip().to_string()))
            .unwrap_or_else(|| worker.name.clone());
        conf.push_str(&format!(
            "NodeName={} NodeAddr={addr} CPUs={cpus} State=UNKNOWN\n",
            worker.name
        ));
    }
    conf.push_str("PartitionName=main Nodes=ALL Default=YES MaxTime=INFINITE State=UP\n");
    Some(conf)
}

/// Writes the rendered config when it differs from what is on disk.
/// Returns whether anything changed.
fn write_conf_if_changed(path: &Path, rendered: &str) -> Result<bool, ClusterError> {
    let current = std::fs::read_to_string(path).unwrap_or_default();
    if current == rendered {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, rendered)?;
    std::fs::rename(&tmp, path)?;
    Ok(true)
}

/// Supervises munged and slurmctld on the controller leader.
pub struct SlurmControllerRole {
    state: Arc<ClusterState>,
    elector: Arc<dyn Elector>,
    cluster_name: String,
    munge_key_path: PathBuf,
    conf_path: PathBuf,
    munged: ProcessSupervisor,
    slurmctld: ProcessSupervisor,
    active: AtomicBool,
}

impl SlurmControllerRole {
    pub fn new(ctx: &RoleContext) -> Self {
        Self {
            state: ctx.state.clone(),
            elector: ctx.elector.clone(),
            cluster_name: ctx.cluster_name.clone(),
            munge_key_path: ctx.paths.munge_key_path.clone(),
            conf_path: ctx.paths.slurm_conf_path.clone(),
            munged: ProcessSupervisor::new(ProcessSpec::new("munged", &["--foreground"])),
            slurmctld: ProcessSupervisor::new(ProcessSpec::new("slurmctld", &["-D"])),
            active: AtomicBool::new(false),
        }
    }

    async fn activate(&self) -> Result<(), ClusterError> {
        ensure_munge_key(&self.state, self.elector.as_ref(), &self.munge_key_path).await?;
        self.munged.start().await?;

        let Some(rendered) = render_slurm_conf(&self.state, &self.cluster_name) else {
            return Err(ClusterError::Role(
                "no slurm controller leader known yet; cannot render config".into(),
            ));
        };
        write_conf_if_changed(&self.conf_path, &rendered)?;

        self.slurmctld.start().await?;
        self.active.store(true, Ordering::SeqCst);
        info!("SLURM controller is active");
        Ok(())
    }

    async fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Err(e) = self.slurmctld.stop().await {
            warn!("Failed to stop slurmctld: {e}");
        }
        info!("SLURM controller deactivated");
    }
}

#[async_trait]
impl Role for SlurmControllerRole {
    fn name(&self) -> &str {
        ROLE_SLURM_CONTROLLER
    }

    fn requires_leader(&self) -> bool {
        true
    }

    async fn start(&self, _state: Arc<ClusterState>) -> Result<(), ClusterError> {
        // Activation is leadership-driven; nothing to acquire up front.
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        self.active.store(false, Ordering::SeqCst);
        let ctld = self.slurmctld.stop().await;
        let munged = self.munged.stop().await;
        ctld.and(munged)
    }

    async fn reconfigure(&self, state: Arc<ClusterState>) -> Result<(), ClusterError> {
        if !self.elector.is_leader_for_role(ROLE_SLURM_CONTROLLER) {
            return Ok(());
        }
        if !self.active.load(Ordering::SeqCst) {
            // A previous activation failed soft; try again.
            return self.activate().await;
        }

        if let Some(rendered) = render_slurm_conf(&state, &self.cluster_name) {
            if write_conf_if_changed(&self.conf_path, &rendered)? {
                info!("slurm.conf changed; signalling slurmctld to reload");
                self.slurmctld.signal_reload().await;
            }
        }
        self.munged.ensure_running().await?;
        self.slurmctld.ensure_running().await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ClusterError> {
        if !self.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.munged.is_running().await {
            return Err(ClusterError::Role("munged is not running".into()));
        }
        if !self.slurmctld.is_running().await {
            return Err(ClusterError::Role("slurmctld is not running".into()));
        }
        Ok(())
    }

    async fn on_leadership_change(&self, is_leader: bool) {
        if is_leader {
            if let Err(e) = self.activate().await {
                warn!("SLURM controller activation failed (will retry on reconcile): {e}");
            }
        } else if self.active.load(Ordering::SeqCst) {
            self.deactivate().await;
        }
    }
}

/// Supervises munged and slurmd on every worker node.
pub struct SlurmWorkerRole {
    state: Arc<ClusterState>,
    cluster_name: String,
    munge_key_path: PathBuf,
    conf_path: PathBuf,
    munged: ProcessSupervisor,
    slurmd: ProcessSupervisor,
    active: AtomicBool,
}

impl SlurmWorkerRole {
    pub fn new(ctx: &RoleContext) -> Self {
        Self {
            state: ctx.state.clone(),
            cluster_name: ctx.cluster_name.clone(),
            munge_key_path: ctx.paths.munge_key_path.clone(),
            conf_path: ctx.paths.slurm_conf_path.clone(),
            munged: ProcessSupervisor::new(ProcessSpec::new("munged", &["--foreground"])),
            slurmd: ProcessSupervisor::new(ProcessSpec::new("slurmd", &["-D"])),
            active: AtomicBool::new(false),
        }
    }

    async fn activate(&self) -> Result<(), ClusterError> {
        // Workers never generate the key; they wait for replication.
        let Some(munge) = self.state.get_munge_key() else {
            return Err(ClusterError::Role(
                "munge key has not replicated to this node yet".into(),
            ));
        };
        write_munge_key_file(&self.munge_key_path, &munge.key)?;
        self.munged.start().await?;

        let Some(rendered) = render_slurm_conf(&self.state, &self.cluster_name) else {
            return Err(ClusterError::Role(
                "no slurm controller leader known yet; cannot render config".into(),
            ));
        };
        write_conf_if_changed(&self.conf_path, &rendered)?;

        self.slurmd.start().await?;
        self.active.store(true, Ordering::SeqCst);
        info!("SLURM worker is active");
        Ok(())
    }
}

#[async_trait]
impl Role for SlurmWorkerRole {
    fn name(&self) -> &str {
        ROLE_SLURM_WORKER
    }

    fn requires_leader(&self) -> bool {
        false
    }

    async fn start(&self, _state: Arc<ClusterState>) -> Result<(), ClusterError> {
        if let Err(e) = self.activate().await {
            // Fail soft; the reconcile loop retries once the key and a
            // controller leader exist.
            warn!("SLURM worker not active yet: {e}");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        self.active.store(false, Ordering::SeqCst);
        let slurmd = self.slurmd.stop().await;
        let munged = self.munged.stop().await;
        slurmd.and(munged)
    }

    async fn reconfigure(&self, state: Arc<ClusterState>) -> Result<(), ClusterError> {
        if !self.active.load(Ordering::SeqCst) {
            return self.activate().await;
        }
        if let Some(rendered) = render_slurm_conf(&state, &self.cluster_name) {
            if write_conf_if_changed(&self.conf_path, &rendered)? {
                info!("slurm.conf changed; signalling slurmd to reload");
                self.slurmd.signal_reload().await;
            }
        }
        self.munged.ensure_running().await?;
        self.slurmd.ensure_running().await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ClusterError> {
        if !self.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.munged.is_running().await {
            return Err(ClusterError::Role("munged is not running".into()));
        }
        if !self.slurmd.is_running().await {
            return Err(ClusterError::Role("slurmd is not running".into()));
        }
        Ok(())
    }

    async fn on_leadership_change(&self, _is_leader: bool) {}
}
