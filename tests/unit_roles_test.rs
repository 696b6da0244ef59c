use async_trait::async_trait;
use clusteros::core::ClusterError;
use clusteros::core::elector::{Elector, LeadershipObserver};
use clusteros::core::roles::{
    ALL_ROLES, ROLE_K3S_AGENT, ROLE_K3S_SERVER, ROLE_SLURM_CONTROLLER, ROLE_SLURM_WORKER, Role,
    RoleContext, RoleManager, RolePaths, RoleRegistry,
};
use clusteros::core::state::ClusterState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// An elector whose leadership is flipped by the test.
struct MockElector {
    state: Arc<ClusterState>,
    leader_tx: watch::Sender<bool>,
}

impl MockElector {
    fn new(state: Arc<ClusterState>) -> Arc<Self> {
        let (leader_tx, _) = watch::channel(false);
        Arc::new(Self { state, leader_tx })
    }

    fn set_leader(&self, is_leader: bool) {
        self.leader_tx.send_replace(is_leader);
    }
}

#[async_trait]
impl Elector for MockElector {
    fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }
    fn is_leader_for_role(&self, _role: &str) -> bool {
        self.is_leader()
    }
    fn get_leader(&self) -> Option<String> {
        self.is_leader().then(|| "local".to_string())
    }
    async fn wait_for_leader(&self, _timeout: Duration) -> Result<String, ClusterError> {
        Ok("local".to_string())
    }
    fn register_role_leadership_observer(&self, _role: &str) -> LeadershipObserver {
        LeadershipObserver::new(self.leader_tx.subscribe())
    }
    async fn apply_set_munge_key(&self, _key: Vec<u8>, _digest: String) -> Result<(), ClusterError> {
        Ok(())
    }
    async fn add_voter(&self, _id: &str, _addr: SocketAddr) -> Result<(), ClusterError> {
        Ok(())
    }
    async fn remove_server(&self, _id: &str) -> Result<(), ClusterError> {
        Ok(())
    }
    fn get_cluster_state(&self) -> Arc<ClusterState> {
        self.state.clone()
    }
    async fn shutdown(&self) -> Result<(), ClusterError> {
        Ok(())
    }
}

/// Records the supervisor's calls.
#[derive(Default)]
struct TestRole {
    started: AtomicBool,
    stopped: AtomicBool,
    reconfigures: AtomicUsize,
    leader_values: parking_lot::Mutex<Vec<bool>>,
}

#[async_trait]
impl Role for TestRole {
    fn name(&self) -> &str {
        "test-role"
    }
    fn requires_leader(&self) -> bool {
        true
    }
    async fn start(&self, _state: Arc<ClusterState>) -> Result<(), ClusterError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn stop(&self) -> Result<(), ClusterError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn reconfigure(&self, _state: Arc<ClusterState>) -> Result<(), ClusterError> {
        self.reconfigures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn health_check(&self) -> Result<(), ClusterError> {
        Ok(())
    }
    async fn on_leadership_change(&self, is_leader: bool) {
        self.leader_values.lock().push(is_leader);
    }
}

fn context(state: Arc<ClusterState>, elector: Arc<dyn Elector>) -> RoleContext {
    RoleContext {
        node_id: "n1".to_string(),
        node_name: "alpha".to_string(),
        cluster_name: "testcluster".to_string(),
        state,
        elector,
        paths: RolePaths::default(),
    }
}

#[test]
fn test_builtin_registry_covers_every_supervised_role() {
    let registry = RoleRegistry::builtin();
    for role in [
        ROLE_SLURM_CONTROLLER,
        ROLE_SLURM_WORKER,
        ROLE_K3S_SERVER,
        ROLE_K3S_AGENT,
    ] {
        assert!(registry.get(role).is_some(), "missing factory for {role}");
    }
    // The overlay role is not supervised by this agent.
    assert!(registry.get("overlay").is_none());
    assert!(ALL_ROLES.contains(&"overlay"));
}

#[tokio::test]
async fn test_builtin_roles_leadership_requirements() {
    let state = Arc::new(ClusterState::new());
    let elector = MockElector::new(state.clone());
    let ctx = context(state, elector);

    let registry = RoleRegistry::builtin();
    let expectations = [
        (ROLE_SLURM_CONTROLLER, true),
        (ROLE_SLURM_WORKER, false),
        (ROLE_K3S_SERVER, true),
        (ROLE_K3S_AGENT, false),
    ];
    for (name, requires) in expectations {
        let role = registry.get(name).unwrap()(&ctx);
        assert_eq!(role.requires_leader(), requires, "{name}");
        assert_eq!(role.name(), name);
    }
}

#[tokio::test]
async fn test_manager_starts_subscribes_and_stops() {
    let state = Arc::new(ClusterState::new());
    let elector = MockElector::new(state.clone());
    let ctx = context(state, elector.clone());

    let role = Arc::new(TestRole::default());
    let mut registry = RoleRegistry::new();
    {
        let role = role.clone();
        registry.register("test-role", Arc::new(move |_ctx| role.clone() as Arc<dyn Role>));
    }

    let manager = RoleManager::new(ctx);
    manager
        .start_enabled(&registry, &["test-role".to_string()])
        .await
        .unwrap();
    assert!(role.started.load(Ordering::SeqCst));

    // The observer delivers the current value first.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(role.leader_values.lock().first(), Some(&false));

    // Transitions follow; intermediate flips may coalesce but the final
    // value always lands.
    elector.set_leader(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    {
        let values = role.leader_values.lock();
        assert_eq!(values.first(), Some(&false));
        assert_eq!(values.last(), Some(&true));
    }

    manager.shutdown().await.unwrap();
    assert!(role.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unknown_enabled_role_is_skipped() {
    let state = Arc::new(ClusterState::new());
    let elector = MockElector::new(state.clone());
    let manager = RoleManager::new(context(state, elector));

    manager
        .start_enabled(&RoleRegistry::new(), &["no-such-role".to_string()])
        .await
        .unwrap();
    manager.shutdown().await.unwrap();
}
