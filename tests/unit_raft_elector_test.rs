use clusteros::core::ClusterError;
use clusteros::core::elector::Elector;
use clusteros::core::elector::raft::{RaftElector, RaftElectorConfig};
use clusteros::core::state::ClusterState;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn config(node_id: &str, data_dir: &Path, bootstrap: bool) -> RaftElectorConfig {
    RaftElectorConfig {
        node_id: node_id.to_string(),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        advertise_addr: "127.0.0.1:0".parse().unwrap(),
        data_dir: data_dir.to_path_buf(),
        bootstrap,
    }
}

fn munge_material(fill: u8) -> (Vec<u8>, String) {
    let key = vec![fill; 128];
    let digest = hex::encode(Sha256::digest(&key));
    (key, digest)
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_node_bootstrap_elects_itself() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(ClusterState::new());
    let elector = RaftElector::spawn(config("n1", dir.path(), true), state.clone())
        .await
        .unwrap();

    let leader = elector.wait_for_leader(Duration::from_secs(10)).await.unwrap();
    assert_eq!(leader, "n1");
    assert!(elector.is_leader());
    assert!(elector.is_leader_for_role("k3s-server"));

    let (key, digest) = munge_material(0);
    elector.apply_set_munge_key(key, digest.clone()).await.unwrap();
    assert!(state.has_munge_key());
    assert_eq!(state.get_munge_key().unwrap().digest, digest);

    elector.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_bootstrap_node_refuses_leader_operations() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(ClusterState::new());
    // No bootstrap and nobody to talk to: stays a follower forever.
    let elector = RaftElector::spawn(config("n2", dir.path(), false), state)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!elector.is_leader());
    assert!(elector.get_leader().is_none());

    let (key, digest) = munge_material(1);
    let err = elector.apply_set_munge_key(key, digest).await.unwrap_err();
    assert_eq!(err, ClusterError::NotLeader);

    let err = elector
        .add_voter("n9", "127.0.0.1:7373".parse().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err, ClusterError::NotLeader);

    elector.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_node_replication() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let state_a = Arc::new(ClusterState::new());
    let elector_a = RaftElector::spawn(config("n1", dir_a.path(), true), state_a.clone())
        .await
        .unwrap();
    elector_a.wait_for_leader(Duration::from_secs(10)).await.unwrap();

    let state_b = Arc::new(ClusterState::new());
    let elector_b = RaftElector::spawn(config("n2", dir_b.path(), false), state_b.clone())
        .await
        .unwrap();

    // The leader admits n2 into the voter set.
    elector_a
        .add_voter("n2", elector_b.advertise_addr())
        .await
        .unwrap();

    // n2 learns the leader through replication.
    assert!(
        wait_until(Duration::from_secs(10), || {
            elector_b.get_leader().as_deref() == Some("n1")
        })
        .await,
        "follower never learned the leader"
    );
    assert!(!elector_b.is_leader());

    // A command applied on the leader reaches the follower's state.
    let (key, digest) = munge_material(7);
    elector_a.apply_set_munge_key(key, digest.clone()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || state_b.has_munge_key()).await,
        "munge key never replicated"
    );
    assert_eq!(state_b.get_munge_key().unwrap().digest, digest);

    // Leader-only operations fail on the follower.
    let err = elector_b
        .add_voter("n3", "127.0.0.1:7373".parse().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err, ClusterError::NotLeader);

    elector_b.shutdown().await.unwrap();
    elector_a.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bootstrap_is_idempotent_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(ClusterState::new());

    let (key, digest) = munge_material(9);
    {
        let elector = RaftElector::spawn(config("n1", dir.path(), true), state.clone())
            .await
            .unwrap();
        elector.wait_for_leader(Duration::from_secs(10)).await.unwrap();
        elector.apply_set_munge_key(key, digest.clone()).await.unwrap();
        elector.shutdown().await.unwrap();
    }
    // Give the listener a moment to release its port bindings.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Restart over the same store, bootstrap flag still set.
    let state2 = Arc::new(ClusterState::new());
    let elector = RaftElector::spawn(config("n1", dir.path(), true), state2.clone())
        .await
        .unwrap();
    let leader = elector.wait_for_leader(Duration::from_secs(10)).await.unwrap();
    assert_eq!(leader, "n1");

    // The replicated munge key survives the restart through the log.
    assert!(
        wait_until(Duration::from_secs(5), || state2.has_munge_key()).await,
        "munge key lost across restart"
    );
    assert_eq!(state2.get_munge_key().unwrap().digest, digest);

    elector.shutdown().await.unwrap();
}
