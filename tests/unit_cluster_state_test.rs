use clusteros::core::ClusterError;
use clusteros::core::state::{ClusterState, MungeKey, Node, NodeStatus};

fn node(id: &str, name: &str) -> Node {
    Node::new(id, name)
}

#[test]
fn test_add_preserves_joined_at_and_refreshes_last_seen() {
    let state = ClusterState::new();
    state.add_node(node("n1", "alpha"));
    let first = state.get_node("n1").unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    let mut updated = node("n1", "alpha");
    updated.status = NodeStatus::Alive;
    state.add_node(updated);

    let second = state.get_node("n1").unwrap();
    assert_eq!(second.joined_at, first.joined_at);
    assert!(second.last_seen > first.last_seen);
    assert_eq!(second.status, NodeStatus::Alive);
}

#[test]
fn test_filters_by_role_and_status() {
    let state = ClusterState::new();
    let mut a = node("n1", "alpha");
    a.roles.insert("slurm-worker".to_string());
    a.status = NodeStatus::Alive;
    let mut b = node("n2", "bravo");
    b.roles.insert("k3s-agent".to_string());
    b.status = NodeStatus::Failed;
    state.add_node(a);
    state.add_node(b);

    let workers = state.nodes_with_role("slurm-worker");
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].id, "n1");

    let failed = state.nodes_with_status(NodeStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "n2");
}

#[test]
fn test_leader_node_requires_both_mappings() {
    let state = ClusterState::new();
    state.set_leader("slurm-controller", "n1");
    // Leader id points at a node that is not in the state yet.
    assert!(state.leader_node("slurm-controller").is_none());

    state.add_node(node("n1", "alpha"));
    let leader = state.leader_node("slurm-controller").unwrap();
    assert_eq!(leader.id, "n1");

    state.remove_leader("slurm-controller");
    assert!(state.get_leader("slurm-controller").is_none());
}

#[test]
fn test_update_status_of_unknown_node_is_a_noop() {
    let state = ClusterState::new();
    assert!(!state.update_node_status("ghost", NodeStatus::Failed));
}

#[test]
fn test_munge_key_is_write_once() {
    let state = ClusterState::new();
    assert!(!state.has_munge_key());

    let key = MungeKey::new(vec![0u8; 128]).unwrap();
    let digest = key.digest.clone();
    state.set_munge_key(key.clone()).unwrap();
    assert!(state.has_munge_key());

    // Idempotent re-set with the same digest.
    state.set_munge_key(key).unwrap();

    // A different key must be refused.
    let other = MungeKey::new(vec![1u8; 128]).unwrap();
    let err = state.set_munge_key(other).unwrap_err();
    assert!(matches!(err, ClusterError::Consistency(_)));
    assert_eq!(state.get_munge_key().unwrap().digest, digest);
}

#[test]
fn test_munge_key_digest_must_match_bytes() {
    let state = ClusterState::new();
    let mut key = MungeKey::new(vec![0u8; 128]).unwrap();
    key.digest = "0000".to_string();
    assert!(!key.verify());
    assert!(state.set_munge_key(key).is_err());
}

#[test]
fn test_munge_key_length_is_fixed() {
    assert!(MungeKey::new(vec![0u8; 127]).is_err());
    assert!(MungeKey::new(vec![0u8; 128]).is_ok());
}

#[test]
fn test_replicated_view_round_trip() {
    let state = ClusterState::new();
    let mut n = node("n1", "alpha");
    n.status = NodeStatus::Alive;
    state.add_node(n);
    state.set_leader("k3s-server", "n1");
    state
        .set_munge_key(MungeKey::new(vec![3u8; 128]).unwrap())
        .unwrap();

    let view = state.replicated_view();
    let restored = ClusterState::new();
    restored.restore_replicated_view(view);

    assert_eq!(restored.node_count(), 1);
    assert_eq!(restored.get_leader("k3s-server").unwrap(), "n1");
    assert_eq!(
        restored.get_munge_key().unwrap().digest,
        state.get_munge_key().unwrap().digest
    );
}

#[test]
fn test_returned_nodes_are_copies() {
    let state = ClusterState::new();
    state.add_node(node("n1", "alpha"));

    let mut copy = state.get_node("n1").unwrap();
    copy.name = "mutated".to_string();
    assert_eq!(state.get_node("n1").unwrap().name, "alpha");
}
