use chrono::Utc;
use clusteros::core::elector::raft::fsm::{RaftCommand, StateMachine};
use clusteros::core::state::{ClusterState, Node, NodeStatus};
use sha2::{Digest, Sha256};
use std::sync::Arc;

fn munge_command(fill: u8) -> RaftCommand {
    let key = vec![fill; 128];
    RaftCommand::SetMungeKey {
        digest: hex::encode(Sha256::digest(&key)),
        key,
        created_at: Utc::now(),
    }
}

#[test]
fn test_commands_apply_to_cluster_state() {
    let state = Arc::new(ClusterState::new());
    let fsm = StateMachine::new(state.clone());

    let mut node = Node::new("n1", "alpha");
    node.status = NodeStatus::Alive;
    fsm.apply(&RaftCommand::AddNode(node));
    assert_eq!(state.node_count(), 1);

    fsm.apply(&RaftCommand::SetLeader {
        role: "k3s-server".to_string(),
        node_id: "n1".to_string(),
    });
    assert_eq!(state.get_leader("k3s-server").unwrap(), "n1");

    fsm.apply(&munge_command(0));
    assert!(state.has_munge_key());

    fsm.apply(&RaftCommand::RemoveNode {
        id: "n1".to_string(),
    });
    assert_eq!(state.node_count(), 0);
}

#[test]
fn test_applying_the_same_command_twice_is_harmless() {
    let state = Arc::new(ClusterState::new());
    let fsm = StateMachine::new(state.clone());

    fsm.apply(&munge_command(5));
    fsm.apply(&munge_command(5));
    assert!(state.has_munge_key());
}

#[test]
fn test_conflicting_munge_key_is_refused_silently() {
    let state = Arc::new(ClusterState::new());
    let fsm = StateMachine::new(state.clone());

    fsm.apply(&munge_command(1));
    let original = state.get_munge_key().unwrap().digest;

    // A conflicting replicated key must not replace the original.
    fsm.apply(&munge_command(2));
    assert_eq!(state.get_munge_key().unwrap().digest, original);
}

#[test]
fn test_snapshot_restore_round_trip() {
    let state = Arc::new(ClusterState::new());
    let fsm = StateMachine::new(state.clone());

    let mut node = Node::new("n1", "alpha");
    node.status = NodeStatus::Alive;
    fsm.apply(&RaftCommand::AddNode(node));
    fsm.apply(&RaftCommand::SetLeader {
        role: "slurm-controller".to_string(),
        node_id: "n1".to_string(),
    });
    fsm.apply(&munge_command(3));

    let snapshot = fsm.snapshot().unwrap();

    let restored_state = Arc::new(ClusterState::new());
    let restored = StateMachine::new(restored_state.clone());
    restored.restore(&snapshot).unwrap();

    assert_eq!(restored_state.node_count(), 1);
    assert_eq!(
        restored_state.get_leader("slurm-controller").unwrap(),
        "n1"
    );
    assert_eq!(
        restored_state.get_munge_key().unwrap().digest,
        state.get_munge_key().unwrap().digest
    );
}

#[test]
fn test_restore_rejects_garbage() {
    let fsm = StateMachine::new(Arc::new(ClusterState::new()));
    assert!(fsm.restore(b"not json").is_err());
}
