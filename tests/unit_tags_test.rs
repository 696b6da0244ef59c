use clusteros::core::membership::tags;
use clusteros::core::state::{Capabilities, NodeStatus};
use std::collections::HashSet;

fn roles(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_role_abbreviations_round_trip() {
    let original = roles(&["slurm-controller", "slurm-worker", "k3s-server", "k3s-agent", "overlay"]);
    let encoded = tags::encode_roles(&original);
    // Sorted abbreviations give a stable encoding.
    assert_eq!(encoded, "a,c,k,s,w");
    assert_eq!(tags::decode_roles(&encoded), original);
}

#[test]
fn test_unknown_roles_pass_through() {
    let original = roles(&["gpu-burner"]);
    let encoded = tags::encode_roles(&original);
    assert_eq!(encoded, "gpu-burner");
    assert_eq!(tags::decode_roles(&encoded), original);
}

#[test]
fn test_empty_roles_decode_to_empty_set() {
    assert!(tags::decode_roles("").is_empty());
}

fn capabilities() -> Capabilities {
    Capabilities {
        cpu_count: 16,
        ram: "64G".to_string(),
        gpu: true,
        arch: "x86_64".to_string(),
    }
}

#[test]
fn test_build_tags_and_node_round_trip() {
    let built = tags::build_tags(
        "node-id-1",
        &roles(&["slurm-worker"]),
        &capabilities(),
        Some("10.42.0.7".parse().unwrap()),
        "b64overlaykey",
        "token",
    )
    .unwrap();

    let addr = "192.168.1.5:7946".parse().unwrap();
    let node = tags::node_from_tags("alpha", addr, &built, NodeStatus::Alive).unwrap();
    assert_eq!(node.id, "node-id-1");
    assert_eq!(node.name, "alpha");
    assert!(node.has_role("slurm-worker"));
    assert_eq!(node.capabilities.cpu_count, 16);
    assert!(node.capabilities.gpu);
    assert_eq!(node.capabilities.arch, "x86_64");
    assert_eq!(node.overlay_ip.unwrap().to_string(), "10.42.0.7");
    assert_eq!(node.public_keys.overlay_key, "b64overlaykey");
    assert_eq!(node.address, Some(addr));
}

#[test]
fn test_node_without_id_tag_is_rejected() {
    let mut built = tags::build_tags(
        "node-id-1",
        &roles(&[]),
        &capabilities(),
        None,
        "k",
        "t",
    )
    .unwrap();
    built.remove(tags::TAG_ID);

    let addr = "192.168.1.5:7946".parse().unwrap();
    assert!(tags::node_from_tags("alpha", addr, &built, NodeStatus::Alive).is_none());
}

#[test]
fn test_oversized_tags_are_rejected() {
    // A join token far beyond the 512-byte metadata budget.
    let huge_token = "x".repeat(600);
    let err = tags::build_tags(
        "node-id-1",
        &roles(&["slurm-worker"]),
        &capabilities(),
        None,
        "k",
        &huge_token,
    )
    .unwrap_err();
    assert!(err.to_string().contains("512"));
}

#[test]
fn test_encoded_len_counts_keys_and_values() {
    let mut map = std::collections::HashMap::new();
    map.insert("ab".to_string(), "cd".to_string());
    // Two bytes of key, two of value, two of framing.
    assert_eq!(tags::encoded_len(&map), 6);
}
