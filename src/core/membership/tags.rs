// src/core/membership/tags.rs

//! The gossip tag schema.
//!
//! Tags ride in the gossip layer's per-node metadata, which has a hard
//! 512-byte budget, so keys are short and role names travel abbreviated.

use crate::core::errors::ClusterError;
use crate::core::roles;
use crate::core::state::{Capabilities, Node, NodeKeys, NodeStatus};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Hard budget for the encoded tag map, imposed by the gossip layer.
pub const MAX_TAG_BYTES: usize = 512;

pub const TAG_ID: &str = "id";
pub const TAG_ROLES: &str = "r";
pub const TAG_CPU: &str = "p";
pub const TAG_RAM: &str = "ram";
pub const TAG_GPU: &str = "gpu";
pub const TAG_ARCH: &str = "h";
pub const TAG_OVERLAY_IP: &str = "wgip";
pub const TAG_OVERLAY_PUBKEY: &str = "wg_pubkey";
pub const TAG_AUTH_TOKEN: &str = "auth_token";

/// Shortens a role name for the tag budget. Unknown names pass through.
pub fn abbreviate_role(role: &str) -> &str {
    match role {
        roles::ROLE_OVERLAY => "w",
        roles::ROLE_SLURM_CONTROLLER => "c",
        roles::ROLE_SLURM_WORKER => "s",
        roles::ROLE_K3S_SERVER => "k",
        roles::ROLE_K3S_AGENT => "a",
        other => other,
    }
}

/// Expands an abbreviated role name. Unknown abbreviations pass through.
pub fn expand_role(abbrev: &str) -> &str {
    match abbrev {
        "w" => roles::ROLE_OVERLAY,
        "c" => roles::ROLE_SLURM_CONTROLLER,
        "s" => roles::ROLE_SLURM_WORKER,
        "k" => roles::ROLE_K3S_SERVER,
        "a" => roles::ROLE_K3S_AGENT,
        other => other,
    }
}

/// Comma-joined abbreviated roles, sorted for a stable encoding.
pub fn encode_roles(roles: &HashSet<String>) -> String {
    let mut abbrevs: Vec<&str> = roles.iter().map(|r| abbreviate_role(r)).collect();
    abbrevs.sort_unstable();
    abbrevs.join(",")
}

pub fn decode_roles(encoded: &str) -> HashSet<String> {
    encoded
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| expand_role(s).to_string())
        .collect()
}

/// The size a tag map occupies in the gossip metadata.
pub fn encoded_len(tags: &HashMap<String, String>) -> usize {
    // Key, value, and two length/separator bytes per entry.
    tags.iter().map(|(k, v)| k.len() + v.len() + 2).sum()
}

/// Builds the local node's tag map and enforces the metadata budget.
pub fn build_tags(
    node_id: &str,
    roles: &HashSet<String>,
    capabilities: &Capabilities,
    overlay_ip: Option<IpAddr>,
    overlay_pubkey: &str,
    auth_token: &str,
) -> Result<HashMap<String, String>, ClusterError> {
    let mut tags = HashMap::new();
    tags.insert(TAG_ID.to_string(), node_id.to_string());
    tags.insert(TAG_ROLES.to_string(), encode_roles(roles));
    tags.insert(TAG_CPU.to_string(), capabilities.cpu_count.to_string());
    tags.insert(TAG_RAM.to_string(), capabilities.ram.clone());
    tags.insert(TAG_GPU.to_string(), capabilities.gpu.to_string());
    tags.insert(TAG_ARCH.to_string(), capabilities.arch.clone());
    if let Some(ip) = overlay_ip {
        tags.insert(TAG_OVERLAY_IP.to_string(), ip.to_string());
    }
    tags.insert(TAG_OVERLAY_PUBKEY.to_string(), overlay_pubkey.to_string());
    tags.insert(TAG_AUTH_TOKEN.to_string(), auth_token.to_string());

    let len = encoded_len(&tags);
    if len > MAX_TAG_BYTES {
        return Err(ClusterError::Membership(format!(
            "encoded tags are {len} bytes, exceeding the {MAX_TAG_BYTES}-byte gossip budget"
        )));
    }
    Ok(tags)
}

/// Reconstructs a Node record from a member's tag map. Returns `None` when
/// the mandatory `id` tag is missing.
pub fn node_from_tags(
    name: &str,
    addr: std::net::SocketAddr,
    tags: &HashMap<String, String>,
    status: NodeStatus,
) -> Option<Node> {
    let id = tags.get(TAG_ID)?;
    let mut node = Node::new(id.clone(), name.to_string());
    node.status = status;
    node.address = Some(addr);
    node.tags = tags.clone();

    if let Some(roles) = tags.get(TAG_ROLES) {
        node.roles = decode_roles(roles);
    }
    node.capabilities = Capabilities {
        cpu_count: tags
            .get(TAG_CPU)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default(),
        ram: tags.get(TAG_RAM).cloned().unwrap_or_default(),
        gpu: tags
            .get(TAG_GPU)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default(),
        arch: tags.get(TAG_ARCH).cloned().unwrap_or_default(),
    };
    node.overlay_ip = tags.get(TAG_OVERLAY_IP).and_then(|v| v.parse().ok());
    node.public_keys = NodeKeys {
        cluster_id_key: id.clone(),
        overlay_key: tags.get(TAG_OVERLAY_PUBKEY).cloned().unwrap_or_default(),
    };
    Some(node)
}
