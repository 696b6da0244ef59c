use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clusteros::config::{Config, ElectionMode, LogFormat};

fn valid_config() -> Config {
    let mut cfg: Config = toml::from_str("").unwrap();
    cfg.cluster.auth_key = Some(BASE64.encode([1u8; 32]));
    cfg.resolve();
    cfg
}

#[test]
fn test_defaults_resolve_to_detected_values() {
    let cfg = valid_config();
    assert!(!cfg.discovery.node_name.is_empty());
    assert!(cfg.roles.capabilities.cpu > 0);
    assert!(!cfg.roles.capabilities.arch.is_empty());
    assert!(!cfg.roles.capabilities.ram.is_empty());
    assert_eq!(cfg.discovery.bind_port, 7946);
    assert_eq!(cfg.networking.listen_port, 7373);
    assert_eq!(cfg.cluster.election_mode, ElectionMode::Serf);
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(cfg.logging.format, LogFormat::Text);
    cfg.validate().unwrap();
}

#[test]
fn test_configured_capabilities_are_kept() {
    let mut cfg: Config = toml::from_str(
        r#"
        [roles.capabilities]
        cpu = 128
        ram = "512G"
        gpu = true
        arch = "aarch64"
        "#,
    )
    .unwrap();
    cfg.resolve();
    assert_eq!(cfg.roles.capabilities.cpu, 128);
    assert_eq!(cfg.roles.capabilities.ram, "512G");
    assert!(cfg.roles.capabilities.gpu);
    assert_eq!(cfg.roles.capabilities.arch, "aarch64");
}

#[test]
fn test_election_mode_parses_from_toml() {
    let cfg: Config = toml::from_str(
        r#"
        [cluster]
        election_mode = "raft"
        "#,
    )
    .unwrap();
    assert_eq!(cfg.cluster.election_mode, ElectionMode::Raft);
}

#[test]
fn test_zero_ports_are_rejected() {
    let mut cfg = valid_config();
    cfg.discovery.bind_port = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = valid_config();
    cfg.networking.listen_port = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_colliding_ports_are_rejected() {
    let mut cfg = valid_config();
    cfg.networking.listen_port = cfg.discovery.bind_port;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_unknown_log_level_is_rejected() {
    let mut cfg = valid_config();
    cfg.logging.level = "loud".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_missing_auth_key_is_rejected() {
    let mut cfg = valid_config();
    cfg.cluster.auth_key = None;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_bad_bootstrap_peer_is_rejected() {
    let mut cfg = valid_config();
    cfg.discovery.bootstrap_peers = vec!["not-an-addr".to_string()];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_wildcard_bind_advertises_loopback() {
    let cfg = valid_config();
    assert_eq!(cfg.discovery.bind_addr, "0.0.0.0");
    let advertise = cfg.membership_advertise_addr().unwrap();
    assert!(advertise.ip().is_loopback());
}

#[test]
fn test_explicit_advertise_addr_wins() {
    let mut cfg = valid_config();
    cfg.discovery.advertise_addr = Some("192.168.7.9".to_string());
    let advertise = cfg.consensus_advertise_addr().unwrap();
    assert_eq!(advertise.to_string(), "192.168.7.9:7373");
}
