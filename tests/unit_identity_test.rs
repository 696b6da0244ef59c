use clusteros::core::ClusterError;
use clusteros::core::identity::Identity;

#[test]
fn test_generate_produces_unique_ids() {
    let a = Identity::generate();
    let b = Identity::generate();
    assert_ne!(a.node_id(), b.node_id());
    assert!(!a.node_id().is_empty());
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");

    let identity = Identity::generate();
    identity.save(&path).unwrap();

    let loaded = Identity::load(&path).unwrap();
    assert_eq!(loaded.node_id(), identity.node_id());
    assert_eq!(
        loaded.public_key().as_bytes(),
        identity.public_key().as_bytes()
    );
    // Same seed means the same derived overlay key.
    assert_eq!(loaded.derive_overlay_key(), identity.derive_overlay_key());
}

#[test]
fn test_load_or_generate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");

    let (first, was_new) = Identity::load_or_generate(&path).unwrap();
    assert!(was_new);
    let (second, was_new) = Identity::load_or_generate(&path).unwrap();
    assert!(!was_new);
    assert_eq!(first.node_id(), second.node_id());
}

#[test]
fn test_load_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    std::fs::write(&path, b"not json at all").unwrap();

    let err = Identity::load(&path).unwrap_err();
    assert!(matches!(err, ClusterError::CorruptIdentity(_)));
}

#[test]
fn test_load_rejects_tampered_node_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");

    let identity = Identity::generate();
    identity.save(&path).unwrap();

    // Rewrite the node_id field with a different valid-looking value.
    let contents = std::fs::read_to_string(&path).unwrap();
    let mut parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
    parsed["node_id"] = serde_json::Value::String("3NotTheRightId".to_string());
    std::fs::write(&path, serde_json::to_vec(&parsed).unwrap()).unwrap();

    let err = Identity::load(&path).unwrap_err();
    assert!(matches!(err, ClusterError::CorruptIdentity(_)));
}

#[test]
fn test_delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");

    let identity = Identity::generate();
    identity.save(&path).unwrap();

    Identity::delete(&path).unwrap();
    assert!(!path.exists());
    // A second delete of the now-absent file succeeds too.
    Identity::delete(&path).unwrap();
}

#[test]
fn test_sign_and_verify() {
    let identity = Identity::generate();
    let other = Identity::generate();
    let msg = b"attest this";

    let sig = identity.sign(msg);
    assert!(Identity::verify(&identity.public_key(), msg, &sig));
    assert!(!Identity::verify(&other.public_key(), msg, &sig));
    assert!(!Identity::verify(&identity.public_key(), b"different", &sig));
}

#[test]
fn test_overlay_key_is_derived_not_copied() {
    let identity = Identity::generate();
    let overlay = identity.derive_overlay_key();
    assert_ne!(&overlay[..], identity.public_key().as_bytes());
    // Base64 of a 32-byte point is 44 characters.
    assert_eq!(identity.overlay_public_key().len(), 44);
}

#[cfg(unix)]
#[test]
fn test_identity_file_has_owner_only_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys").join("identity.json");

    Identity::generate().save(&path).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    let dir_mode = std::fs::metadata(path.parent().unwrap())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(dir_mode & 0o777, 0o700);
}
