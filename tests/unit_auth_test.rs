use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use clusteros::core::ClusterError;
use clusteros::core::auth::ClusterAuth;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

fn test_key() -> String {
    BASE64.encode([7u8; 32])
}

#[test]
fn test_token_round_trip() {
    let auth = ClusterAuth::new(&test_key()).unwrap();
    let token = auth.create_join_token("node-abc").unwrap();
    assert_eq!(auth.verify_join_token(&token).unwrap(), "node-abc");
}

#[test]
fn test_secret_below_32_bytes_is_rejected() {
    let short = BASE64.encode([1u8; 31]);
    let err = ClusterAuth::new(&short).unwrap_err();
    assert!(matches!(err, ClusterError::Config(_)));
}

#[test]
fn test_secret_must_be_base64() {
    let err = ClusterAuth::new("!!! not base64 !!!").unwrap_err();
    assert!(matches!(err, ClusterError::Config(_)));
}

#[test]
fn test_token_signed_with_different_secret_is_rejected() {
    let minter = ClusterAuth::new(&BASE64.encode([1u8; 32])).unwrap();
    let verifier = ClusterAuth::new(&BASE64.encode([2u8; 32])).unwrap();

    let token = minter.create_join_token("node-x").unwrap();
    let err = verifier.verify_join_token(&token).unwrap_err();
    assert_eq!(err, ClusterError::AuthBadSignature);
}

#[test]
fn test_malformed_token_is_rejected() {
    let auth = ClusterAuth::new(&test_key()).unwrap();
    assert!(matches!(
        auth.verify_join_token("@@@@").unwrap_err(),
        ClusterError::AuthMalformed(_)
    ));
    assert!(matches!(
        auth.verify_join_token(&BASE64.encode(b"{\"nope\":1}"))
            .unwrap_err(),
        ClusterError::AuthMalformed(_)
    ));
}

// Mirrors the canonical challenge layout so tokens with arbitrary
// timestamps can be minted for the window tests.
#[derive(Serialize)]
struct Challenge {
    nonce: String,
    timestamp: DateTime<Utc>,
    node_id: String,
}

#[derive(Serialize)]
struct JoinToken {
    challenge: Challenge,
    signature: String,
}

fn forge_token(key: &[u8], node_id: &str, timestamp: DateTime<Utc>) -> String {
    let challenge = Challenge {
        nonce: BASE64.encode([9u8; 32]),
        timestamp,
        node_id: node_id.to_string(),
    };
    let canonical = serde_json::to_vec(&challenge).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(&canonical);
    let token = JoinToken {
        challenge,
        signature: BASE64.encode(mac.finalize().into_bytes()),
    };
    BASE64.encode(serde_json::to_vec(&token).unwrap())
}

#[test]
fn test_expired_token_is_rejected() {
    let auth = ClusterAuth::new(&test_key()).unwrap();
    let stale = forge_token(&[7u8; 32], "node-old", Utc::now() - Duration::minutes(6));
    assert_eq!(auth.verify_join_token(&stale).unwrap_err(), ClusterError::AuthExpired);
}

#[test]
fn test_future_token_is_rejected() {
    let auth = ClusterAuth::new(&test_key()).unwrap();
    let future = forge_token(&[7u8; 32], "node-fut", Utc::now() + Duration::minutes(2));
    assert_eq!(auth.verify_join_token(&future).unwrap_err(), ClusterError::AuthSkew);
}

#[test]
fn test_token_just_inside_the_window_is_accepted() {
    let auth = ClusterAuth::new(&test_key()).unwrap();
    let recent = forge_token(&[7u8; 32], "node-ok", Utc::now() - Duration::minutes(4));
    assert_eq!(auth.verify_join_token(&recent).unwrap(), "node-ok");
}
