use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clusteros::core::ClusterError;
use clusteros::core::membership::wire::Sealer;
use tokio_test::assert_err;

#[test]
fn test_plaintext_passthrough() {
    let sealer = Sealer::plaintext();
    assert!(!sealer.is_encrypted());
    let sealed = sealer.seal(b"hello").unwrap();
    assert_eq!(sealed, b"hello");
    assert_eq!(sealer.open(&sealed).unwrap(), b"hello");
}

#[test]
fn test_accepted_key_lengths() {
    for len in [16usize, 24, 32] {
        let key = BASE64.encode(vec![0x42u8; len]);
        let sealer = Sealer::from_base64(&key).unwrap();
        assert!(sealer.is_encrypted(), "key length {len} should enable encryption");
    }
}

#[test]
fn test_rejected_key_lengths() {
    for len in [0usize, 8, 15, 17, 23, 25, 31, 33, 64] {
        let key = BASE64.encode(vec![0x42u8; len]);
        let err = Sealer::from_base64(&key).unwrap_err();
        assert!(
            matches!(err, ClusterError::Config(_)),
            "key length {len} should be rejected"
        );
    }
}

#[test]
fn test_key_must_be_base64() {
    assert_err!(Sealer::from_base64("definitely not base64 !!!"));
}

#[test]
fn test_seal_open_round_trip() {
    let key = BASE64.encode([9u8; 32]);
    let sealer = Sealer::from_base64(&key).unwrap();

    let sealed = sealer.seal(b"gossip payload").unwrap();
    assert_ne!(sealed, b"gossip payload");
    assert_eq!(sealer.open(&sealed).unwrap(), b"gossip payload");
}

#[test]
fn test_nonces_differ_between_seals() {
    let key = BASE64.encode([9u8; 16]);
    let sealer = Sealer::from_base64(&key).unwrap();
    let a = sealer.seal(b"same").unwrap();
    let b = sealer.seal(b"same").unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_tampered_datagram_is_rejected() {
    let key = BASE64.encode([9u8; 32]);
    let sealer = Sealer::from_base64(&key).unwrap();

    let mut sealed = sealer.seal(b"payload").unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0xff;
    assert!(sealer.open(&sealed).is_err());
}

#[test]
fn test_wrong_key_cannot_open() {
    let sealer_a = Sealer::from_base64(&BASE64.encode([1u8; 32])).unwrap();
    let sealer_b = Sealer::from_base64(&BASE64.encode([2u8; 32])).unwrap();

    let sealed = sealer_a.seal(b"secret").unwrap();
    assert!(sealer_b.open(&sealed).is_err());
}

#[test]
fn test_truncated_datagram_is_rejected() {
    let sealer = Sealer::from_base64(&BASE64.encode([1u8; 32])).unwrap();
    assert!(sealer.open(&[0u8; 5]).is_err());
}
