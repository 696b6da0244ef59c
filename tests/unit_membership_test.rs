use clusteros::core::membership::wire::Sealer;
use clusteros::core::membership::{
    MemberStatus, Membership, SwimConfig, SwimMembership, tags,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn swim_config(name: &str) -> SwimConfig {
    SwimConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        advertise_addr: "127.0.0.1:0".parse().unwrap(),
        node_name: name.to_string(),
        probe_interval: Duration::from_millis(200),
        suspicion_timeout: Duration::from_secs(2),
        reap_timeout: Duration::from_secs(5),
        probe_sample: 3,
        query_timeout: Duration::from_secs(2),
    }
}

fn tags_for(id: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(tags::TAG_ID.to_string(), id.to_string());
    map
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
async fn test_two_nodes_join_and_converge() {
    let alpha = SwimMembership::spawn(swim_config("alpha"), Sealer::plaintext(), tags_for("a-id"))
        .await
        .unwrap();
    let bravo = SwimMembership::spawn(swim_config("bravo"), Sealer::plaintext(), tags_for("b-id"))
        .await
        .unwrap();

    let joined = bravo.join(&[alpha.local_member().addr]).await.unwrap();
    assert_eq!(joined, 1);

    assert!(
        wait_until(Duration::from_secs(5), || {
            alpha.members().iter().any(|m| m.name == "bravo")
                && bravo.members().iter().any(|m| m.name == "alpha")
        })
        .await,
        "members never converged"
    );

    // Tags travel with the membership record.
    let seen_bravo = alpha
        .members()
        .into_iter()
        .find(|m| m.name == "bravo")
        .unwrap();
    assert_eq!(seen_bravo.tags.get(tags::TAG_ID).map(String::as_str), Some("b-id"));
    assert_eq!(seen_bravo.status, MemberStatus::Alive);

    alpha.shutdown().await.unwrap();
    bravo.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_user_events_reach_all_members() {
    let alpha = SwimMembership::spawn(swim_config("alpha"), Sealer::plaintext(), tags_for("a-id"))
        .await
        .unwrap();
    let bravo = SwimMembership::spawn(swim_config("bravo"), Sealer::plaintext(), tags_for("b-id"))
        .await
        .unwrap();

    let received: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        bravo.register_user_event_handler(Arc::new(move |event| {
            received
                .lock()
                .push((event.origin.clone(), event.name.clone()));
        }));
    }

    bravo.join(&[alpha.local_member().addr]).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            alpha.members().iter().any(|m| m.name == "bravo")
        })
        .await
    );

    alpha
        .send_user_event("deploy", b"payload".to_vec(), false)
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            received
                .lock()
                .iter()
                .any(|(origin, name)| origin == "alpha" && name == "deploy")
        })
        .await,
        "user event never delivered"
    );

    alpha.shutdown().await.unwrap();
    bravo.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tag_updates_propagate() {
    let alpha = SwimMembership::spawn(swim_config("alpha"), Sealer::plaintext(), tags_for("a-id"))
        .await
        .unwrap();
    let bravo = SwimMembership::spawn(swim_config("bravo"), Sealer::plaintext(), tags_for("b-id"))
        .await
        .unwrap();

    bravo.join(&[alpha.local_member().addr]).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            bravo.members().iter().any(|m| m.name == "alpha")
        })
        .await
    );

    let mut updated = tags_for("a-id");
    updated.insert("wgip".to_string(), "10.42.0.3".to_string());
    alpha.update_tags(updated).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            bravo
                .members()
                .iter()
                .find(|m| m.name == "alpha")
                .map(|m| m.tags.get("wgip").map(String::as_str) == Some("10.42.0.3"))
                .unwrap_or(false)
        })
        .await,
        "tag update never propagated"
    );

    alpha.shutdown().await.unwrap();
    bravo.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_leave_is_observed() {
    let alpha = SwimMembership::spawn(swim_config("alpha"), Sealer::plaintext(), tags_for("a-id"))
        .await
        .unwrap();
    let bravo = SwimMembership::spawn(swim_config("bravo"), Sealer::plaintext(), tags_for("b-id"))
        .await
        .unwrap();

    bravo.join(&[alpha.local_member().addr]).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            alpha.members().iter().any(|m| m.name == "bravo")
        })
        .await
    );

    bravo.leave().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            alpha
                .members()
                .iter()
                .find(|m| m.name == "bravo")
                .map(|m| m.status == MemberStatus::Left)
                .unwrap_or(true)
        })
        .await,
        "leave never observed"
    );

    alpha.shutdown().await.unwrap();
    bravo.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encrypted_members_reject_plaintext_peers() {
    use base64::Engine;
    let key = base64::engine::general_purpose::STANDARD.encode([5u8; 32]);

    let sealed = SwimMembership::spawn(
        swim_config("sealed"),
        Sealer::from_base64(&key).unwrap(),
        tags_for("s-id"),
    )
    .await
    .unwrap();
    let plain = SwimMembership::spawn(swim_config("plain"), Sealer::plaintext(), tags_for("p-id"))
        .await
        .unwrap();

    // The join datagram cannot be opened by the sealed member.
    let joined = plain.join(&[sealed.local_member().addr]).await.unwrap();
    assert_eq!(joined, 0);
    assert!(!sealed.members().iter().any(|m| m.name == "plain"));

    sealed.shutdown().await.unwrap();
    plain.shutdown().await.unwrap();
}
