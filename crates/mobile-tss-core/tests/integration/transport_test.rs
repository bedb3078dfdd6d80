//! Message routing, transport failures and session contention

use super::{CHAIN_CODE, Cluster};
use mobile_tss_core::session::{SessionKind, session_id};
use mobile_tss_core::types::WireMessage;
use mobile_tss_core::{
    Error, ErrorKind, KeygenRequest, KeysignRequest, LoopbackNetwork, MemoryStateStore,
    MessageFromTss, ReshareRequest, ServiceConfig, SessionStatus, TssScheme, TssService,
};
use std::sync::Arc;
use std::time::Duration;

fn keygen_session(parties: &str) -> String {
    session_id(SessionKind::Keygen, TssScheme::Eddsa, &[parties, CHAIN_CODE])
}

fn body(session: &str, from: &str, to: &str) -> String {
    let wire = WireMessage {
        session: session.to_string(),
        round: 1,
        payload: serde_json::json!({ "garbage": true }),
    };
    MessageFromTss {
        wire_bytes: serde_json::to_vec(&wire).unwrap(),
        from: from.into(),
        to: to.into(),
        is_broadcast: to.is_empty(),
    }
    .encode_body()
    .unwrap()
}

fn keygen_request(party: &str, parties: &str) -> KeygenRequest {
    KeygenRequest {
        local_party_id: party.into(),
        all_parties: parties.into(),
        chain_code_hex: CHAIN_CODE.into(),
    }
}

#[tokio::test]
async fn test_misaddressed_message_is_ignored() {
    let cluster = Cluster::new(&["alice", "bob"]);
    let alice = cluster.service("alice");
    let session = keygen_session("alice,bob");

    // Addressed to carol: accepted by apply_data, never seen by the protocol
    alice.apply_data(&body(&session, "bob", "carol")).unwrap();

    let pub_key = cluster.keygen_ok(TssScheme::Eddsa, &["alice", "bob"]).await;
    assert!(!pub_key.is_empty());
    assert_eq!(alice.session_status(&session), Some(SessionStatus::Completed));

    alice.apply_data(&body(&session, "bob", "carol")).unwrap();
    assert_eq!(alice.session_status(&session), Some(SessionStatus::Completed));
    assert_eq!(alice.stats().total_failed, 0);
}

#[tokio::test]
async fn test_undecodable_body_is_an_error() {
    let cluster = Cluster::new(&["alice"]);
    let alice = cluster.service("alice");

    let err = alice.apply_data("not a message").unwrap_err();
    assert!(matches!(err, Error::Deserialization(_)));
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(alice.apply_data("").is_err());
}

#[tokio::test]
async fn test_early_arrivals_are_replayed() {
    let cluster = Cluster::new(&["alice", "bob"]);
    let alice = cluster.service("alice");
    let session = keygen_session("alice,bob");

    let bob = cluster.service("bob");
    let bob_task = tokio::spawn(async move {
        bob.keygen_eddsa(&keygen_request("bob", "alice,bob")).await
    });

    // Bob's round 1 broadcast reaches alice before she starts
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.session_status(&session), Some(SessionStatus::Idle));

    let alice_key = alice
        .keygen_eddsa(&keygen_request("alice", "alice,bob"))
        .await
        .unwrap();
    let bob_key = bob_task.await.unwrap().unwrap();
    assert_eq!(alice_key, bob_key);
}

#[tokio::test]
async fn test_offline_peer_fails_with_transport_error() {
    let cluster = Cluster::new(&["alice", "bob"]);
    cluster.network.set_offline("bob", true);
    let alice = cluster.service("alice");

    let err = alice
        .keygen_eddsa(&keygen_request("alice", "alice,bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(err.is_recoverable());
    assert_eq!(
        alice.session_status(&keygen_session("alice,bob")),
        Some(SessionStatus::Failed)
    );
}

#[tokio::test]
async fn test_round_timeout() {
    let network = LoopbackNetwork::new();
    let config = ServiceConfig::default()
        .with_paillier_prime_bits(1024)
        .with_round_timeout(Duration::from_millis(200));
    let alice = Arc::new(
        TssService::with_config(network.clone(), Arc::new(MemoryStateStore::new()), config)
            .unwrap(),
    );
    network.register("alice", &alice);

    let err = alice
        .keygen_eddsa(&keygen_request("alice", "alice,bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn test_key_in_use_is_busy() {
    let cluster = Cluster::new(&["alice", "bob", "carol"]);
    let pub_key = cluster
        .keygen_ok(TssScheme::Eddsa, &["alice", "bob", "carol"])
        .await;
    let alice = cluster.service("alice");

    // Nobody else joins, so this keysign waits for peers indefinitely
    let sign_request = KeysignRequest {
        pub_key: pub_key.clone(),
        message_to_sign: "aGVsbG8=".into(),
        keysign_committee_keys: "alice,bob".into(),
        local_party_key: "alice".into(),
        derive_path: String::new(),
    };
    let signer = Arc::clone(&alice);
    let request = sign_request.clone();
    let pending = tokio::spawn(async move { signer.keysign_eddsa(&request).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        alice.keysign_eddsa(&sign_request).await,
        Err(Error::SessionBusy(_))
    ));

    let reshare = ReshareRequest {
        pub_key: pub_key.clone(),
        local_party_id: "alice".into(),
        old_parties: "alice,bob".into(),
        new_parties: "alice,bob,carol".into(),
        chain_code_hex: CHAIN_CODE.into(),
        reshare_prefix: String::new(),
        new_reshare_prefix: String::new(),
    };
    let err = alice.reshare_eddsa(&reshare).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionBusy);

    // Dropping the call releases the key and marks its session failed
    pending.abort();
    let _ = pending.await;
    assert_eq!(alice.stats().total_rejected_busy, 2);
    assert_eq!(alice.stats().total_failed, 1);
}
