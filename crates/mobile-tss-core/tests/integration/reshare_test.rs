//! Resharing through the service API

use super::{Cluster, verify_ecdsa, verify_eddsa};
use mobile_tss_core::{
    Error, LocalState, LocalStateAccessor, ReshareRequest, TssScheme,
};
use sha2::{Digest, Sha256};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ecdsa_reshare_to_new_member() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"]);
    let pub_key = cluster
        .keygen_ok(TssScheme::Ecdsa, &["alice", "bob", "carol"])
        .await;
    cluster.add("dave");

    let responses = cluster
        .reshare(
            TssScheme::Ecdsa,
            &pub_key,
            &["alice", "bob", "carol"],
            &["bob", "carol", "dave"],
            "",
        )
        .await;
    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.pub_key, pub_key);
        assert_eq!(response.reshare_prefix, "0000000000000001");
    }

    // alice left, so her stored state is still the keygen state
    let alice_state = cluster.stores["alice"].get_local_state(&pub_key).await.unwrap();
    assert_eq!(LocalState::from_json(&alice_state).unwrap().reshare_prefix, "");

    let dave_state = cluster.stores["dave"].get_local_state(&pub_key).await.unwrap();
    let dave_state = LocalState::from_json(&dave_state).unwrap();
    assert_eq!(dave_state.reshare_prefix, "0000000000000001");
    assert_eq!(dave_state.keygen_committee_keys, vec!["bob", "carol", "dave"]);

    let digest = Sha256::digest(b"after reshare");
    for response in cluster
        .keysign(TssScheme::Ecdsa, &pub_key, &["bob", "dave"], &digest, "")
        .await
    {
        verify_ecdsa(&pub_key, &digest, &response.unwrap());
    }
}

#[tokio::test]
async fn test_eddsa_reshare_prefix_increases() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"]);
    let pub_key = cluster
        .keygen_ok(TssScheme::Eddsa, &["alice", "bob", "carol"])
        .await;

    let first = cluster
        .reshare(
            TssScheme::Eddsa,
            &pub_key,
            &["alice", "bob"],
            &["alice", "bob", "carol"],
            "",
        )
        .await;
    let first_prefix = first[0].as_ref().unwrap().reshare_prefix.clone();
    assert!(first.iter().all(|r| r.as_ref().unwrap().reshare_prefix == first_prefix));

    cluster.add("erin");
    let second = cluster
        .reshare(
            TssScheme::Eddsa,
            &pub_key,
            &["bob", "carol"],
            &["carol", "erin"],
            &first_prefix,
        )
        .await;
    let second_prefix = second[0].as_ref().unwrap().reshare_prefix.clone();
    assert!(second.iter().all(|r| r.as_ref().unwrap().pub_key == pub_key));
    assert!(mobile_tss_core::types::is_newer_prefix(&second_prefix, &first_prefix));
    assert_eq!(second_prefix, "0000000000000002");

    let message = b"two reshares later";
    for response in cluster
        .keysign(TssScheme::Eddsa, &pub_key, &["carol", "erin"], message, "")
        .await
    {
        verify_eddsa(&pub_key, message, &response.unwrap());
    }
}

#[tokio::test]
async fn test_reshare_rejects_stale_prefix() {
    let cluster = Cluster::new(&["alice", "bob"]);
    let pub_key = cluster.keygen_ok(TssScheme::Eddsa, &["alice", "bob"]).await;

    let request = ReshareRequest {
        pub_key: pub_key.clone(),
        local_party_id: "alice".into(),
        old_parties: "alice,bob".into(),
        new_parties: "alice,bob".into(),
        chain_code_hex: String::new(),
        reshare_prefix: "0000000000000007".into(),
        new_reshare_prefix: String::new(),
    };
    assert!(matches!(
        cluster.service("alice").reshare_eddsa(&request).await,
        Err(Error::InvalidInput(_))
    ));

    let request = ReshareRequest {
        reshare_prefix: String::new(),
        new_reshare_prefix: String::new(),
        local_party_id: "zed".into(),
        ..request
    };
    assert!(matches!(
        cluster.service("alice").reshare_eddsa(&request).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_old_member_without_state() {
    let cluster = Cluster::new(&["alice", "bob", "carol"]);
    let request = ReshareRequest {
        pub_key: "ab".repeat(32),
        local_party_id: "carol".into(),
        old_parties: "alice,carol".into(),
        new_parties: "alice,bob".into(),
        chain_code_hex: String::new(),
        reshare_prefix: String::new(),
        new_reshare_prefix: String::new(),
    };
    assert!(matches!(
        cluster.service("carol").reshare_eddsa(&request).await,
        Err(Error::StateNotFound(_))
    ));
}
