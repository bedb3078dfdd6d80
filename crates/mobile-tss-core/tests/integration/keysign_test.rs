//! Keygen followed by keysign through the service API

use super::{CHAIN_CODE, Cluster, verify_ecdsa, verify_eddsa};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mobile_tss_core::{Error, LocalState, LocalStateAccessor, TssScheme, get_derived_pub_key};
use sha2::{Digest, Sha256};

const PARTIES: [&str; 3] = ["alice", "bob", "carol"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ecdsa_keygen_then_keysign() {
    let cluster = Cluster::new(&PARTIES);
    let pub_key = cluster.keygen_ok(TssScheme::Ecdsa, &PARTIES).await;
    assert_eq!(pub_key.len(), 66);

    let digest = Sha256::digest(b"send 1 ETH to 0xabc");
    let responses = cluster
        .keysign(TssScheme::Ecdsa, &pub_key, &["alice", "carol"], &digest, "")
        .await;

    let responses: Vec<_> = responses.into_iter().map(|r| r.unwrap()).collect();
    assert!(responses.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(responses[0].msg, STANDARD.encode(digest));
    verify_ecdsa(&pub_key, &digest, &responses[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ecdsa_keysign_with_derived_key() {
    let cluster = Cluster::new(&PARTIES);
    let pub_key = cluster.keygen_ok(TssScheme::Ecdsa, &PARTIES).await;

    let path = "m/44'/60'/0'/0/0";
    let child = get_derived_pub_key(&pub_key, CHAIN_CODE, path, false).unwrap();
    assert_ne!(child, pub_key);

    let digest = Sha256::digest(b"derived");
    let responses = cluster
        .keysign(TssScheme::Ecdsa, &pub_key, &["bob", "carol"], &digest, path)
        .await;
    for response in responses {
        verify_ecdsa(&child, &digest, &response.unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ecdsa_full_committee_signs() {
    let cluster = Cluster::new(&PARTIES);
    let pub_key = cluster.keygen_ok(TssScheme::Ecdsa, &PARTIES).await;

    let digest = Sha256::digest(b"everyone");
    for response in cluster
        .keysign(TssScheme::Ecdsa, &pub_key, &PARTIES, &digest, "")
        .await
    {
        verify_ecdsa(&pub_key, &digest, &response.unwrap());
    }
}

#[tokio::test]
async fn test_eddsa_keygen_then_keysign() {
    let parties = ["alice", "bob", "carol", "dave"];
    let cluster = Cluster::new(&parties);
    let pub_key = cluster.keygen_ok(TssScheme::Eddsa, &parties).await;
    assert_eq!(pub_key.len(), 64);

    // threshold(4) = 2, so three signers
    let message = b"transfer 5 SOL";
    let responses = cluster
        .keysign(TssScheme::Eddsa, &pub_key, &["alice", "bob", "dave"], message, "")
        .await;
    for response in responses {
        verify_eddsa(&pub_key, message, &response.unwrap());
    }
}

#[tokio::test]
async fn test_keysign_below_threshold_fails() {
    let parties = ["alice", "bob", "carol", "dave"];
    let cluster = Cluster::new(&parties);
    let pub_key = cluster.keygen_ok(TssScheme::Eddsa, &parties).await;

    let results = cluster
        .keysign(TssScheme::Eddsa, &pub_key, &["alice", "bob"], b"m", "")
        .await;
    for result in results {
        assert!(matches!(
            result,
            Err(Error::ThresholdNotMet {
                required: 3,
                actual: 2
            })
        ));
    }
}

#[tokio::test]
async fn test_keysign_with_wrong_scheme() {
    let cluster = Cluster::new(&["alice", "bob"]);
    let pub_key = cluster.keygen_ok(TssScheme::Eddsa, &["alice", "bob"]).await;

    let results = cluster
        .keysign(TssScheme::Ecdsa, &pub_key, &["alice", "bob"], &[7u8; 32], "")
        .await;
    assert!(results
        .into_iter()
        .all(|r| matches!(r, Err(Error::InvalidInput(_)))));
}

#[tokio::test]
async fn test_saved_state_reproduces_signing() {
    let cluster = Cluster::new(&PARTIES);
    let pub_key = cluster.keygen_ok(TssScheme::Eddsa, &PARTIES).await;

    // Move every party's state into a fresh cluster, as after an app restart
    let restarted = Cluster::new(&PARTIES);
    for party in PARTIES {
        let state = cluster.stores[party].get_local_state(&pub_key).await.unwrap();
        let parsed = LocalState::from_json(&state).unwrap();
        assert_eq!(parsed.local_party_key, party);
        assert_eq!(parsed.keygen_committee_keys, PARTIES.to_vec());
        assert_eq!(parsed.scheme(), Some(TssScheme::Eddsa));
        restarted.stores[party]
            .save_local_state(&pub_key, &state)
            .await
            .unwrap();
    }

    let message = b"after restart";
    for response in restarted
        .keysign(TssScheme::Eddsa, &pub_key, &["alice", "bob"], message, "")
        .await
    {
        verify_eddsa(&pub_key, message, &response.unwrap());
    }
}

#[tokio::test]
async fn test_sessions_are_tracked() {
    let cluster = Cluster::new(&["alice", "bob"]);
    let pub_key = cluster.keygen_ok(TssScheme::Eddsa, &["alice", "bob"]).await;
    cluster
        .keysign(TssScheme::Eddsa, &pub_key, &["alice", "bob"], b"one", "")
        .await;

    let stats = cluster.service("alice").stats();
    assert_eq!(stats.total_started, 2);
    assert_eq!(stats.total_completed, 2);
    assert_eq!(stats.total_failed, 0);
}
