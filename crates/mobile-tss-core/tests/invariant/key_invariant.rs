//! Invariant tests for threshold keys
//!
//! These run the protocols directly over a [`MemoryRelay`] so they can look
//! at the shares themselves:
//! - Every party derives the same public key and public shares
//! - Any `threshold + 1` shares reconstruct the key, fewer do not
//! - Any `threshold + 1` signers produce a valid signature
//! - Resharing keeps the public key

use k256::ecdsa::VerifyingKey;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use mobile_tss_core::committee::Committee;
use mobile_tss_core::curve::{Curve, Ed25519, Secp256k1, party_index};
use mobile_tss_core::keygen::{KeyShare, KeygenParams, ReshareParams, run_dkg, run_reshare};
use mobile_tss_core::mpc::MemoryRelay;
use mobile_tss_core::paillier::PaillierKeyPair;
use mobile_tss_core::sign::{SignParams, run_ecdsa_signing};
use mobile_tss_core::vss::lagrange_coefficient;
use std::sync::Arc;

async fn dkg<C: Curve>(parties: &[&str]) -> Vec<Arc<KeyShare<C>>> {
    let committee = Committee::from_parties(parties.iter().map(|p| p.to_string())).unwrap();
    let relay = MemoryRelay::with_timeout(parties[0], 20_000);

    let handles: Vec<_> = parties
        .iter()
        .map(|party| {
            let params = KeygenParams {
                session_id: format!("dkg-{}", parties.join("-")),
                party: party.to_string(),
                committee: committee.clone(),
            };
            let endpoint = relay.endpoint(party);
            tokio::spawn(async move { run_dkg::<C, _>(&params, &endpoint).await })
        })
        .collect();

    let mut shares = Vec::new();
    for handle in handles {
        shares.push(Arc::new(handle.await.unwrap().unwrap()));
    }
    shares
}

/// `sum(lambda_i * x_i) * G` over the given shares
fn reconstruct<C: Curve>(shares: &[&KeyShare<C>]) -> C::Point {
    let points: Vec<C::Scalar> = shares.iter().map(|s| party_index::<C>(&s.party)).collect();
    shares.iter().fold(C::identity(), |acc, share| {
        let lambda = lagrange_coefficient::<C>(&party_index::<C>(&share.party), &points).unwrap();
        acc + C::mul_base(&(lambda * share.secret_share))
    })
}

/// Every subset of `items` with exactly `size` elements
fn subsets<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    if size == 0 {
        return vec![Vec::new()];
    }
    if items.len() < size {
        return Vec::new();
    }
    let mut with_first: Vec<Vec<T>> = subsets(&items[1..], size - 1)
        .into_iter()
        .map(|mut rest| {
            rest.insert(0, items[0].clone());
            rest
        })
        .collect();
    with_first.extend(subsets(&items[1..], size));
    with_first
}

fn same_key_everywhere<C: Curve>(shares: &[Arc<KeyShare<C>>]) {
    let first = &shares[0];
    for share in shares {
        assert_eq!(share.public_key, first.public_key);
        assert_eq!(share.public_shares, first.public_shares);
        assert_eq!(share.threshold, first.threshold);
        assert_eq!(share.public_share(&share.party).unwrap(), C::mul_base(&share.secret_share));
        share.verify_consistency().unwrap();
    }
}

// ============================================================================
// Key Share Invariants
// ============================================================================

/// INVARIANT: All parties must derive the same public key
#[tokio::test]
async fn invariant_same_public_key_all_parties() {
    for _ in 0..3 {
        same_key_everywhere(&dkg::<Secp256k1>(&["a", "b", "c"]).await);
        same_key_everywhere(&dkg::<Ed25519>(&["a", "b", "c", "d", "e"]).await);
    }
}

/// INVARIANT: Exactly `threshold + 1` shares determine the key
#[tokio::test]
async fn invariant_threshold_reconstruction() {
    let parties = ["p1", "p2", "p3", "p4", "p5"];
    let shares = dkg::<Ed25519>(&parties).await;
    let threshold = shares[0].threshold;
    assert_eq!(threshold, 2);

    let refs: Vec<&KeyShare<Ed25519>> = shares.iter().map(|s| s.as_ref()).collect();
    for subset in subsets(&refs, threshold + 1) {
        assert_eq!(reconstruct(&subset), shares[0].public_key);
    }
    for subset in subsets(&refs, threshold) {
        assert_ne!(reconstruct(&subset), shares[0].public_key);
    }
}

/// INVARIANT: Any `threshold + 1` signers produce a verifiable ECDSA signature
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invariant_every_quorum_signs() {
    let parties = ["a", "b", "c"];
    let shares = dkg::<Secp256k1>(&parties).await;
    let paillier: Vec<Arc<PaillierKeyPair>> = parties
        .iter()
        .map(|_| Arc::new(PaillierKeyPair::generate(1024).unwrap()))
        .collect();
    let key = VerifyingKey::from_sec1_bytes(&Secp256k1::point_to_bytes(&shares[0].public_key))
        .unwrap();
    let digest = [0x42u8; 32];

    let indexes: Vec<usize> = (0..parties.len()).collect();
    for quorum in subsets(&indexes, 2) {
        let signers =
            Committee::from_parties(quorum.iter().map(|&i| parties[i].to_string())).unwrap();
        let session = format!("sign-{}", signers);
        let relay = MemoryRelay::with_timeout(parties[quorum[0]], 20_000);

        let handles: Vec<_> = quorum
            .iter()
            .map(|&i| {
                let params = SignParams {
                    session_id: session.clone(),
                    party: parties[i].to_string(),
                    signers: signers.clone(),
                    message: digest.to_vec(),
                };
                let share = Arc::clone(&shares[i]);
                let paillier = Arc::clone(&paillier[i]);
                let endpoint = relay.endpoint(parties[i]);
                tokio::spawn(async move {
                    run_ecdsa_signing(&params, &share, &paillier, &k256::Scalar::ZERO, &endpoint)
                        .await
                })
            })
            .collect();

        for handle in handles {
            let signature = handle.await.unwrap().unwrap();
            key.verify_prehash(&digest, &signature.to_k256().unwrap())
                .unwrap();
        }
    }
}

/// INVARIANT: Resharing never changes the public key
#[tokio::test]
async fn invariant_reshare_keeps_public_key() {
    let shares = dkg::<Ed25519>(&["a", "b", "c"]).await;
    let public_key = shares[0].public_key;

    let old_committee = Committee::parse("a,c").unwrap();
    let new_committee = Committee::parse("b,c,d,e").unwrap();
    let relay = MemoryRelay::with_timeout("a", 20_000);

    let handles: Vec<_> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|party| {
            let params = ReshareParams {
                session_id: "reshare".into(),
                party: party.to_string(),
                old_committee: old_committee.clone(),
                new_committee: new_committee.clone(),
            };
            let old_share = shares
                .iter()
                .find(|s| s.party == party && old_committee.contains(party))
                .cloned();
            let endpoint = relay.endpoint(party);
            tokio::spawn(async move {
                run_reshare::<Ed25519, _>(&params, &public_key, old_share.as_deref(), &endpoint)
                    .await
            })
        })
        .collect();

    let mut new_shares = Vec::new();
    for handle in handles {
        if let Some(share) = handle.await.unwrap().unwrap() {
            new_shares.push(Arc::new(share));
        }
    }

    assert_eq!(new_shares.len(), 4);
    same_key_everywhere(&new_shares);
    assert_eq!(new_shares[0].public_key, public_key);
    assert_eq!(new_shares[0].threshold, 2);

    let refs: Vec<&KeyShare<Ed25519>> = new_shares.iter().map(|s| s.as_ref()).collect();
    for subset in subsets(&refs, 3) {
        assert_eq!(reconstruct(&subset), public_key);
    }
}
