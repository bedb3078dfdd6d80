//! Feldman-VSS distributed key generation

use super::{
    DkgRound1Message, DkgRound2Message, DkgShareMessage, KeyShare, KeygenParams, proof_context,
};
use crate::curve::{Curve, decode_points, encode_points, party_index};
use crate::mpc::Relay;
use crate::proofs::{SchnorrProof, hash_commitment, random_blind, verify_commitment};
use crate::vss::{Polynomial, evaluate_commitments, verify_share};
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

const COMMITMENT_DOMAIN: &str = "dkg-commitment";

/// Run distributed key generation for one party
///
/// Each party:
/// 1. Samples a random polynomial of degree `threshold` and broadcasts a
///    hash commitment to its Feldman commitments
/// 2. Opens the commitment, proves knowledge of its constant term and sends
///    every peer its evaluation point's share
/// 3. Verifies every opening, proof and received share, then sums the shares
///
/// The public key is the sum of all constant-term commitments; no party ever
/// learns it as a scalar.
#[instrument(skip(params, relay), fields(party = %params.party, session = %params.session_id, curve = C::NAME))]
pub async fn run_dkg<C: Curve, R: Relay>(params: &KeygenParams, relay: &R) -> Result<KeyShare<C>> {
    let committee = &params.committee;
    committee.require_member(&params.party)?;
    let threshold = committee.threshold();
    let points = committee.evaluation_points::<C>()?;
    let others = committee.others(&params.party);

    info!(
        parties = committee.len(),
        threshold, "Starting distributed key generation"
    );

    // ============ Round 1: Commitment ============
    debug!("DKG Round 1: Generating secret polynomial and commitment");

    let polynomial = Polynomial::<C>::random(threshold);
    let commitments = encode_points::<C>(&polynomial.commitments());
    let blind = random_blind();
    let context = proof_context(&params.session_id, &params.party);

    relay
        .broadcast(
            1,
            &DkgRound1Message {
                party: params.party.clone(),
                commitment: hash_commitment(COMMITMENT_DOMAIN, &context, &commitments, &blind)
                    .to_vec(),
            },
        )
        .await?;

    let round1: Vec<DkgRound1Message> = relay.collect_broadcasts(1, &others).await?;

    // ============ Round 2: Decommitment and Secret Sharing ============
    debug!("DKG Round 2: Opening commitment and sending shares");

    let constant_commitment = C::mul_base(&polynomial.constant());
    relay
        .broadcast(
            2,
            &DkgRound2Message {
                party: params.party.clone(),
                commitments: commitments.clone(),
                blind,
                proof: SchnorrProof::prove::<C>(
                    &polynomial.constant(),
                    &constant_commitment,
                    &context,
                ),
            },
        )
        .await?;

    for (member, x) in committee.parties().iter().zip(&points) {
        if *member == params.party {
            continue;
        }
        relay
            .send_direct(
                2,
                member,
                &DkgShareMessage {
                    from: params.party.clone(),
                    to: member.clone(),
                    share: C::scalar_to_bytes(&polynomial.evaluate(x)),
                },
            )
            .await?;
    }

    let round2: Vec<DkgRound2Message> = relay.collect_broadcasts(2, &others).await?;
    let shares: Vec<DkgShareMessage> = relay.collect_direct(2, &others).await?;

    // ============ Round 3: Verification and Combination ============
    debug!("DKG Round 3: Verifying shares and computing final key share");

    let my_x = party_index::<C>(&params.party);
    let mut secret_share = polynomial.evaluate(&my_x);
    let mut all_commitments = vec![polynomial.commitments()];

    for (((sender, opening), reveal), share_msg) in
        others.iter().zip(&round1).zip(&round2).zip(&shares)
    {
        if opening.party != *sender || reveal.party != *sender || share_msg.from != *sender {
            return Err(Error::ProtocolViolation(format!(
                "message from {} claims another sender",
                sender
            )));
        }
        if share_msg.to != params.party {
            return Err(Error::ProtocolViolation(format!(
                "share from {} addressed to {}",
                sender, share_msg.to
            )));
        }
        if reveal.commitments.len() != threshold + 1 {
            return Err(Error::ProtocolViolation(format!(
                "{} committed to a polynomial of degree {}, expected {}",
                sender,
                reveal.commitments.len().saturating_sub(1),
                threshold
            )));
        }

        let sender_context = proof_context(&params.session_id, sender);
        verify_commitment(
            COMMITMENT_DOMAIN,
            &sender_context,
            &reveal.commitments,
            &reveal.blind,
            &opening.commitment,
        )?;

        let sender_commitments = decode_points::<C>(&reveal.commitments)
            .map_err(|e| Error::ProtocolViolation(format!("commitments from {}: {}", sender, e)))?;
        reveal
            .proof
            .verify::<C>(&sender_commitments[0], &sender_context)
            .map_err(|_| {
                Error::VerificationFailed(format!("invalid proof of knowledge from {}", sender))
            })?;

        let share = C::scalar_from_bytes(&share_msg.share)
            .map_err(|e| Error::ProtocolViolation(format!("share from {}: {}", sender, e)))?;
        if !verify_share::<C>(&share, &my_x, &sender_commitments) {
            return Err(Error::VerificationFailed(format!(
                "Share from party {} does not match commitment",
                sender
            )));
        }

        secret_share = secret_share + share;
        all_commitments.push(sender_commitments);
    }

    let public_key = all_commitments
        .iter()
        .fold(C::identity(), |acc, commitments| acc + commitments[0]);

    let public_shares: BTreeMap<_, _> = committee
        .parties()
        .iter()
        .zip(&points)
        .map(|(member, x)| {
            let point = all_commitments.iter().fold(C::identity(), |acc, commitments| {
                acc + evaluate_commitments::<C>(commitments, x)
            });
            (member.clone(), point)
        })
        .collect();

    let key_share = KeyShare {
        party: params.party.clone(),
        threshold,
        committee: committee.parties().to_vec(),
        secret_share,
        public_key,
        public_shares,
    };
    key_share.verify_consistency()?;

    info!(
        public_key = %key_share.public_key_hex(),
        "DKG completed successfully"
    );

    Ok(key_share)
}
