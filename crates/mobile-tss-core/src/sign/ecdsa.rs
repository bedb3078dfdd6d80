//! Threshold ECDSA signing over secp256k1
//!
//! With additive key shares `w_i` (so `sum w_i = x`), each signer samples
//! `k_i` and `gamma_i`. Pairwise MtA turns the cross terms of
//! `k * gamma` and `k * x` into additive shares `delta_i` and `sigma_i`.
//! Revealing `delta = k * gamma` and `Gamma = gamma * G` lets everyone
//! compute `R = delta^-1 * Gamma = k^-1 * G`, after which
//! `s = sum (m * k_i + r * sigma_i) = k * (m + r * x)`.
//!
//! A signer only multiplies its secrets into a peer's `Enc(k_j)` after
//! checking the peer's Paillier modulus and a range proof for `k_j`.

use super::messages::{
    EcdsaMtaMessage, EcdsaPartialMessage, EcdsaRangeMessage, EcdsaRevealMessage,
    EcdsaRound1Message,
};
use super::signature::{EcdsaSignature, hash_to_int};
use super::{SignParams, signer_weights, weight_of};
use crate::curve::secp256k1::x_coordinate;
use crate::curve::{Curve, Secp256k1};
use crate::keygen::{KeyShare, proof_context};
use crate::mpc::Relay;
use crate::paillier::{
    ModulusProof, PaillierKeyPair, RangeProof, RingPedersen, encrypt_scalar, mta_respond,
    validate_peer_key,
};
use crate::proofs::{hash_commitment, random_blind, verify_commitment};
use crate::{Error, Result};
use k256::ecdsa::{VerifyingKey, signature::hazmat::PrehashVerifier};
use k256::{ProjectivePoint, Scalar};
use libpaillier::unknown_order::BigNumber;
use tracing::{debug, info, instrument, warn};

const GAMMA_DOMAIN: &str = "ecdsa-gamma";

/// Context binding a range proof to its sender and recipient
fn range_context(session_id: &str, prover: &str, verifier: &str) -> Vec<u8> {
    let mut context = proof_context(session_id, prover);
    context.push(b'>');
    context.extend_from_slice(verifier.as_bytes());
    context
}

/// Check a peer's round 1 Paillier and ring-Pedersen material
fn verify_round1(session_id: &str, peer: &str, message: &EcdsaRound1Message) -> Result<()> {
    if message.party != peer {
        return Err(Error::ProtocolViolation(format!(
            "round 1 message from {} claims to be from {}",
            peer, message.party
        )));
    }
    let context = proof_context(session_id, peer);
    validate_peer_key(&message.paillier_key)?;
    message.modulus_proof.verify(&message.paillier_key, &context)?;
    if message.ring_pedersen.n != *message.paillier_key.n() {
        return Err(Error::ProtocolViolation(format!(
            "ring-Pedersen modulus from {} differs from its Paillier modulus",
            peer
        )));
    }
    message.ring_pedersen_proof.verify(&message.ring_pedersen, &context)
}

/// Run threshold ECDSA signing for one signer.
///
/// `tweak` is the accumulated derivation offset: the signature verifies
/// under `public_key + tweak * G` (use zero for the root key).
#[instrument(skip(params, share, paillier, tweak, relay), fields(party = %params.party, session = %params.session_id))]
pub async fn run_ecdsa_signing<R: Relay>(
    params: &SignParams,
    share: &KeyShare<Secp256k1>,
    paillier: &PaillierKeyPair,
    tweak: &Scalar,
    relay: &R,
) -> Result<EcdsaSignature> {
    params.validate(share)?;
    let me = params.party.as_str();
    let others = params.signers.others(me);
    let weights = signer_weights::<Secp256k1>(&params.signers)?;

    let w = weight_of::<Secp256k1>(&weights, me)? * (share.secret_share + tweak);
    let public_key = share.public_key + ProjectivePoint::GENERATOR * tweak;
    let m = hash_to_int(&params.message);

    info!(
        signers = params.signers.len(),
        derived = *tweak != Scalar::ZERO,
        "Starting ECDSA signing"
    );

    // ============ Round 1: Nonce Commitment and Encrypted k ============
    debug!("Signing Round 1: Committing to Gamma and encrypting k");

    let k = Secp256k1::random_scalar();
    let gamma = Secp256k1::random_scalar();
    let gamma_bytes = Secp256k1::point_to_bytes(&Secp256k1::mul_base(&gamma));
    let blind = random_blind();
    let paillier_key = paillier.encryption_key();
    let (encrypted_k, k_nonce) = encrypt_scalar(&paillier_key, &k)?;

    let my_context = proof_context(&params.session_id, me);
    let (ring_pedersen, ring_pedersen_proof) = RingPedersen::generate(paillier, &my_context);

    relay
        .broadcast(
            1,
            &EcdsaRound1Message {
                party: me.to_string(),
                commitment: hash_commitment(
                    GAMMA_DOMAIN,
                    &my_context,
                    &[gamma_bytes.clone()],
                    &blind,
                )
                .to_vec(),
                modulus_proof: ModulusProof::prove(paillier, &my_context)?,
                paillier_key: paillier_key.clone(),
                ring_pedersen: ring_pedersen.clone(),
                ring_pedersen_proof,
                encrypted_k: encrypted_k.clone(),
            },
        )
        .await?;

    let round1: Vec<EcdsaRound1Message> = relay.collect_broadcasts(1, &others).await?;
    for (peer, message) in others.iter().zip(&round1) {
        if let Err(e) = verify_round1(&params.session_id, peer, message) {
            warn!(peer = %peer, error = %e, "Rejecting peer Paillier parameters");
            return Err(e);
        }
    }

    // ============ Round 2: Range Proofs for Enc(k) ============
    debug!("Signing Round 2: Proving k is in range");

    let encrypted_k_value = BigNumber::from_slice(&encrypted_k);
    let k_value = BigNumber::from_slice(k.to_bytes());
    for (peer, message) in others.iter().zip(&round1) {
        let proof = RangeProof::prove(
            &paillier_key,
            &encrypted_k_value,
            &k_value,
            &k_nonce,
            &message.ring_pedersen,
            &range_context(&params.session_id, me, peer),
        );
        relay
            .send_direct(
                2,
                peer,
                &EcdsaRangeMessage {
                    from: me.to_string(),
                    to: peer.clone(),
                    proof,
                },
            )
            .await?;
    }

    let range_proofs: Vec<EcdsaRangeMessage> = relay.collect_direct(2, &others).await?;
    for ((peer, opening), range) in others.iter().zip(&round1).zip(&range_proofs) {
        if range.from != *peer || range.to != me {
            return Err(Error::ProtocolViolation(format!(
                "misaddressed range proof from {}",
                peer
            )));
        }
        if let Err(e) = range.proof.verify(
            &opening.paillier_key,
            &BigNumber::from_slice(&opening.encrypted_k),
            &ring_pedersen,
            &range_context(&params.session_id, peer, me),
        ) {
            warn!(peer = %peer, error = %e, "Range proof for Enc(k) rejected");
            return Err(e);
        }
    }

    // ============ Round 3: MtA Responses ============
    debug!("Signing Round 3: Responding to peers' encrypted nonces");

    let mut delta = k * gamma;
    let mut sigma = k * w;

    for (peer, message) in others.iter().zip(&round1) {
        let (gamma_response, beta) =
            mta_respond(&message.paillier_key, &message.encrypted_k, &gamma)?;
        let (w_response, nu) = mta_respond(&message.paillier_key, &message.encrypted_k, &w)?;
        delta += beta;
        sigma += nu;

        relay
            .send_direct(
                3,
                peer,
                &EcdsaMtaMessage {
                    from: me.to_string(),
                    to: peer.clone(),
                    gamma_response,
                    w_response,
                },
            )
            .await?;
    }

    let responses: Vec<EcdsaMtaMessage> = relay.collect_direct(3, &others).await?;
    for (peer, response) in others.iter().zip(&responses) {
        if response.from != *peer || response.to != me {
            return Err(Error::ProtocolViolation(format!(
                "misaddressed MtA response from {}",
                peer
            )));
        }
        delta += paillier.decrypt_mta(&response.gamma_response)?;
        sigma += paillier.decrypt_mta(&response.w_response)?;
    }

    // ============ Round 4: Reveal delta_i and Gamma_i ============
    debug!("Signing Round 4: Revealing delta and Gamma");

    relay
        .broadcast(
            4,
            &EcdsaRevealMessage {
                party: me.to_string(),
                delta: Secp256k1::scalar_to_bytes(&delta),
                gamma_point: gamma_bytes,
                blind,
            },
        )
        .await?;

    let reveals: Vec<EcdsaRevealMessage> = relay.collect_broadcasts(4, &others).await?;

    let mut delta_total = delta;
    let mut gamma_total = Secp256k1::mul_base(&gamma);
    for ((peer, opening), reveal) in others.iter().zip(&round1).zip(&reveals) {
        if reveal.party != *peer {
            return Err(Error::ProtocolViolation(format!(
                "round 4 message from {} claims to be from {}",
                peer, reveal.party
            )));
        }
        verify_commitment(
            GAMMA_DOMAIN,
            &proof_context(&params.session_id, peer),
            &[reveal.gamma_point.clone()],
            &reveal.blind,
            &opening.commitment,
        )?;
        delta_total += Secp256k1::scalar_from_bytes(&reveal.delta)
            .map_err(|e| Error::ProtocolViolation(format!("delta from {}: {}", peer, e)))?;
        gamma_total += Secp256k1::point_from_bytes(&reveal.gamma_point)
            .map_err(|e| Error::ProtocolViolation(format!("Gamma from {}: {}", peer, e)))?;
    }

    let delta_inv = Secp256k1::invert(&delta_total)
        .ok_or_else(|| Error::VerificationFailed("combined delta is zero".into()))?;
    let nonce_point = gamma_total * delta_inv;
    let (r, r_x, y_is_odd) = x_coordinate(&nonce_point)?;
    if r == Scalar::ZERO {
        return Err(Error::Crypto("signature nonce produced r = 0".into()));
    }

    // ============ Round 5: Partial Signatures ============
    debug!("Signing Round 5: Exchanging partial signatures");

    let s_i = m * k + r * sigma;
    relay
        .broadcast(
            5,
            &EcdsaPartialMessage {
                party: me.to_string(),
                s: Secp256k1::scalar_to_bytes(&s_i),
            },
        )
        .await?;

    let partials: Vec<EcdsaPartialMessage> = relay.collect_broadcasts(5, &others).await?;
    let mut s = s_i;
    for (peer, partial) in others.iter().zip(&partials) {
        if partial.party != *peer {
            return Err(Error::ProtocolViolation(format!(
                "round 5 message from {} claims to be from {}",
                peer, partial.party
            )));
        }
        s += Secp256k1::scalar_from_bytes(&partial.s)
            .map_err(|e| Error::ProtocolViolation(format!("partial from {}: {}", peer, e)))?;
    }
    if s == Scalar::ZERO {
        return Err(Error::VerificationFailed("combined s is zero".into()));
    }

    let mut recovery_id = u8::from(y_is_odd);
    if r.to_bytes().as_slice() != r_x.as_slice() {
        recovery_id |= 2;
    }

    // Low-S: s and n - s both verify, keep the smaller and flip R's parity
    let negated = -s;
    if negated.to_bytes().as_slice() < s.to_bytes().as_slice() {
        s = negated;
        recovery_id ^= 1;
    }

    let signature = EcdsaSignature {
        r: r.to_bytes().into(),
        s: s.to_bytes().into(),
        recovery_id,
    };

    let verifying_key = VerifyingKey::from_affine(public_key.to_affine())
        .map_err(|e| Error::Crypto(format!("invalid public key: {}", e)))?;
    if let Err(e) = verifying_key.verify_prehash(&m.to_bytes(), &signature.to_k256()?) {
        warn!(error = %e, "Combined ECDSA signature failed verification");
        return Err(Error::VerificationFailed(
            "combined ECDSA signature does not verify".into(),
        ));
    }

    info!(recovery_id, "ECDSA signing completed successfully");
    Ok(signature)
}
