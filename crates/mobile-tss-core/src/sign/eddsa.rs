//! Threshold Schnorr signing producing standard Ed25519 signatures

use super::messages::{EddsaPartialMessage, EddsaRound1Message, EddsaRound2Message};
use super::signature::EddsaSignature;
use super::{SignParams, signer_weights, weight_of};
use crate::curve::{Curve, Ed25519};
use crate::keygen::{KeyShare, proof_context};
use crate::mpc::Relay;
use crate::proofs::{hash_commitment, random_blind, verify_commitment};
use crate::{Error, Result};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha512};
use tracing::{debug, info, instrument, warn};

const NONCE_DOMAIN: &str = "eddsa-nonce";

/// Ed25519 challenge `c = SHA-512(R || A || M) mod l`
fn challenge(nonce_point: &[u8], public_key: &[u8], message: &[u8]) -> Scalar {
    let digest = Sha512::new()
        .chain_update(nonce_point)
        .chain_update(public_key)
        .chain_update(message)
        .finalize();
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&digest);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Run threshold EdDSA signing for one signer.
///
/// Nonce points are committed before they are revealed, so no signer can
/// pick its nonce after seeing the others. Each partial `z_j` is checked
/// against the signer's public share, naming the party on failure.
#[instrument(skip(params, share, relay), fields(party = %params.party, session = %params.session_id))]
pub async fn run_eddsa_signing<R: Relay>(
    params: &SignParams,
    share: &KeyShare<Ed25519>,
    relay: &R,
) -> Result<EddsaSignature> {
    params.validate(share)?;
    let me = params.party.as_str();
    let others = params.signers.others(me);
    let weights = signer_weights::<Ed25519>(&params.signers)?;
    let a = weight_of::<Ed25519>(&weights, me)? * share.secret_share;
    let public_key_bytes = Ed25519::point_to_bytes(&share.public_key);

    info!(signers = params.signers.len(), "Starting EdDSA signing");

    // ============ Round 1: Nonce Commitment ============
    debug!("Signing Round 1: Committing to nonce point");

    let nonce = Ed25519::random_scalar();
    let nonce_point = Ed25519::point_to_bytes(&Ed25519::mul_base(&nonce));
    let blind = random_blind();

    relay
        .broadcast(
            1,
            &EddsaRound1Message {
                party: me.to_string(),
                commitment: hash_commitment(
                    NONCE_DOMAIN,
                    &proof_context(&params.session_id, me),
                    &[nonce_point.clone()],
                    &blind,
                )
                .to_vec(),
            },
        )
        .await?;

    let round1: Vec<EddsaRound1Message> = relay.collect_broadcasts(1, &others).await?;

    // ============ Round 2: Nonce Reveal ============
    debug!("Signing Round 2: Revealing nonce point");

    relay
        .broadcast(
            2,
            &EddsaRound2Message {
                party: me.to_string(),
                nonce_point: nonce_point.clone(),
                blind,
            },
        )
        .await?;

    let round2: Vec<EddsaRound2Message> = relay.collect_broadcasts(2, &others).await?;

    let mut peer_nonces = Vec::with_capacity(others.len());
    let mut combined_nonce = Ed25519::mul_base(&nonce);
    for ((peer, opening), reveal) in others.iter().zip(&round1).zip(&round2) {
        if opening.party != *peer || reveal.party != *peer {
            return Err(Error::ProtocolViolation(format!(
                "message from {} claims another sender",
                peer
            )));
        }
        verify_commitment(
            NONCE_DOMAIN,
            &proof_context(&params.session_id, peer),
            &[reveal.nonce_point.clone()],
            &reveal.blind,
            &opening.commitment,
        )?;
        let point = Ed25519::point_from_bytes(&reveal.nonce_point)
            .map_err(|e| Error::ProtocolViolation(format!("nonce from {}: {}", peer, e)))?;
        combined_nonce += point;
        peer_nonces.push(point);
    }

    let r_bytes = Ed25519::point_to_bytes(&combined_nonce);
    let c = challenge(&r_bytes, &public_key_bytes, &params.message);

    // ============ Round 3: Partial Signatures ============
    debug!("Signing Round 3: Exchanging partial signatures");

    let z = nonce + c * a;
    relay
        .broadcast(
            3,
            &EddsaPartialMessage {
                party: me.to_string(),
                z: Ed25519::scalar_to_bytes(&z),
            },
        )
        .await?;

    let partials: Vec<EddsaPartialMessage> = relay.collect_broadcasts(3, &others).await?;
    let mut s = z;
    for ((peer, partial), peer_nonce) in others.iter().zip(&partials).zip(&peer_nonces) {
        if partial.party != *peer {
            return Err(Error::ProtocolViolation(format!(
                "round 3 message from {} claims to be from {}",
                peer, partial.party
            )));
        }
        let z_j = Ed25519::scalar_from_bytes(&partial.z)
            .map_err(|e| Error::ProtocolViolation(format!("partial from {}: {}", peer, e)))?;
        let lambda_j = weight_of::<Ed25519>(&weights, peer)?;
        let expected = *peer_nonce + Ed25519::mul(&share.public_share(peer)?, &(c * lambda_j));
        if Ed25519::mul_base(&z_j) != expected {
            warn!(peer = %peer, "Partial signature does not verify");
            return Err(Error::VerificationFailed(format!(
                "invalid partial signature from {}",
                peer
            )));
        }
        s += z_j;
    }

    let signature = EddsaSignature {
        r: to_array(&r_bytes)?,
        s: s.to_bytes(),
    };

    let verifying_key = VerifyingKey::from_bytes(&to_array(&public_key_bytes)?)
        .map_err(|e| Error::Crypto(format!("invalid public key: {}", e)))?;
    verifying_key
        .verify_strict(&params.message, &Signature::from_bytes(&signature.to_bytes()))
        .map_err(|e| {
            Error::VerificationFailed(format!("combined EdDSA signature does not verify: {}", e))
        })?;

    info!("EdDSA signing completed successfully");
    Ok(signature)
}

fn to_array(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| Error::Internal(format!("expected 32 bytes, got {}", bytes.len())))
}
