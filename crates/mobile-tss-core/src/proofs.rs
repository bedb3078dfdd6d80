//! Hash commitments and Schnorr proofs of knowledge
//!
//! Both are bound to a caller-supplied context (session id and sender) so a
//! value from one session cannot be replayed into another.

use crate::curve::Curve;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the random blinding factor opened alongside a commitment
pub const BLIND_LEN: usize = 32;

/// `H(domain || context || parts || blind)` over length-prefixed inputs
pub fn hash_commitment(domain: &str, context: &[u8], parts: &[Vec<u8>], blind: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for chunk in [domain.as_bytes(), context] {
        hasher.update((chunk.len() as u64).to_be_bytes());
        hasher.update(chunk);
    }
    hasher.update((parts.len() as u64).to_be_bytes());
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.update(blind);
    hasher.finalize().into()
}

/// Fresh blinding factor
pub fn random_blind() -> Vec<u8> {
    rand::random::<[u8; BLIND_LEN]>().to_vec()
}

/// Check that a decommitment opens `commitment`
pub fn verify_commitment(
    domain: &str,
    context: &[u8],
    parts: &[Vec<u8>],
    blind: &[u8],
    commitment: &[u8],
) -> Result<()> {
    if blind.len() != BLIND_LEN {
        return Err(Error::ProtocolViolation("Invalid blinding factor length".into()));
    }
    if hash_commitment(domain, context, parts, blind).as_slice() != commitment {
        return Err(Error::VerificationFailed(format!(
            "Decommitment does not open {} commitment",
            domain
        )));
    }
    Ok(())
}

/// Non-interactive Schnorr proof of knowledge of a discrete logarithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchnorrProof {
    /// `A = a * G`
    pub commitment: Vec<u8>,
    /// `z = a + c * x`
    pub response: Vec<u8>,
}

fn schnorr_challenge<C: Curve>(public: &[u8], commitment: &[u8], context: &[u8]) -> C::Scalar {
    C::hash_to_scalar(b"schnorr-pok", &[context, public, commitment])
}

impl SchnorrProof {
    /// Prove knowledge of `secret` with `public = secret * G`
    pub fn prove<C: Curve>(secret: &C::Scalar, public: &C::Point, context: &[u8]) -> Self {
        let nonce = C::random_scalar();
        let commitment = C::point_to_bytes(&C::mul_base(&nonce));
        let challenge = schnorr_challenge::<C>(&C::point_to_bytes(public), &commitment, context);
        let response = nonce + challenge * *secret;

        Self {
            commitment,
            response: C::scalar_to_bytes(&response),
        }
    }

    /// Verify `z * G == A + c * public`
    pub fn verify<C: Curve>(&self, public: &C::Point, context: &[u8]) -> Result<()> {
        let commitment = C::point_from_bytes(&self.commitment)?;
        let response = C::scalar_from_bytes(&self.response)?;
        let challenge = schnorr_challenge::<C>(&C::point_to_bytes(public), &self.commitment, context);

        if C::mul_base(&response) != commitment + C::mul(public, &challenge) {
            return Err(Error::VerificationFailed("Invalid Schnorr proof".into()));
        }
        Ok(())
    }
}
