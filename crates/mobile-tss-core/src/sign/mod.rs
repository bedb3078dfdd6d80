//! Threshold signature generation
//!
//! Any `threshold + 1` members of the keygen committee can sign. Each signer
//! converts its Shamir share into an additive share with the Lagrange
//! coefficient over the signing committee, then runs one of:
//!
//! - [`run_ecdsa_signing`]: five-round GG18-style ECDSA over secp256k1 with
//!   Paillier-based multiplicative-to-additive conversion guarded by range
//!   and modulus proofs
//! - [`run_eddsa_signing`]: three-round Schnorr signing producing a standard
//!   Ed25519 signature
//!
//! Both verify the combined signature against the public key before
//! returning it.

mod ecdsa;
mod eddsa;
mod messages;
mod signature;

pub use ecdsa::run_ecdsa_signing;
pub use eddsa::run_eddsa_signing;
pub use messages::{
    EcdsaMtaMessage, EcdsaPartialMessage, EcdsaRangeMessage, EcdsaRevealMessage,
    EcdsaRound1Message, EddsaPartialMessage, EddsaRound1Message, EddsaRound2Message,
};
pub use signature::{EcdsaSignature, EddsaSignature, get_der_signature, hash_to_int};

use crate::committee::Committee;
use crate::curve::{Curve, party_index};
use crate::keygen::KeyShare;
use crate::vss::lagrange_coefficient;
use crate::{Error, PartyId, Result, SessionId};

/// Inputs shared by every signer of one keysign session
#[derive(Debug, Clone)]
pub struct SignParams {
    pub session_id: SessionId,
    pub party: PartyId,
    /// Signing committee, a subset of the key's committee
    pub signers: Committee,
    /// Digest for ECDSA, raw message for EdDSA
    pub message: Vec<u8>,
}

impl SignParams {
    /// Check the committee can sign with `share`
    pub fn validate<C: Curve>(&self, share: &KeyShare<C>) -> Result<()> {
        self.signers.require_member(&self.party)?;
        if share.party != self.party {
            return Err(Error::InvalidInput(format!(
                "share belongs to {}, not {}",
                share.party, self.party
            )));
        }
        if !self.signers.is_subset_of(&share.committee) {
            return Err(Error::InvalidInput(format!(
                "signers {} are not all holders of this key",
                self.signers
            )));
        }
        if self.signers.len() <= share.threshold {
            return Err(Error::ThresholdNotMet {
                required: share.threshold + 1,
                actual: self.signers.len(),
            });
        }
        if self.message.is_empty() {
            return Err(Error::InvalidInput("empty message".into()));
        }
        Ok(())
    }
}

/// Lagrange coefficient of every signer, in committee order
pub(crate) fn signer_weights<C: Curve>(signers: &Committee) -> Result<Vec<(PartyId, C::Scalar)>> {
    let points = signers.evaluation_points::<C>()?;
    signers
        .parties()
        .iter()
        .map(|party| {
            let lambda = lagrange_coefficient::<C>(&party_index::<C>(party), &points)?;
            Ok((party.clone(), lambda))
        })
        .collect()
}

/// Weight of one signer from [`signer_weights`]
pub(crate) fn weight_of<C: Curve>(weights: &[(PartyId, C::Scalar)], party: &str) -> Result<C::Scalar> {
    weights
        .iter()
        .find(|(p, _)| p == party)
        .map(|(_, lambda)| *lambda)
        .ok_or_else(|| Error::Internal(format!("no Lagrange weight for {}", party)))
}
