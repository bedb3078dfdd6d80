//! Distributed key generation and resharing
//!
//! Both protocols are generic over [`Curve`] and shared by the ECDSA and
//! EdDSA flows:
//!
//! - [`run_dkg`]: Feldman-VSS DKG with commit/reveal and a Schnorr proof of
//!   each dealer's constant term
//! - [`run_reshare`]: moves shares from an old committee to a new one
//!   without changing the public key
//!
//! Every committee of `n` parties uses threshold `ceil((n + 1) / 2) - 1`, so
//! any `threshold + 1` members can sign.

mod dkg;
mod messages;
mod reshare;

pub use dkg::run_dkg;
pub use messages::{
    DkgRound1Message, DkgRound2Message, DkgShareMessage, ReshareAckMessage, ReshareRound1Message,
    ReshareRound2Message, ReshareShareMessage,
};
pub use reshare::{ReshareParams, run_reshare};

use crate::committee::Committee;
use crate::curve::{Curve, party_index};
use crate::types::KeyShareData;
use crate::vss::lagrange_coefficient;
use crate::{Error, PartyId, Result, SessionId};
use std::collections::BTreeMap;
use std::fmt;

/// Inputs shared by every party of one keygen session
#[derive(Debug, Clone)]
pub struct KeygenParams {
    pub session_id: SessionId,
    pub party: PartyId,
    pub committee: Committee,
}

/// A party's share of a threshold key
pub struct KeyShare<C: Curve> {
    pub party: PartyId,
    /// `threshold + 1` shares are needed to sign
    pub threshold: usize,
    /// Members holding shares, in committee order
    pub committee: Vec<PartyId>,
    /// Shamir share `x_i = f(party_index(party))`
    pub secret_share: C::Scalar,
    pub public_key: C::Point,
    /// `x_j * G` for every member
    pub public_shares: BTreeMap<PartyId, C::Point>,
}

impl<C: Curve> Drop for KeyShare<C> {
    fn drop(&mut self) {
        self.secret_share = C::zero();
    }
}

impl<C: Curve> fmt::Debug for KeyShare<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("curve", &C::NAME)
            .field("party", &self.party)
            .field("threshold", &self.threshold)
            .field("committee", &self.committee)
            .field("secret_share", &"[REDACTED]")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl<C: Curve> KeyShare<C> {
    pub fn public_key_hex(&self) -> String {
        hex::encode(C::point_to_bytes(&self.public_key))
    }

    pub fn public_share(&self, party: &str) -> Result<C::Point> {
        self.public_shares
            .get(party)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("{} holds no share of this key", party)))
    }

    /// Serializable form for [`crate::types::LocalState`]
    pub fn to_data(&self) -> KeyShareData {
        KeyShareData {
            threshold: self.threshold,
            committee: self.committee.clone(),
            secret_share: C::scalar_to_bytes(&self.secret_share),
            public_shares: self
                .public_shares
                .iter()
                .map(|(party, point)| (party.clone(), hex::encode(C::point_to_bytes(point))))
                .collect(),
        }
    }

    /// Rebuild from persisted data, checking the share is consistent with
    /// the public key
    pub fn from_data(party: &str, public_key_hex: &str, data: &KeyShareData) -> Result<Self> {
        let corrupt = |what: &str, e: Error| Error::StateCorrupt(format!("{}: {}", what, e));

        let public_key = C::point_from_bytes(
            &hex::decode(public_key_hex).map_err(|e| corrupt("public key", e.into()))?,
        )
        .map_err(|e| corrupt("public key", e))?;
        let secret_share =
            C::scalar_from_bytes(&data.secret_share).map_err(|e| corrupt("secret share", e))?;

        let mut public_shares = BTreeMap::new();
        for (member, encoded) in &data.public_shares {
            let bytes = hex::decode(encoded).map_err(|e| corrupt("public share", e.into()))?;
            let point = C::point_from_bytes(&bytes).map_err(|e| corrupt("public share", e))?;
            public_shares.insert(member.clone(), point);
        }

        let share = Self {
            party: party.to_string(),
            threshold: data.threshold,
            committee: data.committee.clone(),
            secret_share,
            public_key,
            public_shares,
        };
        share
            .verify_consistency()
            .map_err(|e| Error::StateCorrupt(e.to_string()))?;
        Ok(share)
    }

    /// Check the share matches its public share and the public shares
    /// interpolate to the public key
    pub fn verify_consistency(&self) -> Result<()> {
        if self.threshold >= self.committee.len() {
            return Err(Error::VerificationFailed(format!(
                "threshold {} too large for {} parties",
                self.threshold,
                self.committee.len()
            )));
        }
        if C::mul_base(&self.secret_share) != self.public_share(&self.party)? {
            return Err(Error::VerificationFailed(
                "secret share does not match public share".into(),
            ));
        }

        let quorum = &self.committee[..=self.threshold];
        let xs: Vec<C::Scalar> = quorum.iter().map(|p| party_index::<C>(p)).collect();
        let mut interpolated = C::identity();
        for (member, x) in quorum.iter().zip(&xs) {
            let lambda = lagrange_coefficient::<C>(x, &xs)?;
            interpolated = interpolated + C::mul(&self.public_share(member)?, &lambda);
        }
        if interpolated != self.public_key {
            return Err(Error::VerificationFailed(
                "public shares do not interpolate to the public key".into(),
            ));
        }
        Ok(())
    }
}

/// Context bytes binding commitments and proofs to a session and sender
pub(crate) fn proof_context(session_id: &str, party: &str) -> Vec<u8> {
    let mut context = Vec::with_capacity(session_id.len() + party.len() + 1);
    context.extend_from_slice(session_id.as_bytes());
    context.push(b'|');
    context.extend_from_slice(party.as_bytes());
    context
}
