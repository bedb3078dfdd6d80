//! Keygen and reshare protocol messages

use serde::{Deserialize, Serialize};

use crate::PartyId;
use crate::proofs::SchnorrProof;

/// Round 1 DKG message: commitment to the dealer's Feldman commitments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound1Message {
    /// Sender's party key
    pub party: PartyId,
    /// Hash commitment (32 bytes)
    pub commitment: Vec<u8>,
}

/// Round 2 DKG broadcast: decommitment plus proof of the constant term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound2Message {
    pub party: PartyId,
    /// Feldman commitments to the polynomial coefficients (compressed points)
    pub commitments: Vec<Vec<u8>>,
    /// Blinding factor opening the round 1 commitment
    pub blind: Vec<u8>,
    /// Proof of knowledge of the discrete log of `commitments[0]`
    pub proof: SchnorrProof,
}

/// Round 2 DKG direct message: the recipient's evaluation of the dealer's polynomial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgShareMessage {
    pub from: PartyId,
    pub to: PartyId,
    /// The secret share (32 bytes)
    pub share: Vec<u8>,
}

/// Round 1 reshare message from an old committee member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshareRound1Message {
    pub party: PartyId,
    pub commitment: Vec<u8>,
}

/// Round 2 reshare broadcast from an old committee member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshareRound2Message {
    pub party: PartyId,
    /// Commitments to a polynomial whose constant term is the dealer's
    /// Lagrange-weighted share
    pub commitments: Vec<Vec<u8>>,
    pub blind: Vec<u8>,
}

/// Round 2 reshare direct message: sub-share for one new member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshareShareMessage {
    pub from: PartyId,
    pub to: PartyId,
    pub share: Vec<u8>,
}

/// Round 3 reshare broadcast: a new member confirms its public share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshareAckMessage {
    pub party: PartyId,
    /// `x'_j * G` for the member's new share
    pub public_share: Vec<u8>,
}
