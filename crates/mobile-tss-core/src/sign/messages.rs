//! Signing protocol messages

use crate::PartyId;
use crate::paillier::{ModulusProof, RangeProof, RingPedersen, RingPedersenProof};
use libpaillier::EncryptionKey;
use serde::{Deserialize, Serialize};

// ============ ECDSA ============

/// Round 1 ECDSA broadcast: commitment to `Gamma_i`, the encrypted nonce
/// share and the sender's Paillier and ring-Pedersen material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaRound1Message {
    pub party: PartyId,
    /// Hash commitment to `Gamma_i = gamma_i * G`
    pub commitment: Vec<u8>,
    /// Sender's Paillier public key
    pub paillier_key: EncryptionKey,
    pub modulus_proof: ModulusProof,
    /// Parameters peers prove their range statements against
    pub ring_pedersen: RingPedersen,
    pub ring_pedersen_proof: RingPedersenProof,
    /// `Enc(k_i)` under `paillier_key`
    pub encrypted_k: Vec<u8>,
}

/// Round 2 ECDSA direct message: `k_i < q^3`, proven under the recipient's
/// ring-Pedersen parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaRangeMessage {
    pub from: PartyId,
    pub to: PartyId,
    pub proof: RangeProof,
}

/// Round 3 ECDSA direct message: MtA responses to the recipient's `Enc(k_j)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaMtaMessage {
    pub from: PartyId,
    pub to: PartyId,
    /// `Enc(k_j * gamma_i + beta')`
    pub gamma_response: Vec<u8>,
    /// `Enc(k_j * w_i + nu')`
    pub w_response: Vec<u8>,
}

/// Round 4 ECDSA broadcast: `delta_i` and the `Gamma_i` decommitment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaRevealMessage {
    pub party: PartyId,
    pub delta: Vec<u8>,
    /// Compressed `Gamma_i`
    pub gamma_point: Vec<u8>,
    pub blind: Vec<u8>,
}

/// Round 5 ECDSA broadcast: partial signature `s_i = m * k_i + r * sigma_i`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaPartialMessage {
    pub party: PartyId,
    pub s: Vec<u8>,
}

// ============ EdDSA ============

/// Round 1 EdDSA broadcast: commitment to the nonce point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EddsaRound1Message {
    pub party: PartyId,
    pub commitment: Vec<u8>,
}

/// Round 2 EdDSA broadcast: nonce point `R_i` and its opening
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EddsaRound2Message {
    pub party: PartyId,
    pub nonce_point: Vec<u8>,
    pub blind: Vec<u8>,
}

/// Round 3 EdDSA broadcast: `z_i = r_i + c * lambda_i * x_i`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EddsaPartialMessage {
    pub party: PartyId,
    pub z: Vec<u8>,
}
