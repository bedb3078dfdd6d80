//! Core types for the TSS service
//!
//! Request/response shapes handed across the service boundary, the wire
//! envelope moved by the messenger, and the persisted per-party state.

use crate::paillier::PaillierKeyPair;
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque party key, unique within a session
pub type PartyId = String;

/// Session identifier, hex of a digest over the request
pub type SessionId = String;

/// Signature scheme a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TssScheme {
    /// ECDSA over secp256k1
    Ecdsa,
    /// EdDSA over Ed25519
    Eddsa,
}

impl fmt::Display for TssScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TssScheme::Ecdsa => write!(f, "ECDSA"),
            TssScheme::Eddsa => write!(f, "EdDSA"),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ============ Requests and Responses ============

/// Start a distributed key generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeygenRequest {
    /// Key of the local party, must appear in `all_parties`
    pub local_party_id: PartyId,
    /// Comma-separated keys of every committee member
    pub all_parties: String,
    /// 32-byte hex chain code shared by the committee
    pub chain_code_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenResponse {
    /// Hex of the compressed public key
    pub pub_key: String,
}

/// Sign one message with a previously generated key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysignRequest {
    /// Hex public key identifying the local state
    pub pub_key: String,
    /// Base64 message; a 32-byte digest for ECDSA, raw bytes for EdDSA
    pub message_to_sign: String,
    /// Comma-separated signing committee, a subset of the keygen committee
    pub keysign_committee_keys: String,
    pub local_party_key: PartyId,
    /// BIP32 path such as `m/44'/60'/0'/0/0`, empty for the root key
    pub derive_path: String,
}

/// Signature components.
///
/// `r` and `s` are unpadded base64, `der_signature` and `recovery_id` hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignResponse {
    pub msg: String,
    pub r: String,
    pub s: String,
    pub der_signature: String,
    pub recovery_id: String,
}

/// Move key shares from `old_parties` to `new_parties`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReshareRequest {
    pub pub_key: String,
    pub local_party_id: PartyId,
    /// Comma-separated current holders taking part
    pub old_parties: String,
    /// Comma-separated committee receiving fresh shares
    pub new_parties: String,
    pub chain_code_hex: String,
    /// Prefix of the state being replaced
    pub reshare_prefix: String,
    /// Prefix for the new state, generated when empty
    pub new_reshare_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshareResponse {
    pub pub_key: String,
    pub reshare_prefix: String,
}

// ============ Wire Format ============

/// Outbound protocol message, handed to the messenger as base64 JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFromTss {
    /// Serialized [`WireMessage`]
    #[serde(with = "base64_bytes")]
    pub wire_bytes: Vec<u8>,
    pub from: PartyId,
    /// Recipient, empty for broadcast
    pub to: PartyId,
    pub is_broadcast: bool,
}

impl MessageFromTss {
    /// Encode as the body passed to [`crate::Messenger::send`]
    pub fn encode_body(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// Decode a body received from the host transport
    pub fn decode_body(body: &str) -> Result<Self> {
        let json = STANDARD
            .decode(body.trim())
            .map_err(|e| Error::Deserialization(format!("message body is not base64: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| Error::Deserialization(format!("message body is not a TSS message: {}", e)))
    }

    pub fn wire(&self) -> Result<WireMessage> {
        serde_json::from_slice(&self.wire_bytes)
            .map_err(|e| Error::Deserialization(format!("invalid wire message: {}", e)))
    }

    /// Whether the local party should process this message
    pub fn is_for(&self, party: &str) -> bool {
        self.is_broadcast || self.to == party
    }
}

/// Protocol payload tagged with the session and round it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub session: SessionId,
    pub round: u32,
    pub payload: serde_json::Value,
}

// ============ Local State ============

/// Per-scheme key share material as persisted
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShareData {
    /// Signing threshold; `threshold + 1` parties can sign
    pub threshold: usize,
    /// Committee that holds shares of this key, in committee order
    pub committee: Vec<PartyId>,
    /// This party's Shamir share
    #[serde(with = "hex_bytes")]
    pub secret_share: Vec<u8>,
    /// Hex public share of every committee member
    #[zeroize(skip)]
    pub public_shares: BTreeMap<PartyId, String>,
}

impl fmt::Debug for KeyShareData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShareData")
            .field("threshold", &self.threshold)
            .field("committee", &self.committee)
            .field("secret_share", &"[REDACTED]")
            .field("public_shares", &self.public_shares)
            .finish()
    }
}

/// ECDSA share plus the Paillier key used for MtA during signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaLocalData {
    #[serde(flatten)]
    pub share: KeyShareData,
    pub paillier_key: PaillierKeyPair,
}

pub type EddsaLocalData = KeyShareData;

/// Durable state of one party for one public key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalState {
    pub pub_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdsa_local_data: Option<EcdsaLocalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eddsa_local_data: Option<EddsaLocalData>,
    pub keygen_committee_keys: Vec<PartyId>,
    pub local_party_key: PartyId,
    pub chain_code_hex: String,
    #[serde(default)]
    pub reshare_prefix: String,
}

impl LocalState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored blob, reporting decode failures as corrupt state
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::StateCorrupt(e.to_string()))
    }

    pub fn scheme(&self) -> Option<TssScheme> {
        match (&self.ecdsa_local_data, &self.eddsa_local_data) {
            (Some(_), _) => Some(TssScheme::Ecdsa),
            (None, Some(_)) => Some(TssScheme::Eddsa),
            (None, None) => None,
        }
    }

    /// Prefix for the state a reshare produces.
    ///
    /// An empty `requested` prefix increments `current`, read as a hex
    /// counter (empty counts as zero), and formats it as 16 hex digits. The
    /// result must order after `current`.
    pub fn next_reshare_prefix(current: &str, requested: &str) -> Result<String> {
        let next = if requested.is_empty() {
            let counter = if current.is_empty() {
                0
            } else {
                u64::from_str_radix(current, 16).map_err(|_| {
                    Error::InvalidInput(format!(
                        "reshare prefix {:?} is not a counter, pass new_reshare_prefix",
                        current
                    ))
                })?
            };
            let counter = counter
                .checked_add(1)
                .ok_or_else(|| Error::InvalidInput("reshare prefix exhausted".into()))?;
            format!("{:016x}", counter)
        } else {
            requested.to_string()
        };

        if !is_newer_prefix(&next, current) {
            return Err(Error::InvalidInput(format!(
                "new reshare prefix {:?} does not follow {:?}",
                next, current
            )));
        }
        Ok(next)
    }
}

/// Order reshare prefixes by length, then lexicographically, so counters of
/// any width compare numerically
pub fn is_newer_prefix(candidate: &str, current: &str) -> bool {
    (candidate.len(), candidate) > (current.len(), current)
}
