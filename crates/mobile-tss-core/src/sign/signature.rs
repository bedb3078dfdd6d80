//! Signature types and their response encoding

use crate::types::KeysignResponse;
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use k256::elliptic_curve::{bigint::U256, ops::Reduce};
use k256::{FieldBytes, Scalar};

/// Combined ECDSA signature over secp256k1, low-S normalised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcdsaSignature {
    /// `r` as 32 big-endian bytes
    pub r: [u8; 32],
    /// `s` as 32 big-endian bytes
    pub s: [u8; 32],
    /// Recovery id (0-3): bit 0 is the parity of `R.y`, bit 1 set when `R.x >= n`
    pub recovery_id: u8,
}

impl EcdsaSignature {
    /// Compact 64-byte `r || s`
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// 65-byte `r || s || v` with `v = 27 + recovery_id`, as EVM chains expect
    pub fn to_bytes_with_recovery(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&self.to_bytes());
        bytes[64] = 27 + self.recovery_id;
        bytes
    }

    pub fn to_der(&self) -> Vec<u8> {
        get_der_signature(&self.r, &self.s)
    }

    /// Convert to a k256 signature for verification
    pub fn to_k256(&self) -> Result<k256::ecdsa::Signature> {
        k256::ecdsa::Signature::from_scalars(FieldBytes::from(self.r), FieldBytes::from(self.s))
            .map_err(|e| Error::Crypto(format!("invalid signature scalars: {}", e)))
    }

    pub fn to_response(&self, msg: &str) -> KeysignResponse {
        KeysignResponse {
            msg: msg.to_string(),
            r: STANDARD_NO_PAD.encode(self.r),
            s: STANDARD_NO_PAD.encode(self.s),
            der_signature: hex::encode(self.to_der()),
            recovery_id: hex::encode([self.recovery_id]),
        }
    }
}

/// Combined Ed25519 signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EddsaSignature {
    /// Compressed nonce point `R`
    pub r: [u8; 32],
    /// Little-endian scalar `S`
    pub s: [u8; 32],
}

impl EddsaSignature {
    /// Standard 64-byte `R || S` encoding
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    pub fn to_response(&self, msg: &str) -> KeysignResponse {
        KeysignResponse {
            msg: msg.to_string(),
            r: STANDARD_NO_PAD.encode(self.r),
            s: STANDARD_NO_PAD.encode(self.s),
            der_signature: hex::encode(get_der_signature(&self.r, &self.s)),
            recovery_id: "00".to_string(),
        }
    }
}

/// ASN.1 DER `SEQUENCE { INTEGER r, INTEGER s }` of two big-endian integers
pub fn get_der_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
    let r = der_integer(r);
    let s = der_integer(s);

    let mut der = Vec::with_capacity(2 + r.len() + s.len());
    der.push(0x30);
    der.push((r.len() + s.len()) as u8);
    der.extend_from_slice(&r);
    der.extend_from_slice(&s);
    der
}

fn der_integer(value: &[u8]) -> Vec<u8> {
    let start = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    let trimmed = &value[start..];

    let mut body = Vec::with_capacity(trimmed.len() + 1);
    // Zero, or a leading high bit, needs a 0x00 so the integer stays positive
    if trimmed.first().map_or(true, |b| b & 0x80 != 0) {
        body.push(0x00);
    }
    body.extend_from_slice(trimmed);

    let mut encoded = Vec::with_capacity(body.len() + 2);
    encoded.push(0x02);
    encoded.push(body.len() as u8);
    encoded.extend_from_slice(&body);
    encoded
}

/// Convert a message digest to a secp256k1 scalar.
///
/// Takes the leftmost 32 bytes (shorter input is left-padded) and reduces
/// modulo the group order, matching ECDSA's `bits2int`.
pub fn hash_to_int(hash: &[u8]) -> Scalar {
    let mut bytes = [0u8; 32];
    if hash.len() >= 32 {
        bytes.copy_from_slice(&hash[..32]);
    } else {
        bytes[32 - hash.len()..].copy_from_slice(hash);
    }
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(bytes))
}
