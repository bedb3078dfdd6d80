//! BIP32-style public key derivation for threshold keys
//!
//! Only non-hardened derivation is possible without the full private key, so
//! hardened markers in a path are stripped and every index is applied as
//! non-hardened. The signing side adds the accumulated tweak to its share.

use crate::curve::{Curve, Ed25519, Secp256k1};
use crate::{Error, Result};
use hmac::{Hmac, Mac};
use k256::{
    FieldBytes, ProjectivePoint, Scalar,
    elliptic_curve::{PrimeField, sec1::ToEncodedPoint},
};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// First hardened index; stripped paths must stay below it
const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Result of deriving a child key from the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedKey {
    /// Child public key
    pub public_key: ProjectivePoint,
    /// Child chain code
    pub chain_code: [u8; 32],
    /// Sum of the per-level tweaks; `child = root + delta * G`
    pub delta: Scalar,
}

/// Parse a derivation path such as `m/44'/60'/0'/0/0` into indexes.
///
/// Empty components and `m` are skipped and `'` markers are removed.
pub fn get_derive_path_bytes(path: &str) -> Result<Vec<u32>> {
    let mut indexes = Vec::new();
    for item in path.split('/') {
        let item = item.trim();
        if item.is_empty() || item == "m" {
            continue;
        }
        let index: u32 = item
            .trim_matches('\'')
            .parse()
            .map_err(|e| Error::InvalidInput(format!("invalid path component {:?}: {}", item, e)))?;
        if index >= HARDENED_OFFSET {
            return Err(Error::Derivation(format!(
                "index {} is in the hardened range",
                index
            )));
        }
        indexes.push(index);
    }
    Ok(indexes)
}

/// Decode a 32-byte hex chain code
pub fn parse_chain_code(hex_chain_code: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_chain_code)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::InvalidInput(format!("chain code must be 32 bytes, got {}", bytes.len()))
    })
}

/// Walk `path` from `root`, returning the child key and accumulated tweak
pub fn derive_child_key(
    root: &ProjectivePoint,
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<DerivedKey> {
    let mut public_key = *root;
    let mut chain_code = *chain_code;
    let mut delta = Scalar::ZERO;

    for index in path {
        let mut mac = HmacSha512::new_from_slice(&chain_code)
            .map_err(|e| Error::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(public_key.to_affine().to_encoded_point(true).as_bytes());
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let tweak: Scalar = Option::from(Scalar::from_repr(*FieldBytes::from_slice(&digest[..32])))
            .ok_or_else(|| Error::Derivation(format!("tweak out of range at index {}", index)))?;
        if tweak == Scalar::ZERO {
            return Err(Error::Derivation(format!("zero tweak at index {}", index)));
        }

        public_key += ProjectivePoint::GENERATOR * tweak;
        if public_key == ProjectivePoint::IDENTITY {
            return Err(Error::Derivation(format!("child key at infinity at index {}", index)));
        }
        delta += tweak;
        chain_code.copy_from_slice(&digest[32..]);
    }

    Ok(DerivedKey {
        public_key,
        chain_code,
        delta,
    })
}

/// Hex encoding of a secp256k1 public key in compressed SEC1 form
pub fn get_hex_encoded_pub_key(public_key: &ProjectivePoint) -> String {
    hex::encode(public_key.to_affine().to_encoded_point(true).as_bytes())
}

/// Derive a child public key from hex inputs, returning the compressed hex key.
///
/// An empty path returns `hex_pub_key` exactly as given once it parses as a
/// key of the right scheme. EdDSA keys cannot be derived, so a non-empty path
/// with `is_eddsa` is rejected.
pub fn get_derived_pub_key(
    hex_pub_key: &str,
    hex_chain_code: &str,
    path: &str,
    is_eddsa: bool,
) -> Result<String> {
    if hex_pub_key.is_empty() {
        return Err(Error::InvalidInput("empty pub key".into()));
    }
    let indexes = get_derive_path_bytes(path)?;

    if is_eddsa {
        if !indexes.is_empty() {
            return Err(Error::InvalidInput(
                "derivation is not supported for EdDSA keys".into(),
            ));
        }
        Ed25519::point_from_bytes(&hex::decode(hex_pub_key)?)
            .map_err(|e| Error::InvalidInput(format!("invalid EdDSA pub key: {}", e)))?;
        return Ok(hex_pub_key.to_string());
    }

    let root = Secp256k1::point_from_bytes(&hex::decode(hex_pub_key)?)
        .map_err(|e| Error::InvalidInput(format!("invalid ECDSA pub key: {}", e)))?;
    if indexes.is_empty() {
        return Ok(hex_pub_key.to_string());
    }

    let chain_code = parse_chain_code(hex_chain_code)?;
    let derived = derive_child_key(&root, &chain_code, &indexes)?;
    Ok(get_hex_encoded_pub_key(&derived.public_key))
}
