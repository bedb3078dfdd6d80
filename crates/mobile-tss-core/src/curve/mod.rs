//! Curve abstraction shared by key generation and resharing
//!
//! Keygen and reshare only need scalar/point arithmetic, hashing into the
//! scalar field and a byte encoding, so they are written once against
//! [`Curve`] and instantiated for [`Secp256k1`] (ECDSA) and [`Ed25519`]
//! (EdDSA). Signing is scheme specific and lives in [`crate::sign`].

mod ed25519;
pub(crate) mod secp256k1;

pub use ed25519::Ed25519;
pub use secp256k1::Secp256k1;

use crate::Result;
use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

/// Prime-order group used by the threshold protocols
pub trait Curve: Send + Sync + 'static {
    /// Element of the scalar field (integers modulo the group order)
    type Scalar: Copy
        + PartialEq
        + Debug
        + Send
        + Sync
        + Add<Output = Self::Scalar>
        + Sub<Output = Self::Scalar>
        + Mul<Output = Self::Scalar>
        + Neg<Output = Self::Scalar>;

    /// Group element
    type Point: Copy + PartialEq + Debug + Send + Sync + Add<Output = Self::Point>;

    /// Human-readable curve name, used in logs and hash domains
    const NAME: &'static str;

    fn zero() -> Self::Scalar;

    fn one() -> Self::Scalar;

    fn scalar_from_u64(value: u64) -> Self::Scalar;

    /// Uniformly random scalar from the OS RNG
    fn random_scalar() -> Self::Scalar;

    /// Multiplicative inverse, `None` for zero
    fn invert(scalar: &Self::Scalar) -> Option<Self::Scalar>;

    /// Hash arbitrary length-prefixed parts into the scalar field
    fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Self::Scalar;

    fn scalar_to_bytes(scalar: &Self::Scalar) -> Vec<u8>;

    /// Decode a canonical scalar encoding
    fn scalar_from_bytes(bytes: &[u8]) -> Result<Self::Scalar>;

    fn identity() -> Self::Point;

    /// `scalar * G`
    fn mul_base(scalar: &Self::Scalar) -> Self::Point;

    fn mul(point: &Self::Point, scalar: &Self::Scalar) -> Self::Point;

    /// Compressed point encoding
    fn point_to_bytes(point: &Self::Point) -> Vec<u8>;

    /// Decode and validate a compressed point
    fn point_from_bytes(bytes: &[u8]) -> Result<Self::Point>;
}

/// Scalar from the evaluation point of a party key.
///
/// Every peer derives the same point from the same key, so no index
/// negotiation is needed.
pub fn party_index<C: Curve>(party: &str) -> C::Scalar {
    C::hash_to_scalar(b"party-index", &[party.as_bytes()])
}

/// Decode a list of encoded points
pub fn decode_points<C: Curve>(encoded: &[Vec<u8>]) -> Result<Vec<C::Point>> {
    encoded.iter().map(|bytes| C::point_from_bytes(bytes)).collect()
}

/// Encode a list of points
pub fn encode_points<C: Curve>(points: &[C::Point]) -> Vec<Vec<u8>> {
    points.iter().map(C::point_to_bytes).collect()
}
