//! secp256k1 instantiation used for ECDSA

use super::Curve;
use crate::{Error, Result};
use k256::{
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar,
    elliptic_curve::{
        Field, PrimeField,
        ops::Reduce,
        bigint::U256,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// secp256k1 group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Secp256k1;

impl Curve for Secp256k1 {
    type Scalar = Scalar;
    type Point = ProjectivePoint;

    const NAME: &'static str = "secp256k1";

    fn zero() -> Scalar {
        Scalar::ZERO
    }

    fn one() -> Scalar {
        Scalar::ONE
    }

    fn scalar_from_u64(value: u64) -> Scalar {
        Scalar::from(value)
    }

    fn random_scalar() -> Scalar {
        Scalar::random(&mut OsRng)
    }

    fn invert(scalar: &Scalar) -> Option<Scalar> {
        Option::from(scalar.invert())
    }

    fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Scalar {
        let mut hasher = Sha256::new();
        hasher.update(Self::NAME.as_bytes());
        hasher.update((domain.len() as u64).to_be_bytes());
        hasher.update(domain);
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        let digest = hasher.finalize();
        <Scalar as Reduce<U256>>::reduce_bytes(&digest)
    }

    fn scalar_to_bytes(scalar: &Scalar) -> Vec<u8> {
        scalar.to_bytes().to_vec()
    }

    fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
        if bytes.len() != 32 {
            return Err(Error::Deserialization(format!(
                "Invalid scalar length: {}",
                bytes.len()
            )));
        }
        Option::from(Scalar::from_repr(*FieldBytes::from_slice(bytes)))
            .ok_or_else(|| Error::Deserialization("Scalar out of range".into()))
    }

    fn identity() -> ProjectivePoint {
        ProjectivePoint::IDENTITY
    }

    fn mul_base(scalar: &Scalar) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * scalar
    }

    fn mul(point: &ProjectivePoint, scalar: &Scalar) -> ProjectivePoint {
        *point * scalar
    }

    fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
        point.to_affine().to_encoded_point(true).as_bytes().to_vec()
    }

    fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
        let encoded = EncodedPoint::from_bytes(bytes)
            .map_err(|e| Error::Deserialization(format!("Invalid point: {}", e)))?;
        let affine: AffinePoint = Option::from(AffinePoint::from_encoded_point(&encoded))
            .ok_or_else(|| Error::Deserialization("Point not on secp256k1".into()))?;
        Ok(ProjectivePoint::from(affine))
    }
}

/// Reduce an arbitrary-length big-endian integer modulo the group order
pub(crate) fn scalar_from_be_bytes_mod_order(bytes: &[u8]) -> Scalar {
    let radix = Scalar::from(256u64);
    bytes
        .iter()
        .fold(Scalar::ZERO, |acc, byte| acc * radix + Scalar::from(*byte as u64))
}

/// x-coordinate of a point reduced modulo the group order, plus y parity
pub(crate) fn x_coordinate(point: &ProjectivePoint) -> Result<(Scalar, [u8; 32], bool)> {
    let uncompressed = point.to_affine().to_encoded_point(false);
    let bytes = uncompressed.as_bytes();
    if bytes.len() != 65 {
        return Err(Error::Crypto("Point at infinity has no x-coordinate".into()));
    }
    let x: [u8; 32] = bytes[1..33]
        .try_into()
        .map_err(|_| Error::Internal("Invalid x-coordinate length".into()))?;
    let y_is_odd = bytes[64] & 1 == 1;
    let r = <Scalar as Reduce<U256>>::reduce_bytes(&x.into());
    Ok((r, x, y_is_odd))
}
