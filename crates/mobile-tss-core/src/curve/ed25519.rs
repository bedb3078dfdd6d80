//! Ed25519 instantiation used for EdDSA

use super::Curve;
use crate::{Error, Result};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::Identity,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};

/// Edwards form of Curve25519, prime-order subgroup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ed25519;

impl Curve for Ed25519 {
    type Scalar = Scalar;
    type Point = EdwardsPoint;

    const NAME: &'static str = "ed25519";

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
        if *scalar == Scalar::ZERO {
            None
        } else {
            Some(scalar.invert())
        }
    }

    fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Scalar {
        let mut hasher = Sha512::new();
        hasher.update(Self::NAME.as_bytes());
        hasher.update((domain.len() as u64).to_be_bytes());
        hasher.update(domain);
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        let mut wide = [0u8; 64];
        wide.copy_from_slice(&hasher.finalize());
        Scalar::from_bytes_mod_order_wide(&wide)
    }

    fn scalar_to_bytes(scalar: &Scalar) -> Vec<u8> {
        scalar.to_bytes().to_vec()
    }

    fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::Deserialization(format!("Invalid scalar length: {}", bytes.len()))
        })?;
        Option::from(Scalar::from_canonical_bytes(arr))
            .ok_or_else(|| Error::Deserialization("Non-canonical ed25519 scalar".into()))
    }

    fn identity() -> EdwardsPoint {
        EdwardsPoint::identity()
    }

    fn mul_base(scalar: &Scalar) -> EdwardsPoint {
        EdwardsPoint::mul_base(scalar)
    }

    fn mul(point: &EdwardsPoint, scalar: &Scalar) -> EdwardsPoint {
        point * scalar
    }

    fn point_to_bytes(point: &EdwardsPoint) -> Vec<u8> {
        point.compress().to_bytes().to_vec()
    }

    fn point_from_bytes(bytes: &[u8]) -> Result<EdwardsPoint> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::Deserialization(format!("Invalid point length: {}", bytes.len()))
        })?;
        let point = CompressedEdwardsY(arr)
            .decompress()
            .ok_or_else(|| Error::Deserialization("Point not on ed25519".into()))?;
        // Mixed-order points would let a peer smuggle a torsion component
        if !point.is_torsion_free() {
            return Err(Error::Deserialization("Point has a torsion component".into()));
        }
        Ok(point)
    }
}
