//! Feldman verifiable secret sharing over a generic [`Curve`]

use crate::curve::Curve;
use crate::{Error, Result};

/// Secret polynomial `f(x) = a_0 + a_1 x + ... + a_t x^t`
pub struct Polynomial<C: Curve> {
    coefficients: Vec<C::Scalar>,
}

impl<C: Curve> Polynomial<C> {
    /// Random polynomial of the given degree with a chosen constant term
    pub fn with_constant(constant: C::Scalar, degree: usize) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(constant);
        for _ in 0..degree {
            coefficients.push(C::random_scalar());
        }
        Self { coefficients }
    }

    /// Random polynomial with a random constant term
    pub fn random(degree: usize) -> Self {
        Self::with_constant(C::random_scalar(), degree)
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn constant(&self) -> C::Scalar {
        self.coefficients[0]
    }

    /// Evaluate at `x` using Horner's method
    pub fn evaluate(&self, x: &C::Scalar) -> C::Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(C::zero(), |acc, coef| acc * *x + *coef)
    }

    /// Feldman commitments `C_k = a_k * G`
    pub fn commitments(&self) -> Vec<C::Point> {
        self.coefficients.iter().map(C::mul_base).collect()
    }
}

impl<C: Curve> Drop for Polynomial<C> {
    fn drop(&mut self) {
        for coef in self.coefficients.iter_mut() {
            *coef = C::zero();
        }
    }
}

/// Evaluate committed polynomial in the exponent: `sum_k C_k * x^k`
pub fn evaluate_commitments<C: Curve>(commitments: &[C::Point], x: &C::Scalar) -> C::Point {
    commitments
        .iter()
        .rev()
        .fold(C::identity(), |acc, commitment| C::mul(&acc, x) + *commitment)
}

/// Check `share * G == sum_k C_k * x^k`
pub fn verify_share<C: Curve>(share: &C::Scalar, x: &C::Scalar, commitments: &[C::Point]) -> bool {
    C::mul_base(share) == evaluate_commitments::<C>(commitments, x)
}

/// Lagrange coefficient at zero for `x_i` over the evaluation points `xs`
pub fn lagrange_coefficient<C: Curve>(x_i: &C::Scalar, xs: &[C::Scalar]) -> Result<C::Scalar> {
    let mut numerator = C::one();
    let mut denominator = C::one();

    for x_j in xs {
        if x_j == x_i {
            continue;
        }
        numerator = numerator * *x_j;
        denominator = denominator * (*x_j - *x_i);
    }

    let inverse = C::invert(&denominator)
        .ok_or_else(|| Error::InvalidInput("Duplicate evaluation points".into()))?;
    Ok(numerator * inverse)
}
