//! Paillier keys and the multiplicative-to-additive (MtA) share conversion
//!
//! ECDSA signing turns products of secret values held by two parties into
//! additive shares. Alice encrypts her value under her own Paillier key, Bob
//! homomorphically multiplies in his value and adds a mask, and Alice
//! decrypts. Prime generation is the expensive part, so key pairs are
//! produced ahead of time as "pre-params" and consumed by keygen/reshare.
//!
//! Bob only answers a ciphertext that comes with a [`RangeProof`] showing the
//! plaintext is below `q^3`, under a key whose modulus passed
//! [`validate_peer_key`] and a [`ModulusProof`]. With those bounds the
//! `q^5` mask statistically hides Bob's value.

mod proofs;

pub use proofs::{ModulusProof, RangeProof, RingPedersen, RingPedersenProof, SMALL_PRIME_BOUND};

use crate::curve::secp256k1::scalar_from_be_bytes_mod_order;
use crate::{Error, Result};
use k256::Scalar;
use libpaillier::unknown_order::BigNumber;
use libpaillier::{DecryptionKey, EncryptionKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest accepted prime size; `N` must exceed `q^5 + q^4` for the MtA bounds
pub const MIN_PRIME_BITS: usize = 1024;

/// Smallest peer modulus accepted, in bits
const MIN_MODULUS_BITS: usize = 2 * MIN_PRIME_BITS - 1;

/// A party's Paillier key pair
#[derive(Clone, Serialize, Deserialize)]
pub struct PaillierKeyPair {
    decryption_key: DecryptionKey,
}

impl fmt::Debug for PaillierKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaillierKeyPair")
            .field("modulus_bits", &self.modulus().bit_length())
            .field("decryption_key", &"[REDACTED]")
            .finish()
    }
}

impl PaillierKeyPair {
    /// Generate a fresh key pair from two random primes of `prime_bits` bits
    pub fn generate(prime_bits: usize) -> Result<Self> {
        if prime_bits < MIN_PRIME_BITS {
            return Err(Error::InvalidInput(format!(
                "Paillier primes must be at least {} bits, got {}",
                MIN_PRIME_BITS, prime_bits
            )));
        }
        Self::from_random_primes(prime_bits)
    }

    fn from_random_primes(prime_bits: usize) -> Result<Self> {
        let p = BigNumber::prime(prime_bits);
        let mut q = BigNumber::prime(prime_bits);
        while q == p {
            q = BigNumber::prime(prime_bits);
        }

        let decryption_key = DecryptionKey::with_primes_unchecked(&p, &q)
            .ok_or_else(|| Error::Crypto("Failed to build Paillier key from primes".into()))?;
        Ok(Self { decryption_key })
    }

    pub fn encryption_key(&self) -> EncryptionKey {
        EncryptionKey::from(&self.decryption_key)
    }

    pub(crate) fn modulus(&self) -> &BigNumber {
        self.decryption_key.n()
    }

    pub(crate) fn totient(&self) -> &BigNumber {
        self.decryption_key.totient()
    }

    /// Decrypt an MtA response and reduce it into the secp256k1 scalar field.
    ///
    /// An honest response encrypts `a * b + mask` with `a, b < q` and
    /// `mask < q^5`; anything larger was not built by the protocol.
    pub fn decrypt_mta(&self, ciphertext: &[u8]) -> Result<Scalar> {
        let ciphertext = BigNumber::from_slice(ciphertext);
        let plaintext = self
            .decryption_key
            .decrypt(&ciphertext)
            .ok_or_else(|| Error::ProtocolViolation("Undecryptable MtA response".into()))?;

        let q = curve_order();
        let bound = mask_bound() + &q * &q;
        if BigNumber::from_slice(&plaintext) >= bound {
            return Err(Error::ProtocolViolation(
                "MtA response plaintext out of range".into(),
            ));
        }
        Ok(scalar_from_be_bytes_mod_order(&plaintext))
    }

    /// Key pair from undersized primes, for exercising peer-key checks
    #[cfg(test)]
    pub(crate) fn generate_insecure(prime_bits: usize) -> Result<Self> {
        Self::from_random_primes(prime_bits)
    }
}

/// Order `q` of the secp256k1 group
pub(crate) fn curve_order() -> BigNumber {
    BigNumber::from_slice((-Scalar::ONE).to_bytes()) + BigNumber::one()
}

/// Upper bound (exclusive) of Bob's additive mask, `q^5`
fn mask_bound() -> BigNumber {
    let q = curve_order();
    let q2 = &q * &q;
    &(&q2 * &q2) * &q
}

/// Check a peer's encryption key is large enough for the MtA bounds and
/// free of small factors
pub fn validate_peer_key(key: &EncryptionKey) -> Result<()> {
    let n = key.n();
    if n.bit_length() < MIN_MODULUS_BITS {
        return Err(Error::ProtocolViolation(format!(
            "Paillier modulus too small: {} bits",
            n.bit_length()
        )));
    }
    if let Some(p) = proofs::small_factor(n) {
        return Err(Error::ProtocolViolation(format!(
            "Paillier modulus divisible by {}",
            p
        )));
    }
    Ok(())
}

/// Encrypt a scalar under `key`, returning the ciphertext bytes and the
/// encryption nonce (needed for a [`RangeProof`])
pub fn encrypt_scalar(key: &EncryptionKey, value: &Scalar) -> Result<(Vec<u8>, BigNumber)> {
    let (ciphertext, nonce) = key
        .encrypt(value.to_bytes(), None)
        .ok_or_else(|| Error::Crypto("Paillier encryption failed".into()))?;
    Ok((ciphertext.to_bytes(), nonce))
}

/// Bob's side of MtA.
///
/// Given Alice's `Enc(a)` under her key, returns `Enc(a * b + beta')` and
/// Bob's additive share `beta = -beta' mod q`, so that Alice's decryption
/// `alpha` satisfies `alpha + beta = a * b mod q`. `encrypted_a` must already
/// have passed [`RangeProof::verify`].
pub fn mta_respond(
    alice_key: &EncryptionKey,
    encrypted_a: &[u8],
    b: &Scalar,
) -> Result<(Vec<u8>, Scalar)> {
    let mask = BigNumber::random(&mask_bound());

    let encrypted_a = BigNumber::from_slice(encrypted_a);
    let b_value = BigNumber::from_slice(b.to_bytes());

    let product = alice_key
        .mul(&encrypted_a, &b_value)
        .ok_or_else(|| Error::ProtocolViolation("Invalid MtA ciphertext".into()))?;
    let (encrypted_mask, _nonce) = alice_key
        .encrypt(mask.to_bytes(), None)
        .ok_or_else(|| Error::Crypto("Paillier encryption failed".into()))?;
    let response = alice_key
        .add(&product, &encrypted_mask)
        .ok_or_else(|| Error::ProtocolViolation("Invalid MtA ciphertext".into()))?;

    let beta = -scalar_from_be_bytes_mod_order(&mask.to_bytes());
    Ok((response.to_bytes(), beta))
}
