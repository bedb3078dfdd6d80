//! Zero-knowledge proofs over Paillier moduli
//!
//! - [`ModulusProof`]: `N` is square-free, so Paillier decryption is well
//!   defined and `x -> x^N` is a bijection on `Z*_N`
//! - [`RingPedersenProof`]: `s` lies in the subgroup generated by `t`, so a
//!   commitment `s^x * t^r mod N` hides `x`
//! - [`RangeProof`]: a Paillier ciphertext encrypts a value below `q^3`,
//!   proven against the verifier's ring-Pedersen parameters
//!
//! All three are made non-interactive with SHA-256 over a caller-supplied
//! context (session id and parties), so a proof cannot be replayed into
//! another session or towards another verifier.

use super::{PaillierKeyPair, curve_order};
use crate::{Error, Result};
use libpaillier::EncryptionKey;
use libpaillier::unknown_order::BigNumber;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Moduli must have no prime factor below this bound
pub const SMALL_PRIME_BOUND: u64 = 1000;

/// `SMALL_PRIME_BOUND^13 > 2^128`
const MODULUS_PROOF_ROUNDS: usize = 13;

/// One challenge bit per round
const RING_PEDERSEN_ROUNDS: usize = 80;

struct Transcript(Sha256);

impl Transcript {
    fn new(domain: &str, context: &[u8]) -> Self {
        let mut transcript = Self(Sha256::new());
        transcript.append(domain.as_bytes());
        transcript.append(context);
        transcript
    }

    fn append(&mut self, bytes: &[u8]) {
        self.0.update((bytes.len() as u64).to_be_bytes());
        self.0.update(bytes);
    }

    fn append_number(&mut self, value: &BigNumber) {
        self.append(&value.to_bytes());
    }

    fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

/// `0 <= value < bound`
fn below(value: &BigNumber, bound: &BigNumber) -> bool {
    *value >= BigNumber::zero() && value < bound
}

/// Element of `Z*_n` (nonzero, in range, coprime to `n`)
fn is_unit(value: &BigNumber, n: &BigNumber) -> bool {
    !value.is_zero() && below(value, n) && value.gcd(n).is_one()
}

fn random_unit(n: &BigNumber) -> BigNumber {
    loop {
        let candidate = BigNumber::random(n);
        if is_unit(&candidate, n) {
            return candidate;
        }
    }
}

fn small_primes() -> impl Iterator<Item = u64> {
    (2..SMALL_PRIME_BOUND).filter(|candidate| {
        (2..)
            .take_while(|d| d * d <= *candidate)
            .all(|d| candidate % d != 0)
    })
}

/// Smallest prime below [`SMALL_PRIME_BOUND`] dividing `n`
pub(crate) fn small_factor(n: &BigNumber) -> Option<u64> {
    small_primes().find(|p| n.nmod(&BigNumber::from(*p)).is_zero())
}

// ============ Modulus Proof ============

/// Proof that a Paillier modulus is square-free.
///
/// The prover returns an `N`-th root of each of [`MODULUS_PROOF_ROUNDS`]
/// hash-derived challenges. Roots exist for every challenge only when
/// `gcd(N, phi(N)) = 1`; together with the small-factor check in
/// [`super::validate_peer_key`] a cheating prover succeeds with probability
/// below `2^-128`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulusProof {
    pub(crate) roots: Vec<BigNumber>,
}

fn modulus_challenges(n: &BigNumber, context: &[u8]) -> Vec<BigNumber> {
    let len = n.to_bytes().len();
    let mut challenges = Vec::with_capacity(MODULUS_PROOF_ROUNDS);
    let mut attempt = 0u64;

    while challenges.len() < MODULUS_PROOF_ROUNDS {
        let mut bytes = Vec::with_capacity(len + 32);
        let mut block = 0u64;
        while bytes.len() < len {
            let mut transcript = Transcript::new("paillier-modulus", context);
            transcript.append_number(n);
            transcript.append(&(challenges.len() as u64).to_be_bytes());
            transcript.append(&attempt.to_be_bytes());
            transcript.append(&block.to_be_bytes());
            bytes.extend_from_slice(&transcript.finalize());
            block += 1;
        }
        bytes.truncate(len);

        let candidate = BigNumber::from_slice(&bytes);
        if is_unit(&candidate, n) {
            challenges.push(candidate);
            attempt = 0;
        } else {
            attempt += 1;
        }
    }
    challenges
}

impl ModulusProof {
    pub fn prove(key: &PaillierKeyPair, context: &[u8]) -> Result<Self> {
        let n = key.modulus();
        let exponent = n
            .invert(key.totient())
            .ok_or_else(|| Error::Crypto("Paillier modulus is not square-free".into()))?;

        let roots = modulus_challenges(n, context)
            .iter()
            .map(|x| x.modpow(&exponent, n))
            .collect();
        Ok(Self { roots })
    }

    pub fn verify(&self, key: &EncryptionKey, context: &[u8]) -> Result<()> {
        let n = key.n();
        if n.is_zero() || n.is_one() {
            return Err(Error::ProtocolViolation("Empty Paillier modulus".into()));
        }
        if self.roots.len() != MODULUS_PROOF_ROUNDS {
            return Err(Error::ProtocolViolation(format!(
                "Paillier modulus proof has {} roots, expected {}",
                self.roots.len(),
                MODULUS_PROOF_ROUNDS
            )));
        }

        let challenges = modulus_challenges(n, context);
        for (challenge, root) in challenges.iter().zip(&self.roots) {
            if !below(root, n) || root.modpow(n, n) != *challenge {
                return Err(Error::ProtocolViolation(
                    "Paillier modulus proof does not verify".into(),
                ));
            }
        }
        Ok(())
    }
}

// ============ Ring-Pedersen Parameters ============

/// Commitment parameters `(N, s, t)` with `s = t^lambda mod N`
///
/// The verifier of a [`RangeProof`] generates these over its own Paillier
/// modulus; the prover never learns the factorisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingPedersen {
    pub n: BigNumber,
    pub s: BigNumber,
    pub t: BigNumber,
}

/// Proof of knowledge of `lambda` with `s = t^lambda mod N`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingPedersenProof {
    pub(crate) commitments: Vec<BigNumber>,
    pub(crate) responses: Vec<BigNumber>,
}

impl RingPedersen {
    /// Fresh parameters over `key`'s modulus, with a proof they are well formed
    pub fn generate(key: &PaillierKeyPair, context: &[u8]) -> (Self, RingPedersenProof) {
        let n = key.modulus();
        let phi = key.totient();

        let r = random_unit(n);
        let t = r.modmul(&r, n);
        let lambda = BigNumber::random(phi);
        let s = t.modpow(&lambda, n);

        let params = Self {
            n: n.clone(),
            s,
            t,
        };
        let proof = RingPedersenProof::prove(&params, &lambda, phi, context);
        (params, proof)
    }

    /// `s^x * t^r mod N`
    fn commit(&self, x: &BigNumber, r: &BigNumber) -> BigNumber {
        self.s
            .modpow(x, &self.n)
            .modmul(&self.t.modpow(r, &self.n), &self.n)
    }

    fn check(&self) -> Result<()> {
        if !is_unit(&self.s, &self.n)
            || !is_unit(&self.t, &self.n)
            || self.s.is_one()
            || self.t.is_one()
        {
            return Err(Error::ProtocolViolation(
                "Degenerate ring-Pedersen parameters".into(),
            ));
        }
        Ok(())
    }
}

fn ring_pedersen_challenge(params: &RingPedersen, commitments: &[BigNumber], context: &[u8]) -> Vec<bool> {
    let mut transcript = Transcript::new("ring-pedersen", context);
    transcript.append_number(&params.n);
    transcript.append_number(&params.s);
    transcript.append_number(&params.t);
    for commitment in commitments {
        transcript.append_number(commitment);
    }
    let digest = transcript.finalize();
    (0..RING_PEDERSEN_ROUNDS)
        .map(|i| (digest[i / 8] >> (i % 8)) & 1 == 1)
        .collect()
}

impl RingPedersenProof {
    fn prove(params: &RingPedersen, lambda: &BigNumber, phi: &BigNumber, context: &[u8]) -> Self {
        let nonces: Vec<BigNumber> = (0..RING_PEDERSEN_ROUNDS)
            .map(|_| BigNumber::random(phi))
            .collect();
        let commitments: Vec<BigNumber> = nonces
            .iter()
            .map(|a| params.t.modpow(a, &params.n))
            .collect();

        let bits = ring_pedersen_challenge(params, &commitments, context);
        let responses = nonces
            .iter()
            .zip(bits)
            .map(|(a, bit)| if bit { a.modadd(lambda, phi) } else { a.clone() })
            .collect();

        Self {
            commitments,
            responses,
        }
    }

    pub fn verify(&self, params: &RingPedersen, context: &[u8]) -> Result<()> {
        params.check()?;
        if self.commitments.len() != RING_PEDERSEN_ROUNDS
            || self.responses.len() != RING_PEDERSEN_ROUNDS
        {
            return Err(Error::ProtocolViolation(
                "Ring-Pedersen proof has the wrong number of rounds".into(),
            ));
        }

        let n = &params.n;
        let bits = ring_pedersen_challenge(params, &self.commitments, context);
        for ((commitment, response), bit) in self.commitments.iter().zip(&self.responses).zip(bits) {
            if !is_unit(commitment, n) || !below(response, n) {
                return Err(Error::ProtocolViolation(
                    "Ring-Pedersen proof value out of range".into(),
                ));
            }
            let expected = if bit {
                commitment.modmul(&params.s, n)
            } else {
                commitment.clone()
            };
            if params.t.modpow(response, n) != expected {
                return Err(Error::ProtocolViolation(
                    "Ring-Pedersen proof does not verify".into(),
                ));
            }
        }
        Ok(())
    }
}

// ============ Range Proof ============

/// Proof that `c = (1 + N)^m * r^N mod N^2` encrypts `m < q^3`
///
/// Sigma protocol with commitments under the verifier's [`RingPedersen`]
/// parameters. Honest provers use `m < q`; the slack up to `q^3` is what the
/// MtA mask is sized for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeProof {
    /// `s^m * t^rho mod N~`
    pub(crate) z: BigNumber,
    /// `(1 + N)^alpha * beta^N mod N^2`
    pub(crate) u: BigNumber,
    /// `s^alpha * t^gamma mod N~`
    pub(crate) w: BigNumber,
    /// `r^e * beta mod N`
    pub(crate) s: BigNumber,
    /// `e * m + alpha`
    pub(crate) s1: BigNumber,
    /// `e * rho + gamma`
    pub(crate) s2: BigNumber,
}

/// `(1 + N)^x mod N^2 = 1 + x * N mod N^2`
fn paillier_base_pow(x: &BigNumber, key: &EncryptionKey) -> BigNumber {
    x.nmod(key.n())
        .modmul(key.n(), key.nn())
        .modadd(&BigNumber::one(), key.nn())
}

fn range_challenge(
    key: &EncryptionKey,
    ciphertext: &BigNumber,
    verifier: &RingPedersen,
    proof: (&BigNumber, &BigNumber, &BigNumber),
    context: &[u8],
) -> BigNumber {
    let mut transcript = Transcript::new("paillier-range", context);
    for value in [
        key.n(),
        ciphertext,
        &verifier.n,
        &verifier.s,
        &verifier.t,
        proof.0,
        proof.1,
        proof.2,
    ] {
        transcript.append_number(value);
    }
    BigNumber::from_slice(transcript.finalize()).nmod(&curve_order())
}

impl RangeProof {
    /// Prove `ciphertext` encrypts `value` with encryption nonce `nonce`
    pub fn prove(
        key: &EncryptionKey,
        ciphertext: &BigNumber,
        value: &BigNumber,
        nonce: &BigNumber,
        verifier: &RingPedersen,
        context: &[u8],
    ) -> Self {
        let q = curve_order();
        let q3 = &(&q * &q) * &q;
        let n = key.n();

        let alpha = BigNumber::random(&q3);
        let beta = random_unit(n);
        let gamma = BigNumber::random(&(&q3 * &verifier.n));
        let rho = BigNumber::random(&(&q * &verifier.n));

        let z = verifier.commit(value, &rho);
        let u = paillier_base_pow(&alpha, key).modmul(&beta.modpow(n, key.nn()), key.nn());
        let w = verifier.commit(&alpha, &gamma);

        let e = range_challenge(key, ciphertext, verifier, (&z, &u, &w), context);

        Self {
            s: nonce.modpow(&e, n).modmul(&beta, n),
            s1: &(&e * value) + &alpha,
            s2: &(&e * &rho) + &gamma,
            z,
            u,
            w,
        }
    }

    /// Verify against the prover's key and the verifier's own parameters
    pub fn verify(
        &self,
        key: &EncryptionKey,
        ciphertext: &BigNumber,
        verifier: &RingPedersen,
        context: &[u8],
    ) -> Result<()> {
        let q = curve_order();
        let q3 = &(&q * &q) * &q;
        let n = key.n();
        let nn = key.nn();

        if !below(&self.s1, &(&q3 + &BigNumber::one())) {
            return Err(Error::ProtocolViolation(
                "Encrypted value is out of range".into(),
            ));
        }
        if !below(&self.s2, &(&(&q3 * &verifier.n) * &(&q + &BigNumber::one())))
            || !is_unit(&self.z, &verifier.n)
            || !is_unit(&self.w, &verifier.n)
            || !is_unit(&self.u, nn)
            || !is_unit(&self.s, n)
            || !is_unit(ciphertext, nn)
        {
            return Err(Error::ProtocolViolation(
                "Range proof value out of range".into(),
            ));
        }

        let e = range_challenge(key, ciphertext, verifier, (&self.z, &self.u, &self.w), context);

        let lhs = paillier_base_pow(&self.s1, key).modmul(&self.s.modpow(n, nn), nn);
        let rhs = self.u.modmul(&ciphertext.modpow(&e, nn), nn);
        if lhs != rhs {
            return Err(Error::ProtocolViolation(
                "Range proof does not match the ciphertext".into(),
            ));
        }

        let lhs = verifier.commit(&self.s1, &self.s2);
        let rhs = self.w.modmul(&self.z.modpow(&e, &verifier.n), &verifier.n);
        if lhs != rhs {
            return Err(Error::ProtocolViolation(
                "Range proof commitment does not verify".into(),
            ));
        }
        Ok(())
    }
}
