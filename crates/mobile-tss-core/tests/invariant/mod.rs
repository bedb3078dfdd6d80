//! Invariant tests module
//!
//! - Every party derives the same public key
//! - Any `threshold + 1` subset can sign
//! - Resharing never changes the public key

pub mod key_invariant;
