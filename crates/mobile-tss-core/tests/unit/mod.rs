//! Unit tests module
//!
//! - Free functions (threshold, derivation, DER encoding)
//! - State stores

pub mod primitives_test;
pub mod storage_test;
