//! Fuzz tests module
//!
//! Property-based testing using proptest to find edge cases in request
//! parsing and wire decoding.

pub mod input_fuzz;
