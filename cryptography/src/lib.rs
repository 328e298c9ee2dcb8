//! Generate keys, sign messages, and deterministically verify signatures for a randomness beacon.
//!
//! # Status
//!
//! `beacon-cryptography` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

pub mod bls12381;
