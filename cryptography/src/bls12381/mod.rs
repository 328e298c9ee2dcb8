//! Threshold BLS12-381 signatures and the distributed key generation that produces their keys.
//!
//! # Features
//!
//! * Public keys in G1, signatures in G2
//! * Threshold signatures recovered from partial signatures by Lagrange interpolation
//! * Share encryption to a participant's identity key ([ecies])
//! * Joint-Feldman DKG with complaints and justifications ([dkg])

pub mod dkg;
pub mod ecies;
pub mod primitives;
